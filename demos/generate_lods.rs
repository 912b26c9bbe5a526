//! Generate LOD levels for a mesh
//!
//! Reads a buffer-geometry JSON file (`positions`, `indices`, `uvs`) or
//! builds a procedural UV sphere, runs the LOD preset of a category and
//! prints a JSON summary. With `--output-dir` every level is also written
//! back as buffer-geometry JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use meshlod_core::primitives::uv_sphere;
use meshlod_core::{BufferGeometry, TexturedMesh};
use meshlod_simplification::{
    generate_lod_levels_with_options, DecimationOptions, LodPreset, Strictness,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Seam-aware LOD generation
#[derive(Parser, Debug)]
#[command(name = "generate_lods")]
#[command(about = "Decimates a mesh into the LOD levels of a category preset")]
struct Args {
    /// Buffer-geometry JSON file; a UV sphere is used when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Asset category selecting the preset (tree, rock, plant, bush)
    #[arg(short, long, default_value = "default")]
    category: String,

    /// Strictness for levels that do not set one (0, 1 or 2)
    #[arg(short, long, default_value_t = 2)]
    strictness: u8,

    /// Weld buffer vertices closer than this before decimating
    #[arg(long, default_value_t = 1e-5)]
    weld: f32,

    /// Sphere segments around and top to bottom
    #[arg(long, default_value_t = 32)]
    width_segments: usize,
    #[arg(long, default_value_t = 24)]
    height_segments: usize,

    /// Directory to write one buffer-geometry JSON file per level into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct LevelReport<'a> {
    name: &'a str,
    target_percent: f64,
    vertices: usize,
    faces: usize,
    reduction_percent: f64,
    processing_time_ms: f64,
}

#[derive(Serialize)]
struct Report<'a> {
    category: &'a str,
    preset: String,
    original_vertices: usize,
    original_faces: usize,
    seam_vertices: usize,
    levels: Vec<LevelReport<'a>>,
    total_time_ms: f64,
}

fn load_mesh(args: &Args) -> Result<TexturedMesh> {
    match &args.input {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let geometry: BufferGeometry = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse buffer geometry in {}", path.display()))?;
            let mesh = TexturedMesh::from_buffer_geometry_welded(&geometry, args.weld)?;
            Ok(mesh)
        }
        None => Ok(uv_sphere(1.0, args.width_segments, args.height_segments)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mesh = load_mesh(&args)?;
    let preset = LodPreset::from_category(&args.category);
    let strictness = Strictness::try_from(args.strictness)?;

    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        preset = %preset,
        "Loaded mesh"
    );

    let base = DecimationOptions::new().with_strictness(strictness);
    let summary = generate_lod_levels_with_options(&mesh, &preset.levels(), &base)?;

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
        for level in &summary.levels {
            let path = dir.join(format!("{}.json", level.name));
            let json = serde_json::to_string(&level.mesh().to_buffer_geometry())?;
            fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(level = %level.name, path = %path.display(), "Wrote level");
        }
    }

    let report = Report {
        category: &args.category,
        preset: preset.to_string(),
        original_vertices: summary.original_vertices,
        original_faces: mesh.face_count(),
        seam_vertices: mesh.seam_vertex_count(),
        levels: summary
            .levels
            .iter()
            .map(|level| LevelReport {
                name: &level.name,
                target_percent: level.target_percent,
                vertices: level.result.final_vertices,
                faces: level.result.final_faces,
                reduction_percent: level.result.reduction_percent,
                processing_time_ms: level.result.processing_time_ms,
            })
            .collect(),
        total_time_ms: summary.total_time_ms,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    for level in &summary.levels {
        eprintln!("{}: {}", level.name, level.result);
    }
    Ok(())
}
