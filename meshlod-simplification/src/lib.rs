//! Seam-aware mesh decimation and LOD generation
//!
//! This crate reduces textured triangle meshes while keeping their shape,
//! silhouette and UV seams:
//! - Position + UV quadric error metrics kept per (vertex, texcoord) bundle
//! - Greedy edge collapse driven by a lazily invalidated priority queue
//! - Optimal placement through Cholesky or a dual active-set QP solver
//! - Multi-level LOD generation with per-category presets

pub mod options;
pub mod result;
pub mod edge_flaps;
pub mod quadric;
pub mod simd;
pub mod quadprog;
pub mod placement;
pub mod queue;
pub mod decimate;
pub mod lod;

pub use options::*;
pub use result::*;
pub use decimate::{decimate, decimate_with_kernel};
pub use lod::*;
pub use simd::QuadricKernel;

use meshlod_core::{Result, TexturedMesh};

/// Something that can reduce a textured mesh
pub trait MeshDecimator {
    /// Decimate `mesh`, leaving it untouched
    fn decimate(&self, mesh: &TexturedMesh) -> Result<DecimationResult>;
}

impl MeshDecimator for DecimationOptions {
    fn decimate(&self, mesh: &TexturedMesh) -> Result<DecimationResult> {
        decimate::decimate(mesh, self)
    }
}

impl MeshDecimator for LodLevelConfig {
    /// Decimate with default options at this level's effective target
    fn decimate(&self, mesh: &TexturedMesh) -> Result<DecimationResult> {
        let mut options = DecimationOptions::new().with_target_percent(self.effective_percent(mesh.vertex_count()));
        if let Some(strictness) = self.strictness {
            options.strictness = strictness;
        }
        decimate::decimate(mesh, &options)
    }
}
