//! LOD orchestration
//!
//! Every level is decimated from its own clone of the full-resolution
//! source, never from the previous level, so all levels derive from the
//! original geometry. Levels are independent and run in parallel.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use meshlod_core::{Result, TexturedMesh};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decimate::decimate;
use crate::options::{DecimationOptions, Strictness};
use crate::result::DecimationResult;

/// One level of a LOD chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodLevelConfig {
    pub name: String,
    /// Target as a percentage of the source vertex count
    pub target_percent: f64,
    /// Floor on the level's vertex count, expressed by raising the percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_vertices: Option<usize>,
    /// Overrides the strictness of the base options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strictness: Option<Strictness>,
}

impl LodLevelConfig {
    pub fn new(name: impl Into<String>, target_percent: f64) -> Self {
        Self {
            name: name.into(),
            target_percent,
            min_vertices: None,
            strictness: None,
        }
    }

    #[must_use]
    pub fn with_min_vertices(mut self, min_vertices: usize) -> Self {
        self.min_vertices = Some(min_vertices);
        self
    }

    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = Some(strictness);
        self
    }

    /// Percentage actually used for a source of `vertex_count` vertices:
    /// the configured one, raised so at least `min_vertices` remain, capped
    /// at 100
    pub fn effective_percent(&self, vertex_count: usize) -> f64 {
        let floor = match self.min_vertices {
            Some(min) if vertex_count > 0 => 100.0 * min as f64 / vertex_count as f64,
            _ => 0.0,
        };
        self.target_percent.max(floor).min(100.0)
    }
}

/// Canned LOD chains per asset category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodPreset {
    Tree,
    Rock,
    Plant,
    Bush,
    #[default]
    Default,
}

impl LodPreset {
    pub const ALL: [LodPreset; 5] = [Self::Tree, Self::Rock, Self::Plant, Self::Bush, Self::Default];

    /// Preset for a category name; unknown names map to [`LodPreset::Default`]
    pub fn from_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "tree" => Self::Tree,
            "rock" => Self::Rock,
            "plant" => Self::Plant,
            "bush" => Self::Bush,
            _ => Self::Default,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Rock => "rock",
            Self::Plant => "plant",
            Self::Bush => "bush",
            Self::Default => "default",
        }
    }

    /// Levels of the preset, finest first
    pub fn levels(&self) -> Vec<LodLevelConfig> {
        match self {
            Self::Tree => vec![
                LodLevelConfig::new("lod1", 30.0).with_min_vertices(100),
                LodLevelConfig::new("lod2", 10.0).with_min_vertices(100),
            ],
            Self::Rock => vec![
                LodLevelConfig::new("lod1", 40.0).with_min_vertices(50),
                LodLevelConfig::new("lod2", 15.0).with_min_vertices(50),
            ],
            Self::Plant => vec![
                LodLevelConfig::new("lod1", 50.0)
                    .with_min_vertices(50)
                    .with_strictness(Strictness::PreserveUvShape),
                LodLevelConfig::new("lod2", 25.0)
                    .with_min_vertices(50)
                    .with_strictness(Strictness::PreserveUvShape),
            ],
            Self::Bush => vec![
                LodLevelConfig::new("lod1", 35.0).with_min_vertices(80),
                LodLevelConfig::new("lod2", 12.0).with_min_vertices(80),
            ],
            Self::Default => vec![
                LodLevelConfig::new("lod1", 50.0).with_min_vertices(50),
                LodLevelConfig::new("lod2", 25.0).with_min_vertices(50),
            ],
        }
    }
}

impl FromStr for LodPreset {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_category(s))
    }
}

impl fmt::Display for LodPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One generated level
#[derive(Debug, Clone, Serialize)]
pub struct LodLevel {
    pub name: String,
    /// Percentage the level was decimated to after `min_vertices`
    pub target_percent: f64,
    pub result: DecimationResult,
}

impl LodLevel {
    pub fn mesh(&self) -> &TexturedMesh {
        &self.result.mesh
    }
}

/// All levels generated for one source mesh
#[derive(Debug, Clone, Serialize)]
pub struct LodSummary {
    pub original_vertices: usize,
    /// Levels in configuration order
    pub levels: Vec<LodLevel>,
    pub total_time_ms: f64,
}

impl LodSummary {
    /// `(name, final vertex count)` per level
    pub fn vertex_counts(&self) -> Vec<(&str, usize)> {
        self.levels
            .iter()
            .map(|level| (level.name.as_str(), level.result.final_vertices))
            .collect()
    }

    pub fn level(&self, name: &str) -> Option<&LodLevel> {
        self.levels.iter().find(|level| level.name == name)
    }
}

/// Generate one level per config with default decimation options
pub fn generate_lod_levels(mesh: &TexturedMesh, configs: &[LodLevelConfig]) -> Result<LodSummary> {
    generate_lod_levels_with_options(mesh, configs, &DecimationOptions::default())
}

/// Generate one level per config, each starting from `base` with the level's
/// target and strictness applied
pub fn generate_lod_levels_with_options(
    mesh: &TexturedMesh,
    configs: &[LodLevelConfig],
    base: &DecimationOptions,
) -> Result<LodSummary> {
    let start = Instant::now();
    let original_vertices = mesh.vertex_count();
    info!(original = original_vertices, levels = configs.len(), "Generating LOD levels");

    let levels = configs
        .par_iter()
        .map(|config| {
            let source = mesh.clone();
            let target_percent = config.effective_percent(original_vertices);
            let mut options = base.clone().with_target_percent(target_percent);
            options.target_vertices = None;
            if let Some(strictness) = config.strictness {
                options.strictness = strictness;
            }

            let result = decimate(&source, &options)?;
            debug!(
                level = %config.name,
                target_percent,
                final_vertices = result.final_vertices,
                elapsed_ms = result.processing_time_ms,
                "LOD level generated"
            );
            Ok(LodLevel {
                name: config.name.clone(),
                target_percent,
                result,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LodSummary {
        original_vertices,
        levels,
        total_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Generate the levels of the preset for `category`
pub fn generate_lod_levels_from_preset(mesh: &TexturedMesh, category: &str) -> Result<LodSummary> {
    let preset = LodPreset::from_category(category);
    debug!(category, preset = %preset, "Resolved LOD preset");
    generate_lod_levels(mesh, &preset.levels())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlod_core::primitives::uv_sphere;

    #[test]
    fn test_effective_percent() {
        let config = LodLevelConfig::new("lod1", 10.0).with_min_vertices(50);
        assert_eq!(config.effective_percent(1000), 10.0);
        assert_eq!(config.effective_percent(200), 25.0);
        assert_eq!(config.effective_percent(20), 100.0);
        assert_eq!(LodLevelConfig::new("lod1", 10.0).effective_percent(0), 10.0);
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(LodPreset::from_category("Tree"), LodPreset::Tree);
        assert_eq!(LodPreset::from_category(" rock "), LodPreset::Rock);
        assert_eq!(LodPreset::from_category("building"), LodPreset::Default);
        assert_eq!("bush".parse::<LodPreset>(), Ok(LodPreset::Bush));
        assert_eq!(LodPreset::Plant.to_string(), "plant");
    }

    #[test]
    fn test_presets_are_monotone() {
        for preset in LodPreset::ALL {
            let levels = preset.levels();
            assert_eq!(levels.len(), 2);
            assert_eq!(levels[0].name, "lod1");
            assert_eq!(levels[1].name, "lod2");
            for v in [10, 100, 1000, 100_000] {
                assert!(levels[1].effective_percent(v) <= levels[0].effective_percent(v));
            }
        }
        assert_eq!(LodPreset::Plant.levels()[0].strictness, Some(Strictness::PreserveUvShape));
    }

    #[test]
    fn test_config_serde() {
        let config: LodLevelConfig =
            serde_json::from_str(r#"{"name": "far", "target_percent": 5, "strictness": 0}"#).unwrap();
        assert_eq!(config.name, "far");
        assert_eq!(config.min_vertices, None);
        assert_eq!(config.strictness, Some(Strictness::Free));

        let json = serde_json::to_string(&LodLevelConfig::new("near", 75.0)).unwrap();
        assert!(!json.contains("min_vertices"));
    }

    #[test]
    fn test_levels_in_config_order() {
        let sphere = uv_sphere(1.0, 16, 12);
        let configs = vec![
            LodLevelConfig::new("a", 20.0),
            LodLevelConfig::new("b", 80.0),
            LodLevelConfig::new("c", 50.0).with_strictness(Strictness::Free),
        ];
        let summary = generate_lod_levels(&sphere, &configs).unwrap();
        let names: Vec<&str> = summary.levels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(summary.original_vertices, sphere.vertex_count());
        assert!(summary.level("b").unwrap().result.final_vertices >= summary.level("a").unwrap().result.final_vertices);
        assert!(summary.level("missing").is_none());

        // Each level equals a standalone decimation of the source
        let standalone = decimate(&sphere, &DecimationOptions::new().with_target_percent(80.0)).unwrap();
        assert_eq!(summary.level("b").unwrap().result.mesh, standalone.mesh);
    }

    #[test]
    fn test_invalid_level_fails() {
        let sphere = uv_sphere(1.0, 8, 6);
        let configs = vec![LodLevelConfig::new("bad", -5.0)];
        assert!(generate_lod_levels(&sphere, &configs).is_err());
    }
}
