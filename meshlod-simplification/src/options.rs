//! Decimation options

use std::f64::consts::PI;
use std::fmt;

use meshlod_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How strongly texture coordinates constrain a collapse.
///
/// Serialized as the integers `0`, `1` and `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Strictness {
    /// Position and UV are minimized jointly with no extra constraints
    Free = 0,
    /// UV error is weighted up and merged UVs stay inside the span of their
    /// source UVs
    PreserveUvShape = 1,
    /// Seam edges keep both sides on their UV segments; collapses that would
    /// tear a seam are refused
    #[default]
    SeamAware = 2,
}

impl TryFrom<u8> for Strictness {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::PreserveUvShape),
            2 => Ok(Self::SeamAware),
            other => Err(Error::InvalidOptions(format!(
                "strictness must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<Strictness> for u8 {
    fn from(strictness: Strictness) -> Self {
        strictness as u8
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::PreserveUvShape => "preserve-uv-shape",
            Self::SeamAware => "seam-aware",
        };
        f.write_str(name)
    }
}

/// Options for [`decimate`](crate::decimate)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationOptions {
    /// Absolute vertex target; takes precedence over `target_percent`
    pub target_vertices: Option<usize>,
    /// Target as a percentage of the input vertex count, in `(0, 100]`
    pub target_percent: Option<f64>,
    pub strictness: Strictness,
    /// Largest allowed rotation of a face normal by one collapse, in radians
    pub max_normal_deviation: f64,
    /// UV error weight for the non-free strictness levels
    pub uv_weight: f64,
    /// Weight of the planes holding open boundaries in place
    pub boundary_weight: f64,
    /// Merge near-identical texcoords of a vertex before decimating
    pub uv_weld_tolerance: Option<f32>,
}

impl Default for DecimationOptions {
    fn default() -> Self {
        Self {
            target_vertices: None,
            target_percent: None,
            strictness: Strictness::default(),
            max_normal_deviation: 75f64.to_radians(),
            uv_weight: 4.0,
            boundary_weight: 10.0,
            uv_weld_tolerance: None,
        }
    }
}

impl DecimationOptions {
    /// Percentage used when neither target is set
    pub const DEFAULT_TARGET_PERCENT: f64 = 50.0;

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_target_vertices(mut self, target: usize) -> Self {
        self.target_vertices = Some(target);
        self
    }

    #[must_use]
    pub fn with_target_percent(mut self, percent: f64) -> Self {
        self.target_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Set the normal deviation threshold in degrees
    #[must_use]
    pub fn with_max_normal_deviation_degrees(mut self, degrees: f64) -> Self {
        self.max_normal_deviation = degrees.to_radians();
        self
    }

    #[must_use]
    pub fn with_uv_weight(mut self, weight: f64) -> Self {
        self.uv_weight = weight;
        self
    }

    #[must_use]
    pub fn with_boundary_weight(mut self, weight: f64) -> Self {
        self.boundary_weight = weight;
        self
    }

    #[must_use]
    pub fn with_uv_weld_tolerance(mut self, tolerance: f32) -> Self {
        self.uv_weld_tolerance = Some(tolerance);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(percent) = self.target_percent {
            if !(percent > 0.0 && percent <= 100.0) {
                return Err(Error::InvalidOptions(format!(
                    "target percent must be in (0, 100], got {percent}"
                )));
            }
        }
        if !(self.max_normal_deviation > 0.0 && self.max_normal_deviation <= PI) {
            return Err(Error::InvalidOptions(format!(
                "max normal deviation must be in (0, pi], got {}",
                self.max_normal_deviation
            )));
        }
        for (name, value) in [("uv weight", self.uv_weight), ("boundary weight", self.boundary_weight)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidOptions(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if let Some(tolerance) = self.uv_weld_tolerance {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(Error::InvalidOptions(format!(
                    "uv weld tolerance must be finite and non-negative, got {tolerance}"
                )));
            }
        }
        Ok(())
    }

    /// Vertex count to decimate `original` vertices down to
    pub fn target_vertex_count(&self, original: usize) -> usize {
        match self.target_vertices {
            Some(target) => target.min(original),
            None => {
                let percent = self.target_percent.unwrap_or(Self::DEFAULT_TARGET_PERCENT);
                ((original as f64 * percent / 100.0).ceil() as usize).min(original)
            }
        }
    }
}
