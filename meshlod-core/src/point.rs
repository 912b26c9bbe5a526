//! Point types and related functionality

use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A texture coordinate with floating point components
pub type Point2f = Point2<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A 2D vector with double precision components
pub type Vector2d = Vector2<f64>;

/// The corner identity of seam-aware decimation: a vertex position paired
/// with one of the texture coordinates it carries.
///
/// One position may map to several texcoords across a UV seam, so two
/// bundles are equal only when both indices match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexBundle {
    pub vertex: usize,
    pub tex_coord: usize,
}

impl VertexBundle {
    pub fn new(vertex: usize, tex_coord: usize) -> Self {
        Self { vertex, tex_coord }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3f,
    pub max: Point3f,
}

impl BoundingBox {
    /// Smallest box containing all points, `None` for an empty slice
    pub fn from_points(points: &[Point3f]) -> Option<Self> {
        let first = *points.first()?;
        let mut min = first;
        let mut max = first;
        for p in &points[1..] {
            min = min.inf(p);
            max = max.sup(p);
        }
        Some(Self { min, max })
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f32 {
        (self.max - self.min).norm()
    }
}
