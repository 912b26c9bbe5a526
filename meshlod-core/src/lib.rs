//! Core data structures for meshlod
//!
//! This crate provides the textured triangle mesh consumed and produced by
//! the decimation engine, the (vertex, texcoord) bundle that identifies a
//! corner across UV seams, adapters to flat rendering buffers, and a few
//! procedural primitives.

pub mod point;
pub mod mesh;
pub mod buffer;
pub mod primitives;
pub mod error;

pub use point::*;
pub use mesh::*;
pub use buffer::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix6, Point2, Point3, Vector2, Vector3, Vector6};

// Type aliases for easier imports
pub type Mesh = TexturedMesh;
