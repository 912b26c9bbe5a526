//! # meshlod
//!
//! Seam-aware mesh decimation and level-of-detail generation for Rust.
//!
//! This is the umbrella crate that re-exports the textured mesh types and
//! the decimation engine in one place. Use the individual crates for more
//! granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Textured triangle meshes, vertex bundles, buffer-geometry adapters
//! - **Simplification**: Quadric edge-collapse decimation, LOD presets
//!
//! ## Quick Start
//!
//! ```rust
//! use meshlod::prelude::*;
//! use meshlod::primitives::uv_sphere;
//!
//! let sphere = uv_sphere(1.0, 32, 24);
//! let summary = generate_lod_levels_from_preset(&sphere, "tree").unwrap();
//! for (name, vertices) in summary.vertex_counts() {
//!     println!("{name}: {vertices} vertices");
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables simplification
//! - `simplification`: The decimation engine and LOD orchestration

// Re-export core functionality
pub use meshlod_core::*;

#[cfg(feature = "simplification")]
pub use meshlod_simplification as simplification;

/// Convenient imports for common use cases
pub mod prelude {
    pub use meshlod_core::{BufferGeometry, Error, Result, TexturedMesh, VertexBundle};

    #[cfg(feature = "simplification")]
    pub use meshlod_simplification::{
        decimate, generate_lod_levels, generate_lod_levels_from_preset, generate_lod_levels_with_options,
        DecimationOptions, DecimationResult, LodLevelConfig, LodPreset, LodSummary, MeshDecimator, Strictness,
    };
}
