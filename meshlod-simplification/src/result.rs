//! Result types for decimation

use std::fmt;

use meshlod_core::TexturedMesh;
use serde::{Deserialize, Serialize};

/// Topology found in the input mesh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Edges shared by more than two faces; their vertices are locked
    pub non_manifold_edges: usize,
    /// Edges whose two faces traverse them in the same direction; their
    /// vertices are locked
    pub inconsistent_winding_edges: usize,
    /// Faces repeating a vertex index, dropped from the output
    pub degenerate_faces: usize,
    /// Vertices carrying two or more texcoords
    pub seam_vertices: usize,
    /// Edges whose two faces disagree on a texcoord
    pub seam_edges: usize,
    pub boundary_edges: usize,
}

impl TopologyReport {
    /// Whether any edge had to be excluded from collapsing
    pub fn has_defects(&self) -> bool {
        self.non_manifold_edges > 0 || self.inconsistent_winding_edges > 0
    }
}

/// Counters collected by the collapse loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimationStats {
    pub collapses_performed: usize,
    /// Collapses refused because a face normal would flip
    pub collapses_rejected_flip: usize,
    /// Collapses refused because the result would be non-manifold or tear
    /// a seam
    pub collapses_rejected_topology: usize,
    /// Applied collapses whose placement fell back to the anchor point
    pub degenerate_placements: usize,
    /// Superseded queue entries discarded on pop
    pub stale_entries_skipped: usize,
    pub topology: TopologyReport,
}

/// Result of decimating one mesh
#[derive(Debug, Clone, Serialize)]
pub struct DecimationResult {
    /// The decimated, compacted mesh
    #[serde(skip_serializing)]
    pub mesh: TexturedMesh,
    pub original_vertices: usize,
    pub final_vertices: usize,
    pub original_faces: usize,
    pub final_faces: usize,
    /// Percentage of vertices removed
    pub reduction_percent: f64,
    /// Wall-clock time spent in the call
    pub processing_time_ms: f64,
    pub stats: DecimationStats,
}

/// Percentage of `original` vertices removed when `remaining` are left
fn reduction_percent(original: usize, remaining: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        (1.0 - remaining as f64 / original as f64) * 100.0
    }
}

impl DecimationResult {
    /// Build the result for `mesh`, taking the final counts from it
    pub fn new(
        mesh: TexturedMesh,
        original_vertices: usize,
        original_faces: usize,
        processing_time_ms: f64,
        stats: DecimationStats,
    ) -> Self {
        let final_vertices = mesh.vertex_count();
        Self {
            original_vertices,
            final_vertices,
            original_faces,
            final_faces: mesh.face_count(),
            reduction_percent: reduction_percent(original_vertices, final_vertices),
            processing_time_ms,
            stats,
            mesh,
        }
    }

    pub fn was_decimated(&self) -> bool {
        self.stats.collapses_performed > 0
    }
}

impl fmt::Display for DecimationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Decimation: {} -> {} vertices, {} -> {} faces ({:.1}% reduction, {} collapses, {:.2} ms)",
            self.original_vertices,
            self.final_vertices,
            self.original_faces,
            self.final_faces,
            self.reduction_percent,
            self.stats.collapses_performed,
            self.processing_time_ms
        )
    }
}
