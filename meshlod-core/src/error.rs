//! Error types for meshlod

use thiserror::Error;

/// Which per-corner index table an out-of-range index was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// `faces`, indexing into `positions`
    Position,
    /// `face_tex_coords`, indexing into `tex_coords`
    TexCoord,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Position => write!(f, "position"),
            IndexKind::TexCoord => write!(f, "texcoord"),
        }
    }
}

/// Main error type for meshlod operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Face {face} references {kind} index {index}, but only {len} exist")]
    IndexOutOfRange {
        kind: IndexKind,
        face: usize,
        index: usize,
        len: usize,
    },

    #[error("Face count {faces} does not match face texcoord count {face_tex_coords}")]
    LengthMismatch { faces: usize, face_tex_coords: usize },

    #[error("Non-finite {kind} coordinate at index {index}")]
    NonFiniteCoordinate { kind: IndexKind, index: usize },

    #[error("Malformed buffer geometry: {0}")]
    MalformedBuffer(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

/// Result type alias for meshlod operations
pub type Result<T> = std::result::Result<T, Error>;
