use polars::prelude::PolarsError;
use thiserror::Error;

/// Fatal errors of a surface run. Topological problems found while building
/// are not errors; they end up as [`crate::ses::Diagnostic`]s in the report.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("probe radius must be positive and finite, got {0}")]
    InvalidProbeRadius(f64),
    #[error("edge length must be positive and finite, got {0}")]
    InvalidEdgeLength(f64),
    #[error("subdivision depth {depth} exceeds the maximum of {max}")]
    SubdivisionTooDeep { depth: u32, max: u32 },
    #[error("sphere {index} has a non-positive radius or non-finite centre")]
    InvalidSphere { index: usize },
    #[error("failed to read structure {path}: {message}")]
    Structure { path: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    DataFrame(#[from] PolarsError),
}
