//! Surface construction settings.

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::SurfaceError;

/// Water probe radius in Å.
pub const DEFAULT_PROBE_RADIUS: f64 = 1.5;
/// Icosahedron subdivision depth used for the sphere template.
pub const DEFAULT_SUBDIVISION_DEPTH: u32 = 1;
/// Deepest template subdivision accepted (10242 points per sphere).
pub const MAX_SUBDIVISION_DEPTH: u32 = 5;

/// Target edge length presets in Å.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Quality {
    /// 1.5 Å
    Low,
    /// 0.9 Å
    #[default]
    Medium,
    /// 0.5 Å
    High,
    /// 0.3 Å
    Ultra,
}

impl Quality {
    pub fn edge_length(self) -> f64 {
        match self {
            Quality::Low => 1.5,
            Quality::Medium => 0.9,
            Quality::High => 0.5,
            Quality::Ultra => 0.3,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Low => write!(f, "low"),
            Quality::Medium => write!(f, "medium"),
            Quality::High => write!(f, "high"),
            Quality::Ultra => write!(f, "ultra"),
        }
    }
}

/// How convex and concave patches are triangulated and emitted.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Multi-pass triple scan, triangles emitted straight into the mesh.
    #[default]
    Whole,
    /// Advancing-front stitching into per-atom local patches, merged at the end.
    PerAtom,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Whole => write!(f, "whole"),
            Strategy::PerAtom => write!(f, "per-atom"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Solvent probe radius
    pub probe_radius: f64,
    /// Icosahedron subdivision depth of the sphere template
    pub subdivision_depth: u32,
    /// Target triangle edge length in Å
    pub edge_length: f64,
    pub strategy: Strategy,
    /// Write retained probe positions here when set
    pub probe_dump: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_radius: DEFAULT_PROBE_RADIUS,
            subdivision_depth: DEFAULT_SUBDIVISION_DEPTH,
            edge_length: Quality::default().edge_length(),
            strategy: Strategy::default(),
            probe_dump: None,
        }
    }
}

impl Settings {
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.edge_length = quality.edge_length();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), SurfaceError> {
        if !(self.probe_radius.is_finite() && self.probe_radius > 0.0) {
            return Err(SurfaceError::InvalidProbeRadius(self.probe_radius));
        }
        if !(self.edge_length.is_finite() && self.edge_length > 0.0) {
            return Err(SurfaceError::InvalidEdgeLength(self.edge_length));
        }
        if self.subdivision_depth > MAX_SUBDIVISION_DEPTH {
            return Err(SurfaceError::SubdivisionTooDeep {
                depth: self.subdivision_depth,
                max: MAX_SUBDIVISION_DEPTH,
            });
        }
        Ok(())
    }
}
