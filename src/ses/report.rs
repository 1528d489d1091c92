//! What happened during a construction run.

use polars::prelude::*;
use thiserror::Error;
use tracing::warn;

use super::types::FaceKind;

/// A topological problem found while building. The offending feature is
/// skipped; everything else is still emitted.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Diagnostic {
    #[error("torus ({0}, {1}) has an odd number of probe edges ({2})")]
    OddTorusEdges(usize, usize, usize),
    #[error("probe edges on torus ({0}, {1}) do not alternate between start and stop")]
    UnpairedTorusEdges(usize, usize),
    #[error("contact edges of sphere {sphere} do not close into loops ({open} left over)")]
    OpenContactLoop { sphere: usize, open: usize },
    #[error("edges of {kind} face {face} do not form a closed loop")]
    OpenFace { kind: FaceKind, face: usize },
    #[error("sphere {0} is accessible but bounded by no edge")]
    UnboundedSphere(usize),
    #[error("{kind} patch of {owner} left {open} edges with a single triangle")]
    OpenPatch { kind: FaceKind, owner: usize, open: usize },
    #[error("{kind} patch of {owner} tried to give {count} edges a third triangle")]
    OverusedPatchEdges { kind: FaceKind, owner: usize, count: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceCounts {
    pub convex: usize,
    pub saddle: usize,
    pub concave: usize,
    pub undefined: usize,
}

impl FaceCounts {
    pub fn record(&mut self, kind: FaceKind) {
        match kind {
            FaceKind::Convex => self.convex += 1,
            FaceKind::Saddle => self.saddle += 1,
            FaceKind::Concave => self.concave += 1,
            FaceKind::Undefined => self.undefined += 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceReport {
    /// Input spheres, hidden ones included
    pub spheres: usize,
    /// Spheres that received at least one triangle
    pub surfaced_spheres: usize,
    pub triplets: usize,
    pub probes: usize,
    pub self_intersecting_probes: usize,
    pub tori: usize,
    pub self_intersecting_tori: usize,
    pub faces: FaceCounts,
    pub max_vertices_per_sphere: usize,
    pub max_edges_per_sphere: usize,
    /// Exact distance tests of the neighbour search and the probe burial test
    pub distance_comparisons: usize,
    pub obscuration_cache_hits: usize,
    pub points: usize,
    pub triangles: usize,
    /// Mesh edges with a single triangle
    pub open_edges: usize,
    /// Mesh edges with more than two triangles
    pub overused_edges: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl SurfaceReport {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    /// No diagnostics and every mesh edge shared by exactly two triangles.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.open_edges == 0 && self.overused_edges == 0
    }

    /// Two-column `statistic`/`value` table of the counters.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let rows: [(&str, usize); 20] = [
            ("spheres", self.spheres),
            ("surfaced_spheres", self.surfaced_spheres),
            ("triplets", self.triplets),
            ("probes", self.probes),
            ("self_intersecting_probes", self.self_intersecting_probes),
            ("tori", self.tori),
            ("self_intersecting_tori", self.self_intersecting_tori),
            ("convex_faces", self.faces.convex),
            ("saddle_faces", self.faces.saddle),
            ("concave_faces", self.faces.concave),
            ("undefined_faces", self.faces.undefined),
            ("max_vertices_per_sphere", self.max_vertices_per_sphere),
            ("max_edges_per_sphere", self.max_edges_per_sphere),
            ("distance_comparisons", self.distance_comparisons),
            ("obscuration_cache_hits", self.obscuration_cache_hits),
            ("points", self.points),
            ("triangles", self.triangles),
            ("open_edges", self.open_edges),
            ("overused_edges", self.overused_edges),
            ("diagnostics", self.diagnostics.len()),
        ];
        df!(
            "statistic" => rows.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "value" => rows.iter().map(|(_, value)| *value as u64).collect::<Vec<_>>()
        )
    }
}
