//! Surface entities. Everything except [`Sphere`] lives in the arenas of a
//! [`super::graph::SurfaceGraph`] and is addressed by the typed ids below.

use std::fmt;

use super::geometry::Vec3;
use super::tori::TorusGeometry;

/// Colour used for spheres without one (white).
pub const DEFAULT_COLOR: u32 = 0x00FF_FFFF;

/// Input sphere, usually an atom with its van der Waals radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f64,
    /// Packed `0xRRGGBB`
    pub color: Option<u32>,
    /// Hidden spheres neither obscure probes nor receive surface
    pub visible: bool,
}

impl Sphere {
    pub fn new(x: f64, y: f64, z: f64, radius: f64) -> Self {
        Self {
            center: Vec3::new(x, y, z),
            radius,
            color: None,
            visible: true,
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn color_or_default(&self) -> u32 {
        self.color.unwrap_or(DEFAULT_COLOR)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.radius.is_finite() && self.radius > 0.0 && self.center.iter().all(|c| c.is_finite())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TorusId(pub usize);

#[derive(Clone, Debug)]
pub struct Vertex {
    pub position: Vec3,
    /// Outward surface normal (unit)
    pub normal: Vec3,
    /// Sphere the vertex lies on; `None` for saddle interiors and cusps
    pub owner: Option<usize>,
    /// Index in the output mesh once emitted
    pub mesh_index: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: Vec3,
    pub radius: f64,
    pub normal: Vec3,
}

/// What an edge is drawn on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeOwner {
    /// Great-circle arc on a probe sphere between two contact vertices.
    Probe(ProbeId),
    /// Arc of a torus contact circle on the given sphere.
    Sphere(usize),
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub start: VertexId,
    pub end: VertexId,
    pub circle: Circle,
    pub owner: EdgeOwner,
    pub torus: TorusId,
    /// Tessellation points from `start` to `end`, both included
    pub points: Vec<VertexId>,
    pub self_intersects: bool,
}

/// An edge as walked by one face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeUse {
    pub edge: EdgeId,
    pub reversed: bool,
}

impl EdgeUse {
    pub fn forward(edge: EdgeId) -> Self {
        Self {
            edge,
            reversed: false,
        }
    }

    pub fn backward(edge: EdgeId) -> Self {
        Self {
            edge,
            reversed: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceKind {
    Convex,
    Saddle,
    Concave,
    Undefined,
}

impl fmt::Display for FaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceKind::Convex => write!(f, "convex"),
            FaceKind::Saddle => write!(f, "saddle"),
            FaceKind::Concave => write!(f, "concave"),
            FaceKind::Undefined => write!(f, "undefined"),
        }
    }
}

/// Angular extent of a saddle face on its torus.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SaddleSpan {
    pub torus: TorusId,
    pub start_angle: f64,
    /// Always greater than `start_angle`; may exceed 2π
    pub stop_angle: f64,
    pub start_probe: ProbeId,
    pub stop_probe: ProbeId,
}

#[derive(Clone, Debug)]
pub struct Face {
    pub kind: FaceKind,
    /// Cyclic; the face interior is on the left seen from outside the surface
    pub edges: Vec<EdgeUse>,
    /// Sphere of a convex face
    pub owner: Option<usize>,
    pub saddle: Option<SaddleSpan>,
}

/// Whether the probe can roll freely towards increasing or decreasing torus
/// angle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Start,
    Stop,
}

#[derive(Clone, Debug)]
pub struct Probe {
    /// Touched spheres in concave loop order
    pub atoms: [usize; 3],
    pub position: Vec3,
    /// Distance from the base plane of the triplet
    pub height: f64,
    /// Contact vertex on `atoms[k]`
    pub vertices: [VertexId; 3],
    /// Edge `k` joins `atoms[k]` and `atoms[(k + 1) % 3]`
    pub edges: [EdgeId; 3],
    pub face: FaceId,
    pub tori: [TorusId; 3],
    /// Probes closer than twice the probe radius
    pub partners: Vec<ProbeId>,
}

impl Probe {
    pub fn lowest_atom(&self) -> usize {
        self.atoms[0].min(self.atoms[1]).min(self.atoms[2])
    }
}

#[derive(Clone, Debug)]
pub struct Torus {
    /// Canonical pair, lower index first
    pub atoms: (usize, usize),
    pub geometry: TorusGeometry,
    /// `(n1, n2)` with `n1 × n2 == axis`
    pub frame: (Vec3, Vec3),
    /// `[on the side of atoms.0, on the side of atoms.1]`
    pub cusps: Option<[VertexId; 2]>,
    /// Number of segments of every probe-sphere arc across this torus (even)
    pub wrap_steps: usize,
    /// Probe edges
    pub edges: Vec<EdgeId>,
    pub saddles: Vec<FaceId>,
}

impl Torus {
    pub fn self_intersects(&self) -> bool {
        self.cusps.is_some()
    }

    /// Angle of a probe centre around the torus axis.
    pub fn angle_of(&self, probe: &Vec3) -> f64 {
        let (n1, n2) = &self.frame;
        super::geometry::planar_angle(&(probe - self.geometry.center), n1, n2)
    }

    /// Probe centre rolled to `angle`.
    pub fn probe_at(&self, angle: f64) -> Vec3 {
        let (n1, n2) = &self.frame;
        self.geometry.center + (n1 * angle.cos() + n2 * angle.sin()) * self.geometry.radius
    }

    /// Splits a sampled probe arc into the part owned by each atom. Without
    /// cusps both halves share the middle point.
    pub fn split_row<'a>(&self, row: &'a [VertexId]) -> (&'a [VertexId], &'a [VertexId]) {
        let half = self.wrap_steps / 2;
        if self.self_intersects() {
            (&row[..=half], &row[half + 1..])
        } else {
            (&row[..=half], &row[half..])
        }
    }
}
