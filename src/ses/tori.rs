//! Torus geometry between two neighbouring spheres and the grouping of probe
//! edges on a torus into saddle faces.

use std::f64::consts::TAU;

use super::geometry::{Vec3, EPSILON};
use super::types::{Role, Sphere};

/// The circle swept by a probe touching two spheres, plus the two contact
/// circles it leaves on them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TorusGeometry {
    /// Unit vector from the first sphere towards the second
    pub axis: Vec3,
    pub center: Vec3,
    /// Distance from the centre to the probe centres
    pub radius: f64,
    pub contact_centers: [Vec3; 2],
    pub contact_radii: [f64; 2],
    /// Angle between the two contact points seen from a probe centre
    pub wrap_angle: f64,
}

impl TorusGeometry {
    /// `None` when no probe fits between the spheres (too far apart, or one
    /// swallows the other).
    pub fn new(a: &Sphere, b: &Sphere, probe_radius: f64) -> Option<Self> {
        let ra = a.radius + probe_radius;
        let rb = b.radius + probe_radius;
        let delta = b.center - a.center;
        let d2 = delta.norm_squared();
        let d = d2.sqrt();
        if d < EPSILON {
            return None;
        }
        let outer = (ra + rb).powi(2) - d2;
        let inner = d2 - (a.radius - b.radius).powi(2);
        if outer <= 0.0 || inner <= 0.0 {
            return None;
        }

        let axis = delta / d;
        let center = (a.center + b.center) * 0.5 + delta * (0.5 * (ra * ra - rb * rb) / d2);
        let radius = 0.5 * outer.sqrt() * inner.sqrt() / d;
        let contact_centers = [
            a.center + (center - a.center) * (a.radius / ra),
            b.center + (center - b.center) * (b.radius / rb),
        ];
        let contact_radii = [radius * a.radius / ra, radius * b.radius / rb];

        // contact directions from a probe in the frame (radial, axial)
        let probe = center + super::geometry::perpendicular(&axis) * radius;
        let wrap_angle = super::geometry::angle_between(&(a.center - probe), &(b.center - probe));

        Some(Self {
            axis,
            center,
            radius,
            contact_centers,
            contact_radii,
            wrap_angle,
        })
    }

    pub fn self_intersects(&self, probe_radius: f64) -> bool {
        self.radius < probe_radius
    }

    /// The two points where a self-intersecting torus pinches, ordered as the
    /// spheres. `None` if the probe clears the axis.
    pub fn cusp_points(&self, probe_radius: f64) -> Option<[Vec3; 2]> {
        if !self.self_intersects(probe_radius) {
            return None;
        }
        let offset = (probe_radius * probe_radius - self.radius * self.radius).sqrt();
        Some([
            self.center - self.axis * offset,
            self.center + self.axis * offset,
        ])
    }
}

/// A probe edge on a torus, reduced to what pairing needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RollingEdge<T> {
    pub angle: f64,
    pub role: Role,
    pub edge: T,
}

/// One saddle: the probe at `start` rolls up to the probe at `stop`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SaddlePair<T> {
    pub start: T,
    pub stop: T,
    pub start_angle: f64,
    pub stop_angle: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingError {
    OddCount(usize),
    NotAlternating,
}

/// Groups the probe edges of one torus into saddle faces.
///
/// Edges are sorted by descending angle and rotated so a stop comes first;
/// each stop then pairs with the start that follows it. The stop angle is
/// lifted by 2π when the saddle crosses angle zero.
pub fn pair_edges<T: Copy>(mut edges: Vec<RollingEdge<T>>) -> Result<Vec<SaddlePair<T>>, PairingError> {
    if edges.len() % 2 != 0 {
        return Err(PairingError::OddCount(edges.len()));
    }
    edges.sort_by(|a, b| b.angle.total_cmp(&a.angle));
    let lead = match edges.iter().position(|e| e.role == Role::Stop) {
        Some(lead) => lead,
        None if edges.is_empty() => return Ok(Vec::new()),
        None => return Err(PairingError::NotAlternating),
    };
    edges.rotate_left(lead);

    edges
        .chunks_exact(2)
        .map(|pair| {
            let (stop, start) = (pair[0], pair[1]);
            if stop.role != Role::Stop || start.role != Role::Start {
                return Err(PairingError::NotAlternating);
            }
            let mut stop_angle = stop.angle;
            if stop_angle <= start.angle {
                stop_angle += TAU;
            }
            Ok(SaddlePair {
                start: start.edge,
                stop: stop.edge,
                start_angle: start.angle,
                stop_angle,
            })
        })
        .collect()
}
