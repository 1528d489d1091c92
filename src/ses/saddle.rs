//! Saddle faces: the part of a torus swept between a start and a stop probe.
//!
//! A saddle is sampled as a grid. Row `s` is the arc of the probe sphere at
//! torus angle `θs` running from the contact point on the first atom to the
//! contact point on the second one. Rows are split in two halves, one per
//! atom; on self-intersecting tori the halves end at the two cusp points.

use super::geometry::{segment_count, slerp, Vec3};
use super::graph::SurfaceGraph;
use super::tori::TorusGeometry;
use super::types::{FaceId, Torus, VertexId};

/// Saddle faces list their edges in this order.
pub const CONTACT_A: usize = 0;
pub const STOP_EDGE: usize = 1;
pub const CONTACT_B: usize = 2;
pub const START_EDGE: usize = 3;

/// One sample of a probe arc.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RowPoint {
    Sample { position: Vec3, normal: Vec3 },
    /// Cusp `0` (first atom side) or `1`
    Cusp(usize),
}

/// Even number of segments used for every probe arc of a torus.
pub fn wrap_steps(geometry: &TorusGeometry, probe_radius: f64, edge_length: f64) -> usize {
    let steps = segment_count(geometry.wrap_angle * probe_radius, edge_length);
    steps + steps % 2
}

/// Samples the probe arc of a probe centred at `probe`, from the contact on
/// the sphere at `a` to the contact on the sphere at `b`.
///
/// Without cusps the row has `steps + 1` points. With cusps each half gets
/// `steps / 2` segments and the row has `steps + 2` points, the two cusps in
/// the middle.
pub fn wrap_row(a: &Vec3, b: &Vec3, probe: &Vec3, probe_radius: f64, steps: usize, cusps: Option<&[Vec3; 2]>) -> Vec<RowPoint> {
    let towards = |target: &Vec3| (target - probe).normalize();
    let sample = |from: &Vec3, to: &Vec3, t: f64| {
        let dir = slerp(from, to, t);
        RowPoint::Sample {
            position: probe + dir * probe_radius,
            normal: -dir,
        }
    };
    let (ua, ub) = (towards(a), towards(b));

    match cusps {
        None => (0..=steps).map(|w| sample(&ua, &ub, w as f64 / steps as f64)).collect(),
        Some([cusp_a, cusp_b]) => {
            let half = steps / 2;
            let (ca, cb) = (towards(cusp_a), towards(cusp_b));
            let mut row = Vec::with_capacity(steps + 2);
            row.extend((0..half).map(|w| sample(&ua, &ca, w as f64 / half as f64)));
            row.push(RowPoint::Cusp(0));
            row.push(RowPoint::Cusp(1));
            row.extend((1..=half).map(|w| sample(&cb, &ub, w as f64 / half as f64)));
            row
        }
    }
}

/// Turns a sampled row into vertices. The end points become contact
/// vertices of the two atoms unless `ends` supplies existing ones.
pub fn materialize_row(
    graph: &mut SurfaceGraph,
    torus: &Torus,
    row: &[RowPoint],
    ends: Option<(VertexId, VertexId)>,
) -> Vec<VertexId> {
    let last = row.len() - 1;
    row.iter()
        .enumerate()
        .map(|(w, point)| match (*point, ends) {
            (_, Some((first, _))) if w == 0 => first,
            (_, Some((_, end))) if w == last => end,
            (RowPoint::Cusp(k), _) => match torus.cusps {
                Some(cusps) => cusps[k],
                None => unreachable!("cusp sample on a torus without cusps"),
            },
            (RowPoint::Sample { position, normal }, _) => {
                let owner = if w == 0 {
                    Some(torus.atoms.0)
                } else if w == last {
                    Some(torus.atoms.1)
                } else {
                    None
                };
                graph.add_vertex(position, normal, owner)
            }
        })
        .collect()
}

fn push_triangle(out: &mut Vec<[VertexId; 3]>, tri: [VertexId; 3]) {
    if tri[0] != tri[1] && tri[1] != tri[2] && tri[2] != tri[0] {
        out.push(tri);
    }
}

/// Triangles between two consecutive rows of one half. Normals point towards
/// the rolling probe.
fn strip(lower: &[VertexId], upper: &[VertexId], out: &mut Vec<[VertexId; 3]>) {
    for w in 0..lower.len().saturating_sub(1) {
        push_triangle(out, [lower[w], upper[w], upper[w + 1]]);
        push_triangle(out, [lower[w], upper[w + 1], lower[w + 1]]);
    }
}

/// Samples a saddle face and returns its triangles, split by atom.
///
/// Also fills in the tessellation points of the two contact edges. The probe
/// edges at either end must already be sampled.
pub fn tessellate_saddle(
    graph: &mut SurfaceGraph,
    face: FaceId,
    centers: (&Vec3, &Vec3),
    probe_radius: f64,
    edge_length: f64,
) -> [Vec<[VertexId; 3]>; 2] {
    let face = graph.face(face).clone();
    let Some(span) = face.saddle else {
        return [Vec::new(), Vec::new()];
    };
    let torus = graph.torus(span.torus).clone();
    let geometry = &torus.geometry;
    let sweep = span.stop_angle - span.start_angle;
    let steps = segment_count(
        sweep * geometry.contact_radii[0].max(geometry.contact_radii[1]),
        edge_length,
    );
    let cusps = torus.cusps.map(|[a, b]| [graph.position(a), graph.position(b)]);

    let mut rows = Vec::with_capacity(steps + 1);
    rows.push(graph.edge(face.edges[START_EDGE].edge).points.clone());
    for s in 1..steps {
        let angle = span.start_angle + sweep * s as f64 / steps as f64;
        let probe = torus.probe_at(angle);
        let row = wrap_row(centers.0, centers.1, &probe, probe_radius, torus.wrap_steps, cusps.as_ref());
        rows.push(materialize_row(graph, &torus, &row, None));
    }
    rows.push(graph.edge(face.edges[STOP_EDGE].edge).points.clone());

    graph.edge_mut(face.edges[CONTACT_A].edge).points = rows.iter().map(|r| r[0]).collect();
    graph.edge_mut(face.edges[CONTACT_B].edge).points = rows.iter().map(|r| r[r.len() - 1]).collect();

    let mut halves = [Vec::new(), Vec::new()];
    for pair in rows.windows(2) {
        let (lower_a, lower_b) = torus.split_row(&pair[0]);
        let (upper_a, upper_b) = torus.split_row(&pair[1]);
        strip(lower_a, upper_a, &mut halves[0]);
        strip(lower_b, upper_b, &mut halves[1]);
    }
    halves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ses::types::Sphere;
    use approx::assert_relative_eq;

    fn position(point: &RowPoint) -> Vec3 {
        match point {
            RowPoint::Sample { position, .. } => *position,
            RowPoint::Cusp(_) => panic!("unexpected cusp"),
        }
    }

    #[test]
    fn test_wrap_row_ends_on_contacts() {
        let a = Sphere::new(0.0, 0.0, 0.0, 1.5);
        let b = Sphere::new(3.2, 0.0, 0.0, 1.7);
        let rp = 1.4;
        let torus = TorusGeometry::new(&a, &b, rp).unwrap();
        let probe = torus.center + Vec3::z() * torus.radius;
        let steps = wrap_steps(&torus, rp, 0.5);
        assert_eq!(steps % 2, 0);
        let row = wrap_row(&a.center, &b.center, &probe, rp, steps, None);
        assert_eq!(row.len(), steps + 1);
        assert_relative_eq!((position(&row[0]) - a.center).norm(), a.radius, epsilon = 1e-9);
        assert_relative_eq!((position(&row[steps]) - b.center).norm(), b.radius, epsilon = 1e-9);
        for point in &row {
            assert_relative_eq!((position(point) - probe).norm(), rp, epsilon = 1e-9);
            if let RowPoint::Sample { position, normal } = point {
                // normals point back at the probe centre
                assert_relative_eq!(position + normal * rp, probe, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_wrap_row_with_cusps() {
        let a = Sphere::new(0.0, 0.0, 0.0, 1.0);
        let b = Sphere::new(4.0, 0.0, 0.0, 1.0);
        let rp = 1.4;
        let torus = TorusGeometry::new(&a, &b, rp).unwrap();
        let cusps = torus.cusp_points(rp).unwrap();
        let probe = torus.center + Vec3::y() * torus.radius;
        let row = wrap_row(&a.center, &b.center, &probe, rp, 6, Some(&cusps));
        assert_eq!(row.len(), 8);
        assert_eq!(row[3], RowPoint::Cusp(0));
        assert_eq!(row[4], RowPoint::Cusp(1));
        assert_relative_eq!((position(&row[0]) - a.center).norm(), a.radius, epsilon = 1e-9);
        assert_relative_eq!((position(&row[7]) - b.center).norm(), b.radius, epsilon = 1e-9);
        // the a half stays on the a side of the cusp
        assert!(position(&row[2]).x < cusps[0].x);
    }

    #[test]
    fn test_strip_skips_collapsed_triangles() {
        let v = |i| VertexId(i);
        let mut out = Vec::new();
        // the last column collapses onto a single cusp vertex
        strip(&[v(0), v(1), v(9)], &[v(2), v(3), v(9)], &mut out);
        assert_eq!(out, vec![[v(0), v(2), v(3)], [v(0), v(3), v(1)], [v(1), v(3), v(9)]]);
    }
}
