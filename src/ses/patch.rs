//! Triangulation of a region of one sphere bounded by oriented edge loops.
//!
//! Convex patches live on an atom sphere, concave patches on a probe sphere.
//! In both cases the caller hands over the boundary points, the boundary
//! edges with the region on their left (seen from outside the sphere), the
//! interior candidate points and a visibility predicate. The result is a set
//! of triangles that are Delaunay on the sphere and never cross the boundary.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use super::geometry::{triangle_normal, Vec3, EPSILON};
use super::sphere_template::SphereTemplate;

/// Pass radii relative to the patch spacing.
const PASS_SCALES: [f64; 3] = [1.5, 2.5, 4.0];
/// Largest angle between a stitched triangle and its vertex normals, except
/// in the last pass.
const MAX_NORMAL_DEVIATION: f64 = std::f64::consts::PI / 6.0;
/// Hinge angles closer than this are treated as coplanar.
const ANGLE_TIE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Multi-pass scan over all nearby triples.
    Scan,
    /// Advancing front grown from the boundary.
    Stitch,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchSphere {
    pub center: Vec3,
    pub radius: f64,
    /// Typical distance between neighbouring points of the patch
    pub spacing: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchPoint {
    pub position: Vec3,
    /// Boundary circles through the point; empty for interior points
    pub circles: Vec<usize>,
}

impl PatchPoint {
    pub fn interior(position: Vec3) -> Self {
        Self {
            position,
            circles: Vec::new(),
        }
    }

    pub fn on_boundary(position: Vec3, circles: Vec<usize>) -> Self {
        Self { position, circles }
    }

    fn is_boundary(&self) -> bool {
        !self.circles.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchOutcome {
    /// Counter-clockwise seen from outside the sphere
    pub triangles: Vec<[usize; 3]>,
    /// Edges left with a single triangle
    pub open_edges: usize,
    /// Rejected attempts to give an edge a third triangle
    pub third_uses: usize,
}

/// Template points usable as interior vertices: visible, and not crowding a
/// boundary point.
pub fn interior_candidates<F>(
    sphere: &PatchSphere,
    template: &SphereTemplate,
    boundary: &[Vec3],
    visible: F,
) -> Vec<Vec3>
where
    F: Fn(&Vec3) -> bool,
{
    let clearance = 0.5 * sphere.spacing;
    let clearance2 = clearance * clearance;
    template
        .points_on_sphere(&sphere.center, sphere.radius)
        .filter(|p| visible(p))
        .filter(|p| boundary.iter().all(|b| (p - b).norm_squared() > clearance2))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Conflict {
    /// The triangle would walk an edge in a direction already taken
    Directed,
    /// An edge already has two triangles
    ThirdUse,
}

/// Directed and undirected edge bookkeeping.
#[derive(Default)]
struct EdgeBook {
    directed: HashSet<(usize, usize)>,
    usage: HashMap<(usize, usize), u8>,
    third_uses: usize,
}

fn key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

fn sides([a, b, c]: [usize; 3]) -> [(usize, usize); 3] {
    [(a, b), (b, c), (c, a)]
}

impl EdgeBook {
    /// The outside of every boundary edge counts as one use, walked in the
    /// opposite direction.
    fn new(boundary: &[(usize, usize)]) -> Self {
        let mut book = Self::default();
        for &(a, b) in boundary {
            book.directed.insert((b, a));
            *book.usage.entry(key(a, b)).or_default() += 1;
        }
        book
    }

    fn conflict(&self, tri: [usize; 3]) -> Option<Conflict> {
        for (x, y) in sides(tri) {
            if self.directed.contains(&(x, y)) {
                return Some(Conflict::Directed);
            }
            if self.usage.get(&key(x, y)).copied().unwrap_or(0) >= 2 {
                return Some(Conflict::ThirdUse);
            }
        }
        None
    }

    fn add(&mut self, tri: [usize; 3]) {
        for (x, y) in sides(tri) {
            self.directed.insert((x, y));
            *self.usage.entry(key(x, y)).or_default() += 1;
        }
    }

    /// Every side already has two triangles.
    fn is_saturated(&self, tri: [usize; 3]) -> bool {
        sides(tri)
            .iter()
            .all(|&(x, y)| self.usage.get(&key(x, y)).copied().unwrap_or(0) >= 2)
    }

    /// Sides that already have a triangle, or the outside of the patch,
    /// across them.
    fn bordered_sides(&self, tri: [usize; 3]) -> usize {
        sides(tri)
            .iter()
            .filter(|&&(x, y)| self.directed.contains(&(y, x)))
            .count()
    }

    fn is_covered(&self, a: usize, b: usize) -> bool {
        self.directed.contains(&(a, b))
    }

    fn open_edges(&self) -> usize {
        self.usage.values().filter(|&&n| n == 1).count()
    }
}

pub struct PatchTriangulator<'a, F> {
    sphere: PatchSphere,
    points: &'a [PatchPoint],
    boundary: &'a [(usize, usize)],
    visible: F,
    tolerance: f64,
}

impl<'a, F> PatchTriangulator<'a, F>
where
    F: Fn(&Vec3) -> bool,
{
    pub fn new(sphere: PatchSphere, points: &'a [PatchPoint], boundary: &'a [(usize, usize)], visible: F) -> Self {
        Self {
            sphere,
            points,
            boundary,
            visible,
            tolerance: 1e-7 * sphere.radius.max(1.0),
        }
    }

    pub fn triangulate(&self, mode: Mode) -> PatchOutcome {
        let mut book = EdgeBook::new(self.boundary);
        let triangles = match mode {
            Mode::Scan => self.scan(&mut book),
            Mode::Stitch => self.stitch(&mut book),
        };
        PatchOutcome {
            triangles,
            open_edges: book.open_edges(),
            third_uses: book.third_uses,
        }
    }

    fn pos(&self, i: usize) -> &Vec3 {
        &self.points[i].position
    }

    fn on_same_circle(&self, [a, b, c]: [usize; 3]) -> bool {
        self.points[a]
            .circles
            .iter()
            .any(|circle| self.points[b].circles.contains(circle) && self.points[c].circles.contains(circle))
    }

    /// No point lies above the plane of the triangle, so its circumcap on
    /// the sphere is empty.
    fn is_delaunay(&self, tri: [usize; 3], normal: &Vec3) -> bool {
        let origin = self.pos(tri[0]);
        self.points
            .iter()
            .enumerate()
            .filter(|(q, _)| !tri.contains(q))
            .all(|(_, q)| (q.position - origin).dot(normal) <= self.tolerance)
    }

    fn centroid_visible(&self, [a, b, c]: [usize; 3]) -> bool {
        let centroid = (self.pos(a) + self.pos(b) + self.pos(c)) / 3.0;
        let direction = centroid - self.sphere.center;
        if direction.norm() < EPSILON {
            return false;
        }
        (self.visible)(&(self.sphere.center + direction.normalize() * self.sphere.radius))
    }

    /// Whether the triangle covers part of the patch. Between boundary
    /// points the sides are chords of the boundary circles, so at a pinched
    /// corner the centroid can fall just outside the region. Such a triangle
    /// is accepted when it closes a corner of the front, i.e. two of its
    /// sides are already bordered.
    fn inside_region(&self, tri: [usize; 3], book: &EdgeBook) -> bool {
        let closes_corner = tri.iter().all(|&v| self.points[v].is_boundary()) && book.bordered_sides(tri) >= 2;
        closes_corner || self.centroid_visible(tri)
    }

    /// Unit normal, or `None` for slivers.
    fn unit_normal(&self, [a, b, c]: [usize; 3]) -> Option<Vec3> {
        let n = triangle_normal(self.pos(a), self.pos(b), self.pos(c));
        let len = n.norm();
        (len > EPSILON * self.sphere.radius * self.sphere.radius).then(|| n / len)
    }

    fn faces_outward(&self, [a, b, c]: [usize; 3], normal: &Vec3) -> bool {
        let centroid = (self.pos(a) + self.pos(b) + self.pos(c)) / 3.0;
        normal.dot(&(centroid - self.sphere.center)) > 0.0
    }

    fn neighbourhoods(&self, limit: f64) -> Vec<Vec<usize>> {
        let limit2 = limit * limit;
        (0..self.points.len())
            .map(|i| {
                (i + 1..self.points.len())
                    .filter(|&j| (self.pos(i) - self.pos(j)).norm_squared() < limit2)
                    .collect()
            })
            .collect()
    }

    fn scan(&self, book: &mut EdgeBook) -> Vec<[usize; 3]> {
        let mut triangles = Vec::new();
        for (pass, scale) in PASS_SCALES.iter().enumerate() {
            let limit = scale * self.sphere.spacing;
            let near = self.neighbourhoods(limit);
            for i in 0..self.points.len() {
                for (x, &j) in near[i].iter().enumerate() {
                    for &k in &near[i][x + 1..] {
                        if !near[j].contains(&k) {
                            continue;
                        }
                        if let Some(tri) = self.scan_triangle([i, j, k], pass, book) {
                            book.add(tri);
                            triangles.push(tri);
                        }
                    }
                }
            }
            trace!("Scan pass {pass} ended with {} triangles", triangles.len());
        }
        triangles
    }

    fn scan_triangle(&self, [a, b, c]: [usize; 3], pass: usize, book: &mut EdgeBook) -> Option<[usize; 3]> {
        let mut tri = [a, b, c];
        let mut normal = self.unit_normal(tri)?;
        if !self.faces_outward(tri, &normal) {
            tri = [a, c, b];
            normal = -normal;
        }
        if self.on_same_circle(tri) {
            return None;
        }
        if pass + 1 < PASS_SCALES.len() && tri.iter().all(|&v| self.points[v].is_boundary()) {
            return None;
        }
        let conflict = book.conflict(tri);
        if conflict == Some(Conflict::Directed) || book.is_saturated(tri) {
            return None;
        }
        if !self.is_delaunay(tri, &normal) || !self.inside_region(tri, book) {
            return None;
        }
        match conflict {
            None => Some(tri),
            Some(_) => {
                book.third_uses += 1;
                None
            }
        }
    }

    fn stitch(&self, book: &mut EdgeBook) -> Vec<[usize; 3]> {
        let mut triangles = Vec::new();
        let mut front: VecDeque<(usize, usize)> = self.boundary.iter().copied().collect();
        let last = PASS_SCALES.len() - 1;
        for (pass, scale) in PASS_SCALES.iter().enumerate() {
            let limit = scale * self.sphere.spacing;
            let mut deferred = Vec::new();
            while let Some((a, b)) = front.pop_front() {
                if book.is_covered(a, b) {
                    continue;
                }
                let mut third_use = false;
                let accepted = self.wrap(a, b, limit).into_iter().map(|c| [a, b, c]).find(|&tri| {
                    if !self.accept_stitched(tri, pass == last, book) {
                        return false;
                    }
                    match book.conflict(tri) {
                        None => true,
                        Some(conflict) => {
                            third_use |= conflict == Conflict::ThirdUse;
                            false
                        }
                    }
                });
                if accepted.is_none() && third_use {
                    book.third_uses += 1;
                    trace!("Edge ({a}, {b}) would need a third triangle");
                }
                match accepted {
                    Some(tri) => {
                        book.add(tri);
                        triangles.push(tri);
                        let [_, b, c] = tri;
                        for (x, y) in [(c, b), (a, c)] {
                            if !book.is_covered(x, y) {
                                front.push_back((x, y));
                            }
                        }
                    }
                    None => deferred.push((a, b)),
                }
            }
            trace!(
                "Stitch pass {pass} ended with {} triangles, {} edges deferred",
                triangles.len(),
                deferred.len()
            );
            front = deferred.into();
        }
        triangles
    }

    /// Gift wrapping step: the points left of `a -> b` reached first when a
    /// half-plane hinged on the edge is lowered from straight up. Points
    /// reached at the same time (coplanar with the edge) come closest first.
    fn wrap(&self, a: usize, b: usize, limit: f64) -> Vec<usize> {
        let (pa, pb) = (self.pos(a), self.pos(b));
        let mid = (pa + pb) * 0.5;
        let (Some(up), Some(along)) = (
            (mid - self.sphere.center).try_normalize(EPSILON),
            (pb - pa).try_normalize(EPSILON),
        ) else {
            return Vec::new();
        };
        let left = up.cross(&along);
        let limit2 = limit * limit;

        let mut ranked: Vec<(usize, f64, f64)> = self
            .points
            .iter()
            .enumerate()
            .filter(|&(q, _)| q != a && q != b)
            .filter_map(|(q, point)| {
                let offset = point.position - mid;
                let dist2 = offset.norm_squared();
                let x_left = offset.dot(&left);
                (dist2 <= limit2 && x_left > self.tolerance).then(|| (q, offset.dot(&up).atan2(x_left), dist2))
            })
            .collect();
        let Some(top) = ranked.iter().map(|r| r.1).reduce(f64::max) else {
            return Vec::new();
        };
        ranked.retain(|r| r.1 >= top - ANGLE_TIE);
        ranked.sort_by(|x, y| x.2.total_cmp(&y.2));
        ranked.into_iter().map(|r| r.0).collect()
    }

    fn accept_stitched(&self, tri: [usize; 3], relaxed: bool, book: &EdgeBook) -> bool {
        let Some(normal) = self.unit_normal(tri) else {
            return false;
        };
        let mean: Vec3 = tri
            .iter()
            .map(|&v| (self.pos(v) - self.sphere.center).normalize())
            .sum();
        let cos = normal.dot(&mean.normalize());
        let aligned = if relaxed {
            cos > 0.0
        } else {
            cos >= MAX_NORMAL_DEVIATION.cos()
        };
        aligned && self.is_delaunay(tri, &normal) && self.inside_region(tri, book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Cap of the unit sphere above `z = height`, bounded by a sampled circle
    /// walked counter-clockwise seen from +z.
    fn cap(height: f64, samples: usize, depth: u32) -> (PatchSphere, Vec<PatchPoint>, Vec<(usize, usize)>) {
        let ring = (1.0 - height * height).sqrt();
        let mut points: Vec<PatchPoint> = (0..samples)
            .map(|s| {
                let angle = std::f64::consts::TAU * s as f64 / samples as f64;
                PatchPoint::on_boundary(Vec3::new(ring * angle.cos(), ring * angle.sin(), height), vec![0])
            })
            .collect();
        let boundary: Vec<(usize, usize)> = (0..samples).map(|s| (s, (s + 1) % samples)).collect();
        let sphere = PatchSphere {
            center: Vec3::zeros(),
            radius: 1.0,
            spacing: std::f64::consts::TAU * ring / samples as f64,
        };
        let rim: Vec<Vec3> = points.iter().map(|p| p.position).collect();
        let template = SphereTemplate::new(depth);
        points.extend(
            interior_candidates(&sphere, &template, &rim, |p| p.z > height + 1e-6)
                .into_iter()
                .map(PatchPoint::interior),
        );
        (sphere, points, boundary)
    }

    /// Unit sphere minus two overlapping caps of angular radius `alpha`
    /// around axes tilted by `beta` either way from +z. The loop runs
    /// clockwise around each cap and has a pinched corner wherever the two
    /// circles cross.
    fn outside_two_caps(
        alpha: f64,
        beta: f64,
        spacing: f64,
    ) -> (PatchSphere, Vec<PatchPoint>, Vec<(usize, usize)>, impl Fn(&Vec3) -> bool + Copy) {
        let axes = [
            Vec3::new(beta.sin(), 0.0, beta.cos()),
            Vec3::new(-beta.sin(), 0.0, beta.cos()),
        ];
        let height = alpha.cos() / beta.cos();
        let width = (1.0 - height * height).sqrt();
        let corners = [Vec3::new(0.0, width, height), Vec3::new(0.0, -width, height)];

        let mut points = Vec::new();
        for (circle, axis) in axes.iter().enumerate() {
            let center = axis * alpha.cos();
            let (from, to) = (corners[circle] - center, corners[1 - circle] - center);
            let mut sweep = from.cross(&to).dot(&-axis).atan2(from.dot(&to));
            if sweep < 0.0 {
                sweep += std::f64::consts::TAU;
            }
            let segments = ((sweep * alpha.sin() / spacing).ceil() as usize).max(2);
            let turn = nalgebra::Unit::new_normalize(-axis);
            points.push(PatchPoint::on_boundary(corners[circle], vec![0, 1]));
            points.extend((1..segments).map(|s| {
                let rotation = nalgebra::Rotation3::from_axis_angle(&turn, sweep * s as f64 / segments as f64);
                PatchPoint::on_boundary(center + rotation * from, vec![circle])
            }));
        }
        let boundary: Vec<(usize, usize)> = (0..points.len()).map(|s| (s, (s + 1) % points.len())).collect();

        let limit = alpha.cos();
        let visible = move |p: &Vec3| axes.iter().all(|axis| p.dot(axis) < limit);
        let sphere = PatchSphere {
            center: Vec3::zeros(),
            radius: 1.0,
            spacing,
        };
        let rim: Vec<Vec3> = points.iter().map(|p| p.position).collect();
        points.extend(
            interior_candidates(&sphere, &SphereTemplate::new(2), &rim, |p| {
                axes.iter().all(|axis| p.dot(axis) < limit - 1e-6)
            })
            .into_iter()
            .map(PatchPoint::interior),
        );
        (sphere, points, boundary, visible)
    }

    fn edge_counts(triangles: &[[usize; 3]], boundary: &[(usize, usize)]) -> HashMap<(usize, usize), usize> {
        let mut counts = HashMap::new();
        for &(a, b) in boundary {
            *counts.entry(key(a, b)).or_default() += 1;
        }
        for &tri in triangles {
            for (a, b) in sides(tri) {
                *counts.entry(key(a, b)).or_default() += 1;
            }
        }
        counts
    }

    #[test]
    fn test_stitch_closes_a_cap() {
        let (sphere, points, boundary) = cap(0.3, 24, 2);
        let outcome = PatchTriangulator::new(sphere, &points, &boundary, |p: &Vec3| p.z > 0.3).triangulate(Mode::Stitch);
        assert!(!outcome.triangles.is_empty());
        assert_eq!(outcome.open_edges, 0);
        assert!(edge_counts(&outcome.triangles, &boundary).values().all(|&n| n == 2));
    }

    #[test]
    fn test_scan_closes_a_cap() {
        let (sphere, points, boundary) = cap(0.3, 24, 2);
        let outcome = PatchTriangulator::new(sphere, &points, &boundary, |p: &Vec3| p.z > 0.3).triangulate(Mode::Scan);
        assert_eq!(outcome.open_edges, 0);
        assert!(edge_counts(&outcome.triangles, &boundary).values().all(|&n| n == 2));
    }

    #[test]
    fn test_triangles_face_outward_and_stay_inside() {
        for mode in [Mode::Scan, Mode::Stitch] {
            let (sphere, points, boundary) = cap(-0.2, 30, 1);
            let outcome = PatchTriangulator::new(sphere, &points, &boundary, |p: &Vec3| p.z > -0.2).triangulate(mode);
            for &[a, b, c] in &outcome.triangles {
                let (pa, pb, pc) = (&points[a].position, &points[b].position, &points[c].position);
                let centroid = (pa + pb + pc) / 3.0;
                assert!(triangle_normal(pa, pb, pc).dot(&centroid) > 0.0);
                assert!(centroid.z > -0.2 - 1e-9);
            }
        }
    }

    #[test]
    fn test_boundary_only_patch() {
        // no template point fits inside this cap
        let (sphere, points, boundary) = cap(0.95, 6, 0);
        assert_eq!(points.len(), 6);
        let visible = |p: &Vec3| p.z > 0.95;

        // the scan never joins three points of one circle
        let scanned = PatchTriangulator::new(sphere, &points, &boundary, visible).triangulate(Mode::Scan);
        assert!(scanned.triangles.is_empty());
        assert_eq!(scanned.open_edges, 6);

        // stitching fans the flat hexagon
        let stitched = PatchTriangulator::new(sphere, &points, &boundary, visible).triangulate(Mode::Stitch);
        assert_eq!(stitched.triangles.len(), 4);
        assert_eq!(stitched.open_edges, 0);
    }

    #[test]
    fn test_pinched_corners_are_closed() {
        for mode in [Mode::Scan, Mode::Stitch] {
            let (sphere, points, boundary, visible) = outside_two_caps(0.8, 0.5, 0.3);
            let outcome = PatchTriangulator::new(sphere, &points, &boundary, visible).triangulate(mode);
            assert_eq!(outcome.open_edges, 0, "{mode:?}");
            assert!(edge_counts(&outcome.triangles, &boundary).values().all(|&n| n == 2));

            // nothing spans the lens between the caps
            let axes = [Vec3::new(0.5f64.sin(), 0.0, 0.5f64.cos()), Vec3::new(-0.5f64.sin(), 0.0, 0.5f64.cos())];
            for &[a, b, c] in &outcome.triangles {
                let (pa, pb, pc) = (&points[a].position, &points[b].position, &points[c].position);
                let centroid = ((pa + pb + pc) / 3.0).normalize();
                assert!(triangle_normal(pa, pb, pc).dot(&centroid) > 0.0);
                assert!(axes.iter().any(|axis| centroid.dot(axis) < 0.8f64.cos() + 0.02));
            }
        }
    }
}
