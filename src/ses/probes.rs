//! Placement of probe spheres touching three neighbouring spheres at once.

use std::ops::AddAssign;

use rayon::prelude::*;
use tracing::debug;

use super::geometry::{Vec3, EPSILON};
use super::neighbours::NeighbourIndex;
use super::tori::TorusGeometry;
use super::types::Sphere;

/// Foot of the two tangent probe positions of a triplet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BasePoint {
    /// Point on the plane of the three centres
    pub base: Vec3,
    /// Unit normal of that plane, `uij × uik` normalized
    pub normal: Vec3,
    /// Distance of either probe from `base`
    pub height: f64,
}

/// Computes where a probe can touch spheres `i`, `j` and `k`. The two
/// placements are `base ± height · normal`.
///
/// `None` for collinear centres or when the probe cannot reach all three.
pub fn base_point(si: &Sphere, sj: &Sphere, sk: &Sphere, probe_radius: f64) -> Option<BasePoint> {
    let tij = TorusGeometry::new(si, sj, probe_radius)?;
    let tik = TorusGeometry::new(si, sk, probe_radius)?;
    let cos = tij.axis.dot(&tik.axis);
    let sin2 = 1.0 - cos * cos;
    if sin2 <= EPSILON {
        return None;
    }
    let sin = sin2.sqrt();
    let normal = tij.axis.cross(&tik.axis) / sin;
    let towards = normal.cross(&tij.axis);
    let base = tij.center + towards * (tik.axis.dot(&(tik.center - tij.center)) / sin);
    let ri = si.radius + probe_radius;
    let h2 = ri * ri - (base - si.center).norm_squared();
    if h2 <= 0.0 {
        return None;
    }
    Some(BasePoint {
        base,
        normal,
        height: h2.sqrt(),
    })
}

/// Remembers the sphere that obscured the previous probe; consecutive probes
/// tend to be buried by the same sphere.
#[derive(Clone, Debug, Default)]
pub struct ObscurationCache {
    last: Option<usize>,
    pub hits: usize,
    pub comparisons: usize,
}

impl ObscurationCache {
    /// Whether a probe at `p` overlaps any sphere of `candidates` other than
    /// those in `skip`.
    pub fn is_obscured(
        &mut self,
        p: &Vec3,
        spheres: &[Sphere],
        candidates: &[usize],
        skip: [usize; 3],
        probe_radius: f64,
    ) -> bool {
        let collides = |l: usize| {
            let reach = spheres[l].radius + probe_radius;
            (p - spheres[l].center).norm_squared() < reach * reach
        };
        if let Some(l) = self.last.filter(|l| !skip.contains(l)) {
            self.comparisons += 1;
            if collides(l) {
                self.hits += 1;
                return true;
            }
        }
        for &l in candidates {
            if skip.contains(&l) || Some(l) == self.last {
                continue;
            }
            self.comparisons += 1;
            if collides(l) {
                self.last = Some(l);
                return true;
            }
        }
        false
    }
}

/// A probe position that survived the obscuration test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    /// `i < j < k`
    pub atoms: [usize; 3],
    pub position: Vec3,
    pub base: Vec3,
    pub height: f64,
    /// Both placements of the triplet survived and overlap each other. They
    /// are then adjacent in the placement list, the `+normal` one first.
    pub mutual: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlacementStats {
    pub triplets: usize,
    pub degenerate: usize,
    pub obscured: usize,
    pub cache_hits: usize,
    pub comparisons: usize,
}

impl AddAssign for PlacementStats {
    fn add_assign(&mut self, other: Self) {
        self.triplets += other.triplets;
        self.degenerate += other.degenerate;
        self.obscured += other.obscured;
        self.cache_hits += other.cache_hits;
        self.comparisons += other.comparisons;
    }
}

fn place_around(
    i: usize,
    spheres: &[Sphere],
    neighbours: &NeighbourIndex,
    probe_radius: f64,
) -> (Vec<Placement>, PlacementStats) {
    let mut placements = Vec::new();
    let mut stats = PlacementStats::default();
    let mut cache = ObscurationCache::default();
    let candidates = neighbours.neighbours(i);

    for &j in candidates.iter().filter(|&&j| j > i) {
        for k in neighbours.common(i, j).into_iter().filter(|&k| k > j) {
            stats.triplets += 1;
            let Some(foot) = base_point(&spheres[i], &spheres[j], &spheres[k], probe_radius) else {
                stats.degenerate += 1;
                continue;
            };
            let mut survivors = Vec::with_capacity(2);
            for side in [1.0, -1.0] {
                let position = foot.base + foot.normal * (side * foot.height);
                if cache.is_obscured(&position, spheres, candidates, [i, j, k], probe_radius) {
                    stats.obscured += 1;
                    continue;
                }
                survivors.push(Placement {
                    atoms: [i, j, k],
                    position,
                    base: foot.base,
                    height: foot.height,
                    mutual: false,
                });
            }
            if survivors.len() == 2 && foot.height < probe_radius {
                for placement in &mut survivors {
                    placement.mutual = true;
                }
            }
            placements.extend(survivors);
        }
    }
    stats.cache_hits = cache.hits;
    stats.comparisons = cache.comparisons;
    (placements, stats)
}

/// Places all unobscured probes, in `(i, j, k)` order.
pub fn place_probes(
    spheres: &[Sphere],
    neighbours: &NeighbourIndex,
    probe_radius: f64,
) -> (Vec<Placement>, PlacementStats) {
    let per_sphere: Vec<(Vec<Placement>, PlacementStats)> = (0..spheres.len())
        .into_par_iter()
        .map(|i| place_around(i, spheres, neighbours, probe_radius))
        .collect();

    let mut placements = Vec::new();
    let mut stats = PlacementStats::default();
    for (found, s) in per_sphere {
        placements.extend(found);
        stats += s;
    }
    debug!(
        "Placed {} probes from {} triplets ({} degenerate, {} obscured)",
        placements.len(),
        stats.triplets,
        stats.degenerate,
        stats.obscured
    );
    (placements, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::run_with_threads;
    use approx::assert_relative_eq;

    fn triangle() -> Vec<Sphere> {
        let h = 3.0 * 3f64.sqrt() / 2.0;
        vec![
            Sphere::new(0.0, 0.0, 0.0, 1.5),
            Sphere::new(3.0, 0.0, 0.0, 1.5),
            Sphere::new(1.5, h, 0.0, 1.5),
        ]
    }

    #[test]
    fn test_probes_touch_all_three() {
        let spheres = triangle();
        let rp = 1.4;
        let neighbours = NeighbourIndex::build(&spheres, rp);
        let (placements, stats) = place_probes(&spheres, &neighbours, rp);
        assert_eq!(stats.triplets, 1);
        assert_eq!(placements.len(), 2);
        for placement in &placements {
            for s in &spheres {
                assert_relative_eq!((placement.position - s.center).norm(), s.radius + rp, epsilon = 1e-9);
            }
            assert!(!placement.mutual);
        }
    }

    #[test]
    fn test_placements_are_mirror_images() {
        let spheres = [
            Sphere::new(0.1, -0.3, 0.2, 1.6),
            Sphere::new(3.2, 0.4, -0.1, 1.2),
            Sphere::new(1.1, 2.7, 0.9, 1.8),
        ];
        let foot = base_point(&spheres[0], &spheres[1], &spheres[2], 1.5).unwrap();
        let up = foot.base + foot.normal * foot.height;
        let down = foot.base - foot.normal * foot.height;
        assert_relative_eq!((up - foot.base).dot(&foot.normal), -(down - foot.base).dot(&foot.normal));
        for s in &spheres {
            assert_relative_eq!((up - s.center).norm(), s.radius + 1.5, epsilon = 1e-9);
            assert_relative_eq!((down - s.center).norm(), s.radius + 1.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_collinear_triplet_is_skipped() {
        let spheres = [
            Sphere::new(0.0, 0.0, 0.0, 1.5),
            Sphere::new(2.0, 0.0, 0.0, 1.5),
            Sphere::new(4.0, 0.0, 0.0, 1.5),
        ];
        assert!(base_point(&spheres[0], &spheres[1], &spheres[2], 1.4).is_none());
    }

    #[test]
    fn test_extra_sphere_never_adds_probes() {
        let mut spheres = triangle();
        let rp = 1.4;
        let before = place_probes(&spheres, &NeighbourIndex::build(&spheres, rp), rp).0;
        // a sphere sitting on top of the triangle buries the upper probe
        spheres.push(Sphere::new(1.5, 0.866, 2.6, 1.5));
        let neighbours = NeighbourIndex::build(&spheres, rp);
        let (after, _) = run_with_threads(2, || place_probes(&spheres, &neighbours, rp));
        let kept: Vec<_> = after.iter().filter(|p| p.atoms == [0, 1, 2]).collect();
        assert!(kept.len() < before.len());
        for placement in kept {
            assert!(before.iter().any(|b| (b.position - placement.position).norm() < 1e-9));
        }
    }

    #[test]
    fn test_cache_reuses_last_obscurer() {
        let spheres = triangle();
        let mut cache = ObscurationCache::default();
        let p = Vec3::new(1.5, 0.866, 0.5);
        assert!(cache.is_obscured(&p, &spheres, &[1, 2], [0, 9, 9], 1.4));
        assert!(cache.is_obscured(&p, &spheres, &[1, 2], [0, 9, 9], 1.4));
        assert_eq!(cache.hits, 1);
        assert!(!cache.is_obscured(&Vec3::new(20.0, 0.0, 0.0), &spheres, &[1, 2], [0, 9, 9], 1.4));
    }
}
