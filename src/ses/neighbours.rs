//! Neighbour lists: two spheres are neighbours when a probe can touch both
//! at once, `|xi - xj| < ri + rj + 2 rp`.

use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::types::Sphere;

type CenterPoint = GeomWithData<[f64; 3], usize>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighbourIndex {
    lists: Vec<Vec<usize>>,
    comparisons: usize,
}

fn touches(a: &Sphere, b: &Sphere, probe_radius: f64) -> bool {
    let reach = a.radius + b.radius + 2.0 * probe_radius;
    (a.center - b.center).norm_squared() < reach * reach
}

impl NeighbourIndex {
    /// Builds the lists with an R-tree over sphere centres.
    pub fn build(spheres: &[Sphere], probe_radius: f64) -> Self {
        let max_radius = spheres.iter().map(|s| s.radius).fold(0.0, f64::max);
        let tree: RTree<CenterPoint> = RTree::bulk_load(
            spheres
                .iter()
                .enumerate()
                .map(|(i, s)| CenterPoint::new([s.center.x, s.center.y, s.center.z], i))
                .collect(),
        );

        let (lists, counts): (Vec<Vec<usize>>, Vec<usize>) = spheres
            .par_iter()
            .enumerate()
            .map(|(i, sphere)| {
                let reach = sphere.radius + max_radius + 2.0 * probe_radius;
                let query = [sphere.center.x, sphere.center.y, sphere.center.z];
                let mut comparisons = 0;
                let mut list: Vec<usize> = tree
                    .locate_within_distance(query, reach * reach)
                    .map(|hit| hit.data)
                    .filter(|&j| {
                        if j == i {
                            return false;
                        }
                        comparisons += 1;
                        touches(sphere, &spheres[j], probe_radius)
                    })
                    .collect();
                list.sort_unstable();
                (list, comparisons)
            })
            .unzip();

        Self {
            lists,
            comparisons: counts.iter().sum(),
        }
    }

    /// Reference O(n²) construction.
    pub fn brute_force(spheres: &[Sphere], probe_radius: f64) -> Self {
        let mut lists = vec![Vec::new(); spheres.len()];
        let mut comparisons = 0;
        for i in 0..spheres.len() {
            for j in i + 1..spheres.len() {
                comparisons += 1;
                if touches(&spheres[i], &spheres[j], probe_radius) {
                    lists[i].push(j);
                    lists[j].push(i);
                }
            }
        }
        Self { lists, comparisons }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Sorted neighbours of sphere `i`.
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.lists[i]
    }

    /// Number of exact distance tests performed while building.
    pub fn comparisons(&self) -> usize {
        self.comparisons
    }

    /// Sorted neighbours shared by `i` and `j`.
    pub fn common(&self, i: usize, j: usize) -> Vec<usize> {
        let (a, b) = (&self.lists[i], &self.lists[j]);
        let mut out = Vec::with_capacity(a.len().min(b.len()));
        let (mut x, mut y) = (0, 0);
        while x < a.len() && y < b.len() {
            match a[x].cmp(&b[y]) {
                std::cmp::Ordering::Less => x += 1,
                std::cmp::Ordering::Greater => y += 1,
                std::cmp::Ordering::Equal => {
                    out.push(a[x]);
                    x += 1;
                    y += 1;
                }
            }
        }
        out
    }
}
