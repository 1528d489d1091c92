//! Unit sphere template obtained by subdividing an icosahedron.
//!
//! Every sphere of a run samples its convex patch interior from the same
//! template, and isolated spheres are emitted as the scaled template mesh.

use std::collections::HashMap;

use super::geometry::Vec3;

pub struct SphereTemplate {
    points: Vec<Vec3>,
    /// Counter-clockwise seen from outside
    triangles: Vec<[usize; 3]>,
    /// Template points sharing an edge with each point
    rings: Vec<Vec<usize>>,
}

const ICOSAHEDRON_FACES: [[usize; 3]; 20] = [
    [0, 8, 4],
    [0, 5, 10],
    [2, 4, 9],
    [2, 11, 5],
    [1, 6, 8],
    [1, 10, 7],
    [3, 9, 6],
    [3, 7, 11],
    [0, 10, 8],
    [1, 8, 10],
    [2, 9, 11],
    [3, 11, 9],
    [4, 2, 0],
    [5, 0, 2],
    [6, 1, 3],
    [7, 3, 1],
    [8, 6, 4],
    [9, 4, 6],
    [10, 5, 7],
    [11, 7, 5],
];

impl SphereTemplate {
    /// Point counts: 12, 42, 162, 642, 2562, 10242 for depths 0 to 5.
    pub fn new(depth: u32) -> Self {
        let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut points: Vec<Vec3> = [
            (t, 1.0, 0.0),
            (-t, 1.0, 0.0),
            (t, -1.0, 0.0),
            (-t, -1.0, 0.0),
            (1.0, 0.0, t),
            (1.0, 0.0, -t),
            (-1.0, 0.0, t),
            (-1.0, 0.0, -t),
            (0.0, t, 1.0),
            (0.0, -t, 1.0),
            (0.0, t, -1.0),
            (0.0, -t, -1.0),
        ]
        .into_iter()
        .map(|(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();

        let mut triangles: Vec<[usize; 3]> = ICOSAHEDRON_FACES
            .iter()
            .map(|&tri| outward(&points, tri))
            .collect();

        for _ in 0..depth {
            let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
            let mut next = Vec::with_capacity(triangles.len() * 4);
            for &[a, b, c] in &triangles {
                let mut midpoint = |u: usize, v: usize| {
                    let key = (u.min(v), u.max(v));
                    *midpoints.entry(key).or_insert_with(|| {
                        let mid = ((points[u] + points[v]) * 0.5).normalize();
                        points.push(mid);
                        points.len() - 1
                    })
                };
                let ab = midpoint(a, b);
                let bc = midpoint(b, c);
                let ca = midpoint(c, a);
                next.extend([[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
            }
            triangles = next;
        }

        let mut rings = vec![Vec::new(); points.len()];
        for &[a, b, c] in &triangles {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                if !rings[u].contains(&v) {
                    rings[u].push(v);
                }
                if !rings[v].contains(&u) {
                    rings[v].push(u);
                }
            }
        }

        Self {
            points,
            triangles,
            rings,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unit vectors.
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Largest angle between two template neighbours, in radians.
    pub fn max_edge_angle(&self) -> f64 {
        self.rings
            .iter()
            .enumerate()
            .flat_map(|(i, ring)| ring.iter().map(move |&j| (i, j)))
            .map(|(i, j)| super::geometry::angle_between(&self.points[i], &self.points[j]))
            .fold(0.0, f64::max)
    }

    pub fn points_on_sphere<'a>(&'a self, center: &'a Vec3, radius: f64) -> impl Iterator<Item = Vec3> + 'a {
        self.points.iter().map(move |p| center + p * radius)
    }
}

fn outward(points: &[Vec3], [a, b, c]: [usize; 3]) -> [usize; 3] {
    let n = super::geometry::triangle_normal(&points[a], &points[b], &points[c]);
    if n.dot(&(points[a] + points[b] + points[c])) < 0.0 {
        [a, c, b]
    } else {
        [a, b, c]
    }
}
