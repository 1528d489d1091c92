//! Indexed triangle mesh with per-point normals and per-triangle colours.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use polars::prelude::*;

use crate::ses::Vec3;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    colors: Vec<u32>,
}

/// Edge usage summary of a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeAudit {
    pub edges: usize,
    /// Edges with a single triangle
    pub open: usize,
    /// Edges with more than two triangles
    pub overused: usize,
}

/// Counts for one edge-connected set of triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Component {
    pub vertices: usize,
    pub edges: usize,
    pub triangles: usize,
}

impl Component {
    /// `V - E + F`; 2 for a closed sphere-like surface.
    pub fn euler_characteristic(&self) -> i64 {
        self.vertices as i64 - self.edges as i64 + self.triangles as i64
    }
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, position: Vec3, normal: Vec3) -> u32 {
        self.positions.push(position);
        self.normals.push(normal);
        (self.positions.len() - 1) as u32
    }

    pub fn add_triangle(&mut self, v0: u32, v1: u32, v2: u32, color: u32) {
        self.triangles.push([v0, v1, v2]);
        self.colors.push(color);
    }

    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn position(&self, i: u32) -> &Vec3 {
        &self.positions[i as usize]
    }

    pub fn normal(&self, i: u32) -> &Vec3 {
        &self.normals[i as usize]
    }

    pub fn triangle(&self, i: usize) -> ([u32; 3], u32) {
        (self.triangles[i], self.colors[i])
    }

    pub fn triangles(&self) -> impl Iterator<Item = ([u32; 3], u32)> + '_ {
        self.triangles.iter().copied().zip(self.colors.iter().copied())
    }

    /// Number of triangles on each undirected edge.
    pub fn edge_usage(&self) -> HashMap<(u32, u32), usize> {
        let mut usage = HashMap::with_capacity(self.triangles.len() * 3 / 2);
        for &[a, b, c] in &self.triangles {
            for (x, y) in [(a, b), (b, c), (c, a)] {
                *usage.entry((x.min(y), x.max(y))).or_default() += 1;
            }
        }
        usage
    }

    pub fn audit_edges(&self) -> EdgeAudit {
        let usage = self.edge_usage();
        EdgeAudit {
            edges: usage.len(),
            open: usage.values().filter(|&&n| n == 1).count(),
            overused: usage.values().filter(|&&n| n > 2).count(),
        }
    }

    /// Splits the mesh into edge-connected components.
    pub fn components(&self) -> Vec<Component> {
        let mut parent: Vec<usize> = (0..self.triangles.len()).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        let mut first_on_edge: HashMap<(u32, u32), usize> = HashMap::new();
        for (t, &[a, b, c]) in self.triangles.iter().enumerate() {
            for (x, y) in [(a, b), (b, c), (c, a)] {
                let key = (x.min(y), x.max(y));
                match first_on_edge.get(&key) {
                    Some(&other) => {
                        let (ra, rb) = (find(&mut parent, t), find(&mut parent, other));
                        parent[ra] = rb;
                    }
                    None => {
                        first_on_edge.insert(key, t);
                    }
                }
            }
        }

        let mut by_root: HashMap<usize, (Vec<u32>, usize)> = HashMap::new();
        for (t, tri) in self.triangles.iter().enumerate() {
            let root = find(&mut parent, t);
            let entry = by_root.entry(root).or_default();
            entry.0.extend_from_slice(tri);
            entry.1 += 1;
        }
        let mut edge_counts: HashMap<usize, usize> = HashMap::new();
        for &t in first_on_edge.values() {
            *edge_counts.entry(find(&mut parent, t)).or_default() += 1;
        }

        let mut components: Vec<Component> = by_root
            .into_iter()
            .map(|(root, (mut vertices, triangles))| {
                vertices.sort_unstable();
                vertices.dedup();
                Component {
                    vertices: vertices.len(),
                    edges: edge_counts.get(&root).copied().unwrap_or(0),
                    triangles,
                }
            })
            .collect();
        components.sort_by_key(|c| std::cmp::Reverse(c.triangles));
        components
    }

    /// One row per point: `x, y, z, nx, ny, nz`.
    pub fn points_dataframe(&self) -> PolarsResult<DataFrame> {
        let axis = |source: &[Vec3], k: usize| source.iter().map(|v| v[k]).collect::<Vec<f64>>();
        df!(
            "x" => axis(&self.positions, 0),
            "y" => axis(&self.positions, 1),
            "z" => axis(&self.positions, 2),
            "nx" => axis(&self.normals, 0),
            "ny" => axis(&self.normals, 1),
            "nz" => axis(&self.normals, 2)
        )
    }

    /// One row per triangle: `v0, v1, v2, color`.
    pub fn triangles_dataframe(&self) -> PolarsResult<DataFrame> {
        df!(
            "v0" => self.triangles.iter().map(|t| t[0]).collect::<Vec<u32>>(),
            "v1" => self.triangles.iter().map(|t| t[1]).collect::<Vec<u32>>(),
            "v2" => self.triangles.iter().map(|t| t[2]).collect::<Vec<u32>>(),
            "color" => self.colors.clone()
        )
    }

    /// Axis-aligned bounds of the points as `(min, max)`.
    pub fn bounds(&self) -> PolarsResult<Option<(Vec3, Vec3)>> {
        if self.positions.is_empty() {
            return Ok(None);
        }
        let extent = self
            .points_dataframe()?
            .lazy()
            .select([
                col("x").min().alias("x_min"),
                col("y").min().alias("y_min"),
                col("z").min().alias("z_min"),
                col("x").max().alias("x_max"),
                col("y").max().alias("y_max"),
                col("z").max().alias("z_max"),
            ])
            .collect()?;
        let get = |name: &str| -> PolarsResult<f64> {
            Ok(extent.column(name)?.f64()?.get(0).unwrap_or(f64::NAN))
        };
        Ok(Some((
            Vec3::new(get("x_min")?, get("y_min")?, get("z_min")?),
            Vec3::new(get("x_max")?, get("y_max")?, get("z_max")?),
        )))
    }

    /// Wavefront OBJ with vertex normals; colours are dropped.
    pub fn write_obj<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for p in &self.positions {
            writeln!(out, "v {:.4} {:.4} {:.4}", p.x, p.y, p.z)?;
        }
        for n in &self.normals {
            writeln!(out, "vn {:.4} {:.4} {:.4}", n.x, n.y, n.z)?;
        }
        for &[a, b, c] in &self.triangles {
            let (a, b, c) = (a + 1, b + 1, c + 1);
            writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
        }
        Ok(())
    }
}

/// Writes one `x y z r` line per probe, three decimals each.
pub fn write_probe_dump<P: AsRef<Path>>(path: P, positions: &[Vec3], probe_radius: f64) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for p in positions {
        writeln!(out, "{:.3} {:.3} {:.3} {:.3}", p.x, p.y, p.z, probe_radius)?;
    }
    out.flush()
}
