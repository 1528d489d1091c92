//! One surface construction run: probes, tori, faces and their meshes.

use std::collections::HashMap;

use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use tracing::{debug, info};

use super::geometry::{frame, Vec3};
use super::graph::SurfaceGraph;
use super::neighbours::NeighbourIndex;
use super::patch::{interior_candidates, Mode, PatchPoint, PatchSphere, PatchTriangulator};
use super::probes::{place_probes, Placement};
use super::report::{Diagnostic, SurfaceReport};
use super::saddle::{self, materialize_row, tessellate_saddle, wrap_row, CONTACT_A, CONTACT_B};
use super::settings::{Settings, Strategy};
use super::sphere_template::SphereTemplate;
use super::tori::{pair_edges, PairingError, RollingEdge, TorusGeometry};
use super::types::*;
use crate::mesh::{write_probe_dump, TriangleMesh};
use crate::SurfaceError;

/// Corner of a patch triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PatchRef {
    /// Vertex shared with neighbouring faces
    Shared(VertexId),
    /// Point created by and private to the patch
    Local(usize),
}

/// Triangles of one patch before they are copied into the mesh.
#[derive(Clone, Debug, Default)]
struct LocalPatch {
    /// Position and normal of the private points
    points: Vec<(Vec3, Vec3)>,
    triangles: Vec<([PatchRef; 3], u32)>,
    diagnostics: Vec<Diagnostic>,
}

impl LocalPatch {
    fn append(&mut self, mut other: LocalPatch) {
        let offset = self.points.len();
        self.points.append(&mut other.points);
        self.triangles.extend(other.triangles.into_iter().map(|(refs, color)| {
            (
                refs.map(|r| match r {
                    PatchRef::Local(k) => PatchRef::Local(k + offset),
                    shared => shared,
                }),
                color,
            )
        }));
        self.diagnostics.append(&mut other.diagnostics);
    }
}

/// Boundary and interior points handed to the patch triangulator.
#[derive(Default)]
struct PatchInput {
    points: Vec<PatchPoint>,
    refs: Vec<PatchRef>,
    boundary: Vec<(usize, usize)>,
    index: HashMap<VertexId, usize>,
}

impl PatchInput {
    fn add_loop(&mut self, graph: &SurfaceGraph, sequence: Vec<(VertexId, Vec<usize>)>) {
        let locals: Vec<usize> = sequence
            .into_iter()
            .map(|(vertex, circles)| match self.index.get(&vertex) {
                Some(&local) => {
                    for circle in circles {
                        if !self.points[local].circles.contains(&circle) {
                            self.points[local].circles.push(circle);
                        }
                    }
                    local
                }
                None => {
                    self.points.push(PatchPoint::on_boundary(graph.position(vertex), circles));
                    self.refs.push(PatchRef::Shared(vertex));
                    self.index.insert(vertex, self.points.len() - 1);
                    self.points.len() - 1
                }
            })
            .collect();
        for k in 0..locals.len() {
            let (a, b) = (locals[k], locals[(k + 1) % locals.len()]);
            if a != b {
                self.boundary.push((a, b));
            }
        }
    }

    fn boundary_positions(&self) -> Vec<Vec3> {
        self.points.iter().map(|p| p.position).collect()
    }
}

/// Builds the solvent-excluded surface of `spheres` and returns it with a
/// report of the run.
///
/// Hidden spheres are ignored entirely. Topological problems do not abort the
/// run; they are listed in [`SurfaceReport::diagnostics`].
pub fn build_surface(spheres: &[Sphere], settings: &Settings) -> Result<(TriangleMesh, SurfaceReport), SurfaceError> {
    settings.validate()?;
    if let Some(index) = spheres.iter().position(|s| !s.is_valid()) {
        return Err(SurfaceError::InvalidSphere { index });
    }
    let original: Vec<usize> = (0..spheres.len()).filter(|&i| spheres[i].visible).collect();
    debug!(
        "Building surface of {} spheres ({} hidden)",
        original.len(),
        spheres.len() - original.len()
    );
    let active = original.iter().map(|&i| spheres[i]).collect();
    let mut builder = SurfaceBuilder::new(active, original, settings);
    builder.report.spheres = spheres.len();
    builder.run()
}

/// Positions of every probe that touches three spheres without being
/// buried, in `(i, j, k)` order.
pub fn probe_positions(spheres: &[Sphere], settings: &Settings) -> Result<Vec<Vec3>, SurfaceError> {
    settings.validate()?;
    if let Some(index) = spheres.iter().position(|s| !s.is_valid()) {
        return Err(SurfaceError::InvalidSphere { index });
    }
    let active: Vec<Sphere> = spheres.iter().filter(|s| s.visible).copied().collect();
    let neighbours = NeighbourIndex::build(&active, settings.probe_radius);
    let (placements, _) = place_probes(&active, &neighbours, settings.probe_radius);
    Ok(placements.into_iter().map(|p| p.position).collect())
}

struct SurfaceBuilder<'a> {
    settings: &'a Settings,
    spheres: Vec<Sphere>,
    /// Input index of every active sphere
    original: Vec<usize>,
    template: SphereTemplate,
    template_angle: f64,
    neighbours: NeighbourIndex,
    graph: SurfaceGraph,
    report: SurfaceReport,
    mesh: TriangleMesh,
    surfaced: Vec<bool>,
}

impl<'a> SurfaceBuilder<'a> {
    fn new(spheres: Vec<Sphere>, original: Vec<usize>, settings: &'a Settings) -> Self {
        let template = SphereTemplate::new(settings.subdivision_depth);
        let template_angle = template.max_edge_angle();
        let neighbours = NeighbourIndex::build(&spheres, settings.probe_radius);
        let surfaced = vec![false; spheres.len()];
        Self {
            settings,
            spheres,
            original,
            template,
            template_angle,
            neighbours,
            graph: SurfaceGraph::new(),
            report: SurfaceReport::default(),
            mesh: TriangleMesh::new(),
            surfaced,
        }
    }

    fn rp(&self) -> f64 {
        self.settings.probe_radius
    }

    /// Target distance between neighbouring points on a sphere of `radius`.
    fn spacing(&self, radius: f64) -> f64 {
        self.settings.edge_length.max(self.template_angle * radius)
    }

    fn run(mut self) -> Result<(TriangleMesh, SurfaceReport), SurfaceError> {
        let (placements, stats) = place_probes(&self.spheres, &self.neighbours, self.rp());
        self.report.triplets = stats.triplets;
        self.report.distance_comparisons = self.neighbours.comparisons() + stats.comparisons;
        self.report.obscuration_cache_hits = stats.cache_hits;
        let mutual = placements.iter().filter(|p| p.mutual).count() / 2;
        debug!("{mutual} triplets have two overlapping probes");

        for placement in &placements {
            self.add_probe(placement);
        }
        self.link_partners();
        self.build_saddles();
        let saddle_halves = self.tessellate_saddles();
        let convex_loops = self.build_convex_faces();
        self.check_faces();

        match self.settings.strategy {
            Strategy::Whole => self.emit_whole(saddle_halves, &convex_loops),
            Strategy::PerAtom => self.emit_per_atom(saddle_halves, &convex_loops),
        }
        self.finish()
    }

    /// Torus of a pair, created on first use.
    fn torus_for(&mut self, x: usize, y: usize) -> Option<TorusId> {
        if let Some(id) = self.graph.find_torus(x, y) {
            return Some(id);
        }
        let (a, b) = (x.min(y), x.max(y));
        let rp = self.rp();
        let geometry = TorusGeometry::new(&self.spheres[a], &self.spheres[b], rp)?;
        let cusps = geometry.cusp_points(rp).map(|[ca, cb]| {
            [
                self.graph.add_vertex(ca, geometry.axis, None),
                self.graph.add_vertex(cb, -geometry.axis, None),
            ]
        });
        Some(self.graph.add_torus(Torus {
            atoms: (a, b),
            frame: frame(&geometry.axis),
            wrap_steps: saddle::wrap_steps(&geometry, rp, self.settings.edge_length),
            geometry,
            cusps,
            edges: Vec::new(),
            saddles: Vec::new(),
        }))
    }

    /// Turns a placement into a probe with its contact vertices, its three
    /// sampled edges and its concave face.
    fn add_probe(&mut self, placement: &Placement) {
        let rp = self.rp();
        let p = placement.position;
        let contact = |s: &Sphere| p + (s.center - p) * (rp / (s.radius + rp));
        let [i, j, k] = placement.atoms;
        let [ci, cj, ck] = placement.atoms.map(|x| contact(&self.spheres[x]));
        let orientation = (ci - p).cross(&(cj - p)).dot(&(ck - p));
        let atoms = if orientation < 0.0 { [i, j, k] } else { [i, k, j] };

        let mut tori = Vec::with_capacity(3);
        for e in 0..3 {
            match self.torus_for(atoms[e], atoms[(e + 1) % 3]) {
                Some(torus) => tori.push(torus),
                None => {
                    debug!("Probe on ({i}, {j}, {k}) has no torus on one side, skipped");
                    return;
                }
            }
        }

        let vertices = atoms.map(|x| {
            let v = contact(&self.spheres[x]);
            self.graph.add_vertex(v, (p - v) / rp, Some(x))
        });
        let probe_id = ProbeId(self.graph.probes.len());
        let mut edges = [EdgeId(0); 3];
        let mut uses = Vec::with_capacity(3);
        for e in 0..3 {
            let (x, y) = (atoms[e], atoms[(e + 1) % 3]);
            let (vx, vy) = (vertices[e], vertices[(e + 1) % 3]);
            let third = self.graph.position(vertices[(e + 2) % 3]);
            let ((a, va), (b, vb)) = if x < y { ((x, vx), (y, vy)) } else { ((y, vy), (x, vx)) };

            let torus = self.graph.torus(tori[e]).clone();
            let cusps = torus.cusps.map(|[ca, cb]| [self.graph.position(ca), self.graph.position(cb)]);
            let row = wrap_row(
                &self.spheres[a].center,
                &self.spheres[b].center,
                &p,
                rp,
                torus.wrap_steps,
                cusps.as_ref(),
            );
            let points = materialize_row(&mut self.graph, &torus, &row, Some((va, vb)));

            let mut normal = (self.graph.position(va) - p)
                .cross(&(self.graph.position(vb) - p))
                .normalize();
            if normal.dot(&(third - p)) > 0.0 {
                normal = -normal;
            }
            let edge = self.graph.add_edge(Edge {
                start: va,
                end: vb,
                circle: Circle {
                    center: p,
                    radius: rp,
                    normal,
                },
                owner: EdgeOwner::Probe(probe_id),
                torus: tori[e],
                points,
                self_intersects: torus.self_intersects(),
            });
            self.graph.torus_mut(tori[e]).edges.push(edge);
            edges[e] = edge;
            uses.push(if x < y {
                EdgeUse::forward(edge)
            } else {
                EdgeUse::backward(edge)
            });
        }

        let face = self.graph.add_face(Face {
            kind: FaceKind::Concave,
            edges: uses,
            owner: None,
            saddle: None,
        });
        self.graph.add_probe(Probe {
            atoms,
            position: p,
            height: placement.height,
            vertices,
            edges,
            face,
            tori: [tori[0], tori[1], tori[2]],
            partners: Vec::new(),
        });
    }

    /// Records every pair of probes closer than two probe radii.
    fn link_partners(&mut self) {
        let reach = 2.0 * self.rp();
        let tree: RTree<GeomWithData<[f64; 3], usize>> = RTree::bulk_load(
            self.graph
                .probes
                .iter()
                .enumerate()
                .map(|(n, probe)| GeomWithData::new(probe.position.into(), n))
                .collect(),
        );
        for n in 0..self.graph.probes.len() {
            let position: [f64; 3] = self.graph.probes[n].position.into();
            let mut partners: Vec<ProbeId> = tree
                .locate_within_distance(position, reach * reach)
                .map(|hit| hit.data)
                .filter(|&m| m != n)
                .filter(|&m| (self.graph.probes[m].position - self.graph.probes[n].position).norm() < reach)
                .map(ProbeId)
                .collect();
            partners.sort_unstable();
            self.graph.probes[n].partners = partners;
        }
        self.report.self_intersecting_probes = self.graph.probes.iter().filter(|p| !p.partners.is_empty()).count();
    }

    /// Whether the probe that owns `edge` rolls freely towards increasing
    /// torus angle.
    fn role(&self, edge: EdgeId) -> Option<Role> {
        let EdgeOwner::Probe(probe) = self.graph.edge(edge).owner else {
            return None;
        };
        let probe = self.graph.probe(probe);
        let e = probe.edges.iter().position(|&x| x == edge)?;
        Some(if probe.atoms[e] < probe.atoms[(e + 1) % 3] {
            Role::Start
        } else {
            Role::Stop
        })
    }

    fn build_saddles(&mut self) {
        for t in 0..self.graph.tori.len() {
            let torus_id = TorusId(t);
            let torus = self.graph.torus(torus_id).clone();
            let (a, b) = torus.atoms;
            let rolling: Vec<RollingEdge<EdgeId>> = torus
                .edges
                .iter()
                .filter_map(|&edge| {
                    let EdgeOwner::Probe(probe) = self.graph.edge(edge).owner else {
                        return None;
                    };
                    Some(RollingEdge {
                        angle: torus.angle_of(&self.graph.probe(probe).position),
                        role: self.role(edge)?,
                        edge,
                    })
                })
                .collect();

            let pairs = match pair_edges(rolling) {
                Ok(pairs) => pairs,
                Err(PairingError::OddCount(count)) => {
                    self.report
                        .push(Diagnostic::OddTorusEdges(self.original[a], self.original[b], count));
                    continue;
                }
                Err(PairingError::NotAlternating) => {
                    self.report
                        .push(Diagnostic::UnpairedTorusEdges(self.original[a], self.original[b]));
                    continue;
                }
            };

            let g = &torus.geometry;
            for pair in pairs {
                let (start, stop) = (self.graph.edge(pair.start).clone(), self.graph.edge(pair.stop).clone());
                let (EdgeOwner::Probe(start_probe), EdgeOwner::Probe(stop_probe)) = (start.owner, stop.owner) else {
                    continue;
                };
                let mut contact = |side: usize, from: VertexId, to: VertexId| {
                    self.graph.add_edge(Edge {
                        start: from,
                        end: to,
                        circle: Circle {
                            center: g.contact_centers[side],
                            radius: g.contact_radii[side],
                            normal: g.axis,
                        },
                        owner: EdgeOwner::Sphere(if side == 0 { a } else { b }),
                        torus: torus_id,
                        points: vec![from, to],
                        self_intersects: torus.self_intersects(),
                    })
                };
                let contact_a = contact(0, start.start, stop.start);
                let contact_b = contact(1, start.end, stop.end);
                let face = self.graph.add_face(Face {
                    kind: FaceKind::Saddle,
                    edges: vec![
                        EdgeUse::forward(contact_a),
                        EdgeUse::forward(pair.stop),
                        EdgeUse::backward(contact_b),
                        EdgeUse::backward(pair.start),
                    ],
                    owner: None,
                    saddle: Some(SaddleSpan {
                        torus: torus_id,
                        start_angle: pair.start_angle,
                        stop_angle: pair.stop_angle,
                        start_probe,
                        stop_probe,
                    }),
                });
                self.graph.torus_mut(torus_id).saddles.push(face);
            }
        }
    }

    /// Samples all saddles; returns their triangles per owning sphere.
    fn tessellate_saddles(&mut self) -> Vec<Vec<[VertexId; 3]>> {
        let mut halves = vec![Vec::new(); self.spheres.len()];
        for t in 0..self.graph.tori.len() {
            let (a, b) = self.graph.tori[t].atoms;
            for face in self.graph.tori[t].saddles.clone() {
                let [tri_a, tri_b] = tessellate_saddle(
                    &mut self.graph,
                    face,
                    (&self.spheres[a].center, &self.spheres[b].center),
                    self.settings.probe_radius,
                    self.settings.edge_length,
                );
                halves[a].extend(tri_a);
                halves[b].extend(tri_b);
            }
        }
        halves
    }

    /// Chains the contact edges of every sphere into convex faces.
    fn build_convex_faces(&mut self) -> Vec<Vec<Vec<EdgeUse>>> {
        let mut uses: Vec<Vec<EdgeUse>> = vec![Vec::new(); self.spheres.len()];
        for torus in &self.graph.tori {
            let (a, b) = torus.atoms;
            for &face in &torus.saddles {
                let edges = &self.graph.face(face).edges;
                uses[a].push(EdgeUse::backward(edges[CONTACT_A].edge));
                uses[b].push(EdgeUse::forward(edges[CONTACT_B].edge));
            }
        }

        let mut all_loops = Vec::with_capacity(self.spheres.len());
        for (x, sphere_uses) in uses.into_iter().enumerate() {
            let edge_count = sphere_uses.len();
            let (loops, open) = self.graph.chain_loops(sphere_uses);
            if !open.is_empty() {
                self.report.push(Diagnostic::OpenContactLoop {
                    sphere: self.original[x],
                    open: open.len(),
                });
            }
            let vertex_count: usize = loops.iter().map(|l| self.graph.loop_points(l).len()).sum();
            self.report.max_vertices_per_sphere = self.report.max_vertices_per_sphere.max(vertex_count);
            self.report.max_edges_per_sphere = self.report.max_edges_per_sphere.max(edge_count);
            for edges in &loops {
                self.graph.add_face(Face {
                    kind: FaceKind::Convex,
                    edges: edges.clone(),
                    owner: Some(x),
                    saddle: None,
                });
            }
            if !open.is_empty() {
                self.graph.add_face(Face {
                    kind: FaceKind::Undefined,
                    edges: open,
                    owner: Some(x),
                    saddle: None,
                });
            }
            all_loops.push(loops);
        }
        all_loops
    }

    /// Every face except the leftovers must be a closed loop of edge uses.
    fn check_faces(&mut self) {
        let open: Vec<Diagnostic> = self
            .graph
            .faces
            .iter()
            .enumerate()
            .filter(|(_, face)| face.kind != FaceKind::Undefined && !self.graph.is_closed(&face.edges))
            .map(|(face, f)| Diagnostic::OpenFace { kind: f.kind, face })
            .collect();
        for diagnostic in open {
            self.report.push(diagnostic);
        }
    }

    /// Point sequence of a loop, each point tagged with the circles it lies on.
    fn loop_sequence(&self, uses: &[EdgeUse], circle: impl Fn(&Edge, EdgeId) -> usize) -> Vec<(VertexId, Vec<usize>)> {
        let mut sequence = Vec::new();
        for (k, &u) in uses.iter().enumerate() {
            let previous = uses[(k + uses.len() - 1) % uses.len()].edge;
            let own = circle(self.graph.edge(u.edge), u.edge);
            let before = circle(self.graph.edge(previous), previous);
            let walked = self.graph.walk(u);
            for (idx, &vertex) in walked[..walked.len().saturating_sub(1)].iter().enumerate() {
                let mut circles = vec![own];
                if idx == 0 && before != own {
                    circles.push(before);
                }
                sequence.push((vertex, circles));
            }
        }
        sequence
    }

    fn convex_visible(&self, x: usize, point: &Vec3) -> bool {
        let rp = self.rp();
        let s = &self.spheres[x];
        let probe = s.center + (point - s.center) * ((s.radius + rp) / s.radius);
        self.neighbours.neighbours(x).iter().all(|&l| {
            let reach = self.spheres[l].radius + rp;
            (probe - self.spheres[l].center).norm_squared() > reach * reach
        })
    }

    fn template_patch(&self, x: usize) -> LocalPatch {
        let s = &self.spheres[x];
        let color = s.color_or_default();
        LocalPatch {
            points: self
                .template
                .points()
                .iter()
                .map(|u| (s.center + u * s.radius, *u))
                .collect(),
            triangles: self
                .template
                .triangles()
                .iter()
                .map(|tri| (tri.map(PatchRef::Local), color))
                .collect(),
            diagnostics: Vec::new(),
        }
    }

    /// Convex patch of sphere `x`: the scaled template for isolated spheres,
    /// otherwise the region bounded by its contact loops.
    fn convex_patch(&self, x: usize, loops: &[Vec<EdgeUse>], mode: Mode) -> LocalPatch {
        if self.neighbours.neighbours(x).is_empty() {
            return self.template_patch(x);
        }
        let s = &self.spheres[x];
        let sphere = PatchSphere {
            center: s.center,
            radius: s.radius,
            spacing: self.spacing(s.radius),
        };
        let visible = |p: &Vec3| self.convex_visible(x, p);
        let mut patch = LocalPatch::default();
        if loops.is_empty() {
            let accessible = self.template.points_on_sphere(&s.center, s.radius).any(|p| visible(&p));
            if accessible {
                patch.diagnostics.push(Diagnostic::UnboundedSphere(self.original[x]));
            }
            return patch;
        }

        let mut input = PatchInput::default();
        for uses in loops {
            input.add_loop(&self.graph, self.loop_sequence(uses, |edge, _| edge.torus.0));
        }
        let boundary = input.boundary_positions();
        for point in interior_candidates(&sphere, &self.template, &boundary, visible) {
            patch.points.push((point, (point - s.center) / s.radius));
            input.refs.push(PatchRef::Local(patch.points.len() - 1));
            input.points.push(PatchPoint::interior(point));
        }

        let outcome = PatchTriangulator::new(sphere, &input.points, &input.boundary, visible).triangulate(mode);
        let color = s.color_or_default();
        patch.triangles = outcome
            .triangles
            .iter()
            .map(|tri| (tri.map(|v| input.refs[v]), color))
            .collect();
        self.check_outcome(&mut patch, FaceKind::Convex, self.original[x], outcome.open_edges, outcome.third_uses);
        patch
    }

    fn check_outcome(&self, patch: &mut LocalPatch, kind: FaceKind, owner: usize, open: usize, third_uses: usize) {
        if open > 0 {
            patch.diagnostics.push(Diagnostic::OpenPatch { kind, owner, open });
        }
        if third_uses > 0 {
            patch.diagnostics.push(Diagnostic::OverusedPatchEdges {
                kind,
                owner,
                count: third_uses,
            });
        }
    }

    /// Concave patch of a probe: the spherical triangle between its three
    /// contact vertices. Overlapping probes do not trim it.
    fn concave_patch(&self, probe_id: ProbeId, mode: Mode) -> LocalPatch {
        let rp = self.rp();
        let probe = self.graph.probe(probe_id);
        let p = probe.position;
        let corners = probe.vertices.map(|v| (self.graph.position(v) - p).normalize());
        let planes = [
            corners[0].cross(&corners[1]),
            corners[1].cross(&corners[2]),
            corners[2].cross(&corners[0]),
        ];
        let visible = |q: &Vec3| {
            let d = q - p;
            planes.iter().all(|n| n.dot(&d) < 0.0)
        };

        let mut input = PatchInput::default();
        let face = self.graph.face(probe.face);
        let mut sequence = self.loop_sequence(&face.edges, |_, id| id.0);
        // seen from outside the probe sphere the loop runs the other way
        sequence.reverse();
        input.add_loop(&self.graph, sequence);

        let sphere = PatchSphere {
            center: p,
            radius: rp,
            spacing: self.spacing(rp),
        };
        let mut patch = LocalPatch::default();
        let boundary = input.boundary_positions();
        for point in interior_candidates(&sphere, &self.template, &boundary, visible) {
            patch.points.push((point, (p - point) / rp));
            input.refs.push(PatchRef::Local(patch.points.len() - 1));
            input.points.push(PatchPoint::interior(point));
        }

        let outcome = PatchTriangulator::new(sphere, &input.points, &input.boundary, visible).triangulate(mode);
        let contacts = probe.vertices.map(|v| self.graph.position(v));
        patch.triangles = outcome
            .triangles
            .iter()
            .map(|&[a, b, c]| {
                let centroid = (input.points[a].position + input.points[b].position + input.points[c].position) / 3.0;
                let nearest = (0..3)
                    .min_by(|&m, &n| {
                        (contacts[m] - centroid)
                            .norm_squared()
                            .total_cmp(&(contacts[n] - centroid).norm_squared())
                    })
                    .unwrap_or(0);
                let color = self.spheres[probe.atoms[nearest]].color_or_default();
                ([input.refs[a], input.refs[c], input.refs[b]], color)
            })
            .collect();
        let owner = self.original[probe.lowest_atom()];
        self.check_outcome(&mut patch, FaceKind::Concave, owner, outcome.open_edges, outcome.third_uses);
        patch
    }

    fn saddle_patch(&self, x: usize, triangles: &[[VertexId; 3]]) -> LocalPatch {
        let color = self.spheres[x].color_or_default();
        LocalPatch {
            points: Vec::new(),
            triangles: triangles
                .iter()
                .map(|tri| (tri.map(PatchRef::Shared), color))
                .collect(),
            diagnostics: Vec::new(),
        }
    }

    /// Scan mode, every patch written to the mesh as soon as it is done.
    fn emit_whole(&mut self, saddle_halves: Vec<Vec<[VertexId; 3]>>, convex_loops: &[Vec<Vec<EdgeUse>>]) {
        for (x, triangles) in saddle_halves.iter().enumerate() {
            let patch = self.saddle_patch(x, triangles);
            self.emit(x, patch);
        }
        for (x, loops) in convex_loops.iter().enumerate() {
            let patch = self.convex_patch(x, loops, Mode::Scan);
            self.emit(x, patch);
        }
        for n in 0..self.graph.probes.len() {
            let patch = self.concave_patch(ProbeId(n), Mode::Scan);
            self.emit_unowned(patch);
        }
    }

    /// Stitch mode, one local patch per sphere built in parallel and merged
    /// in sphere order.
    fn emit_per_atom(&mut self, saddle_halves: Vec<Vec<[VertexId; 3]>>, convex_loops: &[Vec<Vec<EdgeUse>>]) {
        let mut probes_of = vec![Vec::new(); self.spheres.len()];
        for (n, probe) in self.graph.probes.iter().enumerate() {
            probes_of[probe.lowest_atom()].push(ProbeId(n));
        }

        let this = &*self;
        let patches: Vec<(LocalPatch, bool)> = (0..this.spheres.len())
            .into_par_iter()
            .map(|x| {
                let mut patch = this.convex_patch(x, &convex_loops[x], Mode::Stitch);
                patch.append(this.saddle_patch(x, &saddle_halves[x]));
                let surfaced = !patch.triangles.is_empty();
                for &probe in &probes_of[x] {
                    patch.append(this.concave_patch(probe, Mode::Stitch));
                }
                (patch, surfaced)
            })
            .collect();

        for (x, (patch, surfaced)) in patches.into_iter().enumerate() {
            self.surfaced[x] |= surfaced;
            self.emit_unowned(patch);
        }
    }

    fn emit(&mut self, x: usize, patch: LocalPatch) {
        self.surfaced[x] |= !patch.triangles.is_empty();
        self.emit_unowned(patch);
    }

    /// Copies a patch into the mesh. Shared vertices get their mesh index on
    /// first use; private points are appended as they are referenced.
    fn emit_unowned(&mut self, patch: LocalPatch) {
        for diagnostic in patch.diagnostics {
            self.report.push(diagnostic);
        }
        let mut local: Vec<Option<u32>> = vec![None; patch.points.len()];
        for (refs, color) in patch.triangles {
            let [a, b, c] = refs.map(|r| match r {
                PatchRef::Local(k) => *local[k].get_or_insert_with(|| {
                    let (position, normal) = patch.points[k];
                    self.mesh.add_point(position, normal)
                }),
                PatchRef::Shared(id) => {
                    let vertex = self.graph.vertex_mut(id);
                    match vertex.mesh_index {
                        Some(index) => index,
                        None => {
                            let index = self.mesh.add_point(vertex.position, vertex.normal);
                            vertex.mesh_index = Some(index);
                            index
                        }
                    }
                }
            });
            self.mesh.add_triangle(a, b, c, color);
        }
    }

    fn finish(mut self) -> Result<(TriangleMesh, SurfaceReport), SurfaceError> {
        let audit = self.mesh.audit_edges();
        let report = &mut self.report;
        report.probes = self.graph.probes.len();
        report.tori = self.graph.tori.len();
        report.self_intersecting_tori = self.graph.tori.iter().filter(|t| t.self_intersects()).count();
        for face in &self.graph.faces {
            report.faces.record(face.kind);
        }
        report.surfaced_spheres = self.surfaced.iter().filter(|&&s| s).count();
        report.points = self.mesh.point_count();
        report.triangles = self.mesh.triangle_count();
        report.open_edges = audit.open;
        report.overused_edges = audit.overused;

        if let Some(path) = &self.settings.probe_dump {
            let positions: Vec<Vec3> = self.graph.probes.iter().map(|p| p.position).collect();
            write_probe_dump(path, &positions, self.settings.probe_radius)?;
            debug!("Wrote {} probes to {}", positions.len(), path.display());
        }

        info!(
            "Surface has {} points and {} triangles ({} probes, {} tori, {} diagnostics)",
            report.points,
            report.triangles,
            report.probes,
            report.tori,
            report.diagnostics.len()
        );
        Ok((self.mesh, self.report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ses::settings::Quality;
    use crate::utils::run_with_threads;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Vec<Sphere> {
        let a = 3.0;
        vec![
            Sphere::new(0.0, 0.0, 0.0, 1.5).with_color(0x00FF_0000),
            Sphere::new(a, 0.0, 0.0, 1.5),
            Sphere::new(a / 2.0, a * 3f64.sqrt() / 2.0, 0.0, 1.5),
            Sphere::new(a / 2.0, a * 3f64.sqrt() / 6.0, a * (2.0f64 / 3.0).sqrt(), 1.5),
        ]
    }

    fn tetrahedron_settings(strategy: Strategy) -> Settings {
        Settings {
            probe_radius: 1.4,
            subdivision_depth: 2,
            ..Default::default()
        }
        .with_quality(Quality::Medium)
        .with_strategy(strategy)
    }

    #[test]
    fn test_isolated_sphere_is_the_template() {
        let settings = Settings::default();
        let sphere = Sphere::new(1.0, -2.0, 0.5, 1.8).with_color(0x0012_3456);
        let (mesh, report) = build_surface(&[sphere], &settings).unwrap();
        assert_eq!(mesh.point_count(), 42);
        assert_eq!(mesh.triangle_count(), 80);
        for i in 0..mesh.point_count() as u32 {
            assert_relative_eq!((mesh.position(i) - sphere.center).norm(), 1.8, epsilon = 1e-9);
        }
        assert!(mesh.triangles().all(|(_, color)| color == 0x0012_3456));
        assert_eq!(report.surfaced_spheres, 1);
        assert!(report.is_clean());
        assert_eq!(mesh.components()[0].euler_characteristic(), 2);
    }

    #[test]
    fn test_two_spheres_give_no_probes() {
        let spheres = [Sphere::new(0.0, 0.0, 0.0, 1.5), Sphere::new(2.5, 0.0, 0.0, 1.5)];
        let (mesh, report) = build_surface(&spheres, &Settings::default()).unwrap();
        assert_eq!(report.triplets, 0);
        assert_eq!(report.probes, 0);
        assert_eq!(report.tori, 0);
        assert!(mesh.is_empty());
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic::UnboundedSphere(0), Diagnostic::UnboundedSphere(1)]
        );
    }

    #[test]
    fn test_hidden_spheres_are_ignored() {
        let spheres = [
            Sphere::new(0.0, 0.0, 0.0, 1.5),
            Sphere::new(1.0, 0.0, 0.0, 1.5).hidden(),
        ];
        let (mesh, report) = build_surface(&spheres, &Settings::default()).unwrap();
        assert_eq!(report.spheres, 2);
        assert_eq!(mesh.point_count(), 42);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let spheres = [Sphere::new(0.0, 0.0, 0.0, 1.5), Sphere::new(f64::NAN, 0.0, 0.0, 1.5)];
        assert!(matches!(
            build_surface(&spheres, &Settings::default()),
            Err(SurfaceError::InvalidSphere { index: 1 })
        ));
        let settings = Settings {
            probe_radius: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            build_surface(&spheres[..1], &settings),
            Err(SurfaceError::InvalidProbeRadius(_))
        ));
    }

    #[test]
    fn test_triangle_of_spheres() {
        let h = 3.0 * 3f64.sqrt() / 2.0;
        let spheres = [
            Sphere::new(0.0, 0.0, 0.0, 1.5),
            Sphere::new(3.0, 0.0, 0.0, 1.5),
            Sphere::new(1.5, h, 0.0, 1.5),
        ];
        for strategy in [Strategy::Whole, Strategy::PerAtom] {
            let settings = Settings {
                probe_radius: 1.4,
                ..Default::default()
            }
            .with_strategy(strategy);
            let (mesh, report) = build_surface(&spheres, &settings).unwrap();
            assert_eq!(report.probes, 2, "{strategy}");
            assert_eq!(report.tori, 3);
            assert_eq!(report.faces.saddle, 3);
            assert_eq!(report.faces.concave, 2);
            assert_eq!(report.faces.convex, 3);
            assert_eq!(report.self_intersecting_tori, 0);
            assert_eq!(report.surfaced_spheres, 3);
            assert!(report.is_clean(), "{strategy}: {:?}", report.diagnostics);
            let components = mesh.components();
            assert_eq!(components.len(), 1);
            assert_eq!(components[0].euler_characteristic(), 2);
        }
    }

    #[test]
    fn test_tetrahedron() {
        for strategy in [Strategy::Whole, Strategy::PerAtom] {
            let settings = tetrahedron_settings(strategy);
            let (mesh, report) = run_with_threads(2, || build_surface(&tetrahedron(), &settings)).unwrap();
            assert_eq!(report.probes, 4, "{strategy}");
            assert_eq!(report.tori, 6);
            assert_eq!(report.faces.saddle, 6);
            assert_eq!(report.faces.concave, 4);
            assert_eq!(report.self_intersecting_tori, 0);
            assert!(report.is_clean(), "{strategy}: {:?}", report.diagnostics);
            let components = mesh.components();
            assert_eq!(components.len(), 1);
            assert_eq!(components[0].euler_characteristic(), 2);
            for i in 0..mesh.point_count() as u32 {
                assert!(mesh.position(i).iter().all(|c| c.is_finite()));
                assert_relative_eq!(mesh.normal(i).norm(), 1.0, epsilon = 1e-6);
            }
            assert_eq!(report.surfaced_spheres, 4);
        }
    }

    #[test]
    fn test_tetrahedron_torus_geometry() {
        let spheres = tetrahedron();
        let torus = TorusGeometry::new(&spheres[0], &spheres[1], 1.4).unwrap();
        assert_relative_eq!(torus.radius, (2.9f64 * 2.9 - 1.5 * 1.5).sqrt(), epsilon = 1e-9);
        assert!(!torus.self_intersects(1.4));
    }

    #[test]
    fn test_saddle_edges_are_shared() {
        for strategy in [Strategy::Whole, Strategy::PerAtom] {
            let settings = tetrahedron_settings(strategy);
            let (mesh, report) = build_surface(&tetrahedron(), &settings).unwrap();
            // saddle grids are watertight towards each other and the patches
            assert!(mesh.edge_usage().values().all(|&n| n == 2), "{strategy}");
            assert_eq!(report.open_edges, 0);
            assert_eq!(report.overused_edges, 0);
        }
    }

    /// Fifteen spheres packed into a lumpy cluster. None of its tori
    /// self-intersect and every accessible torus is closed off by a triplet.
    fn cluster() -> Vec<Sphere> {
        [
            ([0.0, 0.0, 0.0], 1.74),
            ([-2.67, 0.66, -0.94], 1.75),
            ([-4.6, -0.07, 1.15], 1.69),
            ([-1.15, -0.59, -2.52], 1.59),
            ([-2.79, -1.75, -4.8], 1.7),
            ([-4.17, 0.1, 4.12], 1.72),
            ([-2.5, 0.72, 2.16], 1.53),
            ([1.02, -2.16, -2.18], 1.55),
            ([-0.51, -3.02, -4.94], 1.59),
            ([2.12, -2.97, -5.39], 1.68),
            ([-4.53, -1.2, -2.88], 1.47),
            ([-1.71, -1.03, 4.36], 1.68),
            ([0.61, -5.41, -3.6], 1.63),
            ([-5.86, 2.06, 4.13], 1.51),
            ([3.19, -5.22, -6.46], 1.77),
        ]
        .into_iter()
        .map(|([x, y, z], r)| Sphere::new(x, y, z, r))
        .collect()
    }

    #[test]
    fn test_cluster_edges_are_used_twice() {
        for strategy in [Strategy::Whole, Strategy::PerAtom] {
            let settings = Settings {
                probe_radius: 1.4,
                ..Default::default()
            }
            .with_strategy(strategy);
            let (mesh, report) = run_with_threads(2, || build_surface(&cluster(), &settings)).unwrap();
            assert_eq!(report.self_intersecting_tori, 0);
            assert!(report.probes > 20, "{strategy}: {} probes", report.probes);
            assert!(report.self_intersecting_probes > 0);
            assert_eq!(report.open_edges, 0, "{strategy}: {:?}", report.diagnostics);
            assert_eq!(report.overused_edges, 0, "{strategy}");
            assert!(mesh.edge_usage().values().all(|&n| n == 2));
            assert!(report.diagnostics.iter().all(|d| !matches!(
                d,
                Diagnostic::OpenPatch { .. } | Diagnostic::OpenFace { .. } | Diagnostic::OpenContactLoop { .. }
            )));
        }
    }

    #[test]
    fn test_faces_are_closed_loops() {
        let settings = tetrahedron_settings(Strategy::Whole);
        let spheres = tetrahedron();
        let mut builder = SurfaceBuilder::new(spheres, (0..4).collect(), &settings);
        let (placements, _) = place_probes(&builder.spheres, &builder.neighbours, builder.rp());
        for placement in &placements {
            builder.add_probe(placement);
        }
        builder.build_saddles();
        builder.build_convex_faces();
        builder.check_faces();
        assert!(builder.report.diagnostics.is_empty());

        // a concave face missing one of its edges no longer closes
        let face = builder.graph.probes[0].face;
        builder.graph.faces[face.0].edges.pop();
        builder.check_faces();
        assert_eq!(
            builder.report.diagnostics,
            vec![Diagnostic::OpenFace {
                kind: FaceKind::Concave,
                face: face.0
            }]
        );
    }

    #[test]
    fn test_probe_positions_and_dump() {
        let dir = std::env::temp_dir().join(format!("sesmesh-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("probes.txt");
        let settings = Settings {
            probe_dump: Some(path.clone()),
            ..tetrahedron_settings(Strategy::Whole)
        };
        let positions = probe_positions(&tetrahedron(), &settings).unwrap();
        assert_eq!(positions.len(), 4);
        build_surface(&tetrahedron(), &settings).unwrap();
        let dump = std::fs::read_to_string(&path).unwrap();
        assert_eq!(dump.lines().count(), 4);
        assert!(dump.lines().all(|l| l.split_whitespace().count() == 4 && l.ends_with("1.400")));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
