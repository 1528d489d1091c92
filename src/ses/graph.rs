//! Arenas for every surface entity of one construction run.

use std::collections::HashMap;

use super::geometry::Vec3;
use super::types::*;

#[derive(Clone, Debug, Default)]
pub struct SurfaceGraph {
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
    pub faces: Vec<Face>,
    pub probes: Vec<Probe>,
    pub tori: Vec<Torus>,
    torus_index: HashMap<(usize, usize), TorusId>,
}

impl SurfaceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, position: Vec3, normal: Vec3, owner: Option<usize>) -> VertexId {
        self.vertices.push(Vertex {
            position,
            normal,
            owner,
            mesh_index: None,
        });
        VertexId(self.vertices.len() - 1)
    }

    pub fn add_edge(&mut self, edge: Edge) -> EdgeId {
        self.edges.push(edge);
        EdgeId(self.edges.len() - 1)
    }

    pub fn add_face(&mut self, face: Face) -> FaceId {
        self.faces.push(face);
        FaceId(self.faces.len() - 1)
    }

    pub fn add_probe(&mut self, probe: Probe) -> ProbeId {
        self.probes.push(probe);
        ProbeId(self.probes.len() - 1)
    }

    /// Registers a torus under its canonical pair.
    pub fn add_torus(&mut self, torus: Torus) -> TorusId {
        let id = TorusId(self.tori.len());
        self.torus_index.insert(torus.atoms, id);
        self.tori.push(torus);
        id
    }

    pub fn find_torus(&self, i: usize, j: usize) -> Option<TorusId> {
        self.torus_index.get(&(i.min(j), i.max(j))).copied()
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0]
    }

    pub fn face(&self, id: FaceId) -> &Face {
        &self.faces[id.0]
    }

    pub fn probe(&self, id: ProbeId) -> &Probe {
        &self.probes[id.0]
    }

    pub fn torus(&self, id: TorusId) -> &Torus {
        &self.tori[id.0]
    }

    pub fn torus_mut(&mut self, id: TorusId) -> &mut Torus {
        &mut self.tori[id.0]
    }

    pub fn position(&self, id: VertexId) -> Vec3 {
        self.vertices[id.0].position
    }

    /// First and last vertex of an edge in walking order.
    pub fn endpoints(&self, edge_use: EdgeUse) -> (VertexId, VertexId) {
        let edge = self.edge(edge_use.edge);
        if edge_use.reversed {
            (edge.end, edge.start)
        } else {
            (edge.start, edge.end)
        }
    }

    /// Tessellation points of an edge in walking order.
    pub fn walk(&self, edge_use: EdgeUse) -> Vec<VertexId> {
        let mut points = self.edge(edge_use.edge).points.clone();
        if edge_use.reversed {
            points.reverse();
        }
        points
    }

    /// Whether consecutive uses chain end to start, cyclically.
    pub fn is_closed(&self, uses: &[EdgeUse]) -> bool {
        !uses.is_empty()
            && uses.iter().enumerate().all(|(k, &u)| {
                let next = uses[(k + 1) % uses.len()];
                self.endpoints(u).1 == self.endpoints(next).0
            })
    }

    /// Cyclic point sequence of a closed loop, without repeating joints.
    pub fn loop_points(&self, uses: &[EdgeUse]) -> Vec<VertexId> {
        let mut points = Vec::new();
        for &u in uses {
            let walked = self.walk(u);
            points.extend_from_slice(&walked[..walked.len().saturating_sub(1)]);
        }
        points
    }

    /// Chains loose edge uses into closed loops. Uses that cannot be closed
    /// are returned separately.
    pub fn chain_loops(&self, mut uses: Vec<EdgeUse>) -> (Vec<Vec<EdgeUse>>, Vec<EdgeUse>) {
        let mut loops = Vec::new();
        let mut open = Vec::new();
        while let Some(first) = uses.pop() {
            let origin = self.endpoints(first).0;
            let mut current = vec![first];
            let mut tip = self.endpoints(first).1;
            while tip != origin {
                match uses.iter().position(|&u| self.endpoints(u).0 == tip) {
                    Some(next) => {
                        let next = uses.swap_remove(next);
                        tip = self.endpoints(next).1;
                        current.push(next);
                    }
                    None => break,
                }
            }
            if tip == origin {
                loops.push(current);
            } else {
                open.extend(current);
            }
        }
        (loops, open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle() -> Circle {
        Circle {
            center: Vec3::zeros(),
            radius: 1.0,
            normal: Vec3::z(),
        }
    }

    /// Square loop 0 -> 1 -> 2 -> 3 -> 0 plus a dangling edge 4 -> 5.
    fn square() -> (SurfaceGraph, Vec<EdgeUse>) {
        let mut graph = SurfaceGraph::new();
        let v: Vec<VertexId> = (0..6)
            .map(|i| graph.add_vertex(Vec3::new(i as f64, 0.0, 0.0), Vec3::z(), Some(0)))
            .collect();
        let mut edge = |a: VertexId, b: VertexId| {
            graph.add_edge(Edge {
                start: a,
                end: b,
                circle: circle(),
                owner: EdgeOwner::Sphere(0),
                torus: TorusId(0),
                points: vec![a, b],
                self_intersects: false,
            })
        };
        let e01 = edge(v[0], v[1]);
        let e21 = edge(v[2], v[1]);
        let e23 = edge(v[2], v[3]);
        let e30 = edge(v[3], v[0]);
        let e45 = edge(v[4], v[5]);
        let uses = vec![
            EdgeUse::forward(e23),
            EdgeUse::forward(e01),
            EdgeUse::forward(e45),
            EdgeUse::backward(e21),
            EdgeUse::forward(e30),
        ];
        (graph, uses)
    }

    #[test]
    fn test_chain_loops() {
        let (graph, uses) = square();
        let (loops, open) = graph.chain_loops(uses);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].len(), 4);
        assert!(graph.is_closed(&loops[0]));
        assert_eq!(open, vec![EdgeUse::forward(EdgeId(4))]);
        assert_eq!(graph.loop_points(&loops[0]).len(), 4);
    }

    #[test]
    fn test_open_chain_is_not_closed() {
        let (graph, uses) = square();
        assert!(!graph.is_closed(&uses[..2]));
        assert!(!graph.is_closed(&[]));
    }

    #[test]
    fn test_reversed_walk() {
        let (graph, _) = square();
        let walked = graph.walk(EdgeUse::backward(EdgeId(1)));
        assert_eq!(walked, vec![VertexId(1), VertexId(2)]);
        assert_eq!(graph.endpoints(EdgeUse::backward(EdgeId(1))), (VertexId(1), VertexId(2)));
    }
}
