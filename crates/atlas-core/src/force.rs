//! 3D force-directed simulation: Barnes–Hut many-body repulsion, springs
//! along edges, and a centering force, cooled by a decaying alpha.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::graph::{EdgeKind, GraphEdge, GraphNode, NodeKind};
use crate::vector::Vec3;

pub const ALPHA_MIN: f64 = 0.001;
pub const VELOCITY_DECAY: f64 = 0.4;
pub const THETA: f64 = 0.9;
/// Ticks from alpha = 1 to alpha_min.
pub const COOLING_TICKS: f64 = 300.0;
/// Squared distance below which charge is softened.
const DISTANCE_MIN2: f64 = 1.0;
const MAX_TREE_DEPTH: usize = 24;

pub fn node_charge(kind: NodeKind) -> f64 {
    match kind {
        NodeKind::Entity => -120.0,
        NodeKind::Pattern => -60.0,
        NodeKind::Commitment => -24.0,
        NodeKind::Memory => -18.0,
    }
}

/// Rest length and stiffness of the spring for an edge.
pub fn link_params(kind: EdgeKind, strength: f64) -> (f64, f64) {
    match kind {
        EdgeKind::Relationship => (60.0, 0.2 + 0.6 * strength.clamp(0.0, 1.0)),
        EdgeKind::Inferred => (75.0, 0.15),
        EdgeKind::MemoryEntity => (18.0, 0.8),
        EdgeKind::PatternEntity => (36.0, 0.35),
        EdgeKind::TraceEvidence => (24.0, 0.5),
    }
}

/// Which node kinds take part in the simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFilter {
    hidden: BTreeSet<NodeKind>,
}

impl NodeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn hide(mut self, kind: NodeKind) -> Self {
        self.hidden.insert(kind);
        self
    }

    pub fn allows(&self, kind: NodeKind) -> bool {
        !self.hidden.contains(&kind)
    }
}

#[derive(Clone, Debug)]
pub struct SimNode {
    pub id: String,
    pub kind: NodeKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub charge: f64,
}

impl SimNode {
    pub fn from_graph(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind,
            position: Vec3::new(node.x, node.y, node.z),
            velocity: Vec3::ZERO,
            charge: node_charge(node.kind),
        }
    }
}

#[derive(Clone, Debug)]
struct SimLink {
    source: usize,
    target: usize,
    distance: f64,
    strength: f64,
    /// Share of the correction applied to the target.
    bias: f64,
}

#[derive(Clone, Debug)]
struct Cell {
    half: f64,
    charge: f64,
    centroid: Vec3,
    children: Vec<usize>,
    bodies: Vec<usize>,
}

/// Octree over the active nodes, rebuilt every tick.
struct Octree {
    cells: Vec<Cell>,
}

impl Octree {
    fn build(nodes: &[SimNode], active: &[usize]) -> Option<Self> {
        let first = nodes.get(*active.first()?)?.position;
        let (mut lo, mut hi) = (first, first);
        for &i in active {
            let p = nodes[i].position;
            lo = Vec3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z));
            hi = Vec3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z));
        }
        let extent = hi - lo;
        let half = extent.x.max(extent.y).max(extent.z) / 2.0 + 1.0;
        let mut tree = Self { cells: Vec::new() };
        tree.insert(nodes, active.to_vec(), (lo + hi) / 2.0, half, 0);
        Some(tree)
    }

    fn insert(&mut self, nodes: &[SimNode], bodies: Vec<usize>, center: Vec3, half: f64, depth: usize) -> usize {
        let mut charge = 0.0;
        let mut weight = 0.0;
        let mut weighted = Vec3::ZERO;
        for &i in &bodies {
            let node = &nodes[i];
            charge += node.charge;
            weight += node.charge.abs();
            weighted += node.position * node.charge.abs();
        }
        let centroid = if weight > 0.0 { weighted / weight } else { center };
        let index = self.cells.len();
        self.cells.push(Cell {
            half,
            charge,
            centroid,
            children: Vec::new(),
            bodies: Vec::new(),
        });

        if bodies.len() <= 1 || depth >= MAX_TREE_DEPTH {
            self.cells[index].bodies = bodies;
            return index;
        }

        let mut octants: [Vec<usize>; 8] = Default::default();
        for i in bodies {
            let p = nodes[i].position;
            let slot = usize::from(p.x >= center.x)
                | usize::from(p.y >= center.y) << 1
                | usize::from(p.z >= center.z) << 2;
            octants[slot].push(i);
        }
        let quarter = half / 2.0;
        let mut children = Vec::new();
        for (slot, members) in octants.into_iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let offset = Vec3::new(
                if slot & 1 != 0 { quarter } else { -quarter },
                if slot & 2 != 0 { quarter } else { -quarter },
                if slot & 4 != 0 { quarter } else { -quarter },
            );
            children.push(self.insert(nodes, members, center + offset, quarter, depth + 1));
        }
        self.cells[index].children = children;
        index
    }

    /// Velocity change on node `i` from everything in cell `index`.
    fn apply(&self, index: usize, i: usize, nodes: &[SimNode], alpha: f64, rng: &mut SmallRng) -> Vec3 {
        let cell = &self.cells[index];
        if cell.charge == 0.0 {
            return Vec3::ZERO;
        }
        let position = nodes[i].position;

        if !cell.children.is_empty() {
            let delta = cell.centroid - position;
            let l = delta.length_squared();
            let width = cell.half * 2.0;
            if width * width / (THETA * THETA) < l {
                return delta * (cell.charge * alpha / soften(l));
            }
            return cell
                .children
                .iter()
                .fold(Vec3::ZERO, |acc, &c| acc + self.apply(c, i, nodes, alpha, rng));
        }

        let mut dv = Vec3::ZERO;
        for &j in &cell.bodies {
            if j == i {
                continue;
            }
            let mut delta = nodes[j].position - position;
            if delta.length_squared() == 0.0 {
                delta = jiggle(rng);
            }
            let l = delta.length_squared();
            dv += delta * (nodes[j].charge * alpha / soften(l));
        }
        dv
    }
}

fn soften(l: f64) -> f64 {
    if l < DISTANCE_MIN2 {
        (DISTANCE_MIN2 * l).sqrt()
    } else {
        l
    }
}

fn jiggle(rng: &mut SmallRng) -> Vec3 {
    let mut component = || (rng.random::<f64>() - 0.5) * 1e-6;
    Vec3::new(component(), component(), component())
}

pub struct ForceSimulation {
    nodes: Vec<SimNode>,
    index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    links: Vec<SimLink>,
    filter: NodeFilter,
    positions: HashMap<String, Vec3>,
    alpha: f64,
    alpha_min: f64,
    alpha_decay: f64,
    velocity_decay: f64,
    ticks: usize,
    rng: SmallRng,
}

impl ForceSimulation {
    /// Nodes start at their seed coordinates; `seed` drives the jiggle that
    /// separates coincident nodes, so equal inputs give equal layouts.
    pub fn new(nodes: &[GraphNode], edges: &[GraphEdge], seed: u64) -> Self {
        let mut sim = Self {
            nodes: Vec::with_capacity(nodes.len()),
            index: HashMap::new(),
            edges: edges.to_vec(),
            links: Vec::new(),
            filter: NodeFilter::all(),
            positions: HashMap::new(),
            alpha: 1.0,
            alpha_min: ALPHA_MIN,
            alpha_decay: 1.0 - ALPHA_MIN.powf(1.0 / COOLING_TICKS),
            velocity_decay: VELOCITY_DECAY,
            ticks: 0,
            rng: SmallRng::seed_from_u64(seed),
        };
        for node in nodes {
            sim.push_node(SimNode::from_graph(node));
        }
        sim.rebuild_links();
        sim.sync_positions();
        sim
    }

    fn push_node(&mut self, node: SimNode) {
        if let Some(&i) = self.index.get(&node.id) {
            self.nodes[i] = node;
            return;
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    fn is_active(&self, i: usize) -> bool {
        self.filter.allows(self.nodes[i].kind)
    }

    fn rebuild_links(&mut self) {
        let mut links = Vec::new();
        let mut degree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            let (Some(&s), Some(&t)) = (self.index.get(&edge.source), self.index.get(&edge.target)) else {
                continue;
            };
            if s == t || !self.is_active(s) || !self.is_active(t) {
                continue;
            }
            let (distance, strength) = link_params(edge.kind, edge.strength);
            degree[s] += 1;
            degree[t] += 1;
            links.push(SimLink {
                source: s,
                target: t,
                distance,
                strength,
                bias: 0.0,
            });
        }
        for link in &mut links {
            let (ds, dt) = (degree[link.source] as f64, degree[link.target] as f64);
            link.bias = ds / (ds + dt);
        }
        self.links = links;
    }

    fn sync_positions(&mut self) {
        self.positions = self
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.position))
            .collect();
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn is_converged(&self) -> bool {
        self.alpha < self.alpha_min
    }

    pub fn reheat(&mut self) {
        self.alpha = 1.0;
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn positions(&self) -> &HashMap<String, Vec3> {
        &self.positions
    }

    /// Known and allowed by the current filter.
    pub fn is_visible(&self, id: &str) -> bool {
        self.index.get(id).is_some_and(|&i| self.is_active(i))
    }

    pub fn position(&self, id: &str) -> Option<Vec3> {
        self.positions.get(id).copied()
    }

    /// Add (or replace) a node plus any edges touching it, and reheat.
    pub fn add_node(&mut self, node: &GraphNode, edges: &[GraphEdge]) {
        self.push_node(SimNode::from_graph(node));
        for edge in edges {
            if !self.edges.iter().any(|e| e.id == edge.id) {
                self.edges.push(edge.clone());
            }
        }
        self.rebuild_links();
        self.sync_positions();
        self.reheat();
    }

    pub fn set_filter(&mut self, filter: NodeFilter) {
        self.filter = filter;
        self.rebuild_links();
        self.reheat();
    }

    /// Run `n` ticks before anything is rendered.
    pub fn warmup(&mut self, n: usize) -> usize {
        (0..n).take_while(|_| self.tick()).count()
    }

    /// Advance one step. Returns false without touching anything once cooled.
    pub fn tick(&mut self) -> bool {
        if self.is_converged() {
            return false;
        }
        self.alpha += (0.0 - self.alpha) * self.alpha_decay;
        let alpha = self.alpha;

        self.apply_links(alpha);
        self.apply_charge(alpha);

        for i in 0..self.nodes.len() {
            if !self.is_active(i) {
                continue;
            }
            let node = &mut self.nodes[i];
            node.velocity = node.velocity * (1.0 - self.velocity_decay);
            node.position += node.velocity;
        }
        self.apply_center();

        self.ticks += 1;
        self.sync_positions();
        true
    }

    fn apply_links(&mut self, alpha: f64) {
        for k in 0..self.links.len() {
            let link = self.links[k].clone();
            let (s, t) = (&self.nodes[link.source], &self.nodes[link.target]);
            let mut delta = (t.position + t.velocity) - (s.position + s.velocity);
            if delta.length_squared() == 0.0 {
                delta = jiggle(&mut self.rng);
            }
            let l = delta.length();
            let scale = (l - link.distance) / l * alpha * link.strength;
            let pull = delta * scale;
            self.nodes[link.target].velocity -= pull * link.bias;
            self.nodes[link.source].velocity += pull * (1.0 - link.bias);
        }
    }

    fn apply_charge(&mut self, alpha: f64) {
        let active: Vec<usize> = (0..self.nodes.len()).filter(|&i| self.is_active(i)).collect();
        let Some(tree) = Octree::build(&self.nodes, &active) else {
            return;
        };
        for &i in &active {
            let dv = tree.apply(0, i, &self.nodes, alpha, &mut self.rng);
            self.nodes[i].velocity += dv;
        }
    }

    fn apply_center(&mut self) {
        let active: Vec<usize> = (0..self.nodes.len()).filter(|&i| self.is_active(i)).collect();
        let Some(mean) = Vec3::centroid(active.iter().map(|&i| self.nodes[i].position)) else {
            return;
        };
        for i in active {
            self.nodes[i].position -= mean;
        }
    }

    /// Copy current positions into rendered nodes.
    pub fn write_back(&self, nodes: &mut [GraphNode]) {
        for node in nodes {
            if let Some(p) = self.position(&node.id) {
                let p = p.rounded(3);
                node.x = p.x;
                node.y = p.y;
                node.z = p.z;
            }
        }
    }
}
