//! Frame driver tying the simulation to edge geometry, and the settled
//! layout response.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::bundling::{
    BundleOptions, EdgeCurve, EdgeGeometry, bundled_geometry, curve_geometry, quadratic_curves,
};
use crate::force::{ForceSimulation, NodeFilter};
use crate::graph::{GraphEdge, GraphNode};
use crate::vector::Vec3;

/// Points per quadratic curve while cooling.
const CURVE_SAMPLES: usize = 12;
/// Catmull–Rom samples per bundled span.
const SPLINE_SEGMENTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Ticked once; geometry is plain curves.
    Cooling,
    /// Converged on this frame; geometry was bundled.
    Settled,
    /// Nothing to do.
    Frozen,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutOptions {
    pub warmup_ticks: usize,
    /// Upper bound on frames after warmup.
    pub max_frames: usize,
    pub seed: u64,
    pub bundle: BundleOptions,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            warmup_ticks: 120,
            max_frames: 400,
            seed: 0x5eed,
            bundle: BundleOptions::default(),
        }
    }
}

pub struct LayoutEngine {
    sim: ForceSimulation,
    bundle: BundleOptions,
    geometry: Vec<EdgeGeometry>,
    frozen: bool,
    full_rebuilds: usize,
}

impl LayoutEngine {
    pub fn new(nodes: &[GraphNode], edges: &[GraphEdge], options: &LayoutOptions) -> Self {
        let mut sim = ForceSimulation::new(nodes, edges, options.seed);
        sim.warmup(options.warmup_ticks);
        let mut engine = Self {
            sim,
            bundle: options.bundle,
            geometry: Vec::new(),
            frozen: false,
            full_rebuilds: 0,
        };
        engine.rebuild_curves();
        engine
    }

    /// Curves for edges whose endpoints both pass the node filter.
    fn structural_curves(&self) -> Vec<EdgeCurve> {
        let visible: HashMap<String, Vec3> = self
            .sim
            .positions()
            .iter()
            .filter(|(id, _)| self.sim.is_visible(id))
            .map(|(id, p)| (id.clone(), *p))
            .collect();
        quadratic_curves(self.sim.edges(), &visible)
    }

    fn rebuild_curves(&mut self) {
        self.geometry = curve_geometry(&self.structural_curves(), CURVE_SAMPLES);
    }

    fn rebuild_bundled(&mut self) {
        let structural: HashSet<&str> = self
            .sim
            .edges()
            .iter()
            .filter(|e| e.kind.is_structural())
            .map(|e| e.id.as_str())
            .collect();
        let (bundled, straight): (Vec<_>, Vec<_>) = self
            .structural_curves()
            .into_iter()
            .partition(|c| structural.contains(c.id.as_str()));
        let mut geometry = bundled_geometry(&bundled, &self.bundle, SPLINE_SEGMENTS);
        geometry.extend(curve_geometry(&straight, CURVE_SAMPLES));
        self.geometry = geometry;
        self.full_rebuilds += 1;
    }

    /// Per-frame callback.
    pub fn frame(&mut self) -> FrameOutcome {
        if self.frozen {
            return FrameOutcome::Frozen;
        }
        self.sim.tick();
        if self.sim.is_converged() {
            self.rebuild_bundled();
            self.frozen = true;
            return FrameOutcome::Settled;
        }
        self.rebuild_curves();
        FrameOutcome::Cooling
    }

    /// Frames until frozen or `max_frames` run out. Returns frames used.
    pub fn settle(&mut self, max_frames: usize) -> usize {
        let mut frames = 0;
        while frames < max_frames && self.frame() != FrameOutcome::Frozen {
            frames += 1;
        }
        frames
    }

    pub fn add_node(&mut self, node: &GraphNode, edges: &[GraphEdge]) {
        self.sim.add_node(node, edges);
        self.frozen = false;
    }

    pub fn set_filter(&mut self, filter: NodeFilter) {
        self.sim.set_filter(filter);
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn full_rebuilds(&self) -> usize {
        self.full_rebuilds
    }

    pub fn geometry(&self) -> &[EdgeGeometry] {
        &self.geometry
    }

    pub fn simulation(&self) -> &ForceSimulation {
        &self.sim
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LayoutMeta {
    pub mode: &'static str,
    pub ticks: usize,
    pub converged: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LayoutGraph {
    pub meta: LayoutMeta,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub geometry: Vec<EdgeGeometry>,
}

/// Run a layout to rest and return positioned nodes with edge geometry.
pub fn build_layout(mut nodes: Vec<GraphNode>, edges: Vec<GraphEdge>, options: &LayoutOptions) -> LayoutGraph {
    let mut engine = LayoutEngine::new(&nodes, &edges, options);
    engine.settle(options.max_frames);
    let sim = engine.simulation();
    sim.write_back(&mut nodes);
    LayoutGraph {
        meta: LayoutMeta {
            mode: "layout",
            ticks: sim.ticks(),
            converged: sim.is_converged(),
        },
        nodes,
        edges,
        geometry: engine.geometry,
    }
}
