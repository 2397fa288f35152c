//! Memory Atlas graph engine.
//!
//! Turns one read-only snapshot of an agent's memory store (entities,
//! memories, relationships, patterns) into renderable graphs: a global
//! overview, focused neighborhoods, weighted traces between two nodes, plus
//! search, insights, and a 3D force layout with bundled edge geometry.
//!
//! Zero I/O. Every builder is a pure function of the dataset and `now`.

pub mod bundling;
pub mod constants;
pub mod context;
pub mod dataset;
pub mod evidence;
pub mod force;
pub mod graph;
pub mod inference;
pub mod insights;
pub mod layout;
pub mod neighborhood;
pub mod normalize;
pub mod overview;
pub mod placement;
pub mod projection;
pub mod record;
pub mod search;
pub mod time;
pub mod trace;
pub mod vector;

pub use bundling::{BundleOptions, EdgeGeometry, bundle_edges, catmull_rom, quadratic_curves};
pub use context::GraphContext;
pub use dataset::{GraphDataset, LoadOptions};
pub use evidence::{EntityRefExtractor, default_extractors, pattern_entity_refs};
pub use force::{ForceSimulation, NodeFilter};
pub use graph::{EdgeKind, GraphCounts, GraphEdge, GraphId, GraphIdError, GraphNode, NodeKind};
pub use inference::{InferenceOptions, InferredRelationship, build_inferred_relationships};
pub use insights::{Insights, build_insights};
pub use layout::{FrameOutcome, LayoutEngine, LayoutGraph, LayoutOptions, build_layout};
pub use neighborhood::{NeighborhoodGraph, build_neighborhood};
pub use overview::{OverviewGraph, OverviewOptions, build_overview};
pub use placement::Placement;
pub use projection::{Projection, ProjectionCache, ProjectionOracle};
pub use record::{
    DatasetRecords, EntityKind, EntityRecord, MemoryEntityLink, MemoryKind, MemoryRecord,
    PatternRecord, RelationshipRecord,
};
pub use search::{DEFAULT_SEARCH_LIMIT, SearchHit, search};
pub use trace::{TraceGraph, TraceRequest, build_trace};
pub use vector::Vec3;
