//! One read-only store plus the projection cache, answering graph queries.
//!
//! Every query loads a fresh snapshot; the projection is the only state that
//! survives between requests.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use atlas_core::{
    GraphContext, GraphDataset, GraphId, InferenceOptions, Insights, LayoutGraph, LayoutOptions,
    LoadOptions, NeighborhoodGraph, OverviewGraph, OverviewOptions, Projection, ProjectionCache,
    SearchHit, TraceGraph, TraceRequest, build_insights, build_layout, build_neighborhood,
    build_overview, build_trace, search,
};
use atlas_store::Store;

use crate::config::AtlasConfig;

pub struct GraphService {
    store: Store,
    projection: ProjectionCache,
    inference: InferenceOptions,
    layout: LayoutOptions,
}

impl GraphService {
    pub fn new(store: Store, config: &AtlasConfig) -> Self {
        Self {
            store,
            projection: ProjectionCache::new(Duration::from_secs(config.projection_ttl_secs)),
            inference: config.inference_options(),
            layout: config.layout_options(),
        }
    }

    pub fn open(path: &Path, config: &AtlasConfig) -> Result<Self> {
        let store = Store::open(path)
            .with_context(|| format!("failed to open memory store {}", path.display()))?;
        Ok(Self::new(store, config))
    }

    fn dataset(&self, include_historical: bool) -> Result<GraphDataset> {
        self.store
            .load_graph_dataset(&LoadOptions { include_historical })
            .context("failed to load graph dataset")
    }

    /// Cached projection, or `None` with a warning when the oracle fails.
    fn projection(&mut self) -> Option<Arc<Projection>> {
        let oracle = self.store.embedding_projection();
        match self.projection.get_or_refresh(&oracle, Instant::now()) {
            Ok(projection) => projection,
            Err(e) => {
                tracing::warn!("projection unavailable, using fallback layout: {e}");
                None
            }
        }
    }

    pub fn invalidate_projection(&mut self) {
        self.projection.invalidate();
    }

    pub fn overview(&mut self, include_memories: bool, include_historical: bool) -> Result<OverviewGraph> {
        let dataset = self.dataset(include_historical)?;
        let projection = self.projection();
        let ctx = GraphContext::new(&dataset, projection.as_deref(), &self.inference);
        Ok(build_overview(&ctx, OverviewOptions { include_memories }))
    }

    pub fn neighborhood(&mut self, focus: GraphId, depth: usize, include_historical: bool) -> Result<NeighborhoodGraph> {
        let dataset = self.dataset(include_historical)?;
        let projection = self.projection();
        let ctx = GraphContext::new(&dataset, projection.as_deref(), &self.inference);
        Ok(build_neighborhood(&ctx, focus, depth))
    }

    pub fn trace(&mut self, request: TraceRequest, include_historical: bool) -> Result<TraceGraph> {
        let dataset = self.dataset(include_historical)?;
        let projection = self.projection();
        let ctx = GraphContext::new(&dataset, projection.as_deref(), &self.inference);
        Ok(build_trace(&ctx, request))
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let dataset = self.dataset(false)?;
        Ok(search(&dataset, query, limit))
    }

    pub fn insights(&self) -> Result<Insights> {
        let dataset = self.dataset(false)?;
        Ok(build_insights(&dataset))
    }

    /// Overview run through the force layout to rest.
    pub fn layout(&mut self, include_memories: bool) -> Result<LayoutGraph> {
        let overview = self.overview(include_memories, false)?;
        Ok(build_layout(overview.nodes, overview.edges, &self.layout))
    }
}
