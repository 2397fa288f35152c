//! Externally projected node coordinates and the cache that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::vector::Vec3;

/// Graph id → coordinates, as returned by a projection oracle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection {
    coords: HashMap<String, Vec3>,
}

impl Projection {
    pub fn insert(&mut self, graph_id: impl Into<String>, position: Vec3) {
        self.coords.insert(graph_id.into(), position);
    }

    pub fn get(&self, graph_id: &str) -> Option<Vec3> {
        self.coords.get(graph_id).copied().filter(|p| p.is_finite())
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Source of projected coordinates. `Ok(None)` means "nothing to project";
/// `Err` means the oracle is broken and callers should fall back.
pub trait ProjectionOracle {
    fn project(&self) -> Result<Option<Projection>, String>;
}

struct CacheEntry {
    computed_at: Instant,
    value: Option<Arc<Projection>>,
}

/// TTL cache for the projection. Owned by whoever serves requests; there is
/// no global instance.
pub struct ProjectionCache {
    ttl: Duration,
    entry: Option<CacheEntry>,
}

impl ProjectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop the cached value; the next lookup recomputes.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|e| now.saturating_duration_since(e.computed_at) < self.ttl)
    }

    /// Recompute unconditionally. A failed oracle caches `None` so it is not
    /// retried until the TTL lapses, and the error is handed back once.
    pub fn refresh(
        &mut self,
        oracle: &dyn ProjectionOracle,
        now: Instant,
    ) -> Result<Option<Arc<Projection>>, String> {
        let result = oracle.project();
        let value = match &result {
            Ok(Some(p)) if !p.is_empty() => Some(Arc::new(p.clone())),
            _ => None,
        };
        self.entry = Some(CacheEntry {
            computed_at: now,
            value: value.clone(),
        });
        result.map(|_| value)
    }

    /// Cached value if still fresh, otherwise [`refresh`](Self::refresh).
    pub fn get_or_refresh(
        &mut self,
        oracle: &dyn ProjectionOracle,
        now: Instant,
    ) -> Result<Option<Arc<Projection>>, String> {
        if self.is_fresh(now)
            && let Some(entry) = &self.entry
        {
            return Ok(entry.value.clone());
        }
        self.refresh(oracle, now)
    }
}
