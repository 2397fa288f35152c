//! Background change detection.
//!
//! The poller owns its own read-only connection so graph queries never wait
//! on it. Each time the store's [`ChangeMarker`] moves, a [`ChangeEvent`] is
//! broadcast to every subscriber.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use atlas_store::{ChangeMarker, Store};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub sequence: u64,
    pub changed_tables: Vec<String>,
    pub marker: ChangeMarker,
}

pub struct ChangePoller {
    store: Store,
    last: Option<ChangeMarker>,
    sequence: u64,
}

impl ChangePoller {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            last: None,
            sequence: 0,
        }
    }

    /// Compare the current marker with the previous one. The first call only
    /// records a baseline.
    pub fn poll(&mut self) -> Result<Option<ChangeEvent>> {
        let marker = self
            .store
            .change_marker()
            .context("failed to read change marker")?;
        let Some(previous) = self.last.replace(marker.clone()) else {
            return Ok(None);
        };
        if previous == marker {
            return Ok(None);
        }
        self.sequence += 1;
        Ok(Some(ChangeEvent {
            sequence: self.sequence,
            changed_tables: marker.changed_tables(&previous),
            marker,
        }))
    }
}

/// Poll every `interval` until `cancel` fires. Read errors are logged and
/// the loop keeps going; a daemon mid-migration is not fatal.
pub async fn run(
    mut poller: ChangePoller,
    interval: Duration,
    changes: broadcast::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("change watcher stopped");
                return;
            }
            _ = ticker.tick() => {
                match poller.poll() {
                    Ok(Some(event)) => {
                        tracing::info!(
                            sequence = event.sequence,
                            tables = ?event.changed_tables,
                            "memory store changed"
                        );
                        // no subscribers is fine
                        let _ = changes.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("change poll failed: {e:#}"),
                }
            }
        }
    }
}
