//! Event sequence tracker: one window per context, chain detection.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::pattern::{self, ChainMatch, ChainPattern};
use super::window::{AppendOutcome, EventWindow};
use crate::config::WindowConfig;
use crate::types::SecurityEvent;

/// Result of appending a batch to a context window.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    /// Window contents after the append, oldest first
    pub snapshot: Vec<SecurityEvent>,
    pub appended: usize,
    pub duplicates: usize,
    pub expired: usize,
}

/// Owns the event windows of every live context.
pub struct SequenceTracker {
    windows: DashMap<String, Arc<Mutex<EventWindow>>>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Append `events` to the context window under one lock and return the
    /// resulting window.
    pub async fn record(&self, context_id: &str, events: Vec<SecurityEvent>, config: &WindowConfig) -> Recorded {
        let handle = self.window_for(context_id, config);
        let mut recorded = Recorded::default();
        {
            let mut window = handle.lock().await;
            for event in events {
                match window.append_and_prune(event, config) {
                    AppendOutcome::Appended => recorded.appended += 1,
                    AppendOutcome::Duplicate => recorded.duplicates += 1,
                    AppendOutcome::Expired => recorded.expired += 1,
                }
            }
            // Bounds may have been tightened by a reconfiguration
            window.prune(config);
            recorded.snapshot = window.snapshot();
        }
        drop(handle);

        // Concurrent first appends can overshoot the context cap
        self.trim(config.max_contexts);
        recorded
    }

    /// Append one event, then evaluate every pattern against the window.
    pub async fn ingest(
        &self,
        context_id: &str,
        event: SecurityEvent,
        config: &WindowConfig,
        patterns: &[ChainPattern],
    ) -> Option<ChainMatch> {
        let recorded = self.record(context_id, vec![event], config).await;
        Self::evaluate(&recorded.snapshot, patterns, None)
    }

    /// Best matching pattern in `window` as of `now` (defaults to the newest
    /// event time).
    pub fn evaluate(window: &[SecurityEvent], patterns: &[ChainPattern], now: Option<f64>) -> Option<ChainMatch> {
        let newest = window.last()?.timestamp;
        let now = now.unwrap_or(newest).max(newest);
        let matched = pattern::best_match(patterns, window, now);
        if let Some(m) = &matched {
            debug!(pattern = %m.pattern, delta = m.threat_delta, confidence = m.confidence, "Chain pattern matched");
        }
        matched
    }

    /// Current window of a context.
    pub async fn snapshot(&self, context_id: &str) -> Vec<SecurityEvent> {
        let window = match self.windows.get(context_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return Vec::new(),
        };
        let window = window.lock().await;
        window.snapshot()
    }

    /// Drop a context and its window.
    pub fn remove(&self, context_id: &str) -> bool {
        self.windows.remove(context_id).is_some()
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.windows.len()
    }

    /// Handle to the context window, creating it if needed. The handle is
    /// cloned under the entry lock, so a new window is pinned before any
    /// other caller can see it.
    fn window_for(&self, context_id: &str, config: &WindowConfig) -> Arc<Mutex<EventWindow>> {
        if let Some(slot) = self.windows.get(context_id) {
            return Arc::clone(slot.value());
        }
        self.trim(config.max_contexts.saturating_sub(1));
        let slot = self.windows.entry(context_id.to_string()).or_default();
        Arc::clone(slot.value())
    }

    /// Evict idle contexts until at most `max` remain or none is idle.
    fn trim(&self, max: usize) {
        while self.windows.len() > max {
            if !self.evict_stalest() {
                break;
            }
        }
    }

    /// Evict the idle context whose newest event is oldest. A context is
    /// idle when the table holds the only handle to its window.
    fn evict_stalest(&self) -> bool {
        let mut idle: Vec<(String, f64)> = self
            .windows
            .iter()
            .filter(|slot| Arc::strong_count(slot.value()) == 1)
            .map(|slot| {
                // Locked only by another evictor's scan: still idle, ranked last
                let newest = match slot.value().try_lock() {
                    Ok(window) => window.newest_timestamp().unwrap_or(f64::NEG_INFINITY),
                    Err(_) => f64::INFINITY,
                };
                (slot.key().clone(), newest)
            })
            .collect();
        idle.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (key, _) in idle {
            // Re-checked under the shard lock; a caller may have taken a handle since
            if self
                .windows
                .remove_if(&key, |_, window| Arc::strong_count(window) == 1)
                .is_some()
            {
                debug!(context_id = %key, "Evicting stalest context");
                return true;
            }
        }
        false
    }
}
