//! Bounded, time-ordered event window for one context.

use std::collections::VecDeque;
use tracing::trace;

use crate::config::WindowConfig;
use crate::types::SecurityEvent;

/// What happened to an event offered to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored
    Appended,
    /// Same type and zone already stored nearby in time
    Duplicate,
    /// Already older than the horizon
    Expired,
}

/// Events of one context, oldest first.
///
/// Every member lies within `horizon_secs` of the newest member and the
/// length never exceeds `max_events`; both hold after every call to
/// [`EventWindow::append_and_prune`].
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    events: VecDeque<SecurityEvent>,
}

impl EventWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `event` in timestamp order and prune to the bounds.
    pub fn append_and_prune(&mut self, event: SecurityEvent, config: &WindowConfig) -> AppendOutcome {
        if let Some(newest) = self.newest_timestamp() {
            if event.timestamp < newest - config.horizon_secs {
                return AppendOutcome::Expired;
            }
        }

        let duplicate = self.events.iter().any(|e| {
            e.event_type == event.event_type
                && e.zone == event.zone
                && (e.timestamp - event.timestamp).abs() <= config.duplicate_window_secs
        });
        if duplicate {
            return AppendOutcome::Duplicate;
        }

        let at = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(at, event);
        self.prune(config);
        AppendOutcome::Appended
    }

    /// Re-apply the bounds, e.g. after they were tightened.
    pub fn prune(&mut self, config: &WindowConfig) {
        if let Some(newest) = self.newest_timestamp() {
            let cutoff = newest - config.horizon_secs;
            while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
                self.events.pop_front();
            }
        }
        while self.events.len() > config.max_events {
            if let Some(evicted) = self.events.pop_front() {
                trace!(event_type = %evicted.event_type, "Window over capacity, evicted oldest");
            }
        }
    }

    /// Timestamp of the newest member.
    pub fn newest_timestamp(&self) -> Option<f64> {
        self.events.back().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Copy of the members, oldest first.
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
