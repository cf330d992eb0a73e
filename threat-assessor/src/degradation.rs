//! Degradation controller.
//!
//! Four operating modes, worst last:
//!
//! | Mode      | Raw motion | Bayes | Learning | Analyzers |
//! |-----------|------------|-------|----------|-----------|
//! | Full      | yes        | yes   | yes      | yes       |
//! | Degraded  | no         | yes   | yes      | yes       |
//! | Minimal   | no         | no    | no       | yes       |
//! | Emergency | no         | no    | no       | bypassed  |
//!
//! Worsening moves one step at a time, except that a majority error rate
//! jumps straight to Emergency. Recovery steps back exactly one mode after
//! `recovery_calls` consecutive healthy calls and restarts the rolling
//! window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DegradationConfig;

/// Transitions kept for inspection.
const MAX_HISTORY: usize = 64;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    Full,
    Degraded,
    Minimal,
    Emergency,
}

impl DegradationMode {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationMode::Full => "full",
            DegradationMode::Degraded => "degraded",
            DegradationMode::Minimal => "minimal",
            DegradationMode::Emergency => "emergency",
        }
    }

    /// Whether raw motion samples are analyzed.
    pub fn uses_raw_motion(&self) -> bool {
        matches!(self, DegradationMode::Full)
    }

    /// Whether the Bayesian branch runs.
    pub fn uses_bayes(&self) -> bool {
        matches!(self, DegradationMode::Full | DegradationMode::Degraded)
    }

    /// Whether pattern-learning updates are sent.
    pub fn learns(&self) -> bool {
        self.uses_bayes()
    }

    /// Whether analyzers and fusion are skipped.
    pub fn bypasses_pipeline(&self) -> bool {
        matches!(self, DegradationMode::Emergency)
    }

    fn step_back(&self) -> Self {
        match self {
            DegradationMode::Full | DegradationMode::Degraded => DegradationMode::Full,
            DegradationMode::Minimal => DegradationMode::Degraded,
            DegradationMode::Emergency => DegradationMode::Minimal,
        }
    }
}

/// Outcome of one pipeline call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub latency_ms: f64,
    /// A stage failed, timed out or panicked
    pub failed: bool,
}

impl CallOutcome {
    pub fn ok(latency_ms: f64) -> Self {
        Self { latency_ms, failed: false }
    }

    pub fn failed(latency_ms: f64) -> Self {
        Self { latency_ms, failed: true }
    }
}

/// A recorded mode change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: DegradationMode,
    pub to: DegradationMode,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub mode: DegradationMode,
    /// Failed fraction of the rolling window
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub in_flight: usize,
    /// Outcomes in the rolling window
    pub samples: usize,
    pub healthy_streak: u32,
    /// Transitions since creation
    pub transitions: u64,
}

#[derive(Debug)]
struct ControllerState {
    mode: DegradationMode,
    samples: VecDeque<CallOutcome>,
    healthy_streak: u32,
    history: VecDeque<ModeTransition>,
    transitions: u64,
}

impl ControllerState {
    fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failed = self.samples.iter().filter(|s| s.failed).count();
        failed as f64 / self.samples.len() as f64
    }

    fn mean_latency(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    fn transition(&mut self, to: DegradationMode, reason: String) {
        let from = self.mode;
        self.mode = to;
        self.healthy_streak = 0;
        self.transitions += 1;
        self.history.push_back(ModeTransition {
            from,
            to,
            reason,
            at: Utc::now(),
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }
}

/// Decrements the in-flight count when dropped.
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks rolling health and decides the operating mode.
pub struct DegradationController {
    state: Mutex<ControllerState>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new()
    }
}

impl DegradationController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState {
                mode: DegradationMode::Full,
                samples: VecDeque::new(),
                healthy_streak: 0,
                history: VecDeque::new(),
                transitions: 0,
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count a call as in flight until the guard is dropped.
    pub fn begin_call(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            counter: Arc::clone(&self.in_flight),
        }
    }

    /// Current mode.
    pub async fn mode(&self) -> DegradationMode {
        self.state.lock().await.mode
    }

    /// Record one call outcome and apply at most one transition. Returns
    /// the mode after the update.
    pub async fn record(&self, outcome: CallOutcome, config: &DegradationConfig) -> DegradationMode {
        let backlog = self.in_flight.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        state.samples.push_back(outcome);
        while state.samples.len() > config.window_size {
            state.samples.pop_front();
        }

        let healthy = !outcome.failed && outcome.latency_ms <= config.degraded_latency_ms;
        if healthy {
            state.healthy_streak = state.healthy_streak.saturating_add(1);
        } else {
            state.healthy_streak = 0;
        }

        if let Some((to, reason)) = Self::worsening(&state, backlog, config) {
            warn!(
                from = state.mode.as_str(),
                to = to.as_str(),
                reason = %reason,
                "Degradation mode worsened"
            );
            state.transition(to, reason);
            return state.mode;
        }

        if state.mode != DegradationMode::Full && state.healthy_streak >= config.recovery_calls {
            let to = state.mode.step_back();
            let reason = format!("{} consecutive healthy calls", state.healthy_streak);
            info!(from = state.mode.as_str(), to = to.as_str(), "Degradation mode recovered");
            state.transition(to, reason);
            state.samples.clear();
        }

        state.mode
    }

    fn worsening(
        state: &ControllerState,
        backlog: usize,
        config: &DegradationConfig,
    ) -> Option<(DegradationMode, String)> {
        let enough = state.samples.len() >= config.min_samples;
        let error_rate = state.error_rate();
        let latency = state.mean_latency();

        if state.mode != DegradationMode::Emergency && enough && error_rate > config.emergency_error_rate {
            return Some((DegradationMode::Emergency, format!("error rate {:.2}", error_rate)));
        }

        match state.mode {
            DegradationMode::Full => {
                if enough && error_rate > config.degraded_error_rate {
                    Some((DegradationMode::Degraded, format!("error rate {:.2}", error_rate)))
                } else if enough && latency > config.degraded_latency_ms {
                    Some((DegradationMode::Degraded, format!("mean latency {:.1}ms", latency)))
                } else if backlog > config.max_in_flight {
                    Some((DegradationMode::Degraded, format!("{} calls in flight", backlog)))
                } else {
                    None
                }
            }
            DegradationMode::Degraded => {
                if enough && error_rate > config.minimal_error_rate {
                    Some((DegradationMode::Minimal, format!("error rate {:.2}", error_rate)))
                } else if enough && latency > config.minimal_latency_ms {
                    Some((DegradationMode::Minimal, format!("mean latency {:.1}ms", latency)))
                } else {
                    None
                }
            }
            DegradationMode::Minimal | DegradationMode::Emergency => None,
        }
    }

    /// Current health.
    pub async fn health(&self) -> HealthSnapshot {
        let in_flight = self.in_flight.load(Ordering::Acquire);
        let state = self.state.lock().await;
        HealthSnapshot {
            mode: state.mode,
            error_rate: state.error_rate(),
            mean_latency_ms: state.mean_latency(),
            in_flight,
            samples: state.samples.len(),
            healthy_streak: state.healthy_streak,
            transitions: state.transitions,
        }
    }

    /// Recent transitions, oldest first.
    pub async fn history(&self) -> Vec<ModeTransition> {
        self.state.lock().await.history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn record_n(ctrl: &DegradationController, outcome: CallOutcome, n: usize, config: &DegradationConfig) {
        for _ in 0..n {
            ctrl.record(outcome, config).await;
        }
    }

    #[tokio::test]
    async fn test_starts_full() {
        let ctrl = DegradationController::new();
        assert_eq!(ctrl.mode().await, DegradationMode::Full);
        let health = ctrl.health().await;
        assert_eq!(health.samples, 0);
        assert_eq!(health.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_min_samples_before_rate_transitions() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig::default();
        record_n(&ctrl, CallOutcome::failed(1.0), 9, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Full);
        ctrl.record(CallOutcome::failed(1.0), &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Emergency);
    }

    #[tokio::test]
    async fn test_steps_down_one_level_at_a_time() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig::default();

        // 2 failures in 10: above 0.10, below 0.25
        record_n(&ctrl, CallOutcome::ok(1.0), 8, &config).await;
        record_n(&ctrl, CallOutcome::failed(1.0), 2, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Degraded);

        // Push the rate over 0.25 but under 0.5
        record_n(&ctrl, CallOutcome::failed(1.0), 2, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Minimal);

        let history = ctrl.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to, DegradationMode::Degraded);
        assert_eq!(history[1].from, DegradationMode::Degraded);
    }

    #[tokio::test]
    async fn test_latency_degrades() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig::default();
        record_n(&ctrl, CallOutcome::ok(80.0), 10, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Degraded);
        record_n(&ctrl, CallOutcome::ok(400.0), 10, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Minimal);
    }

    #[tokio::test]
    async fn test_backlog_degrades() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig {
            max_in_flight: 2,
            ..DegradationConfig::default()
        };
        let _guards: Vec<_> = (0..3).map(|_| ctrl.begin_call()).collect();
        ctrl.record(CallOutcome::ok(1.0), &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Degraded);
        assert_eq!(ctrl.health().await.in_flight, 3);
    }

    #[tokio::test]
    async fn test_guard_releases() {
        let ctrl = DegradationController::new();
        {
            let _a = ctrl.begin_call();
            let _b = ctrl.begin_call();
            assert_eq!(ctrl.health().await.in_flight, 2);
        }
        assert_eq!(ctrl.health().await.in_flight, 0);
    }

    #[tokio::test]
    async fn test_recovery_hysteresis() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig::default();
        record_n(&ctrl, CallOutcome::failed(1.0), 10, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Emergency);

        record_n(&ctrl, CallOutcome::ok(1.0), 9, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Emergency);
        ctrl.record(CallOutcome::ok(1.0), &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Minimal);
        assert_eq!(ctrl.health().await.samples, 0);

        record_n(&ctrl, CallOutcome::ok(1.0), 10, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Degraded);
        record_n(&ctrl, CallOutcome::ok(1.0), 10, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Full);
    }

    #[tokio::test]
    async fn test_failure_resets_streak() {
        let ctrl = DegradationController::new();
        let config = DegradationConfig::default();
        record_n(&ctrl, CallOutcome::failed(1.0), 10, &config).await;
        record_n(&ctrl, CallOutcome::ok(1.0), 9, &config).await;
        ctrl.record(CallOutcome::failed(1.0), &config).await;
        record_n(&ctrl, CallOutcome::ok(1.0), 9, &config).await;
        assert_eq!(ctrl.mode().await, DegradationMode::Emergency);
        assert_eq!(ctrl.health().await.healthy_streak, 9);
    }

    #[test]
    fn test_mode_gates() {
        assert!(DegradationMode::Full.uses_raw_motion());
        assert!(!DegradationMode::Degraded.uses_raw_motion());
        assert!(DegradationMode::Degraded.uses_bayes());
        assert!(!DegradationMode::Minimal.uses_bayes());
        assert!(!DegradationMode::Minimal.learns());
        assert!(DegradationMode::Emergency.bypasses_pipeline());
    }
}
