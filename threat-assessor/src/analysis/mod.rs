//! Analyzers and the boundary they run behind.
//!
//! - `window` / `sequence` / `pattern`: per-context event window and chains
//! - `motion`: activity classification from motion metadata
//! - `spatial`: zone risk and escalation
//!
//! Every stage runs through [`guarded`] (async bodies) or
//! [`guarded_blocking`] (synchronous analyzers), which turn a panic or an
//! overrun into a [`StageError`] so the rest of the call can carry on
//! without it.

pub mod motion;
pub mod pattern;
pub mod sequence;
pub mod spatial;
pub mod window;

pub use motion::{MotionActivity, MotionAssessment};
pub use pattern::{ChainMatch, ChainPattern, ChainStep};
pub use sequence::SequenceTracker;
pub use spatial::{Escalation, ZoneAssessment, ZoneProfile};
pub use window::EventWindow;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::warn;

/// Pipeline stages that can fail independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Window append
    Window,
    /// Chain pattern evaluation
    Sequence,
    Motion,
    Spatial,
    Fusion,
    /// User-pattern provider
    Provider,
}

impl Stage {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Window => "window",
            Stage::Sequence => "sequence",
            Stage::Motion => "motion",
            Stage::Spatial => "spatial",
            Stage::Fusion => "fusion",
            Stage::Provider => "provider",
        }
    }
}

/// Failure of one stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("{stage:?} stage panicked: {message}")]
    Panicked { stage: Stage, message: String },

    #[error("{stage:?} stage timed out after {timeout_ms}ms")]
    TimedOut { stage: Stage, timeout_ms: u64 },

    #[error("{stage:?} stage failed: {message}")]
    Failed { stage: Stage, message: String },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Panicked { stage, .. }
            | StageError::TimedOut { stage, .. }
            | StageError::Failed { stage, .. } => *stage,
        }
    }
}

/// Run `fut` with a deadline, catching panics.
pub async fn guarded<T, F>(stage: Stage, timeout: Duration, fut: F) -> Result<T, StageError>
where
    F: Future<Output = T>,
{
    let result = match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(panic)) => Err(StageError::Panicked {
            stage,
            message: panic_message(panic.as_ref()),
        }),
        Err(_) => Err(timed_out(stage, timeout)),
    };
    log_failure(stage, &result);
    result
}

/// Run a synchronous analyzer on the blocking pool with a deadline.
///
/// An async timeout only fires when the inner future yields, and analyzer
/// bodies never do. Each body gets its own blocking thread instead; one that
/// overruns finishes in the background and its result is dropped.
pub async fn guarded_blocking<T, F>(stage: Stage, timeout: Duration, body: F) -> Result<T, StageError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(body);
    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join)) if join.is_panic() => Err(StageError::Panicked {
            stage,
            message: panic_message(join.into_panic().as_ref()),
        }),
        Ok(Err(join)) => Err(StageError::Failed {
            stage,
            message: join.to_string(),
        }),
        Err(_) => Err(timed_out(stage, timeout)),
    };
    log_failure(stage, &result);
    result
}

fn timed_out(stage: Stage, timeout: Duration) -> StageError {
    StageError::TimedOut {
        stage,
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

fn log_failure<T>(stage: Stage, result: &Result<T, StageError>) {
    if let Err(e) = result {
        warn!(stage = stage.as_str(), error = %e, "Stage failed; continuing without its evidence");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
