//! Degradation and reconfiguration integration tests
//!
//! Exercises the controller through the public assessor API:
//! - Emergency safe default and recovery hysteresis
//! - Override list honored in Emergency
//! - Provider timeouts and failures never abort a call
//! - Atomic reconfiguration under concurrent load

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use threat_assessor::{
    AssessorConfig, CallOutcome, DegradationMode, ManualClock, PatternObservation, PatternProvider,
    ProviderError, ThreatAssessor, ThreatLevel,
};
use tokio_test::{assert_err, assert_ok};

const TUESDAY_2PM: f64 = 1_699_970_400.0;

fn event(event_type: &str, t: f64, zone: &str) -> Vec<u8> {
    format!(
        r#"{{"type":"{}","timestamp":{},"zone":"{}","home_mode":"away"}}"#,
        event_type, t, zone
    )
    .into_bytes()
}

fn assessor() -> ThreatAssessor {
    ThreatAssessor::builder()
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap()
}

async fn force_emergency(assessor: &ThreatAssessor) {
    let config = assessor.config().await;
    for _ in 0..config.degradation.min_samples {
        assessor
            .controller()
            .record(CallOutcome::failed(1.0), &config.degradation)
            .await;
    }
    assert_eq!(assessor.mode().await, DegradationMode::Emergency);
}

// =============================================================================
// Hysteresis
// =============================================================================

#[tokio::test]
async fn test_emergency_holds_until_healthy_streak() {
    let assessor = assessor();
    force_emergency(&assessor).await;
    let recovery_calls = assessor.config().await.degradation.recovery_calls;

    for i in 0..recovery_calls {
        let raw = event("motion", TUESDAY_2PM + 30.0 * i as f64, "backyard");
        let result = assert_ok!(assessor.assess(&raw).await);
        assert!(result.safe_default);
        assert_eq!(result.mode, DegradationMode::Emergency);
        assert_eq!(result.threat_level, ThreatLevel::Elevated);
        assert_eq!(result.probability, 0.6);
    }

    // Exactly one step back
    assert_eq!(assessor.mode().await, DegradationMode::Minimal);
    let history = assessor.controller().history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].from, DegradationMode::Emergency);
    assert_eq!(history[1].to, DegradationMode::Minimal);

    // The pipeline runs again, without the Bayesian branch
    let result = assert_ok!(assessor.assess(&event("door", TUESDAY_2PM + 900.0, "back_door")).await);
    assert!(!result.safe_default);
    assert_eq!(result.mode, DegradationMode::Minimal);
    assert!(result.breakdown.unwrap().bayesian_probability.is_none());
}

#[tokio::test]
async fn test_failure_resets_healthy_streak() {
    let assessor = assessor();
    force_emergency(&assessor).await;
    let config = assessor.config().await;

    for i in 0..9 {
        assert_ok!(assessor.assess(&event("motion", TUESDAY_2PM + 30.0 * i as f64, "backyard")).await);
    }
    assessor
        .controller()
        .record(CallOutcome::failed(1.0), &config.degradation)
        .await;
    assert_ok!(assessor.assess(&event("motion", TUESDAY_2PM + 600.0, "backyard")).await);

    assert_eq!(assessor.mode().await, DegradationMode::Emergency);
    assert_eq!(assessor.health().await.healthy_streak, 1);
}

#[tokio::test]
async fn test_overrides_survive_emergency() {
    let assessor = assessor();
    force_emergency(&assessor).await;

    for (i, kind) in ["glass_break", "smoke", "fire"].into_iter().enumerate() {
        let result = assert_ok!(assessor.assess(&event(kind, TUESDAY_2PM + i as f64, "kitchen")).await);
        assert!(result.safe_default);
        assert_eq!(result.threat_level, ThreatLevel::Critical);
    }
}

#[tokio::test]
async fn test_overrides_can_be_disabled_in_emergency() {
    let mut config = AssessorConfig::default();
    config.degradation.honor_overrides_in_emergency = false;
    let assessor = ThreatAssessor::builder()
        .clock(Arc::new(ManualClock::new()))
        .config(config)
        .build()
        .unwrap();
    force_emergency(&assessor).await;

    let result = assert_ok!(assessor.assess(&event("smoke", TUESDAY_2PM, "kitchen")).await);
    assert_eq!(result.threat_level, ThreatLevel::Elevated);
}

// =============================================================================
// Provider failures
// =============================================================================

struct SlowProvider;

#[async_trait]
impl PatternProvider for SlowProvider {
    async fn weights(&self, _context_id: &str) -> Result<HashMap<String, f64>, ProviderError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(HashMap::from([("delivery_frequency".to_string(), 1.0)]))
    }

    async fn record(&self, _context_id: &str, _observation: &PatternObservation) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_provider_times_out_to_neutral() {
    let assessor = ThreatAssessor::builder()
        .clock(Arc::new(ManualClock::new()))
        .provider(Arc::new(SlowProvider))
        .build()
        .unwrap();

    let result = assert_ok!(assessor.assess(&event("door", TUESDAY_2PM, "back_door")).await);
    assert!(!result.safe_default);
    assert!(result.breakdown.is_some());
    assert_eq!(assessor.mode().await, DegradationMode::Full);
    assert_eq!(assessor.health().await.error_rate, 0.0);
}

// =============================================================================
// Reconfiguration
// =============================================================================

#[tokio::test]
async fn test_invalid_reconfiguration_is_rejected() {
    let assessor = assessor();
    let before = assessor.config().await;

    let mut config = AssessorConfig::default();
    config.fusion.thresholds.standard = 0.9;
    assert_err!(assessor.reconfigure(config).await);

    let mut config = AssessorConfig::default();
    config.window.max_events = 0;
    assert_err!(assessor.reconfigure(config).await);

    let mut config = AssessorConfig::default();
    config.fusion.temporal.utc_offset_minutes = i32::MIN;
    assert_err!(assessor.reconfigure(config).await);

    assert_eq!(*assessor.config().await, *before);
}

#[tokio::test]
async fn test_reconfiguration_during_load() {
    let assessor = Arc::new(assessor());

    let mut handles = Vec::new();
    for i in 0..40 {
        let assessor = assessor.clone();
        handles.push(tokio::spawn(async move {
            let raw = event("door", TUESDAY_2PM + 10.0 * i as f64, "back_door");
            assessor.assess(&raw).await
        }));
    }

    let mut config = AssessorConfig::default();
    config.fusion.base_rate = 0.2;
    config.window.horizon_secs = 120.0;
    assert_ok!(assessor.reconfigure(config.clone()).await);

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
    assert_eq!(*assessor.config().await, config);
}

#[tokio::test]
async fn test_concurrent_health_reads() {
    let assessor = Arc::new(assessor());

    let writers: Vec<_> = (0..20)
        .map(|i| {
            let assessor = assessor.clone();
            tokio::spawn(async move {
                let raw = event("motion", TUESDAY_2PM + 10.0 * i as f64, "driveway");
                assessor.assess_in(&format!("ctx-{}", i % 4), &raw).await.map(|_| ())
            })
        })
        .collect();
    let readers: Vec<_> = (0..20)
        .map(|_| {
            let assessor = assessor.clone();
            tokio::spawn(async move { assessor.health().await })
        })
        .collect();

    for handle in writers {
        assert!(handle.await.unwrap().is_ok());
    }
    for handle in readers {
        let health = handle.await.unwrap();
        assert!(health.samples <= 20);
        assert!((0.0..=1.0).contains(&health.error_rate));
    }

    let health = assessor.health().await;
    assert_eq!(health.samples, 20);
    assert_eq!(health.in_flight, 0);
    assert_eq!(health.mode, DegradationMode::Full);
}
