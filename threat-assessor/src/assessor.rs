//! ThreatAssessor - the per-household assessment context.
//!
//! Owns every piece of mutable state (limiter, windows, rolling health,
//! audit ring) and runs one payload at a time through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{self, guarded, guarded_blocking, motion, spatial, SequenceTracker, Stage};
use crate::audit::{self, AssessmentRecord, AuditRecorder};
use crate::clock::{Clock, SystemClock};
use crate::config::{AssessorConfig, ConfigError};
use crate::degradation::{CallOutcome, DegradationController, DegradationMode, HealthSnapshot};
use crate::fusion::{self, FusionInput, ScoreBreakdown};
use crate::gate::{InputGate, ParsedPayload};
use crate::provider::{NeutralProvider, PatternObservation, PatternProvider};
use crate::types::{Result, SecurityEvent, ThreatLevel};

/// Result of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Audit record identifier
    pub record_id: Uuid,
    pub context_id: String,
    pub threat_level: ThreatLevel,
    /// Final score (0.0 - 1.0)
    pub probability: f64,
    /// Per-component scores; `None` when a safe default was returned
    pub breakdown: Option<ScoreBreakdown>,
    pub latency_ms: f64,
    /// Controller mode when the call started
    pub mode: DegradationMode,
    /// Stages that failed or timed out during this call
    pub failed_stages: Vec<Stage>,
    /// Whether the fixed safe default was returned
    pub safe_default: bool,
}

impl Assessment {
    /// Serialize to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outcome of the scoring part of a call.
struct Scored {
    level: ThreatLevel,
    probability: f64,
    breakdown: Option<ScoreBreakdown>,
    failed_stages: Vec<Stage>,
    safe_default: bool,
}

/// Threat assessor for one household.
pub struct ThreatAssessor {
    /// Active configuration, swapped whole on reconfiguration
    config: RwLock<Arc<AssessorConfig>>,
    gate: InputGate,
    tracker: SequenceTracker,
    controller: DegradationController,
    audit: AuditRecorder,
    provider: Arc<dyn PatternProvider>,
    clock: Arc<dyn Clock>,
}

impl Default for ThreatAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatAssessor {
    /// Create an assessor with default configuration.
    pub fn new() -> Self {
        Self::from_parts(AssessorConfig::default(), Arc::new(SystemClock::new()), Arc::new(NeutralProvider))
    }

    /// Create with custom configuration.
    pub fn with_config(config: AssessorConfig) -> std::result::Result<Self, ConfigError> {
        AssessorBuilder::new().config(config).build()
    }

    /// Start a builder.
    pub fn builder() -> AssessorBuilder {
        AssessorBuilder::new()
    }

    fn from_parts(config: AssessorConfig, clock: Arc<dyn Clock>, provider: Arc<dyn PatternProvider>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            gate: InputGate::new(Arc::clone(&clock)),
            tracker: SequenceTracker::new(),
            controller: DegradationController::new(),
            audit: AuditRecorder::new(),
            provider,
            clock,
        }
    }

    /// Assess a raw payload in the default context.
    pub async fn assess(&self, raw: &[u8]) -> Result<Assessment> {
        let context_id = self.config.read().await.general.default_context_id.clone();
        self.assess_in(&context_id, raw).await
    }

    /// Assess a raw payload in a named context (device or session).
    pub async fn assess_in(&self, context_id: &str, raw: &[u8]) -> Result<Assessment> {
        let started = self.clock.now();
        // One configuration snapshot for the whole call
        let config = Arc::clone(&*self.config.read().await);

        // 1. Gate: validation and rate limit; rejections never reach the pipeline
        let parsed = self.gate.admit(raw, &config.gate).await?;

        let _in_flight = self.controller.begin_call();
        let mode = self.controller.mode().await;
        let payload_hash = audit::hash_payload(raw);
        let event = parsed.event.clone();

        debug!(
            context_id = %context_id,
            event_type = %event.event_type,
            mode = mode.as_str(),
            payload_hash = &payload_hash[..12],
            "Assessing event"
        );

        // 2. Pipeline, or the safe default in Emergency
        let scored = if mode.bypasses_pipeline() {
            Self::safe_default(&event, &config, config.degradation.honor_overrides_in_emergency, Vec::new())
        } else {
            self.run_pipeline(context_id, parsed, &config, mode).await
        };

        // 3. Health accounting
        let latency_ms = self.clock.now().saturating_sub(started).as_secs_f64() * 1000.0;
        let failed = scored.failed_stages.iter().any(|s| *s != Stage::Provider);
        let outcome = CallOutcome { latency_ms, failed };
        self.controller.record(outcome, &config.degradation).await;

        // 4. Audit
        let record_id = Uuid::new_v4();
        if config.audit.enabled {
            let record = AssessmentRecord {
                record_id,
                payload_hash,
                context_id: context_id.to_string(),
                recorded_at: chrono::Utc::now(),
                event_timestamp: event.timestamp,
                event_type: event.event_type,
                home_mode: event.home_mode,
                level: scored.level,
                probability: scored.probability,
                breakdown: scored.breakdown.clone(),
                mode,
                latency_ms,
                failed_stages: scored.failed_stages.clone(),
            };
            self.audit.record(record, config.audit.capacity).await;
        }

        debug!(
            context_id = %context_id,
            level = scored.level.as_str(),
            probability = scored.probability,
            latency_ms,
            "Assessment complete"
        );

        Ok(Assessment {
            record_id,
            context_id: context_id.to_string(),
            threat_level: scored.level,
            probability: scored.probability,
            breakdown: scored.breakdown,
            latency_ms,
            mode,
            failed_stages: scored.failed_stages,
            safe_default: scored.safe_default,
        })
    }

    async fn run_pipeline(
        &self,
        context_id: &str,
        parsed: ParsedPayload,
        config: &Arc<AssessorConfig>,
        mode: DegradationMode,
    ) -> Scored {
        let timeout = Duration::from_millis(config.general.analyzer_timeout_ms);
        let mut failed_stages = Vec::new();
        let ParsedPayload {
            event,
            prior,
            assessed_at,
        } = parsed;

        // Prior (batched) events enter the window before the event itself
        let mut batch = prior;
        batch.push(event.clone());

        let window = match guarded(
            Stage::Window,
            timeout,
            self.tracker.record(context_id, batch.clone(), &config.window),
        )
        .await
        {
            Ok(recorded) => recorded.snapshot,
            Err(e) => {
                failed_stages.push(e.stage());
                batch.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
                batch
            }
        };

        let user_weights = self.user_weights(context_id, config, &mut failed_stages).await;

        // Independent analyzers on the blocking pool, joined before fusion
        let window = Arc::new(window);
        let (chain, motion_result, zone) = tokio::join!(
            guarded_blocking(Stage::Sequence, timeout, {
                let (window, config) = (Arc::clone(&window), Arc::clone(config));
                move || SequenceTracker::evaluate(&window, &config.patterns.chains, assessed_at)
            }),
            guarded_blocking(Stage::Motion, timeout, {
                let (event, config) = (event.clone(), Arc::clone(config));
                let use_samples = mode.uses_raw_motion();
                move || motion::classify_event(&event, &config.motion, use_samples)
            }),
            guarded_blocking(Stage::Spatial, timeout, {
                let (window, config) = (Arc::clone(&window), Arc::clone(config));
                let (zone, home_mode) = (event.zone.clone(), event.home_mode);
                move || spatial::score(&zone, home_mode, &window, &config.spatial)
            }),
        );

        let chain = match chain {
            Ok(c) => c,
            Err(e) => {
                failed_stages.push(e.stage());
                None
            }
        };
        let motion_result = match motion_result {
            Ok(m) => Some(m),
            Err(e) => {
                failed_stages.push(e.stage());
                None
            }
        };
        let zone = match zone {
            Ok(z) => Some(z),
            Err(e) => {
                failed_stages.push(e.stage());
                None
            }
        };

        let input = FusionInput {
            event: &event,
            chain: chain.as_ref(),
            zone: zone.as_ref(),
            motion: motion_result.as_ref(),
            user_weights: &user_weights,
            bayes_enabled: mode.uses_bayes(),
        };
        let fused = match catch_unwind(AssertUnwindSafe(|| fusion::fuse(&input, &config.fusion))) {
            Ok(result) => result,
            Err(panic) => {
                warn!(error = %analysis::panic_message(panic.as_ref()), "Fusion panicked; returning safe default");
                failed_stages.push(Stage::Fusion);
                return Self::safe_default(&event, config, true, failed_stages);
            }
        };

        if mode.learns() && config.general.learning_enabled {
            let observation = PatternObservation {
                event_type: event.event_type,
                zone: event.zone.clone(),
                timestamp: event.timestamp,
                chain: chain.as_ref().map(|c| c.pattern.clone()),
                learning_key: chain.as_ref().and_then(|c| c.learning_key.clone()),
                level: fused.level,
            };
            self.learn(context_id, &observation, config, &mut failed_stages).await;
        }

        Scored {
            level: fused.level,
            probability: fused.probability,
            breakdown: Some(fused.breakdown),
            failed_stages,
            safe_default: false,
        }
    }

    async fn user_weights(
        &self,
        context_id: &str,
        config: &AssessorConfig,
        failed_stages: &mut Vec<Stage>,
    ) -> HashMap<String, f64> {
        let timeout = Duration::from_millis(config.general.provider_timeout_ms);
        match guarded(Stage::Provider, timeout, self.provider.weights(context_id)).await {
            Ok(Ok(weights)) => weights
                .into_iter()
                .filter(|(_, w)| w.is_finite())
                .map(|(k, w)| (k, w.clamp(0.0, 1.0)))
                .collect(),
            Ok(Err(e)) => {
                warn!(context_id = %context_id, error = %e, "Pattern provider failed; using neutral weights");
                failed_stages.push(Stage::Provider);
                HashMap::new()
            }
            Err(_) => {
                failed_stages.push(Stage::Provider);
                HashMap::new()
            }
        }
    }

    async fn learn(
        &self,
        context_id: &str,
        observation: &PatternObservation,
        config: &AssessorConfig,
        failed_stages: &mut Vec<Stage>,
    ) {
        let timeout = Duration::from_millis(config.general.provider_timeout_ms);
        match guarded(Stage::Provider, timeout, self.provider.record(context_id, observation)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(context_id = %context_id, error = %e, "Pattern provider rejected observation");
                if !failed_stages.contains(&Stage::Provider) {
                    failed_stages.push(Stage::Provider);
                }
            }
            Err(_) => {
                if !failed_stages.contains(&Stage::Provider) {
                    failed_stages.push(Stage::Provider);
                }
            }
        }
    }

    fn safe_default(
        event: &SecurityEvent,
        config: &AssessorConfig,
        honor_overrides: bool,
        failed_stages: Vec<Stage>,
    ) -> Scored {
        let mut level = config.degradation.safe_default_level;
        if honor_overrides && config.fusion.critical_overrides.contains(&event.event_type) {
            level = ThreatLevel::Critical;
        }
        Scored {
            level,
            probability: config.degradation.safe_default_probability,
            breakdown: None,
            failed_stages,
            safe_default: true,
        }
    }

    /// Validate and atomically install a new configuration. Calls already
    /// running finish with the configuration they started with.
    pub async fn reconfigure(&self, config: AssessorConfig) -> Result<()> {
        config.validate()?;
        let mut current = self.config.write().await;
        *current = Arc::new(config);
        info!("Configuration installed");
        Ok(())
    }

    /// Active configuration.
    pub async fn config(&self) -> Arc<AssessorConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// Controller health.
    pub async fn health(&self) -> HealthSnapshot {
        self.controller.health().await
    }

    /// Current degradation mode.
    pub async fn mode(&self) -> DegradationMode {
        self.controller.mode().await
    }

    /// Every stored audit record, oldest first.
    pub async fn export_audit(&self) -> Vec<AssessmentRecord> {
        self.audit.export().await
    }

    /// Audit record by id.
    pub async fn audit_record(&self, record_id: Uuid) -> Option<AssessmentRecord> {
        self.audit.get(record_id).await
    }

    /// Current window of a context.
    pub async fn window(&self, context_id: &str) -> Vec<SecurityEvent> {
        self.tracker.snapshot(context_id).await
    }

    /// Tokens left in the rate limiter.
    pub async fn available_tokens(&self) -> f64 {
        let config = self.config().await;
        self.gate.available_tokens(&config.gate).await
    }

    /// The degradation controller, for hosts that report outcomes of their own.
    pub fn controller(&self) -> &DegradationController {
        &self.controller
    }
}

/// Builder for ThreatAssessor.
pub struct AssessorBuilder {
    config: AssessorConfig,
    clock: Option<Arc<dyn Clock>>,
    provider: Option<Arc<dyn PatternProvider>>,
}

impl Default for AssessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AssessorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: AssessorConfig::default(),
            clock: None,
            provider: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AssessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set rate limiter capacity and refill.
    pub fn rate_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.config.gate.rate_capacity = capacity;
        self.config.gate.rate_refill_per_sec = refill_per_sec;
        self
    }

    /// Set window horizon.
    pub fn horizon_secs(mut self, secs: f64) -> Self {
        self.config.window.horizon_secs = secs;
        self
    }

    /// Set household UTC offset.
    pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.config.fusion.temporal.utc_offset_minutes = minutes;
        self
    }

    /// Set audit ring capacity.
    pub fn audit_capacity(mut self, capacity: usize) -> Self {
        self.config.audit.capacity = capacity;
        self
    }

    /// Set time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set pattern provider.
    pub fn provider(mut self, provider: Arc<dyn PatternProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Validate and build.
    pub fn build(self) -> std::result::Result<ThreatAssessor, ConfigError> {
        self.config.validate()?;
        Ok(ThreatAssessor::from_parts(
            self.config,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            self.provider.unwrap_or_else(|| Arc::new(NeutralProvider)),
        ))
    }
}
