//! Configuration for the threat assessor.
//!
//! Every numeric threshold and every catalog (zones, chain patterns, rules,
//! evidence factors) lives here. A configuration is validated before it is
//! installed, at startup and on every reconfiguration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::analysis::motion::{self, MotionRule};
use crate::analysis::pattern::{self, ChainPattern};
use crate::analysis::spatial::{self, EscalationMultipliers, ModeFactors, ZoneProfile};
use crate::fusion::bayes::{self, EvidenceFactor};
use crate::fusion::rules::{self, RuleEntry};
use crate::fusion::MotionAdjustments;
use crate::types::{EventType, ThreatLevel, ZoneCategory};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a threat assessor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    /// Input gate limits and rate limiter
    pub gate: GateConfig,
    /// Event window bounds
    pub window: WindowConfig,
    /// Motion classifier
    pub motion: MotionConfig,
    /// Zone table and escalation
    pub spatial: SpatialConfig,
    /// Chain pattern catalog
    pub patterns: PatternsConfig,
    /// Evidence fusion
    pub fusion: FusionConfig,
    /// Degradation controller
    pub degradation: DegradationConfig,
    /// Audit recorder
    pub audit: AuditConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl AssessorConfig {
    /// Parse config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every bound and catalog invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gate.validate()?;
        self.window.validate()?;
        self.motion.validate()?;
        self.spatial.validate()?;
        self.patterns.validate()?;
        self.fusion.validate()?;
        self.degradation.validate()?;
        self.audit.validate()?;
        self.general.validate()
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message()))
    }
}

fn ensure_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    ensure((0.0..=1.0).contains(&value), || format!("{} must be within 0..1, got {}", name, value))
}

fn ensure_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    ensure(value.is_finite() && value > 0.0, || format!("{} must be positive, got {}", name, value))
}

fn ensure_hour(name: &str, value: u32) -> Result<(), ConfigError> {
    ensure(value < 24, || format!("{} must be an hour 0..23, got {}", name, value))
}

/// Input gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum raw payload size in bytes
    pub max_payload_bytes: usize,
    /// Maximum JSON nesting depth
    pub max_depth: usize,
    /// Maximum string length (characters), keys included
    pub max_string_len: usize,
    /// Maximum fields in one object
    pub max_object_fields: usize,
    /// Maximum pre-batched events
    pub max_batch_events: usize,
    /// Maximum raw motion samples per event
    pub max_motion_samples: usize,
    /// Token bucket burst capacity
    pub rate_capacity: u32,
    /// Token bucket refill (tokens per second)
    pub rate_refill_per_sec: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 8192,
            max_depth: 4,
            max_string_len: 64,
            max_object_fields: 16,
            max_batch_events: 25,
            max_motion_samples: 512,
            rate_capacity: 100,
            rate_refill_per_sec: 10.0,
        }
    }
}

impl GateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.max_payload_bytes > 0, || "gate.max_payload_bytes must be positive".into())?;
        ensure(self.max_depth >= 1, || "gate.max_depth must be at least 1".into())?;
        ensure(self.max_string_len > 0, || "gate.max_string_len must be positive".into())?;
        ensure(self.max_object_fields > 0, || "gate.max_object_fields must be positive".into())?;
        ensure(self.rate_capacity > 0, || "gate.rate_capacity must be positive".into())?;
        ensure_positive("gate.rate_refill_per_sec", self.rate_refill_per_sec)
    }
}

/// Event window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Time horizon, measured back from the newest event (seconds)
    pub horizon_secs: f64,
    /// Maximum events per context
    pub max_events: usize,
    /// Maximum live contexts per assessor
    pub max_contexts: usize,
    /// Same type and zone within this many seconds is stored once
    pub duplicate_window_secs: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            horizon_secs: 60.0,
            max_events: 100,
            max_contexts: 64,
            duplicate_window_secs: 5.0,
        }
    }
}

impl WindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("window.horizon_secs", self.horizon_secs)?;
        ensure(self.max_events >= 1, || "window.max_events must be at least 1".into())?;
        ensure(self.max_contexts >= 1, || "window.max_contexts must be at least 1".into())?;
        ensure(
            self.duplicate_window_secs.is_finite() && self.duplicate_window_secs >= 0.0,
            || "window.duplicate_window_secs must be non-negative".into(),
        )
    }
}

/// Motion classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Rate at which raw samples were taken (Hz)
    pub sample_rate_hz: f64,
    /// Samples needed for full confidence
    pub full_quality_samples: usize,
    /// Confidence factor when only a summary is available
    pub summary_confidence_factor: f64,
    /// Confidence of the fallback category
    pub unknown_confidence: f64,
    /// Decision table, first match wins
    pub rules: Vec<MotionRule>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10.0,
            full_quality_samples: 8,
            summary_confidence_factor: 0.8,
            unknown_confidence: 0.1,
            rules: motion::default_rules(),
        }
    }
}

impl MotionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("motion.sample_rate_hz", self.sample_rate_hz)?;
        ensure(self.full_quality_samples >= 1, || "motion.full_quality_samples must be at least 1".into())?;
        ensure_unit("motion.summary_confidence_factor", self.summary_confidence_factor)?;
        ensure_unit("motion.unknown_confidence", self.unknown_confidence)?;
        for rule in &self.rules {
            rule.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

/// Spatial scorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Known zones
    pub zones: Vec<ZoneProfile>,
    /// Risk used for zones missing from the table
    pub unknown_zone_risk: f64,
    /// Per-mode, per-category risk factors
    pub mode_factors: ModeFactors,
    /// Escalation multipliers
    pub escalation: EscalationMultipliers,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            zones: spatial::default_zones(),
            unknown_zone_risk: 0.5,
            mode_factors: ModeFactors::default(),
            escalation: EscalationMultipliers::default(),
        }
    }
}

impl SpatialConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for zone in &self.zones {
            ensure(!zone.id.is_empty(), || "spatial.zones: empty zone id".into())?;
            ensure(seen.insert(zone.id.as_str()), || format!("spatial.zones: duplicate zone '{}'", zone.id))?;
            ensure_unit(&format!("spatial.zones.{}.base_risk", zone.id), zone.base_risk)?;
        }
        ensure_unit("spatial.unknown_zone_risk", self.unknown_zone_risk)?;
        self.mode_factors.validate().map_err(ConfigError::Invalid)?;
        self.escalation.validate().map_err(ConfigError::Invalid)
    }
}

/// Chain pattern catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// Registered chain patterns
    pub chains: Vec<ChainPattern>,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            chains: pattern::default_patterns(),
        }
    }
}

impl PatternsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for chain in &self.chains {
            ensure(seen.insert(chain.name.as_str()), || format!("patterns: duplicate chain '{}'", chain.name))?;
            chain.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

/// Level thresholds on the final score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    /// Lower bound of `standard`
    pub standard: f64,
    /// Lower bound of `elevated`
    pub elevated: f64,
    /// Lower bound of `critical`
    pub critical: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            standard: 0.30,
            elevated: 0.55,
            critical: 0.80,
        }
    }
}

impl LevelThresholds {
    /// Map a score to a level.
    pub fn level_for(&self, score: f64) -> ThreatLevel {
        if score >= self.critical {
            ThreatLevel::Critical
        } else if score >= self.elevated {
            ThreatLevel::Elevated
        } else if score >= self.standard {
            ThreatLevel::Standard
        } else {
            ThreatLevel::Low
        }
    }
}

/// How far the blend leans toward the Bayesian probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Bayesian weight with no active factor
    pub base_weight: f64,
    /// Added per distinct active factor
    pub per_factor: f64,
    /// Upper bound of the Bayesian weight
    pub max_weight: f64,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            base_weight: 0.3,
            per_factor: 0.1,
            max_weight: 0.8,
        }
    }
}

/// Time-of-day and mode adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Household offset from UTC in minutes
    pub utc_offset_minutes: i32,
    /// Night starts at this local hour
    pub night_start_hour: u32,
    /// Night ends at this local hour
    pub night_end_hour: u32,
    /// Multiplier during night hours
    pub night_multiplier: f64,
    /// Daytime starts at this local hour
    pub day_start_hour: u32,
    /// Daytime ends at this local hour
    pub day_end_hour: u32,
    /// Multiplier during daytime
    pub day_multiplier: f64,
    /// Multiplier on Saturday and Sunday
    pub weekend_multiplier: f64,
    /// Delivery window start (local hour)
    pub delivery_start_hour: u32,
    /// Delivery window end (local hour)
    pub delivery_end_hour: u32,
    /// Multiplier for delivery-like events inside the window
    pub delivery_multiplier: f64,
    /// Event types that look like deliveries
    pub delivery_event_types: Vec<EventType>,
    /// Zone categories where deliveries happen
    pub delivery_zone_categories: Vec<ZoneCategory>,
    /// Multiplier per home mode
    pub mode_multipliers: ModeMultipliers,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            night_start_hour: 22,
            night_end_hour: 6,
            night_multiplier: 1.25,
            day_start_hour: 8,
            day_end_hour: 18,
            day_multiplier: 0.9,
            weekend_multiplier: 0.95,
            delivery_start_hour: 9,
            delivery_end_hour: 20,
            delivery_multiplier: 0.85,
            delivery_event_types: vec![EventType::Doorbell, EventType::Motion],
            delivery_zone_categories: vec![ZoneCategory::Entry, ZoneCategory::Public],
            mode_multipliers: ModeMultipliers::default(),
        }
    }
}

impl TemporalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.utc_offset_minutes.unsigned_abs() < 24 * 60, || {
            "fusion.temporal.utc_offset_minutes must be within a day".into()
        })?;
        ensure_hour("fusion.temporal.night_start_hour", self.night_start_hour)?;
        ensure_hour("fusion.temporal.night_end_hour", self.night_end_hour)?;
        ensure_hour("fusion.temporal.day_start_hour", self.day_start_hour)?;
        ensure_hour("fusion.temporal.day_end_hour", self.day_end_hour)?;
        ensure_hour("fusion.temporal.delivery_start_hour", self.delivery_start_hour)?;
        ensure_hour("fusion.temporal.delivery_end_hour", self.delivery_end_hour)?;
        ensure_positive("fusion.temporal.night_multiplier", self.night_multiplier)?;
        ensure_positive("fusion.temporal.day_multiplier", self.day_multiplier)?;
        ensure_positive("fusion.temporal.weekend_multiplier", self.weekend_multiplier)?;
        ensure_positive("fusion.temporal.delivery_multiplier", self.delivery_multiplier)?;
        self.mode_multipliers.validate()
    }
}

/// Temporal multiplier per home mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeMultipliers {
    pub home: f64,
    pub away: f64,
    pub night: f64,
    pub vacation: f64,
}

impl Default for ModeMultipliers {
    fn default() -> Self {
        Self {
            home: 0.8,
            away: 1.1,
            night: 1.15,
            vacation: 1.2,
        }
    }
}

impl ModeMultipliers {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("fusion.temporal.mode_multipliers.home", self.home)?;
        ensure_positive("fusion.temporal.mode_multipliers.away", self.away)?;
        ensure_positive("fusion.temporal.mode_multipliers.night", self.night)?;
        ensure_positive("fusion.temporal.mode_multipliers.vacation", self.vacation)
    }
}

/// Evidence fusion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Rule table
    pub rules: Vec<RuleEntry>,
    /// Rule score when no rule matches
    pub default_rule_score: f64,
    /// Prior probability of a threat
    pub base_rate: f64,
    /// Evidence factor catalog
    pub factors: Vec<EvidenceFactor>,
    /// Likelihoods below this are raised to it
    pub likelihood_floor: f64,
    /// Bound on accumulated log-odds
    pub max_log_odds: f64,
    /// Rule/Bayes blend
    pub blend: BlendConfig,
    /// Time-of-day and mode adjustments
    pub temporal: TemporalConfig,
    /// Zone factor is `zone_base + zone_span * risk`
    pub zone_base: f64,
    pub zone_span: f64,
    /// Per-activity motion adjustments
    pub motion_adjustments: MotionAdjustments,
    /// Level thresholds
    pub thresholds: LevelThresholds,
    /// Event types that always yield `critical`
    pub critical_overrides: Vec<EventType>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rules: rules::default_rules(),
            default_rule_score: 0.3,
            base_rate: 0.1,
            factors: bayes::default_factors(),
            likelihood_floor: 1e-6,
            max_log_odds: 20.0,
            blend: BlendConfig::default(),
            temporal: TemporalConfig::default(),
            zone_base: 0.75,
            zone_span: 0.5,
            motion_adjustments: MotionAdjustments::default(),
            thresholds: LevelThresholds::default(),
            critical_overrides: vec![EventType::GlassBreak, EventType::Smoke, EventType::Fire],
        }
    }
}

impl FusionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.rules {
            rule.validate().map_err(ConfigError::Invalid)?;
        }
        ensure_unit("fusion.default_rule_score", self.default_rule_score)?;
        ensure(self.base_rate > 0.0 && self.base_rate < 1.0, || {
            format!("fusion.base_rate must be strictly within 0..1, got {}", self.base_rate)
        })?;
        let mut seen = HashSet::new();
        for factor in &self.factors {
            ensure(seen.insert(factor.label.as_str()), || {
                format!("fusion.factors: duplicate factor '{}'", factor.label)
            })?;
            factor.validate().map_err(ConfigError::Invalid)?;
        }
        ensure(self.likelihood_floor > 0.0 && self.likelihood_floor < 1.0, || {
            "fusion.likelihood_floor must be strictly within 0..1".into()
        })?;
        ensure_positive("fusion.max_log_odds", self.max_log_odds)?;
        ensure_unit("fusion.blend.base_weight", self.blend.base_weight)?;
        ensure_unit("fusion.blend.per_factor", self.blend.per_factor)?;
        ensure_unit("fusion.blend.max_weight", self.blend.max_weight)?;
        self.temporal.validate()?;
        ensure(self.zone_base.is_finite() && self.zone_base >= 0.0, || {
            "fusion.zone_base must be non-negative".into()
        })?;
        ensure(self.zone_span.is_finite() && self.zone_span >= 0.0, || {
            "fusion.zone_span must be non-negative".into()
        })?;
        self.motion_adjustments.validate().map_err(ConfigError::Invalid)?;
        let t = &self.thresholds;
        ensure(
            0.0 < t.standard && t.standard <= t.elevated && t.elevated <= t.critical && t.critical <= 1.0,
            || "fusion.thresholds must satisfy 0 < standard <= elevated <= critical <= 1".into(),
        )
    }
}

/// Degradation controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Rolling window size (calls)
    pub window_size: usize,
    /// Observations needed before rate-based transitions
    pub min_samples: usize,
    /// Consecutive healthy calls needed to step back one state
    pub recovery_calls: u32,
    /// Full -> Degraded error rate
    pub degraded_error_rate: f64,
    /// Degraded -> Minimal error rate
    pub minimal_error_rate: f64,
    /// Any -> Emergency error rate
    pub emergency_error_rate: f64,
    /// Full -> Degraded mean latency (ms)
    pub degraded_latency_ms: f64,
    /// Degraded -> Minimal mean latency (ms)
    pub minimal_latency_ms: f64,
    /// Full -> Degraded in-flight backlog
    pub max_in_flight: usize,
    /// Level returned while in Emergency
    pub safe_default_level: ThreatLevel,
    /// Probability returned while in Emergency
    pub safe_default_probability: f64,
    /// Whether critical overrides still apply in Emergency
    pub honor_overrides_in_emergency: bool,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            recovery_calls: 10,
            degraded_error_rate: 0.10,
            minimal_error_rate: 0.25,
            emergency_error_rate: 0.50,
            degraded_latency_ms: 50.0,
            minimal_latency_ms: 150.0,
            max_in_flight: 32,
            safe_default_level: ThreatLevel::Elevated,
            safe_default_probability: 0.6,
            honor_overrides_in_emergency: true,
        }
    }
}

impl DegradationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.window_size >= 1, || "degradation.window_size must be at least 1".into())?;
        ensure(self.min_samples >= 1 && self.min_samples <= self.window_size, || {
            "degradation.min_samples must be within 1..=window_size".into()
        })?;
        ensure(self.recovery_calls >= 1, || "degradation.recovery_calls must be at least 1".into())?;
        ensure_unit("degradation.degraded_error_rate", self.degraded_error_rate)?;
        ensure_unit("degradation.minimal_error_rate", self.minimal_error_rate)?;
        ensure_unit("degradation.emergency_error_rate", self.emergency_error_rate)?;
        ensure(
            self.degraded_error_rate <= self.minimal_error_rate
                && self.minimal_error_rate <= self.emergency_error_rate,
            || "degradation error rates must be ordered degraded <= minimal <= emergency".into(),
        )?;
        ensure_positive("degradation.degraded_latency_ms", self.degraded_latency_ms)?;
        ensure_positive("degradation.minimal_latency_ms", self.minimal_latency_ms)?;
        ensure(self.degraded_latency_ms <= self.minimal_latency_ms, || {
            "degradation latencies must be ordered degraded <= minimal".into()
        })?;
        ensure(self.max_in_flight >= 1, || "degradation.max_in_flight must be at least 1".into())?;
        ensure_unit("degradation.safe_default_probability", self.safe_default_probability)
    }
}

/// Audit recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable audit recording
    pub enabled: bool,
    /// Ring buffer capacity
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
        }
    }
}

impl AuditConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.capacity >= 1, || "audit.capacity must be at least 1".into())
    }
}

/// General configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Context used when the caller names none
    pub default_context_id: String,
    /// Per-analyzer timeout (ms)
    pub analyzer_timeout_ms: u64,
    /// Pattern provider timeout (ms)
    pub provider_timeout_ms: u64,
    /// Feed assessments back to the pattern provider
    pub learning_enabled: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_context_id: "default".to_string(),
            analyzer_timeout_ms: 20,
            provider_timeout_ms: 10,
            learning_enabled: true,
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure(!self.default_context_id.is_empty(), || "general.default_context_id must not be empty".into())?;
        ensure(self.analyzer_timeout_ms > 0, || "general.analyzer_timeout_ms must be positive".into())?;
        ensure(self.provider_timeout_ms > 0, || "general.provider_timeout_ms must be positive".into())
    }
}
