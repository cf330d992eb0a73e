//! Evidence Fusion Engine.
//!
//! Joins the analyzer outputs into one score:
//!
//! 1. Rule score (weighted table)
//! 2. Bayesian posterior (log-odds over active factors)
//! 3. Blend, leaning Bayesian as more distinct factors are active
//! 4. Temporal multiplier, chain delta, zone factor, motion factor; the
//!    score is clamped to [0, 1] after each
//! 5. Level thresholds, then the critical override list
//!
//! [`fuse`] is a pure function of its input and configuration.

pub mod bayes;
pub mod rules;
pub mod temporal;

pub use bayes::{EvidenceFactor, FactorContribution, FactorTrigger};
pub use rules::RuleEntry;
pub use temporal::{TemporalAdjustment, TemporalContext};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysis::{ChainMatch, Escalation, MotionActivity, MotionAssessment, ZoneAssessment};
use crate::config::FusionConfig;
use crate::types::{SecurityEvent, ThreatLevel};

/// Score factor per motion activity; 1.0 is neutral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionAdjustments {
    pub package_drop: f64,
    pub pet: f64,
    pub loitering: f64,
    pub walking: f64,
    pub running: f64,
    pub vehicle: f64,
    pub unknown: f64,
}

impl Default for MotionAdjustments {
    fn default() -> Self {
        Self {
            package_drop: 0.7,
            pet: 0.6,
            loitering: 1.3,
            walking: 1.0,
            running: 1.2,
            vehicle: 0.9,
            unknown: 1.0,
        }
    }
}

impl MotionAdjustments {
    pub fn get(&self, activity: MotionActivity) -> f64 {
        match activity {
            MotionActivity::PackageDrop => self.package_drop,
            MotionActivity::Pet => self.pet,
            MotionActivity::Loitering => self.loitering,
            MotionActivity::Walking => self.walking,
            MotionActivity::Running => self.running,
            MotionActivity::Vehicle => self.vehicle,
            MotionActivity::Unknown => self.unknown,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let all = [
            self.package_drop,
            self.pet,
            self.loitering,
            self.walking,
            self.running,
            self.vehicle,
            self.unknown,
        ];
        if all.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err("fusion.motion_adjustments must be non-negative".to_string());
        }
        Ok(())
    }
}

/// What the fusion engine joins. Analyzer outputs are `None` when the
/// analyzer failed, timed out or was switched off.
#[derive(Debug, Clone, Copy)]
pub struct FusionInput<'a> {
    pub event: &'a SecurityEvent,
    pub chain: Option<&'a ChainMatch>,
    pub zone: Option<&'a ZoneAssessment>,
    pub motion: Option<&'a MotionAssessment>,
    /// Named weights from the pattern provider
    pub user_weights: &'a HashMap<String, f64>,
    /// False in `Minimal` mode
    pub bayes_enabled: bool,
}

/// Every intermediate score of one fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub rule_score: f64,
    pub matched_rules: Vec<String>,
    /// `None` when the Bayesian branch was disabled
    pub bayesian_probability: Option<f64>,
    pub bayesian_log_odds: Option<f64>,
    pub factors: Vec<FactorContribution>,
    pub bayes_weight: f64,
    pub blended_score: f64,
    pub temporal_multiplier: f64,
    pub temporal_adjustments: Vec<String>,
    pub after_temporal: f64,
    pub chain_pattern: Option<String>,
    /// Delta actually applied (`threat_delta * confidence`)
    pub chain_delta: f64,
    pub after_chain: f64,
    pub zone_risk: Option<f64>,
    pub escalation: Option<Escalation>,
    /// Zone factor times escalation multiplier
    pub zone_multiplier: f64,
    pub after_zone: f64,
    pub motion_activity: Option<MotionActivity>,
    pub motion_confidence: Option<f64>,
    pub motion_adjustment: f64,
    pub final_score: f64,
    pub override_applied: bool,
}

/// Outcome of a fusion. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    /// Final score (0.0 - 1.0)
    pub probability: f64,
    /// Log-odds of `probability`
    pub log_odds: f64,
    pub level: ThreatLevel,
    pub breakdown: ScoreBreakdown,
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Fuse analyzer outputs into a score and level.
pub fn fuse(input: &FusionInput<'_>, config: &FusionConfig) -> FusionResult {
    let event = input.event;
    let zone_category = input.zone.and_then(|z| z.category);
    let temporal_ctx = TemporalContext::from_timestamp(event.timestamp, &config.temporal);

    // 1. Rules
    let (rule_score, matched_rules) = rules::rule_score(event, &config.rules, config.default_rule_score);

    // 2. Bayes
    let posterior = input.bayes_enabled.then(|| {
        let ctx = bayes::BayesContext {
            event,
            is_night: temporal_ctx.is_some_and(|t| t.is_night),
            zone_category,
            escalation: input.zone.is_some_and(|z| z.escalation.is_some()),
            chain: input.chain,
            motion: input.motion,
            user_weights: input.user_weights,
        };
        bayes::posterior(
            &config.factors,
            &ctx,
            bayes::BayesParams {
                base_rate: config.base_rate,
                likelihood_floor: config.likelihood_floor,
                max_log_odds: config.max_log_odds,
            },
        )
    });

    // 3. Blend
    let (bayes_weight, blended_score) = match &posterior {
        Some(p) => {
            let blend = &config.blend;
            let active = p.contributions.len() as f64;
            let w = (blend.base_weight + blend.per_factor * active).min(blend.max_weight);
            (w, unit((1.0 - w) * rule_score + w * p.probability))
        }
        None => (0.0, rule_score),
    };

    // 4. Adjustments
    let temporal = temporal::adjustment(temporal_ctx.as_ref(), event, zone_category, &config.temporal);
    let after_temporal = unit(blended_score * temporal.multiplier);

    let chain_delta = input.chain.map_or(0.0, |c| c.weighted_delta());
    let after_chain = unit(after_temporal + chain_delta);

    let zone_multiplier = input.zone.map_or(1.0, |z| {
        (config.zone_base + config.zone_span * z.risk) * z.escalation_multiplier
    });
    let after_zone = unit(after_chain * zone_multiplier);

    let motion_adjustment = input.motion.map_or(1.0, |m| {
        let adj = config.motion_adjustments.get(m.activity);
        1.0 + (adj - 1.0) * m.confidence
    });
    let final_score = unit(after_zone * motion_adjustment);

    // 5. Level
    let mut level = config.thresholds.level_for(final_score);
    let override_applied = config.critical_overrides.contains(&event.event_type);
    if override_applied {
        level = level.max(ThreatLevel::Critical);
    }

    FusionResult {
        probability: final_score,
        log_odds: bayes::logit(final_score, config.max_log_odds),
        level,
        breakdown: ScoreBreakdown {
            rule_score,
            matched_rules,
            bayesian_probability: posterior.as_ref().map(|p| p.probability),
            bayesian_log_odds: posterior.as_ref().map(|p| p.log_odds),
            factors: posterior.map(|p| p.contributions).unwrap_or_default(),
            bayes_weight,
            blended_score,
            temporal_multiplier: temporal.multiplier,
            temporal_adjustments: temporal.applied,
            after_temporal,
            chain_pattern: input.chain.map(|c| c.pattern.clone()),
            chain_delta,
            after_chain,
            zone_risk: input.zone.map(|z| z.risk),
            escalation: input.zone.and_then(|z| z.escalation),
            zone_multiplier,
            after_zone,
            motion_activity: input.motion.map(|m| m.activity),
            motion_confidence: input.motion.map(|m| m.confidence),
            motion_adjustment,
            final_score,
            override_applied,
        },
    }
}
