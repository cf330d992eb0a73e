//! Log-odds evidence fusion.
//!
//! Each active factor adds `ln(LR) * weight * strength` to the prior
//! log-odds, where `LR = P(present | threat) / P(present | no threat)`.
//! Likelihoods are floored so a ratio can never reach zero or infinity, and
//! the accumulated log-odds are clamped before the logistic transform.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysis::{ChainMatch, MotionActivity, MotionAssessment};
use crate::types::{EventType, HomeMode, SecurityEvent, ZoneCategory};

/// When a factor is active and how strongly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorTrigger {
    /// Home is away or vacation
    Unattended,
    /// Event falls in night hours
    NightHours,
    /// Event zone has this category
    ZoneCategory { category: ZoneCategory },
    /// Event type is listed; strength is sensor confidence
    EventTypes { event_types: Vec<EventType> },
    /// A chain with positive delta matched; strength is match confidence
    ThreatChain,
    /// A chain with negative delta matched; strength is match confidence
    BenignChain,
    /// The spatial scorer found an escalation
    ZoneEscalation,
    /// Motion classified as one of these; strength is classifier confidence
    MotionActivities { activities: Vec<MotionActivity> },
    /// Provider weight under `key`, for the listed event types (empty: any);
    /// strength is the weight itself
    UserWeight {
        key: String,
        #[serde(default)]
        event_types: Vec<EventType>,
    },
}

/// Everything a factor may look at.
#[derive(Debug, Clone, Copy)]
pub struct BayesContext<'a> {
    pub event: &'a SecurityEvent,
    pub is_night: bool,
    pub zone_category: Option<ZoneCategory>,
    pub escalation: bool,
    pub chain: Option<&'a ChainMatch>,
    pub motion: Option<&'a MotionAssessment>,
    pub user_weights: &'a HashMap<String, f64>,
}

impl FactorTrigger {
    /// Evidence strength in (0, 1], or `None` when inactive.
    pub fn strength(&self, ctx: &BayesContext<'_>) -> Option<f64> {
        let strength = match self {
            FactorTrigger::Unattended => matches!(ctx.event.home_mode, HomeMode::Away | HomeMode::Vacation)
                .then_some(1.0)?,
            FactorTrigger::NightHours => ctx.is_night.then_some(1.0)?,
            FactorTrigger::ZoneCategory { category } => (ctx.zone_category == Some(*category)).then_some(1.0)?,
            FactorTrigger::EventTypes { event_types } => event_types
                .contains(&ctx.event.event_type)
                .then(|| ctx.event.effective_confidence())?,
            FactorTrigger::ThreatChain => ctx.chain.filter(|c| c.threat_delta > 0.0)?.confidence,
            FactorTrigger::BenignChain => ctx.chain.filter(|c| c.threat_delta < 0.0)?.confidence,
            FactorTrigger::ZoneEscalation => ctx.escalation.then_some(1.0)?,
            FactorTrigger::MotionActivities { activities } => {
                ctx.motion.filter(|m| activities.contains(&m.activity))?.confidence
            }
            FactorTrigger::UserWeight { key, event_types } => {
                if !event_types.is_empty() && !event_types.contains(&ctx.event.event_type) {
                    return None;
                }
                *ctx.user_weights.get(key)?
            }
        };
        (strength.is_finite() && strength > 0.0).then(|| strength.min(1.0))
    }
}

/// A named conditional-probability pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFactor {
    pub label: String,
    /// P(present | threat)
    pub p_given_threat: f64,
    /// P(present | no threat)
    pub p_given_no_threat: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub trigger: FactorTrigger,
}

fn default_weight() -> f64 {
    1.0
}

impl EvidenceFactor {
    fn new(label: &str, p_given_threat: f64, p_given_no_threat: f64, trigger: FactorTrigger) -> Self {
        Self {
            label: label.to_string(),
            p_given_threat,
            p_given_no_threat,
            weight: 1.0,
            trigger,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for p in [self.p_given_threat, self.p_given_no_threat] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("fusion.factors.{}: probabilities must be within 0..1", self.label));
            }
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(format!("fusion.factors.{}: weight must be non-negative", self.label));
        }
        Ok(())
    }

    /// `ln(LR)` with both likelihoods floored.
    pub fn log_likelihood_ratio(&self, floor: f64) -> f64 {
        let pt = self.p_given_threat.max(floor);
        let pnt = self.p_given_no_threat.max(floor);
        (pt / pnt).ln()
    }
}

/// One active factor's share of the posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub label: String,
    pub log_likelihood_ratio: f64,
    pub weight: f64,
    pub strength: f64,
    /// `log_likelihood_ratio * weight * strength`
    pub contribution: f64,
}

/// Posterior after fusing every active factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub probability: f64,
    pub log_odds: f64,
    pub contributions: Vec<FactorContribution>,
}

/// Parameters of the fusion.
#[derive(Debug, Clone, Copy)]
pub struct BayesParams {
    pub base_rate: f64,
    pub likelihood_floor: f64,
    pub max_log_odds: f64,
}

/// Accumulate every active factor in log-odds space.
pub fn posterior(factors: &[EvidenceFactor], ctx: &BayesContext<'_>, params: BayesParams) -> Posterior {
    let mut log_odds = logit(params.base_rate, params.max_log_odds);
    let mut contributions = Vec::new();

    for factor in factors {
        let Some(strength) = factor.trigger.strength(ctx) else {
            continue;
        };
        let llr = factor.log_likelihood_ratio(params.likelihood_floor);
        let contribution = llr * factor.weight * strength;
        if !contribution.is_finite() {
            continue;
        }
        log_odds += contribution;
        contributions.push(FactorContribution {
            label: factor.label.clone(),
            log_likelihood_ratio: llr,
            weight: factor.weight,
            strength,
            contribution,
        });
    }

    let log_odds = clamp_log_odds(log_odds, params.max_log_odds);
    Posterior {
        probability: logistic(log_odds),
        log_odds,
        contributions,
    }
}

fn clamp_log_odds(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-max, max)
    }
}

/// Numerically stable logistic function.
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-odds of `p`, clamped to `±max`.
pub fn logit(p: f64, max: f64) -> f64 {
    let p = if p.is_nan() { 0.5 } else { p.clamp(0.0, 1.0) };
    clamp_log_odds((p / (1.0 - p)).ln(), max)
}

/// Factor catalog used out of the box.
pub fn default_factors() -> Vec<EvidenceFactor> {
    use EventType::*;
    use FactorTrigger as T;
    vec![
        EvidenceFactor::new("unattended_home", 0.7, 0.35, T::Unattended),
        EvidenceFactor::new("night_activity", 0.6, 0.25, T::NightHours),
        EvidenceFactor::new("entry_point", 0.6, 0.4, T::ZoneCategory { category: ZoneCategory::Entry }),
        EvidenceFactor::new("interior_zone", 0.5, 0.2, T::ZoneCategory { category: ZoneCategory::Interior }),
        EvidenceFactor::new("forced_entry_signature", 0.9, 0.05, T::EventTypes { event_types: vec![GlassBreak] }),
        EvidenceFactor::new("hazard_signature", 0.9, 0.1, T::EventTypes { event_types: vec![Smoke, Fire] }),
        EvidenceFactor::new("visitor_signal", 0.15, 0.6, T::EventTypes { event_types: vec![Doorbell] }),
        EvidenceFactor::new("benign_chain", 0.1, 0.5, T::BenignChain),
        EvidenceFactor::new("threat_chain", 0.8, 0.1, T::ThreatChain),
        EvidenceFactor::new("zone_escalation", 0.7, 0.15, T::ZoneEscalation),
        EvidenceFactor::new("loitering_motion", 0.6, 0.2, T::MotionActivities { activities: vec![MotionActivity::Loitering] }),
        EvidenceFactor::new(
            "benign_motion",
            0.2,
            0.6,
            T::MotionActivities {
                activities: vec![MotionActivity::PackageDrop, MotionActivity::Pet, MotionActivity::Vehicle],
            },
        ),
        EvidenceFactor::new(
            "delivery_frequency",
            0.2,
            0.5,
            T::UserWeight {
                key: "delivery_frequency".to_string(),
                event_types: vec![Doorbell, Motion],
            },
        ),
    ]
}
