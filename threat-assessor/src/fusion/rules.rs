//! Rule-based scoring table.

use serde::{Deserialize, Serialize};

use crate::types::{EventType, HomeMode, SecurityEvent};

/// One row: when the conditions hold, contribute `score` with `weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    /// Matching event types; empty matches any
    #[serde(default)]
    pub event_types: Vec<EventType>,
    /// Matching home modes; empty matches any
    #[serde(default)]
    pub modes: Vec<HomeMode>,
    /// Score (0.0 - 1.0)
    pub score: f64,
    pub weight: f64,
}

impl RuleEntry {
    fn new(name: &str, event_types: &[EventType], modes: &[HomeMode], score: f64, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            event_types: event_types.to_vec(),
            modes: modes.to_vec(),
            score,
            weight,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(format!("fusion.rules.{}: score must be within 0..1", self.name));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(format!("fusion.rules.{}: weight must be positive", self.name));
        }
        Ok(())
    }

    /// Whether the row applies to `event`.
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && (self.modes.is_empty() || self.modes.contains(&event.home_mode))
    }
}

/// Weighted mean of the matching rows, or `default_score` when none match.
/// Also returns the names of the rows that matched.
pub fn rule_score(event: &SecurityEvent, rules: &[RuleEntry], default_score: f64) -> (f64, Vec<String>) {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut matched = Vec::new();

    for rule in rules.iter().filter(|r| r.matches(event)) {
        weighted += rule.score * rule.weight;
        total_weight += rule.weight;
        matched.push(rule.name.clone());
    }

    if total_weight > 0.0 {
        ((weighted / total_weight).clamp(0.0, 1.0), matched)
    } else {
        (default_score, matched)
    }
}

/// Rule table used out of the box.
pub fn default_rules() -> Vec<RuleEntry> {
    use EventType::*;
    use HomeMode::*;
    vec![
        RuleEntry::new("life_safety", &[Smoke, Fire, GlassBreak], &[], 0.95, 3.0),
        RuleEntry::new("entry_breach_unattended", &[Door, Window], &[Away, Vacation], 0.80, 2.0),
        RuleEntry::new("entry_breach_night", &[Door, Window], &[Night], 0.70, 2.0),
        RuleEntry::new("motion_unattended", &[Motion, Sound, Face], &[Away, Vacation], 0.55, 1.0),
        RuleEntry::new("motion_night", &[Motion, Sound, Face], &[Night], 0.50, 1.0),
        RuleEntry::new("occupied_activity", &[], &[Home], 0.15, 1.0),
        RuleEntry::new("visitor", &[Doorbell], &[], 0.15, 1.0),
        RuleEntry::new("benign_sources", &[Pet, Vehicle], &[], 0.10, 1.0),
    ]
}
