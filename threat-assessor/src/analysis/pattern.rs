//! Chain patterns: ordered, timing-constrained event sub-sequences.
//!
//! Each pattern is matched in one pass per step over the window, so a
//! full evaluation costs `O(window_len * total_steps)`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::types::{EventType, SecurityEvent};

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    /// Accepted event types
    pub event_types: Vec<EventType>,
    /// Minimum gap after the previous step (seconds); ignored on the first step
    #[serde(default)]
    pub min_gap_secs: f64,
    /// Maximum gap after the previous step (seconds); ignored on the first step
    #[serde(default = "default_max_gap")]
    pub max_gap_secs: f64,
}

fn default_max_gap() -> f64 {
    f64::MAX
}

impl ChainStep {
    pub fn first(event_types: &[EventType]) -> Self {
        Self {
            event_types: event_types.to_vec(),
            min_gap_secs: 0.0,
            max_gap_secs: f64::MAX,
        }
    }

    pub fn then(event_types: &[EventType], min_gap_secs: f64, max_gap_secs: f64) -> Self {
        Self {
            event_types: event_types.to_vec(),
            min_gap_secs,
            max_gap_secs,
        }
    }

    fn accepts(&self, event: &SecurityEvent) -> bool {
        self.event_types.contains(&event.event_type)
    }
}

/// A named chain and its effect on the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPattern {
    pub name: String,
    pub steps: Vec<ChainStep>,
    /// Seconds of silence required after the last step
    #[serde(default)]
    pub quiet_after_secs: Option<f64>,
    /// Added to the score, scaled by match confidence
    pub threat_delta: f64,
    /// Pattern confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Higher wins when several patterns match
    pub priority: i32,
    /// Weight name reported to the pattern provider on match
    #[serde(default)]
    pub learning_key: Option<String>,
}

impl ChainPattern {
    pub(crate) fn validate(&self) -> Result<(), String> {
        let name = &self.name;
        if name.is_empty() {
            return Err("patterns: empty chain name".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("patterns.{}: at least one step is required", name));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.event_types.is_empty() {
                return Err(format!("patterns.{}: step {} accepts no event type", name, i));
            }
            let gaps_ok = step.min_gap_secs.is_finite()
                && step.min_gap_secs >= 0.0
                && step.max_gap_secs >= step.min_gap_secs;
            if !gaps_ok {
                return Err(format!("patterns.{}: step {} has an invalid gap range", name, i));
            }
        }
        if let Some(quiet) = self.quiet_after_secs {
            if !quiet.is_finite() || quiet < 0.0 {
                return Err(format!("patterns.{}: quiet_after_secs must be non-negative", name));
            }
        }
        if !self.threat_delta.is_finite() || self.threat_delta.abs() > 1.0 {
            return Err(format!("patterns.{}: threat_delta must be within -1..1", name));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("patterns.{}: confidence must be within 0..1", name));
        }
        Ok(())
    }

    /// Match against `window` (oldest first) as of `now`. Returns the match
    /// confidence if the chain is present.
    pub fn evaluate(&self, window: &[SecurityEvent], now: f64) -> Option<f64> {
        let strength = best_chain_strength(&self.steps, window)?;

        let last = match self.quiet_after_secs {
            // The last step must be the newest event, followed by silence
            Some(quiet) => {
                let idx = window.len().checked_sub(1)?;
                let s = strength[idx]?;
                if now - window[idx].timestamp < quiet {
                    return None;
                }
                s
            }
            None => strength.iter().flatten().copied().fold(None, |best: Option<f64>, s| {
                Some(best.map_or(s, |b| b.max(s)))
            })?,
        };

        Some((self.confidence * last).clamp(0.0, 1.0))
    }
}

/// For each event, the strongest chain through all steps ending there.
/// Chain strength is the weakest event confidence along it.
fn best_chain_strength(steps: &[ChainStep], window: &[SecurityEvent]) -> Option<Vec<Option<f64>>> {
    let (first, rest) = steps.split_first()?;
    let mut current: Vec<Option<f64>> = window
        .iter()
        .map(|e| first.accepts(e).then(|| e.effective_confidence()))
        .collect();

    for step in rest {
        let mut next = vec![None; window.len()];
        // Candidates k with ts[i] - max_gap <= ts[k] <= ts[i] - min_gap, k < i.
        // Both ends move forward monotonically as i grows.
        let mut lo = 0usize;
        let mut hi = 0usize;
        let mut maxq: VecDeque<usize> = VecDeque::new();

        for (i, event) in window.iter().enumerate() {
            let ts = event.timestamp;
            while hi < i && window[hi].timestamp <= ts - step.min_gap_secs {
                if let Some(s) = current[hi] {
                    while maxq.back().is_some_and(|&b| current[b].unwrap_or(f64::MIN) <= s) {
                        maxq.pop_back();
                    }
                    maxq.push_back(hi);
                }
                hi += 1;
            }
            while lo < hi && window[lo].timestamp < ts - step.max_gap_secs {
                lo += 1;
            }
            while maxq.front().is_some_and(|&f| f < lo) {
                maxq.pop_front();
            }

            if step.accepts(event) {
                if let Some(&best) = maxq.front() {
                    next[i] = current[best].map(|s| s.min(event.effective_confidence()));
                }
            }
        }
        current = next;
    }

    Some(current)
}

/// A pattern that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMatch {
    pub pattern: String,
    pub threat_delta: f64,
    /// Match confidence (0.0 - 1.0)
    pub confidence: f64,
    pub priority: i32,
    pub learning_key: Option<String>,
}

impl ChainMatch {
    /// Score contribution: delta scaled by confidence.
    pub fn weighted_delta(&self) -> f64 {
        self.threat_delta * self.confidence
    }
}

/// Evaluate every pattern and pick the winner: highest priority, then
/// largest absolute delta, then name.
pub fn best_match(patterns: &[ChainPattern], window: &[SecurityEvent], now: f64) -> Option<ChainMatch> {
    patterns
        .iter()
        .filter_map(|p| {
            p.evaluate(window, now).map(|confidence| ChainMatch {
                pattern: p.name.clone(),
                threat_delta: p.threat_delta,
                confidence,
                priority: p.priority,
                learning_key: p.learning_key.clone(),
            })
        })
        .min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.threat_delta.abs().partial_cmp(&a.threat_delta.abs()).unwrap_or(Ordering::Equal))
                .then_with(|| a.pattern.cmp(&b.pattern))
        })
}

/// Patterns known out of the box.
pub fn default_patterns() -> Vec<ChainPattern> {
    use EventType::*;
    vec![
        ChainPattern {
            name: "package_delivery".to_string(),
            steps: vec![ChainStep::first(&[Doorbell]), ChainStep::then(&[Motion], 2.0, 30.0)],
            quiet_after_secs: Some(20.0),
            threat_delta: -0.25,
            confidence: 0.85,
            priority: 10,
            learning_key: Some("delivery_frequency".to_string()),
        },
        ChainPattern {
            name: "forced_entry".to_string(),
            steps: vec![ChainStep::first(&[GlassBreak]), ChainStep::then(&[Motion], 0.0, 120.0)],
            quiet_after_secs: None,
            threat_delta: 0.4,
            confidence: 0.9,
            priority: 100,
            learning_key: None,
        },
        ChainPattern {
            name: "intrusion".to_string(),
            steps: vec![ChainStep::first(&[Door, Window]), ChainStep::then(&[Motion], 0.0, 60.0)],
            quiet_after_secs: None,
            threat_delta: 0.3,
            confidence: 0.75,
            priority: 50,
            learning_key: None,
        },
    ]
}
