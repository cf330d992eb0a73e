//! Motion feature classifier.
//!
//! Turns a short sequence of motion magnitudes (or a reported duration and
//! energy summary) into an activity category. Pure and total: anything it
//! cannot make sense of is classified as `unknown` with the lowest
//! confidence.

use serde::{Deserialize, Serialize};

use crate::config::MotionConfig;
use crate::types::SecurityEvent;

/// Activity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionActivity {
    PackageDrop,
    Pet,
    Loitering,
    Walking,
    Running,
    Vehicle,
    /// Not enough information to tell
    Unknown,
}

impl MotionActivity {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionActivity::PackageDrop => "package_drop",
            MotionActivity::Pet => "pet",
            MotionActivity::Loitering => "loitering",
            MotionActivity::Walking => "walking",
            MotionActivity::Running => "running",
            MotionActivity::Vehicle => "vehicle",
            MotionActivity::Unknown => "unknown",
        }
    }
}

/// Half-open range `[min, max)`; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    /// Range with both sides given.
    pub fn between(min: f64, max: f64) -> Self {
        Self { min: Some(min), max: Some(max) }
    }

    /// Range `[min, inf)`.
    pub fn at_least(min: f64) -> Self {
        Self { min: Some(min), max: None }
    }

    /// Range `(-inf, max)`.
    pub fn below(max: f64) -> Self {
        Self { min: None, max: Some(max) }
    }

    /// Whether `value` lies in the range.
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }

    fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// One row of the decision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRule {
    /// Category assigned on match
    pub activity: MotionActivity,
    /// Duration range (seconds)
    #[serde(default)]
    pub duration: Bounds,
    /// RMS energy range
    #[serde(default)]
    pub energy: Bounds,
    /// Sample variance range; ignored when variance is unknown
    #[serde(default)]
    pub variance: Bounds,
    /// Base confidence
    pub confidence: f64,
}

impl MotionRule {
    fn new(activity: MotionActivity, duration: Bounds, energy: Bounds, variance: Bounds, confidence: f64) -> Self {
        Self {
            activity,
            duration,
            energy,
            variance,
            confidence,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("motion rule {}: confidence must be within 0..1", self.activity.as_str()));
        }
        if self.activity == MotionActivity::Unknown {
            return Err("motion rules cannot assign the unknown category".to_string());
        }
        for bounds in [self.duration, self.energy, self.variance] {
            if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
                if !(min < max) {
                    return Err(format!("motion rule {}: empty range", self.activity.as_str()));
                }
            }
        }
        Ok(())
    }

    /// Whether the features fall in this row.
    pub fn matches(&self, features: &MotionFeatures) -> bool {
        let variance_ok = match features.variance {
            Some(v) => self.variance.contains(v),
            None => true,
        };
        self.duration.contains(features.duration_secs) && self.energy.contains(features.energy) && variance_ok
    }

    fn uses_variance(&self) -> bool {
        !self.variance.is_unbounded()
    }
}

/// The default decision table. Order matters.
pub fn default_rules() -> Vec<MotionRule> {
    use MotionActivity::*;
    vec![
        MotionRule::new(Vehicle, Bounds::at_least(5.0), Bounds::at_least(0.8), Bounds::below(0.05), 0.7),
        MotionRule::new(Running, Bounds::below(20.0), Bounds::at_least(0.6), Bounds::at_least(0.05), 0.7),
        MotionRule::new(PackageDrop, Bounds::between(2.0, 15.0), Bounds::between(0.2, 0.6), Bounds::at_least(0.02), 0.75),
        MotionRule::new(Pet, Bounds::below(60.0), Bounds::below(0.2), Bounds::default(), 0.65),
        MotionRule::new(Loitering, Bounds::at_least(30.0), Bounds::between(0.1, 0.5), Bounds::default(), 0.7),
        MotionRule::new(Walking, Bounds::between(2.0, 30.0), Bounds::between(0.2, 0.6), Bounds::default(), 0.6),
    ]
}

/// Features extracted from one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    /// Activity duration (seconds)
    pub duration_secs: f64,
    /// RMS energy
    pub energy: f64,
    /// Sample variance; `None` for summaries
    pub variance: Option<f64>,
    /// L2 norm of the samples; `None` for summaries
    pub norm: Option<f64>,
    /// Number of samples used
    pub sample_count: usize,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionAssessment {
    pub activity: MotionActivity,
    /// Confidence (0.0 - 1.0)
    pub confidence: f64,
    pub features: Option<MotionFeatures>,
}

impl MotionAssessment {
    fn unknown(config: &MotionConfig) -> Self {
        Self {
            activity: MotionActivity::Unknown,
            confidence: config.unknown_confidence,
            features: None,
        }
    }
}

/// What the classifier is given.
#[derive(Debug, Clone, Copy)]
pub enum MotionInput<'a> {
    /// Raw magnitudes, optionally with a reported duration
    Samples { samples: &'a [f64], duration: Option<f64> },
    /// Reported summary only
    Summary { duration: Option<f64>, energy: Option<f64> },
}

/// Classify an input against the decision table.
pub fn classify(input: MotionInput<'_>, config: &MotionConfig) -> MotionAssessment {
    let (features, quality) = match input {
        MotionInput::Samples { samples, duration } => {
            if samples.is_empty() || samples.iter().any(|s| !s.is_finite()) {
                return MotionAssessment::unknown(config);
            }
            let features = sample_features(samples, duration, config.sample_rate_hz);
            let quality = (samples.len() as f64 / config.full_quality_samples as f64).min(1.0);
            (features, quality)
        }
        MotionInput::Summary {
            duration: Some(duration),
            energy: Some(energy),
        } => {
            let features = MotionFeatures {
                duration_secs: duration,
                energy,
                variance: None,
                norm: None,
                sample_count: 0,
            };
            (features, config.summary_confidence_factor)
        }
        MotionInput::Summary { .. } => return MotionAssessment::unknown(config),
    };

    if !features.duration_secs.is_finite() || !features.energy.is_finite() {
        return MotionAssessment::unknown(config);
    }

    match config.rules.iter().find(|rule| rule.matches(&features)) {
        Some(rule) => {
            // A summary can satisfy a variance-constrained row only loosely.
            let loose = features.variance.is_none() && rule.uses_variance();
            let penalty = if loose { 0.9 } else { 1.0 };
            MotionAssessment {
                activity: rule.activity,
                confidence: (rule.confidence * quality * penalty).clamp(0.0, 1.0),
                features: Some(features),
            }
        }
        None => MotionAssessment {
            features: Some(features),
            ..MotionAssessment::unknown(config)
        },
    }
}

/// Classify an event. With `use_samples` false only the summary is read.
pub fn classify_event(event: &SecurityEvent, config: &MotionConfig, use_samples: bool) -> MotionAssessment {
    let samples = event
        .motion_samples
        .as_deref()
        .filter(|samples| use_samples && !samples.is_empty());

    let input = match samples {
        Some(samples) => MotionInput::Samples {
            samples,
            duration: event.duration,
        },
        None => MotionInput::Summary {
            duration: event.duration,
            energy: event.energy,
        },
    };

    let mut assessment = classify(input, config);
    if assessment.activity != MotionActivity::Unknown {
        assessment.confidence *= event.effective_confidence();
    }
    assessment
}

fn sample_features(samples: &[f64], duration: Option<f64>, sample_rate_hz: f64) -> MotionFeatures {
    let n = samples.len() as f64;
    let norm = stable_norm(samples);
    MotionFeatures {
        duration_secs: duration.unwrap_or(n / sample_rate_hz),
        energy: norm / n.sqrt(),
        variance: Some(variance(samples)),
        norm: Some(norm),
        sample_count: samples.len(),
    }
}

/// L2 norm, scaled by the largest magnitude so squares cannot overflow.
pub fn stable_norm(samples: &[f64]) -> f64 {
    let scale = samples.iter().fold(0.0_f64, |max, x| max.max(x.abs()));
    if scale == 0.0 {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|x| {
            let r = x / scale;
            r * r
        })
        .sum();
    scale * sum.sqrt()
}

/// Population variance (Welford).
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &x) in samples.iter().enumerate() {
        let delta = x - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (x - mean);
    }
    (m2 / samples.len() as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, HomeMode};

    fn config() -> MotionConfig {
        MotionConfig::default()
    }

    fn samples(values: &[f64], n: usize) -> Vec<f64> {
        values.iter().copied().cycle().take(n).collect()
    }

    #[test]
    fn test_stable_norm_large_values() {
        let big = vec![1e200, 1e200];
        let norm = stable_norm(&big);
        assert!(norm.is_finite());
        assert!((norm / 1e200 - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(stable_norm(&[0.0, 0.0]), 0.0);
        assert!((stable_norm(&[3.0, -4.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance() {
        assert!((variance(&[0.4, 1.0]) - 0.09).abs() < 1e-12);
        assert_eq!(variance(&[0.5; 10]), 0.0);
    }

    #[test]
    fn test_classify_from_samples() {
        let c = config();
        let cases = [
            (samples(&[0.9], 100), MotionActivity::Vehicle),
            (samples(&[0.4, 1.0], 50), MotionActivity::Running),
            (samples(&[0.1], 30), MotionActivity::Pet),
            (samples(&[0.4], 100), MotionActivity::Walking),
            (samples(&[0.3], 400), MotionActivity::Loitering),
            (samples(&[0.2, 0.6], 60), MotionActivity::PackageDrop),
        ];
        for (s, expected) in cases {
            let result = classify(MotionInput::Samples { samples: &s, duration: None }, &c);
            assert_eq!(result.activity, expected, "samples {:?}", &s[..2]);
            assert!(result.confidence > 0.5);
        }
    }

    #[test]
    fn test_summary_only() {
        let result = classify(
            MotionInput::Summary {
                duration: Some(8.0),
                energy: Some(0.4),
            },
            &config(),
        );
        assert_eq!(result.activity, MotionActivity::PackageDrop);
        assert!((result.confidence - 0.75 * 0.8 * 0.9).abs() < 1e-12);
        assert!(result.features.unwrap().variance.is_none());
    }

    #[test]
    fn test_partial_metadata_is_unknown() {
        let c = config();
        for input in [
            MotionInput::Summary { duration: Some(8.0), energy: None },
            MotionInput::Summary { duration: None, energy: Some(0.3) },
            MotionInput::Summary { duration: None, energy: None },
            MotionInput::Samples { samples: &[], duration: None },
            MotionInput::Samples { samples: &[0.2, f64::NAN], duration: None },
        ] {
            let result = classify(input, &c);
            assert_eq!(result.activity, MotionActivity::Unknown);
            assert_eq!(result.confidence, c.unknown_confidence);
        }
    }

    #[test]
    fn test_few_samples_lower_confidence() {
        let c = config();
        let few = classify(MotionInput::Samples { samples: &[0.9; 4], duration: Some(10.0) }, &c);
        let many = classify(MotionInput::Samples { samples: &[0.9; 40], duration: Some(10.0) }, &c);
        assert_eq!(few.activity, MotionActivity::Vehicle);
        assert!((few.confidence - 0.35).abs() < 1e-12);
        assert!((many.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_classify_event_without_samples() {
        let c = config();
        let event = SecurityEvent::new(EventType::Motion, 0.0, "driveway", HomeMode::Home)
            .with_samples(vec![0.9; 100])
            .with_duration(8.0)
            .with_energy(0.4);

        assert_eq!(classify_event(&event, &c, true).activity, MotionActivity::Vehicle);
        assert_eq!(classify_event(&event, &c, false).activity, MotionActivity::PackageDrop);
    }
}
