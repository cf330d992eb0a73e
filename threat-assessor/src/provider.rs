//! User-pattern provider.
//!
//! The assessor reads named adjustment weights from the provider before
//! fusion and reports each assessment back so the provider can learn the
//! household's routine. Storage is the provider's business; the assessor
//! works the same with no provider at all.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{EventType, ThreatLevel};

/// Provider failures. The assessor treats every one as "no weights".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider storage error: {0}")]
    Storage(String),
}

/// What the assessor reports after each assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub event_type: EventType,
    pub zone: String,
    /// Event timestamp (epoch seconds)
    pub timestamp: f64,
    /// Matched chain pattern, if any
    pub chain: Option<String>,
    /// Weight name the matched chain feeds
    pub learning_key: Option<String>,
    pub level: ThreatLevel,
}

/// Read/write capability for household patterns.
#[async_trait]
pub trait PatternProvider: Send + Sync {
    /// Named weights (0.0 - 1.0) for a context.
    async fn weights(&self, context_id: &str) -> Result<HashMap<String, f64>, ProviderError>;

    /// Learn from one assessment.
    async fn record(&self, context_id: &str, observation: &PatternObservation) -> Result<(), ProviderError>;
}

/// Provider with no opinion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralProvider;

#[async_trait]
impl PatternProvider for NeutralProvider {
    async fn weights(&self, _context_id: &str) -> Result<HashMap<String, f64>, ProviderError> {
        Ok(HashMap::new())
    }

    async fn record(&self, _context_id: &str, _observation: &PatternObservation) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Counts chain matches per context in memory.
///
/// A key seen `n` times gets weight `n / (n + prior_count)`, so a single
/// delivery barely registers and a daily routine approaches 1.
pub struct InMemoryPatternProvider {
    counts: DashMap<(String, String), u64>,
    prior_count: f64,
}

impl Default for InMemoryPatternProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPatternProvider {
    pub fn new() -> Self {
        Self::with_prior(4.0)
    }

    /// Create with a custom pseudo-count.
    pub fn with_prior(prior_count: f64) -> Self {
        Self {
            counts: DashMap::new(),
            prior_count: prior_count.max(f64::MIN_POSITIVE),
        }
    }

    /// Raw count for a key.
    pub fn count(&self, context_id: &str, key: &str) -> u64 {
        self.counts
            .get(&(context_id.to_string(), key.to_string()))
            .map(|c| *c.value())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PatternProvider for InMemoryPatternProvider {
    async fn weights(&self, context_id: &str) -> Result<HashMap<String, f64>, ProviderError> {
        Ok(self
            .counts
            .iter()
            .filter(|entry| entry.key().0 == context_id)
            .map(|entry| {
                let n = *entry.value() as f64;
                (entry.key().1.clone(), n / (n + self.prior_count))
            })
            .collect())
    }

    async fn record(&self, context_id: &str, observation: &PatternObservation) -> Result<(), ProviderError> {
        if let Some(key) = &observation.learning_key {
            *self
                .counts
                .entry((context_id.to_string(), key.clone()))
                .or_insert(0) += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> PatternObservation {
        PatternObservation {
            event_type: EventType::Motion,
            zone: "front_door".into(),
            timestamp: 0.0,
            chain: Some("package_delivery".into()),
            learning_key: Some("delivery_frequency".into()),
            level: ThreatLevel::Low,
        }
    }

    #[tokio::test]
    async fn test_neutral_provider() {
        let provider = NeutralProvider;
        assert!(provider.weights("x").await.unwrap().is_empty());
        assert!(provider.record("x", &delivery()).await.is_ok());
    }

    #[tokio::test]
    async fn test_frequency_grows_with_observations() {
        let provider = InMemoryPatternProvider::new();
        assert!(provider.weights("home").await.unwrap().is_empty());

        for _ in 0..4 {
            provider.record("home", &delivery()).await.unwrap();
        }
        let weights = provider.weights("home").await.unwrap();
        assert_eq!(weights.get("delivery_frequency"), Some(&0.5));

        for _ in 0..12 {
            provider.record("home", &delivery()).await.unwrap();
        }
        let weights = provider.weights("home").await.unwrap();
        assert_eq!(weights.get("delivery_frequency"), Some(&0.8));
        assert_eq!(provider.count("home", "delivery_frequency"), 16);

        // Other contexts are unaffected
        assert!(provider.weights("cabin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observation_without_key_is_ignored() {
        let provider = InMemoryPatternProvider::new();
        let mut obs = delivery();
        obs.learning_key = None;
        provider.record("home", &obs).await.unwrap();
        assert_eq!(provider.count("home", "delivery_frequency"), 0);
    }
}
