//! Input Gate - validation and admission control.
//!
//! Every raw payload passes through [`InputGate::admit`] before it can touch
//! shared state. Checks run cheapest first:
//!
//! 1. Payload size
//! 2. Nesting depth (byte scan, no allocation)
//! 3. JSON syntax
//! 4. String and collection limits
//! 5. Typed field extraction (enumerations, ranges, unknown fields)
//! 6. Token bucket
//!
//! Malformed input is rejected before the limiter, so it never spends a token.

pub mod limiter;
pub mod payload;

pub use limiter::{BucketLimits, TokenBucket};
pub use payload::ParsedPayload;

use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::GateConfig;

/// Reasons an input is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Nesting too deep: depth {depth} (max {max})")]
    NestingTooDeep { depth: usize, max: usize },

    #[error("Field too long: {field} has {len} elements (max {max})")]
    FieldTooLong { field: String, len: usize, max: usize },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl GateError {
    /// Stable reason code for host bridges.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GateError::NestingTooDeep { .. } => "NESTING_TOO_DEEP",
            GateError::FieldTooLong { .. } => "FIELD_TOO_LONG",
            GateError::MissingField(_) => "MISSING_FIELD",
            GateError::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            GateError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
        }
    }

    /// Whether the input itself was malformed.
    pub fn is_validation(&self) -> bool {
        !self.is_rate_limited()
    }

    /// Whether the input was refused only for lack of tokens.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GateError::RateLimited { .. })
    }
}

/// Validates raw payloads and meters admission.
pub struct InputGate {
    bucket: TokenBucket,
}

impl InputGate {
    /// Create a gate whose limiter reads time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: TokenBucket::new(clock),
        }
    }

    /// Validate `raw` against `config` and take one token.
    pub async fn admit(&self, raw: &[u8], config: &GateConfig) -> Result<ParsedPayload, GateError> {
        let parsed = payload::parse(raw, config).map_err(|e| {
            warn!(code = e.code(), error = %e, "Payload rejected");
            e
        })?;

        let limits = BucketLimits {
            capacity: config.rate_capacity,
            refill_per_sec: config.rate_refill_per_sec,
        };
        if let Err(retry_after) = self.bucket.try_acquire(limits).await {
            let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
            debug!(retry_after_ms, "Rate limit exceeded");
            return Err(GateError::RateLimited { retry_after_ms });
        }

        Ok(parsed)
    }

    /// Tokens currently available under `config`.
    pub async fn available_tokens(&self, config: &GateConfig) -> f64 {
        self.bucket
            .available(BucketLimits {
                capacity: config.rate_capacity,
                refill_per_sec: config.rate_refill_per_sec,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    const VALID: &[u8] = br#"{"type":"door","timestamp":1700000000,"zone":"front_door","home_mode":"away"}"#;

    fn gate_config(capacity: u32) -> GateConfig {
        GateConfig {
            rate_capacity: capacity,
            rate_refill_per_sec: 1.0,
            ..GateConfig::default()
        }
    }

    #[tokio::test]
    async fn test_capacity_plus_one() {
        let clock = Arc::new(ManualClock::new());
        let gate = InputGate::new(clock.clone());
        let config = gate_config(5);

        for _ in 0..5 {
            assert!(gate.admit(VALID, &config).await.is_ok());
        }
        let err = gate.admit(VALID, &config).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(err, GateError::RateLimited { retry_after_ms: 1000 });

        clock.advance(Duration::from_secs(1));
        assert!(gate.admit(VALID, &config).await.is_ok());
        assert!(gate.admit(VALID, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_spends_no_token() {
        let gate = InputGate::new(Arc::new(ManualClock::new()));
        let config = gate_config(1);

        for _ in 0..10 {
            let err = gate.admit(b"{\"type\":", &config).await.unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(gate.available_tokens(&config).await, 1.0);
        assert!(gate.admit(VALID, &config).await.is_ok());
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            GateError::PayloadTooLarge { size: 1, max: 0 },
            GateError::NestingTooDeep { depth: 1, max: 0 },
            GateError::FieldTooLong { field: "zone".into(), len: 1, max: 0 },
            GateError::MissingField("type".into()),
            GateError::InvalidFieldValue { field: "type".into(), reason: "x".into() },
            GateError::RateLimited { retry_after_ms: 1 },
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
