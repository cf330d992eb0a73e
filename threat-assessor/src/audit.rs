//! Audit recorder.
//!
//! Keeps one record per completed assessment in a fixed-capacity ring.
//! The raw payload is never stored, only its SHA-256.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::analysis::Stage;
use crate::degradation::DegradationMode;
use crate::fusion::ScoreBreakdown;
use crate::types::{EventType, HomeMode, ThreatLevel};

/// Hex SHA-256 of a raw payload.
pub fn hash_payload(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

/// One completed assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub record_id: Uuid,
    /// Hex SHA-256 of the raw payload
    pub payload_hash: String,
    pub context_id: String,
    pub recorded_at: DateTime<Utc>,
    /// Event timestamp (epoch seconds)
    pub event_timestamp: f64,
    pub event_type: EventType,
    pub home_mode: HomeMode,
    pub level: ThreatLevel,
    pub probability: f64,
    /// `None` when the pipeline was bypassed
    pub breakdown: Option<ScoreBreakdown>,
    pub mode: DegradationMode,
    pub latency_ms: f64,
    pub failed_stages: Vec<Stage>,
}

impl AssessmentRecord {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Bounded ring of assessment records, oldest first.
pub struct AuditRecorder {
    records: Arc<RwLock<VecDeque<AssessmentRecord>>>,
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Store a record, evicting the oldest past `capacity`.
    pub async fn record(&self, record: AssessmentRecord, capacity: usize) -> Uuid {
        let record_id = record.record_id;
        let mut records = self.records.write().await;
        records.push_back(record);

        while records.len() > capacity {
            if let Some(evicted) = records.pop_front() {
                trace!(record_id = %evicted.record_id, "Audit record evicted");
            }
        }

        record_id
    }

    /// Copy of every stored record, oldest first.
    pub async fn export(&self) -> Vec<AssessmentRecord> {
        let records = self.records.read().await;
        records.iter().cloned().collect()
    }

    /// Record by id.
    pub async fn get(&self, record_id: Uuid) -> Option<AssessmentRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.record_id == record_id).cloned()
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AssessmentRecord> {
        let records = self.records.read().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: ThreatLevel) -> AssessmentRecord {
        AssessmentRecord {
            record_id: Uuid::new_v4(),
            payload_hash: hash_payload(b"{}"),
            context_id: "default".into(),
            recorded_at: Utc::now(),
            event_timestamp: 0.0,
            event_type: EventType::Motion,
            home_mode: HomeMode::Away,
            level,
            probability: 0.5,
            breakdown: None,
            mode: DegradationMode::Full,
            latency_ms: 1.0,
            failed_stages: vec![],
        }
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_payload(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest() {
        let audit = AuditRecorder::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(audit.record(record(ThreatLevel::Low), 3).await);
        }
        assert_eq!(audit.len().await, 3);
        assert!(audit.get(ids[0]).await.is_none());
        assert!(audit.get(ids[1]).await.is_none());

        let exported: Vec<_> = audit.export().await.iter().map(|r| r.record_id).collect();
        assert_eq!(exported, ids[2..].to_vec());

        let recent = audit.recent(1).await;
        assert_eq!(recent[0].record_id, ids[4]);
    }

    #[tokio::test]
    async fn test_get_returns_record() {
        let audit = AuditRecorder::new();
        let id = audit.record(record(ThreatLevel::Critical), 10).await;
        let stored = audit.get(id).await.unwrap();
        assert_eq!(stored.level, ThreatLevel::Critical);
        assert!(stored.to_json().unwrap().contains("\"level\":\"critical\""));
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let audit = Arc::new(AuditRecorder::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let audit = audit.clone();
            handles.push(tokio::spawn(async move { audit.record(record(ThreatLevel::Low), 50).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(audit.len().await, 50);
    }
}
