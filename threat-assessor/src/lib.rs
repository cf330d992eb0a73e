//! Threat Assessor - local threat assessment for household security sensors
//!
//! Turns raw sensor payloads into a threat level with a full score
//! breakdown, without leaving the home:
//!
//! - **Input gate**: size/depth/length limits and a token-bucket rate limit
//! - **Sequence analysis**: per-context event windows and chain patterns
//! - **Motion and zone analysis**: activity classification, zone risk, escalation
//! - **Evidence fusion**: weighted rules blended with a Bayesian posterior
//! - **Graceful degradation**: Full, Degraded, Minimal and Emergency modes
//! - **Audit**: hashed, bounded record of every completed assessment
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ThreatAssessor                          │
//! │                                                              │
//! │  raw ──► ┌──────┐   ┌────────┐   ┌──────────┐                │
//! │          │ Gate │──►│ Window │──►│ Sequence │──┐             │
//! │          └──────┘   └────────┘   ├──────────┤  │  ┌────────┐ │
//! │                                  │  Motion  │──┼─►│ Fusion │ │
//! │                                  ├──────────┤  │  └───┬────┘ │
//! │                                  │ Spatial  │──┘      │      │
//! │                                  └──────────┘         ▼      │
//! │  ┌─────────────┐   ┌──────────┐   ┌──────────────────────┐   │
//! │  │ Degradation │◄──│  Audit   │◄──│ Assessment (level,   │   │
//! │  │ Controller  │   └──────────┘   │ probability, detail) │   │
//! │  └─────────────┘                  └──────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> threat_assessor::Result<()> {
//! use threat_assessor::ThreatAssessor;
//!
//! let assessor = ThreatAssessor::new();
//! let raw = br#"{"type":"door","timestamp":1699970400,"zone":"back_door","home_mode":"away"}"#;
//! let assessment = assessor.assess(raw).await?;
//! println!("{} ({:.2})", assessment.threat_level, assessment.probability);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod assessor;
pub mod audit;
pub mod clock;
pub mod config;
pub mod degradation;
pub mod fusion;
pub mod gate;
pub mod provider;
pub mod types;

// Re-export main types
pub use assessor::{Assessment, AssessorBuilder, ThreatAssessor};
pub use audit::AssessmentRecord;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AssessorConfig, ConfigError};
pub use degradation::{CallOutcome, DegradationMode, HealthSnapshot};
pub use gate::GateError;
pub use provider::{InMemoryPatternProvider, NeutralProvider, PatternObservation, PatternProvider, ProviderError};
pub use types::*;
