//! Core types for the assessment pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::gate::GateError;

/// Kind of sensor event. Closed set; anything else is rejected at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Motion sensor or camera motion trigger
    Motion,
    /// Door contact opened
    Door,
    /// Window contact opened
    Window,
    /// Doorbell pressed
    Doorbell,
    /// Glass-break detector
    GlassBreak,
    /// Smoke detector
    Smoke,
    /// Fire / heat detector
    Fire,
    /// Loud or unusual sound
    Sound,
    /// Face detected by a camera
    Face,
    /// Pet detected by a camera
    Pet,
    /// Vehicle detected by a camera
    Vehicle,
}

impl EventType {
    /// All variants in canonical order.
    pub const ALL: [EventType; 11] = [
        EventType::Motion,
        EventType::Door,
        EventType::Window,
        EventType::Doorbell,
        EventType::GlassBreak,
        EventType::Smoke,
        EventType::Fire,
        EventType::Sound,
        EventType::Face,
        EventType::Pet,
        EventType::Vehicle,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Motion => "motion",
            EventType::Door => "door",
            EventType::Window => "window",
            EventType::Doorbell => "doorbell",
            EventType::GlassBreak => "glass_break",
            EventType::Smoke => "smoke",
            EventType::Fire => "fire",
            EventType::Sound => "sound",
            EventType::Face => "face",
            EventType::Pet => "pet",
            EventType::Vehicle => "vehicle",
        }
    }

    /// Parse a wire name. Exact match only.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arming mode of the household at the time of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeMode {
    /// Occupants at home and awake
    Home,
    /// Everyone out
    Away,
    /// Occupants at home, asleep
    Night,
    /// Extended absence
    Vacation,
}

impl HomeMode {
    /// All variants in canonical order.
    pub const ALL: [HomeMode; 4] = [HomeMode::Home, HomeMode::Away, HomeMode::Night, HomeMode::Vacation];

    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            HomeMode::Home => "home",
            HomeMode::Away => "away",
            HomeMode::Night => "night",
            HomeMode::Vacation => "vacation",
        }
    }

    /// Parse a wire name. Exact match only.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == value)
    }

    /// Whether the home is unattended in this mode.
    pub fn is_unattended(&self) -> bool {
        matches!(self, HomeMode::Away | HomeMode::Vacation)
    }
}

impl fmt::Display for HomeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spatial category of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneCategory {
    /// Doors, garage, anything that opens into the house
    Entry,
    /// Yard, side passages, driveway
    Perimeter,
    /// Inside the house
    Interior,
    /// Street, sidewalk, shared spaces
    Public,
}

impl ZoneCategory {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneCategory::Entry => "entry",
            ZoneCategory::Perimeter => "perimeter",
            ZoneCategory::Interior => "interior",
            ZoneCategory::Public => "public",
        }
    }
}

/// Ordinal threat classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// Nothing worth surfacing
    Low = 0,
    /// Routine activity worth logging
    Standard = 1,
    /// Suspicious, notify the household
    Elevated = 2,
    /// Act now
    Critical = 3,
}

impl ThreatLevel {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Standard => "standard",
            ThreatLevel::Elevated => "elevated",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated sensor event.
///
/// Produced only by the input gate (or test code); never mutated once it
/// has entered a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event type
    pub event_type: EventType,
    /// Epoch seconds
    pub timestamp: f64,
    /// Sensor confidence (0.0 - 1.0), if reported
    pub confidence: Option<f64>,
    /// Zone identifier
    pub zone: String,
    /// Household mode at event time
    pub home_mode: HomeMode,
    /// Activity duration in seconds, if reported
    pub duration: Option<f64>,
    /// Summary motion energy, if reported
    pub energy: Option<f64>,
    /// Raw motion magnitude samples, if reported
    pub motion_samples: Option<Vec<f64>>,
}

impl SecurityEvent {
    /// Create an event with no optional metadata.
    pub fn new(event_type: EventType, timestamp: f64, zone: impl Into<String>, home_mode: HomeMode) -> Self {
        Self {
            event_type,
            timestamp,
            confidence: None,
            zone: zone.into(),
            home_mode,
            duration: None,
            energy: None,
            motion_samples: None,
        }
    }

    /// Set sensor confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set activity duration.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set summary energy.
    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    /// Attach raw motion samples.
    pub fn with_samples(mut self, samples: Vec<f64>) -> Self {
        self.motion_samples = Some(samples);
        self
    }

    /// Confidence used as evidence strength. Sensors that do not report one
    /// are treated as certain.
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(1.0).clamp(0.0, 1.0)
    }
}

/// Top-level error type for the assessor.
#[derive(Debug, thiserror::Error)]
pub enum AssessError {
    /// Input rejected at the gate (validation or rate limit)
    #[error("Input rejected: {0}")]
    Rejected(#[from] GateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AssessError {
    /// The gate error, if this is a rejection.
    pub fn gate_error(&self) -> Option<&GateError> {
        match self {
            AssessError::Rejected(e) => Some(e),
            AssessError::Config(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssessError>;
