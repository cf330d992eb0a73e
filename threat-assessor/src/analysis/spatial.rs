//! Spatial risk scorer.
//!
//! Looks up the zone of an event, adjusts its base risk for the household
//! mode, and scans the window for activity moving toward the house.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::config::SpatialConfig;
use crate::types::{HomeMode, SecurityEvent, ZoneCategory};

/// A configured zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProfile {
    /// Zone identifier as sent by sensors
    pub id: String,
    /// Base risk (0.0 - 1.0)
    pub base_risk: f64,
    pub category: ZoneCategory,
}

impl ZoneProfile {
    pub fn new(id: impl Into<String>, base_risk: f64, category: ZoneCategory) -> Self {
        Self {
            id: id.into(),
            base_risk,
            category,
        }
    }
}

/// Zones known out of the box.
pub fn default_zones() -> Vec<ZoneProfile> {
    use ZoneCategory::*;
    vec![
        ZoneProfile::new("front_door", 0.6, Entry),
        ZoneProfile::new("back_door", 0.65, Entry),
        ZoneProfile::new("garage", 0.55, Entry),
        ZoneProfile::new("backyard", 0.45, Perimeter),
        ZoneProfile::new("side_yard", 0.5, Perimeter),
        ZoneProfile::new("driveway", 0.35, Perimeter),
        ZoneProfile::new("living_room", 0.4, Interior),
        ZoneProfile::new("hallway", 0.45, Interior),
        ZoneProfile::new("bedroom", 0.5, Interior),
        ZoneProfile::new("sidewalk", 0.15, Public),
        ZoneProfile::new("street", 0.1, Public),
    ]
}

/// Risk factor per zone category for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryFactors {
    pub entry: f64,
    pub perimeter: f64,
    pub interior: f64,
    pub public: f64,
}

impl Default for CategoryFactors {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

impl CategoryFactors {
    fn new(entry: f64, perimeter: f64, interior: f64) -> Self {
        Self {
            entry,
            perimeter,
            interior,
            public: 1.0,
        }
    }

    /// Factor for a category.
    pub fn get(&self, category: ZoneCategory) -> f64 {
        match category {
            ZoneCategory::Entry => self.entry,
            ZoneCategory::Perimeter => self.perimeter,
            ZoneCategory::Interior => self.interior,
            ZoneCategory::Public => self.public,
        }
    }

    fn all(&self) -> [f64; 4] {
        [self.entry, self.perimeter, self.interior, self.public]
    }
}

/// Risk factors per home mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeFactors {
    pub home: CategoryFactors,
    pub away: CategoryFactors,
    pub night: CategoryFactors,
    pub vacation: CategoryFactors,
}

impl Default for ModeFactors {
    fn default() -> Self {
        Self {
            // Occupants moving around inside is expected
            home: CategoryFactors::new(0.8, 0.9, 0.5),
            away: CategoryFactors::new(1.25, 1.1, 1.3),
            night: CategoryFactors::new(1.2, 1.15, 0.7),
            vacation: CategoryFactors::new(1.3, 1.2, 1.4),
        }
    }
}

impl ModeFactors {
    /// Factors for a mode.
    pub fn get(&self, mode: HomeMode) -> &CategoryFactors {
        match mode {
            HomeMode::Home => &self.home,
            HomeMode::Away => &self.away,
            HomeMode::Night => &self.night,
            HomeMode::Vacation => &self.vacation,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for mode in HomeMode::ALL {
            if self.get(mode).all().iter().any(|f| !f.is_finite() || *f < 0.0) {
                return Err(format!("spatial.mode_factors.{}: factors must be non-negative", mode.as_str()));
            }
        }
        Ok(())
    }
}

/// Escalation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Perimeter activity followed by an entry point
    PerimeterToEntry,
    /// Entry point followed by the interior
    EntryToInterior,
    /// Two or more distinct perimeter zones
    MultiZonePerimeter,
}

impl Escalation {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Escalation::PerimeterToEntry => "perimeter_to_entry",
            Escalation::EntryToInterior => "entry_to_interior",
            Escalation::MultiZonePerimeter => "multi_zone_perimeter",
        }
    }
}

/// Multiplier per escalation kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationMultipliers {
    pub perimeter_to_entry: f64,
    pub entry_to_interior: f64,
    pub multi_zone_perimeter: f64,
}

impl Default for EscalationMultipliers {
    fn default() -> Self {
        Self {
            perimeter_to_entry: 1.3,
            entry_to_interior: 1.5,
            multi_zone_perimeter: 1.2,
        }
    }
}

impl EscalationMultipliers {
    pub fn get(&self, escalation: Escalation) -> f64 {
        match escalation {
            Escalation::PerimeterToEntry => self.perimeter_to_entry,
            Escalation::EntryToInterior => self.entry_to_interior,
            Escalation::MultiZonePerimeter => self.multi_zone_perimeter,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for m in [self.perimeter_to_entry, self.entry_to_interior, self.multi_zone_perimeter] {
            if !m.is_finite() || m < 1.0 {
                return Err("spatial.escalation multipliers must be at least 1.0".to_string());
            }
        }
        Ok(())
    }
}

/// Spatial scorer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAssessment {
    pub zone: String,
    /// `None` for zones missing from the table
    pub category: Option<ZoneCategory>,
    pub base_risk: f64,
    /// Mode-adjusted risk (0.0 - 1.0)
    pub risk: f64,
    /// Strongest escalation seen in the window
    pub escalation: Option<Escalation>,
    /// Multiplier for `escalation`, 1.0 if none
    pub escalation_multiplier: f64,
}

/// Score `zone` under `mode` given the window (oldest first).
pub fn score(zone: &str, mode: HomeMode, window: &[SecurityEvent], config: &SpatialConfig) -> ZoneAssessment {
    let profile = lookup(zone, config);
    let (base_risk, category) = match profile {
        Some(p) => (p.base_risk, Some(p.category)),
        None => (config.unknown_zone_risk, None),
    };

    let factor = category.map_or(1.0, |c| config.mode_factors.get(mode).get(c));
    let risk = (base_risk * factor).clamp(0.0, 1.0);

    let escalation = detect_escalation(window, config);
    let escalation_multiplier = escalation.map_or(1.0, |e| config.escalation.get(e));
    if let Some(e) = escalation {
        debug!(zone = %zone, escalation = e.as_str(), multiplier = escalation_multiplier, "Zone escalation");
    }

    ZoneAssessment {
        zone: zone.to_string(),
        category,
        base_risk,
        risk,
        escalation,
        escalation_multiplier,
    }
}

fn lookup<'a>(zone: &str, config: &'a SpatialConfig) -> Option<&'a ZoneProfile> {
    config.zones.iter().find(|p| p.id == zone)
}

/// Strongest escalation in the window. Ties go to the earlier-declared kind.
pub fn detect_escalation(window: &[SecurityEvent], config: &SpatialConfig) -> Option<Escalation> {
    let mut seen_perimeter = false;
    let mut seen_entry = false;
    let mut perimeter_zones: HashSet<&str> = HashSet::new();
    let mut found: Vec<Escalation> = Vec::new();

    for event in window {
        let Some(profile) = lookup(&event.zone, config) else {
            continue;
        };
        match profile.category {
            ZoneCategory::Perimeter => {
                seen_perimeter = true;
                perimeter_zones.insert(profile.id.as_str());
            }
            ZoneCategory::Entry => {
                if seen_perimeter {
                    found.push(Escalation::PerimeterToEntry);
                }
                seen_entry = true;
            }
            ZoneCategory::Interior => {
                if seen_entry {
                    found.push(Escalation::EntryToInterior);
                }
            }
            ZoneCategory::Public => {}
        }
    }
    if perimeter_zones.len() >= 2 {
        found.push(Escalation::MultiZonePerimeter);
    }

    let mut best: Option<Escalation> = None;
    for candidate in found {
        let stronger = match best {
            None => true,
            Some(current) => config.escalation.get(candidate) > config.escalation.get(current),
        };
        if stronger {
            best = Some(candidate);
        }
    }
    best
}
