//! Time-of-day, weekday and home-mode adjustments.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::TemporalConfig;
use crate::types::{HomeMode, SecurityEvent, ZoneCategory};

/// Household-local view of an event timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalContext {
    /// Local hour (0 - 23)
    pub local_hour: u32,
    /// Day of week, Monday = 1
    pub weekday: u32,
    pub is_weekend: bool,
    pub is_night: bool,
    pub is_daytime: bool,
    pub in_delivery_hours: bool,
}

impl TemporalContext {
    /// Derive the local context of an epoch timestamp. `None` if the
    /// timestamp or offset cannot be represented.
    pub fn from_timestamp(timestamp: f64, config: &TemporalConfig) -> Option<Self> {
        if !timestamp.is_finite() {
            return None;
        }
        let offset = FixedOffset::east_opt(config.utc_offset_minutes.checked_mul(60)?)?;
        let utc = DateTime::from_timestamp(timestamp.floor() as i64, 0)?;
        let local = utc.with_timezone(&offset);

        let hour = local.hour();
        let weekday = local.weekday();
        Some(Self {
            local_hour: hour,
            weekday: weekday.number_from_monday(),
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
            is_night: in_hours(hour, config.night_start_hour, config.night_end_hour),
            is_daytime: in_hours(hour, config.day_start_hour, config.day_end_hour),
            in_delivery_hours: in_hours(hour, config.delivery_start_hour, config.delivery_end_hour),
        })
    }
}

/// `[start, end)` on a 24h clock; wraps past midnight when `start > end`.
fn in_hours(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Combined temporal multiplier and the adjustments that made it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAdjustment {
    pub multiplier: f64,
    pub applied: Vec<String>,
}

/// Multiplier for `event`. Without a local context only the mode applies.
pub fn adjustment(
    context: Option<&TemporalContext>,
    event: &SecurityEvent,
    zone_category: Option<ZoneCategory>,
    config: &TemporalConfig,
) -> TemporalAdjustment {
    let mut multiplier = 1.0;
    let mut applied = Vec::new();
    let mut apply = |name: &str, factor: f64| {
        multiplier *= factor;
        applied.push(name.to_string());
    };

    if let Some(ctx) = context {
        if ctx.is_night {
            apply("night", config.night_multiplier);
        }
        if ctx.is_daytime {
            apply("daytime", config.day_multiplier);
        }
        if ctx.is_weekend {
            apply("weekend", config.weekend_multiplier);
        }
        let delivery_like = config.delivery_event_types.contains(&event.event_type)
            && zone_category.is_some_and(|c| config.delivery_zone_categories.contains(&c));
        if ctx.in_delivery_hours && delivery_like {
            apply("delivery_window", config.delivery_multiplier);
        }
    }

    let modes = &config.mode_multipliers;
    let mode_factor = match event.home_mode {
        HomeMode::Home => modes.home,
        HomeMode::Away => modes.away,
        HomeMode::Night => modes.night,
        HomeMode::Vacation => modes.vacation,
    };
    apply(event.home_mode.as_str(), mode_factor);

    TemporalAdjustment { multiplier, applied }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    /// Tuesday 2023-11-14 14:00:00 UTC
    const TUESDAY_2PM: f64 = 1_699_970_400.0;
    const HOUR: f64 = 3600.0;

    #[test]
    fn test_local_context() {
        let config = TemporalConfig::default();
        let ctx = TemporalContext::from_timestamp(TUESDAY_2PM, &config).unwrap();
        assert_eq!(ctx.local_hour, 14);
        assert_eq!(ctx.weekday, 2);
        assert!(ctx.is_daytime && ctx.in_delivery_hours);
        assert!(!ctx.is_night && !ctx.is_weekend);

        let late = TemporalContext::from_timestamp(TUESDAY_2PM + 9.0 * HOUR, &config).unwrap();
        assert_eq!(late.local_hour, 23);
        assert!(late.is_night);
        let early = TemporalContext::from_timestamp(TUESDAY_2PM + 13.0 * HOUR, &config).unwrap();
        assert_eq!(early.local_hour, 3);
        assert!(early.is_night);
    }

    #[test]
    fn test_utc_offset() {
        let config = TemporalConfig {
            utc_offset_minutes: -300,
            ..TemporalConfig::default()
        };
        let ctx = TemporalContext::from_timestamp(TUESDAY_2PM, &config).unwrap();
        assert_eq!(ctx.local_hour, 9);

        // Saturday in UTC+10 while still Friday in UTC
        let config = TemporalConfig {
            utc_offset_minutes: 600,
            ..TemporalConfig::default()
        };
        let friday_3pm_utc = TUESDAY_2PM + 3.0 * 24.0 * HOUR + HOUR;
        let ctx = TemporalContext::from_timestamp(friday_3pm_utc, &config).unwrap();
        assert_eq!(ctx.weekday, 6);
        assert!(ctx.is_weekend);
    }

    #[test]
    fn test_delivery_adjustment() {
        let config = TemporalConfig::default();
        let ctx = TemporalContext::from_timestamp(TUESDAY_2PM, &config).unwrap();
        let motion = SecurityEvent::new(EventType::Motion, TUESDAY_2PM, "front_door", HomeMode::Away);

        let adj = adjustment(Some(&ctx), &motion, Some(ZoneCategory::Entry), &config);
        assert!((adj.multiplier - 0.9 * 0.85 * 1.1).abs() < 1e-12);
        assert_eq!(adj.applied, vec!["daytime", "delivery_window", "away"]);

        // Interior motion is not delivery-like
        let adj = adjustment(Some(&ctx), &motion, Some(ZoneCategory::Interior), &config);
        assert!((adj.multiplier - 0.9 * 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_without_context_only_mode_applies() {
        let config = TemporalConfig::default();
        let event = SecurityEvent::new(EventType::Door, 0.0, "back_door", HomeMode::Vacation);
        let adj = adjustment(None, &event, None, &config);
        assert_eq!(adj.multiplier, 1.2);
    }

    #[test]
    fn test_wrapping_hours() {
        assert!(in_hours(23, 22, 6));
        assert!(in_hours(0, 22, 6));
        assert!(!in_hours(6, 22, 6));
        assert!(!in_hours(12, 22, 6));
        assert!(in_hours(8, 8, 18));
        assert!(!in_hours(18, 8, 18));
    }
}
