//! Strict parsing of raw event payloads.
//!
//! Structural limits are enforced before any typed extraction so that an
//! oversized or deeply nested payload is rejected without being walked.

use serde_json::{Map, Value};

use crate::config::GateConfig;
use crate::gate::GateError;
use crate::types::{EventType, HomeMode, SecurityEvent};

const TOP_LEVEL_FIELDS: &[&str] = &[
    "type",
    "timestamp",
    "confidence",
    "zone",
    "home_mode",
    "duration",
    "energy",
    "motion_samples",
    "events",
    "assessed_at",
];

const BATCHED_FIELDS: &[&str] = &[
    "type",
    "timestamp",
    "confidence",
    "zone",
    "home_mode",
    "duration",
    "energy",
    "motion_samples",
];

/// Latest timestamp accepted (year 5138); rejects millisecond epochs.
const MAX_TIMESTAMP: f64 = 1.0e11;
const MAX_DURATION_SECS: f64 = 86_400.0;
const MAX_ENERGY: f64 = 1.0e6;

/// A payload that passed every structural and typed check.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    /// The event being assessed
    pub event: SecurityEvent,
    /// Pre-batched prior events, oldest first
    pub prior: Vec<SecurityEvent>,
    /// Reference instant for trailing-silence checks
    pub assessed_at: Option<f64>,
}

/// Parse and validate a raw payload.
pub fn parse(raw: &[u8], limits: &GateConfig) -> Result<ParsedPayload, GateError> {
    if raw.len() > limits.max_payload_bytes {
        return Err(GateError::PayloadTooLarge {
            size: raw.len(),
            max: limits.max_payload_bytes,
        });
    }

    if let Some(depth) = exceeds_depth(raw, limits.max_depth) {
        return Err(GateError::NestingTooDeep {
            depth,
            max: limits.max_depth,
        });
    }

    let value: Value = serde_json::from_slice(raw).map_err(|e| GateError::InvalidFieldValue {
        field: "$".to_string(),
        reason: format!("malformed JSON: {}", e),
    })?;

    check_limits(&value, "$", limits)?;

    let Value::Object(map) = value else {
        return Err(GateError::InvalidFieldValue {
            field: "$".to_string(),
            reason: "payload must be a JSON object".to_string(),
        });
    };

    parse_top_level(&map)
}

/// Scan for nesting depth without building a tree. Returns the depth
/// reached once it passes `max`.
pub fn exceeds_depth(raw: &[u8], max: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in raw {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max {
                    return Some(depth);
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    None
}

fn check_limits(value: &Value, path: &str, limits: &GateConfig) -> Result<(), GateError> {
    match value {
        Value::String(s) => check_len(path, s.chars().count(), limits.max_string_len),
        Value::Array(items) => {
            let max = match leaf_name(path) {
                "events" => limits.max_batch_events,
                _ => limits.max_motion_samples,
            };
            check_len(path, items.len(), max)?;
            for (i, item) in items.iter().enumerate() {
                check_limits(item, &format!("{}[{}]", path, i), limits)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            check_len(path, map.len(), limits.max_object_fields)?;
            for (key, item) in map {
                check_len(path, key.chars().count(), limits.max_string_len)?;
                check_limits(item, &format!("{}.{}", path, key), limits)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_len(field: &str, len: usize, max: usize) -> Result<(), GateError> {
    if len > max {
        return Err(GateError::FieldTooLong {
            field: display_path(field),
            len,
            max,
        });
    }
    Ok(())
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

fn display_path(path: &str) -> String {
    path.strip_prefix("$.").unwrap_or(path).to_string()
}

fn parse_top_level(map: &Map<String, Value>) -> Result<ParsedPayload, GateError> {
    reject_unknown(map, TOP_LEVEL_FIELDS, "")?;

    let home_mode = required_mode(map, "home_mode")?;
    let zone = required_zone(map, "zone")?;
    let event = parse_event(map, "", zone, home_mode)?;

    let prior = match optional(map, "events") {
        None => Vec::new(),
        Some(Value::Array(items)) => {
            let mut prior = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let prefix = format!("events[{}].", i);
                let Value::Object(inner) = item else {
                    return Err(invalid(&format!("events[{}]", i), "batched event must be an object"));
                };
                reject_unknown(inner, BATCHED_FIELDS, &prefix)?;

                let zone = match optional(inner, "zone") {
                    None => event.zone.clone(),
                    Some(_) => zone_at(inner, &prefix)?,
                };
                let mode = match optional(inner, "home_mode") {
                    None => home_mode,
                    Some(_) => mode_at(inner, &prefix)?,
                };
                let batched = parse_event(inner, &prefix, zone, mode)?;
                if batched.timestamp > event.timestamp {
                    return Err(invalid(
                        &format!("{}timestamp", prefix),
                        "batched events must not be newer than the primary event",
                    ));
                }
                prior.push(batched);
            }
            prior.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            prior
        }
        Some(_) => return Err(invalid("events", "must be an array")),
    };

    let assessed_at = optional_number(map, "assessed_at", "")?;
    if let Some(at) = assessed_at {
        if !(0.0..=MAX_TIMESTAMP).contains(&at) || at < event.timestamp {
            return Err(invalid("assessed_at", "must be a valid epoch time not before timestamp"));
        }
    }

    Ok(ParsedPayload {
        event,
        prior,
        assessed_at,
    })
}

fn parse_event(
    map: &Map<String, Value>,
    prefix: &str,
    zone: String,
    home_mode: HomeMode,
) -> Result<SecurityEvent, GateError> {
    let type_field = format!("{}type", prefix);
    let event_type = match optional(map, "type") {
        None => return Err(GateError::MissingField(type_field)),
        Some(Value::String(s)) => {
            EventType::parse(s).ok_or_else(|| invalid(&type_field, &format!("unknown event type '{}'", s)))?
        }
        Some(_) => return Err(invalid(&type_field, "must be a string")),
    };

    let timestamp = optional_number(map, "timestamp", prefix)?
        .ok_or_else(|| GateError::MissingField(format!("{}timestamp", prefix)))?;
    if !(0.0..=MAX_TIMESTAMP).contains(&timestamp) {
        return Err(invalid(&format!("{}timestamp", prefix), "must be epoch seconds"));
    }

    let confidence = optional_number(map, "confidence", prefix)?;
    if let Some(c) = confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(invalid(&format!("{}confidence", prefix), "must be within 0..1"));
        }
    }

    let duration = optional_number(map, "duration", prefix)?;
    if let Some(d) = duration {
        if !(0.0..=MAX_DURATION_SECS).contains(&d) {
            return Err(invalid(&format!("{}duration", prefix), "must be within 0..86400 seconds"));
        }
    }

    let energy = optional_number(map, "energy", prefix)?;
    if let Some(e) = energy {
        if !(0.0..=MAX_ENERGY).contains(&e) {
            return Err(invalid(&format!("{}energy", prefix), "must be non-negative"));
        }
    }

    let motion_samples = match optional(map, "motion_samples") {
        None => None,
        Some(Value::Array(items)) => {
            let field = format!("{}motion_samples", prefix);
            let mut samples = Vec::with_capacity(items.len());
            for item in items {
                match item.as_f64() {
                    Some(v) if v.is_finite() => samples.push(v),
                    _ => return Err(invalid(&field, "samples must be finite numbers")),
                }
            }
            Some(samples)
        }
        Some(_) => return Err(invalid(&format!("{}motion_samples", prefix), "must be an array")),
    };

    Ok(SecurityEvent {
        event_type,
        timestamp,
        confidence,
        zone,
        home_mode,
        duration,
        energy,
        motion_samples,
    })
}

/// Absent and `null` are both treated as "not provided".
fn optional<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn optional_number(map: &Map<String, Value>, key: &str, prefix: &str) -> Result<Option<f64>, GateError> {
    match optional(map, key) {
        None => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(invalid(&format!("{}{}", prefix, key), "must be a finite number")),
        },
    }
}

fn required_mode(map: &Map<String, Value>, field: &str) -> Result<HomeMode, GateError> {
    match optional(map, "home_mode") {
        None => Err(GateError::MissingField(field.to_string())),
        Some(Value::String(s)) => {
            HomeMode::parse(s).ok_or_else(|| invalid(field, &format!("unknown home mode '{}'", s)))
        }
        Some(_) => Err(invalid(field, "must be a string")),
    }
}

fn mode_at(map: &Map<String, Value>, prefix: &str) -> Result<HomeMode, GateError> {
    required_mode(map, &format!("{}home_mode", prefix))
}

fn required_zone(map: &Map<String, Value>, field: &str) -> Result<String, GateError> {
    match optional(map, "zone") {
        None => Err(GateError::MissingField(field.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => Err(invalid(field, "must not be blank")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(field, "must be a string")),
    }
}

fn zone_at(map: &Map<String, Value>, prefix: &str) -> Result<String, GateError> {
    required_zone(map, &format!("{}zone", prefix))
}

fn reject_unknown(map: &Map<String, Value>, allowed: &[&str], prefix: &str) -> Result<(), GateError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            let reason = if key == "events" {
                "nested batches are not allowed"
            } else {
                "unknown field"
            };
            return Err(invalid(&format!("{}{}", prefix, key), reason));
        }
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> GateError {
    GateError::InvalidFieldValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> GateConfig {
        GateConfig::default()
    }

    fn bytes(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_minimal_payload() {
        let raw = bytes(json!({
            "type": "motion",
            "timestamp": 1_700_000_000.0,
            "zone": "backyard",
            "home_mode": "away"
        }));
        let parsed = parse(&raw, &limits()).unwrap();
        assert_eq!(parsed.event.event_type, EventType::Motion);
        assert_eq!(parsed.event.zone, "backyard");
        assert_eq!(parsed.event.home_mode, HomeMode::Away);
        assert!(parsed.prior.is_empty());
        assert!(parsed.assessed_at.is_none());
    }

    #[test]
    fn test_batched_events_inherit_zone_and_mode() {
        let raw = bytes(json!({
            "type": "motion",
            "timestamp": 102.0,
            "zone": "front_door",
            "home_mode": "away",
            "duration": 8.0,
            "events": [
                {"type": "doorbell", "timestamp": 100.0},
                {"type": "motion", "timestamp": 90.0, "zone": "driveway"}
            ],
            "assessed_at": 130.0
        }));
        let parsed = parse(&raw, &limits()).unwrap();
        assert_eq!(parsed.prior.len(), 2);
        // Sorted oldest first
        assert_eq!(parsed.prior[0].zone, "driveway");
        assert_eq!(parsed.prior[1].event_type, EventType::Doorbell);
        assert_eq!(parsed.prior[1].zone, "front_door");
        assert_eq!(parsed.prior[1].home_mode, HomeMode::Away);
        assert_eq!(parsed.assessed_at, Some(130.0));
    }

    #[test]
    fn test_depth_scan_ignores_brackets_in_strings() {
        assert_eq!(exceeds_depth(br#"{"zone": "[[[[[[{{{{"}"#, 2), None);
        assert_eq!(exceeds_depth(br#"{"a": [[[1]]]}"#, 3), Some(4));
        assert_eq!(exceeds_depth(br#"{"a": "\"[[[["}"#, 1), None);
    }

    #[test]
    fn test_each_limit_rejected() {
        let mut small = limits();
        small.max_payload_bytes = 16;
        let raw = bytes(json!({"type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home"}));
        assert!(matches!(parse(&raw, &small), Err(GateError::PayloadTooLarge { .. })));

        let raw = br#"{"type":"motion","timestamp":1,"zone":"a","home_mode":"home","events":[{"motion_samples":[[1]]}]}"#;
        assert!(matches!(parse(raw, &limits()), Err(GateError::NestingTooDeep { depth: 5, max: 4 })));

        let long_zone = "z".repeat(65);
        let raw = bytes(json!({"type": "motion", "timestamp": 1.0, "zone": long_zone, "home_mode": "home"}));
        match parse(&raw, &limits()) {
            Err(GateError::FieldTooLong { field, len, max }) => {
                assert_eq!(field, "zone");
                assert_eq!(len, 65);
                assert_eq!(max, 64);
            }
            other => panic!("unexpected: {:?}", other),
        }

        let raw = bytes(json!({"type": "motion", "timestamp": 1.0, "home_mode": "home"}));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::MissingField(f)) if f == "zone"));

        let raw = bytes(json!({"type": "teleport", "timestamp": 1.0, "zone": "a", "home_mode": "home"}));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::InvalidFieldValue { field, .. }) if field == "type"));

        let raw = bytes(json!({"type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "party"}));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::InvalidFieldValue { field, .. }) if field == "home_mode"));
    }

    #[test]
    fn test_collection_limits() {
        let events: Vec<Value> = (0..26).map(|i| json!({"type": "motion", "timestamp": i as f64})).collect();
        let raw = bytes(json!({
            "type": "motion", "timestamp": 100.0, "zone": "a", "home_mode": "home", "events": events
        }));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::FieldTooLong { field, .. }) if field == "events"));

        let samples: Vec<f64> = vec![0.1; 513];
        let raw = bytes(json!({
            "type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home", "motion_samples": samples
        }));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::FieldTooLong { field, .. }) if field == "motion_samples"));
    }

    #[test]
    fn test_rejects_unknown_and_nested_fields() {
        let raw = bytes(json!({
            "type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home", "camera_url": "x"
        }));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::InvalidFieldValue { field, .. }) if field == "camera_url"));

        let raw = bytes(json!({
            "type": "motion", "timestamp": 10.0, "zone": "a", "home_mode": "home",
            "events": [{"type": "door", "timestamp": 5.0, "events": []}]
        }));
        assert!(matches!(
            parse(&raw, &limits()),
            Err(GateError::InvalidFieldValue { field, .. }) if field == "events[0].events"
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = vec![
            json!({"type": "motion", "timestamp": -1.0, "zone": "a", "home_mode": "home"}),
            json!({"type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home", "confidence": 1.5}),
            json!({"type": "motion", "timestamp": 1.0, "zone": "  ", "home_mode": "home"}),
            json!({"type": "motion", "timestamp": "now", "zone": "a", "home_mode": "home"}),
            json!({"type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home", "motion_samples": [1, "x"]}),
            json!({"type": "motion", "timestamp": 10.0, "zone": "a", "home_mode": "home", "assessed_at": 5.0}),
            json!({"type": "motion", "timestamp": 10.0, "zone": "a", "home_mode": "home",
                   "events": [{"type": "door", "timestamp": 11.0}]}),
            json!([1, 2, 3]),
        ];
        for case in cases {
            let raw = bytes(case.clone());
            assert!(
                matches!(parse(&raw, &limits()), Err(GateError::InvalidFieldValue { .. })),
                "expected rejection for {}",
                case
            );
        }

        assert!(matches!(
            parse(b"{not json", &limits()),
            Err(GateError::InvalidFieldValue { field, .. }) if field == "$"
        ));
    }

    #[test]
    fn test_free_form_zone_ids_admitted() {
        for zone in ["living room", "garage.north", "porte_d'entrée", "二階"] {
            let raw = bytes(json!({
                "type": "door", "timestamp": 1.0, "zone": zone, "home_mode": "home",
                "events": [{"type": "motion", "timestamp": 0.5, "zone": zone}]
            }));
            let parsed = parse(&raw, &limits()).unwrap();
            assert_eq!(parsed.event.zone, zone);
            assert_eq!(parsed.prior[0].zone, zone);
        }

        let raw = bytes(json!({"type": "door", "timestamp": 1.0, "zone": "", "home_mode": "home"}));
        assert!(matches!(parse(&raw, &limits()), Err(GateError::InvalidFieldValue { field, .. }) if field == "zone"));
    }

    #[test]
    fn test_null_optionals_are_absent() {
        let raw = bytes(json!({
            "type": "motion", "timestamp": 1.0, "zone": "a", "home_mode": "home",
            "confidence": null, "duration": null
        }));
        let parsed = parse(&raw, &limits()).unwrap();
        assert!(parsed.event.confidence.is_none());
        assert!(parsed.event.duration.is_none());
    }
}
