//! Timeline construction from free-form agent findings.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use super::types::{InvestigationResult, TimelineEvent};
use crate::entity::{Entity, EntityType};

/// Substrings that mark a key as holding a timestamp.
const TIMESTAMP_KEY_HINTS: &[&str] = &[
    "timestamp", "time", "date", "created", "updated", "_at", "occurred", "seen",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];

/// Seconds-since-epoch bounds accepted for integer timestamps (2000-01-01 .. 2100-01-01).
const UNIX_SECONDS_RANGE: std::ops::Range<i64> = 946_684_800..4_102_444_800;

pub fn is_timestamp_key(key: &str) -> bool {
    let key = key.to_lowercase();
    TIMESTAMP_KEY_HINTS.iter().any(|hint| key.contains(hint))
}

/// Parse a JSON value as a UTC timestamp.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            if !UNIX_SECONDS_RANGE.contains(&secs) {
                return None;
            }
            Utc.timestamp_opt(secs, 0).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(secs) = s.parse::<i64>() {
        if UNIX_SECONDS_RANGE.contains(&secs) {
            return Utc.timestamp_opt(secs, 0).single();
        }
    }
    None
}

/// Walk nested findings collecting `(key, timestamp)` pairs.
pub fn extract_timestamps(findings: &Value) -> Vec<(String, DateTime<Utc>)> {
    let mut found = Vec::new();
    collect(findings, None, &mut found);
    found
}

fn collect(value: &Value, key: Option<&str>, out: &mut Vec<(String, DateTime<Utc>)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                collect(v, Some(k), out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, key, out);
            }
        }
        _ => {
            let Some(key) = key.filter(|k| is_timestamp_key(k)) else {
                return;
            };
            if let Some(ts) = parse_timestamp(value) {
                out.push((key.to_string(), ts));
            }
        }
    }
}

/// Build a time-ordered timeline.
///
/// Each result contributes one event per timestamp found in its findings, or
/// one inferred event at `now` when it has none. Entities with no results get
/// a single inferred event from their stored score, but only when some entity
/// has results; with none the timeline is empty.
pub fn build_timeline(
    entity_results: &BTreeMap<String, Vec<InvestigationResult>>,
    entities: &[Entity],
    now: DateTime<Utc>,
) -> Vec<TimelineEvent> {
    let types: BTreeMap<&str, EntityType> = entities
        .iter()
        .map(|e| (e.entity_id.as_str(), e.entity_type))
        .collect();
    let mut events = Vec::new();
    let mut covered: BTreeSet<&str> = BTreeSet::new();

    for (entity_id, results) in entity_results {
        let entity_type = types
            .get(entity_id.as_str())
            .copied()
            .unwrap_or(EntityType::User);
        for result in results {
            covered.insert(entity_id.as_str());
            let stamps = extract_timestamps(&result.findings);
            if stamps.is_empty() {
                events.push(TimelineEvent {
                    timestamp: now,
                    entity_id: entity_id.clone(),
                    entity_type,
                    agent_type: Some(result.agent_type),
                    event_type: "assessment".to_string(),
                    risk_score: result.risk_score,
                    confidence: result.confidence,
                    inferred: true,
                });
                continue;
            }
            for (key, timestamp) in stamps {
                events.push(TimelineEvent {
                    timestamp,
                    entity_id: entity_id.clone(),
                    entity_type,
                    agent_type: Some(result.agent_type),
                    event_type: key,
                    risk_score: result.risk_score,
                    confidence: result.confidence,
                    inferred: false,
                });
            }
        }
    }

    if covered.is_empty() {
        return Vec::new();
    }

    for entity in entities {
        if covered.contains(entity.entity_id.as_str()) {
            continue;
        }
        events.push(TimelineEvent {
            timestamp: now,
            entity_id: entity.entity_id.clone(),
            entity_type: entity.entity_type,
            agent_type: None,
            event_type: "assessment".to_string(),
            risk_score: entity.risk_score,
            confidence: entity.confidence_score,
            inferred: true,
        });
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    events
}
