//! Field enrichment: log-set resolution, metadata sanitizing and flattening,
//! timezone validation, and log-path defaulting.
//!
//! Enrichment failures degrade to unresolved or default values; they never
//! invalidate a record.

use chrono_tz::Tz;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{error, warn};

use crate::constants;
use crate::record::{is_present, Record};

/// Resolves a log set from its raw value, optionally through an extraction
/// regex.
///
/// The regex boundary is normalized to a single optional-capture contract:
/// capture group 1 when the pattern defines one, the whole match otherwise.
/// A failed match or an invalid pattern resolves to `None`; the record stays
/// valid and is uploaded without a log-set label.
pub fn resolve_log_set(raw: &str, pattern: Option<&str>) -> Option<String> {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return Some(raw.to_string());
    };

    let regex = match regex::Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            error!("Failed to compile log set extraction regex '{pattern}': {e}");
            return None;
        }
    };

    match regex.captures(raw) {
        Some(captures) => captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string()),
        None => {
            error!("Failed to parse log set from '{raw}' with regex '{pattern}'");
            None
        }
    }
}

/// Resolves the log set for one record.
///
/// Source precedence: the field named by `log_set_key` (when that field is
/// present and non-empty), then the literal `log_set` field. Both sources go
/// through the extraction regex when one is supplied.
pub fn log_set_for_record(record: &Record) -> Option<String> {
    let pattern = record.log_set_ext_regex.as_deref();

    if let Some(key) = record.log_set_key.as_deref().filter(|k| !k.is_empty()) {
        if let Some(raw) = record.lookup(key).filter(|v| !v.is_empty()) {
            if let Some(resolved) = resolve_log_set(raw, pattern) {
                return Some(resolved);
            }
        }
    }

    let raw = record.log_set.as_deref().filter(|v| !v.is_empty())?;
    resolve_log_set(raw, pattern)
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_) | Value::Null)
}

/// Keeps only flat key-to-scalar metadata pairs.
///
/// Pairs carrying nested containers or nulls are dropped and reported;
/// returns `None` when nothing survives.
pub fn sanitize_metadata(raw: Option<&IndexMap<String, Value>>) -> Option<IndexMap<String, Value>> {
    let raw = raw?;
    let mut valid = IndexMap::new();
    let mut dropped = Vec::new();
    for (key, value) in raw {
        if is_scalar(value) {
            valid.insert(key.clone(), value.clone());
        } else {
            dropped.push(key.as_str());
        }
    }
    if !dropped.is_empty() {
        warn!(
            "Skipping metadata keys {} as the corresponding values are in invalid format",
            dropped.join(",")
        );
    }
    if valid.is_empty() {
        None
    } else {
        Some(valid)
    }
}

/// Recursively flattens a nested mapping into dotted keys.
///
/// Nested values are kept under both their own key and the dotted leaf keys,
/// so remapping tables can target either level.
pub fn flatten(nested: &Value) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    if let Value::Object(map) = nested {
        for (key, value) in map {
            out.insert(key.clone(), value.clone());
            if value.is_object() {
                for (child_key, child_value) in flatten(value) {
                    out.insert(format!("{key}.{child_key}"), child_value);
                }
            }
        }
    }
    out
}

fn encode_scalar(key: &str, value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Object(_) | Value::Array(_) => match serde_json::to_string(value) {
            Ok(encoded) => Some(Value::String(encoded)),
            Err(e) => {
                error!("Error while encoding field {key}: {e}");
                None
            }
        },
        other => Some(other.clone()),
    }
}

/// Flattens the record's orchestrator metadata and merges remapped keys into
/// the caller metadata, never overwriting a key the caller already set.
pub fn merge_kubernetes_metadata(
    metadata: Option<IndexMap<String, Value>>,
    kubernetes: &Value,
    mapping: &std::collections::HashMap<String, String>,
) -> Option<IndexMap<String, Value>> {
    let mut merged = metadata.unwrap_or_default();
    for (key, value) in flatten(kubernetes) {
        let Some(target) = mapping.get(&key) else {
            continue;
        };
        let already_set = merged
            .get(target)
            .map_or(false, |existing| is_present(existing.as_str()));
        if !already_set {
            if let Some(encoded) = encode_scalar(&key, &value) {
                merged.insert(target.clone(), encoded);
            }
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Reduces a raw message to its wire string, serializing structured payloads.
///
/// Returns `None` for absent or empty-after-encode messages; the caller
/// counts those invalid.
pub fn encode_message(message: &Value) -> Option<String> {
    match message {
        Value::Null => None,
        Value::String(s) => {
            if s.is_empty() {
                None
            } else {
                Some(s.clone())
            }
        }
        other => match serde_json::to_string(other) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                error!("Error while encoding message field: {e}");
                None
            }
        },
    }
}

/// Validates a timezone identifier against the IANA database, substituting
/// UTC (with a warning) for unknown identifiers.
pub fn validate_timezone(identifier: Option<&str>) -> Option<String> {
    let identifier = identifier.filter(|tz| !tz.is_empty())?;
    if identifier.parse::<Tz>().is_ok() {
        Some(identifier.to_string())
    } else {
        warn!("Invalid timezone '{identifier}', using default UTC");
        Some(constants::DEFAULT_TIMEZONE.to_string())
    }
}

/// Defaults the log path to the tag, or a fixed sentinel for untagged
/// records.
pub fn default_log_path(record: &mut Record) {
    if !is_present(record.log_path.as_deref()) {
        record.log_path = Some(
            record
                .tag
                .clone()
                .unwrap_or_else(|| constants::UNDEFINED_LOG_PATH.to_string()),
        );
    }
}
