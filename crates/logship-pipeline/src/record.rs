//! The typed record and its mandatory-field validation.
//!
//! Records arrive from the host as semi-structured maps; deserialization
//! turns the well-known routing fields into typed optionals and preserves
//! everything else in `extra` so log-set key indirection keeps working.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Reason a record failed mandatory-field validation.
///
/// The display form is the `reason` label on the `records_invalid` metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MissingMessage,
    MissingLogGroupId,
    MissingLogSourceName,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::MissingMessage => "MISSING_MESSAGE",
            InvalidReason::MissingLogGroupId => "MISSING_LOG_GROUP_ID",
            InvalidReason::MissingLogSourceName => "MISSING_LOG_SOURCE_NAME",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One semi-structured log record within a chunk.
///
/// Enrichment mutates the record in place: `log_set`, `log_path`, `metadata`
/// and `timezone` are normalized or filled in before grouping, and `message`
/// is re-encoded to a plain string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Record {
    pub message: Option<Value>,
    pub tag: Option<String>,
    pub worker_id: Option<String>,
    pub log_group_id: Option<String>,
    pub log_source_name: Option<String>,
    pub log_set: Option<String>,
    pub log_set_key: Option<String>,
    pub log_set_ext_regex: Option<String>,
    pub log_path: Option<String>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub timezone: Option<String>,
    pub metadata: Option<IndexMap<String, Value>>,
    pub global_metadata: Option<IndexMap<String, Value>>,
    pub kubernetes: Option<Value>,
    /// Any field not covered above, kept for log-set key indirection.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// True when the optional string is present and non-empty.
pub fn is_present(field: Option<&str>) -> bool {
    field.map_or(false, |value| !value.is_empty())
}

impl Record {
    /// The encoded message, once enrichment has reduced it to a string.
    pub fn message_str(&self) -> Option<&str> {
        match &self.message {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Looks up a field by name, covering both the typed routing fields and
    /// the preserved `extra` map. Only string-valued fields resolve.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let named = match key {
            "tag" => self.tag.as_deref(),
            "log_group_id" => self.log_group_id.as_deref(),
            "log_source_name" => self.log_source_name.as_deref(),
            "log_set" => self.log_set.as_deref(),
            "log_path" => self.log_path.as_deref(),
            "entity_id" => self.entity_id.as_deref(),
            "entity_type" => self.entity_type.as_deref(),
            "timezone" => self.timezone.as_deref(),
            _ => None,
        };
        named.or_else(|| self.extra.get(key).and_then(Value::as_str))
    }
}

/// Mandatory-field validation, checked in order: message, partition key,
/// log source name. The first failing check determines the reason; callers
/// own tag poisoning.
pub fn validate(record: &Record) -> Result<(), InvalidReason> {
    if record.message.is_none() {
        return Err(InvalidReason::MissingMessage);
    }
    if !is_present(record.log_group_id.as_deref()) {
        return Err(InvalidReason::MissingLogGroupId);
    }
    if !is_present(record.log_source_name.as_deref()) {
        return Err(InvalidReason::MissingLogSourceName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_record() -> Record {
        Record {
            message: Some(json!("a log line")),
            log_group_id: Some("lg-1".to_string()),
            log_source_name: Some("syslog".to_string()),
            ..Record::default()
        }
    }

    #[test]
    fn test_valid_record_passes() {
        assert!(validate(&valid_record()).is_ok());
    }

    #[test]
    fn test_missing_message() {
        let mut record = valid_record();
        record.message = None;
        assert_eq!(validate(&record), Err(InvalidReason::MissingMessage));
    }

    #[test]
    fn test_missing_log_group_id() {
        let mut record = valid_record();
        record.log_group_id = None;
        assert_eq!(validate(&record), Err(InvalidReason::MissingLogGroupId));

        record.log_group_id = Some(String::new());
        assert_eq!(validate(&record), Err(InvalidReason::MissingLogGroupId));
    }

    #[test]
    fn test_missing_log_source_name() {
        let mut record = valid_record();
        record.log_source_name = None;
        assert_eq!(validate(&record), Err(InvalidReason::MissingLogSourceName));
    }

    #[test]
    fn test_check_order_message_first() {
        // A record missing everything reports the message first.
        let record = Record::default();
        assert_eq!(validate(&record), Err(InvalidReason::MissingMessage));
    }

    #[test]
    fn test_deserialize_preserves_extra_fields() {
        let record: Record = serde_json::from_value(json!({
            "message": "m",
            "log_group_id": "lg-1",
            "log_source_name": "src",
            "file_name": "app.log",
        }))
        .unwrap();
        assert_eq!(record.lookup("file_name"), Some("app.log"));
        assert_eq!(record.lookup("log_group_id"), Some("lg-1"));
        assert_eq!(record.lookup("absent"), None);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(InvalidReason::MissingMessage.to_string(), "MISSING_MESSAGE");
        assert_eq!(
            InvalidReason::MissingLogGroupId.to_string(),
            "MISSING_LOG_GROUP_ID"
        );
    }
}
