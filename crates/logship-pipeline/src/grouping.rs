//! The grouping engine: a single validation and enrichment pass over a
//! chunk, followed by partitioning into bounded archive batches and event
//! groups.
//!
//! All grouping is stable with respect to input order: first-seen key order
//! determines entry ordering in the output, so a given chunk always produces
//! the same archives.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::enrich;
use crate::metrics::TagMetrics;
use crate::record::{self, InvalidReason, Record};

/// One host-delivered batch: (receive timestamp in epoch seconds, record).
pub type Chunk = Vec<(f64, Record)>;

/// Result of the validation and enrichment pass over one chunk.
#[derive(Debug, Default)]
pub struct ChunkScan {
    /// Worker id reported by the chunk's records, defaulting to "0".
    pub worker_id: String,
    /// Records received per tag; untagged records accumulate under `None`.
    pub incoming_per_tag: IndexMap<Option<String>, u64>,
    /// Records found invalid per tag, poisoned records included.
    pub invalid_per_tag: IndexMap<Option<String>, u64>,
    /// Per-tag label sets and latency accumulation.
    pub tag_metrics: IndexMap<Option<String>, TagMetrics>,
    /// Valid, enriched records grouped by partition key, first-seen order.
    pub records_per_partition: IndexMap<String, Vec<Record>>,
}

/// Per-chunk memoization caches, instantiated fresh for every chunk.
///
/// Resolution for a tag is computed once and reused for every later record
/// with that tag; untagged records are resolved individually.
#[derive(Default)]
struct TagCaches {
    log_set: HashMap<String, Option<String>>,
    metadata: HashMap<String, Option<IndexMap<String, Value>>>,
    timezone: HashMap<String, Option<String>>,
}

/// Validates and enriches every record in the chunk.
///
/// A record failing mandatory-field validation poisons its tag: every later
/// record with the same tag in this chunk is counted invalid without
/// inspection. An empty-after-encode message invalidates only the record
/// itself.
pub fn scan_chunk(chunk: Chunk, config: &Config) -> ChunkScan {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    let mut scan = ChunkScan {
        worker_id: "0".to_string(),
        ..ChunkScan::default()
    };
    let mut caches = TagCaches::default();
    let mut poisoned_tags: HashSet<String> = HashSet::new();

    for (received_at, mut rec) in chunk {
        let tag = rec.tag.clone().filter(|t| !t.is_empty());

        *scan.incoming_per_tag.entry(tag.clone()).or_insert(0) += 1;

        let labels = scan.tag_metrics.entry(tag.clone()).or_default();
        labels.tag = tag.clone();
        if record::is_present(rec.worker_id.as_deref()) {
            labels.worker_id = rec.worker_id.clone();
            scan.worker_id = rec.worker_id.clone().unwrap_or_else(|| "0".to_string());
        }

        // A tag already poisoned in this chunk skips the record outright.
        if let Some(t) = tag.as_deref() {
            if poisoned_tags.contains(t) {
                *scan.invalid_per_tag.entry(tag.clone()).or_insert(0) += 1;
                continue;
            }
        }

        enrich::default_log_path(&mut rec);

        rec.log_set = match tag.as_deref() {
            Some(t) => caches
                .log_set
                .entry(t.to_string())
                .or_insert_with(|| enrich::log_set_for_record(&rec))
                .clone(),
            None => enrich::log_set_for_record(&rec),
        };

        if let Err(reason) = record::validate(&rec) {
            labels.invalid_reason.get_or_insert(reason);
            *scan.invalid_per_tag.entry(tag.clone()).or_insert(0) += 1;
            if let Some(t) = tag.as_deref() {
                warn!(
                    "Invalid records associated with tag {t}: {reason}. \
                     Skipping all further records with this tag"
                );
                poisoned_tags.insert(t.to_string());
            } else {
                warn!("Invalid record: {reason}");
            }
            continue;
        }

        labels.log_group_id = rec.log_group_id.clone();
        labels.log_source_name = rec.log_source_name.clone();
        labels.log_set = rec.log_set.clone();

        rec.message = match rec.message.as_ref().and_then(enrich::encode_message) {
            Some(encoded) => Some(Value::String(encoded)),
            None => {
                // Empty after encoding: drop this record only, no poisoning.
                labels.invalid_reason.get_or_insert(InvalidReason::MissingMessage);
                *scan.invalid_per_tag.entry(tag.clone()).or_insert(0) += 1;
                match tag.as_deref() {
                    Some(t) => warn!("'message' field is empty, skipping record with tag {t}"),
                    None => warn!("'message' field is empty, skipping record"),
                }
                continue;
            }
        };

        if let Some(kubernetes) = rec.kubernetes.take() {
            rec.metadata = enrich::merge_kubernetes_metadata(
                rec.metadata.take(),
                &kubernetes,
                &config.kubernetes_metadata_keys_mapping,
            );
        }

        rec.metadata = match tag.as_deref() {
            Some(t) => caches
                .metadata
                .entry(t.to_string())
                .or_insert_with(|| enrich::sanitize_metadata(rec.metadata.as_ref()))
                .clone(),
            None => enrich::sanitize_metadata(rec.metadata.as_ref()),
        };

        rec.timezone = match tag.as_deref() {
            Some(t) => caches
                .timezone
                .entry(t.to_string())
                .or_insert_with(|| enrich::validate_timezone(rec.timezone.as_deref()))
                .clone(),
            None => enrich::validate_timezone(rec.timezone.as_deref()),
        };

        // Latency is accumulated only over valid, non-skipped records.
        labels.latency_sum += now - received_at;
        labels.latency_records += 1;

        let partition = rec.log_group_id.clone().unwrap_or_default();
        scan.records_per_partition
            .entry(partition)
            .or_default()
            .push(rec);
    }

    debug!(
        "Scanned chunk: {} partitions, {} tags",
        scan.records_per_partition.len(),
        scan.tag_metrics.len()
    );
    scan
}

/// One quota-bounded group of log sets destined for a single archive.
#[derive(Debug)]
pub struct ArchiveBatch {
    /// Global metadata captured from the first record in this batch's span
    /// that carried one. First-wins, never merged.
    pub global_metadata: Option<IndexMap<String, Value>>,
    /// Records grouped by log set, first-seen order. `None` is a valid key,
    /// distinct from every string value.
    pub log_sets: IndexMap<Option<String>, Vec<Record>>,
}

/// Splits one partition's records into archive batches.
///
/// Records group by log set in first-seen order; a new batch starts every
/// `max_entries` log sets, independent of record volume per log set.
pub fn partition_batches(records: Vec<Record>, max_entries: usize) -> Vec<ArchiveBatch> {
    let mut by_log_set: IndexMap<Option<String>, Vec<Record>> = IndexMap::new();
    for rec in records {
        by_log_set
            .entry(rec.log_set.clone())
            .or_default()
            .push(rec);
    }

    let mut batches: Vec<ArchiveBatch> = Vec::new();
    let mut current = ArchiveBatch {
        global_metadata: None,
        log_sets: IndexMap::new(),
    };
    for (log_set, group) in by_log_set {
        if current.log_sets.len() == max_entries {
            batches.push(current);
            current = ArchiveBatch {
                global_metadata: None,
                log_sets: IndexMap::new(),
            };
        }
        if current.global_metadata.is_none() {
            current.global_metadata = group
                .iter()
                .find_map(|rec| rec.global_metadata.clone());
        }
        current.log_sets.insert(log_set, group);
    }
    if !current.log_sets.is_empty() {
        batches.push(current);
    }
    batches
}

/// Composite identity of one archive entry's event group.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroupKey {
    pub metadata: Option<IndexMap<String, Value>>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub log_source_name: Option<String>,
    pub log_path: Option<String>,
    pub timezone: Option<String>,
}

impl EventGroupKey {
    fn of(rec: &Record) -> Self {
        EventGroupKey {
            metadata: rec.metadata.clone(),
            entity_id: rec.entity_id.clone(),
            entity_type: rec.entity_type.clone(),
            log_source_name: rec.log_source_name.clone(),
            log_path: rec.log_path.clone(),
            timezone: rec.timezone.clone(),
        }
    }

    /// Order-insensitive fingerprint used as the grouping key; metadata keys
    /// are sorted so two maps with the same pairs always collide.
    fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let sorted_metadata: Option<BTreeMap<&String, &Value>> = self
            .metadata
            .as_ref()
            .map(|m| m.iter().collect());
        serde_json::to_string(&(
            &sorted_metadata,
            &self.entity_id,
            &self.entity_type,
            &self.log_source_name,
            &self.log_path,
            &self.timezone,
        ))
    }
}

/// Groups a log set's records by [`EventGroupKey`], preserving first-seen
/// group order and arrival order of messages within each group.
pub fn group_events(
    records: &[Record],
) -> Result<Vec<(EventGroupKey, Vec<String>)>, serde_json::Error> {
    let mut groups: IndexMap<String, (EventGroupKey, Vec<String>)> = IndexMap::new();
    for rec in records {
        let key = EventGroupKey::of(rec);
        let fingerprint = key.fingerprint()?;
        let message = rec.message_str().unwrap_or_default().to_string();
        groups
            .entry(fingerprint)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(message);
    }
    Ok(groups.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_record(tag: Option<&str>, message: Option<&str>) -> Record {
        Record {
            message: message.map(|m| json!(m)),
            tag: tag.map(str::to_string),
            log_group_id: Some("lg-1".to_string()),
            log_source_name: Some("syslog".to_string()),
            ..Record::default()
        }
    }

    fn as_chunk(records: Vec<Record>) -> Chunk {
        records.into_iter().map(|r| (0.0, r)).collect()
    }

    #[test]
    fn test_scan_counts_add_up() {
        let mut bad = make_record(Some("t1"), None);
        bad.log_group_id = None;
        let chunk = as_chunk(vec![
            make_record(Some("t1"), Some("one")),
            bad,
            make_record(Some("t1"), Some("three")),
            make_record(Some("t2"), Some("four")),
        ]);

        let scan = scan_chunk(chunk, &Config::default());

        let t1 = Some("t1".to_string());
        assert_eq!(scan.incoming_per_tag[&t1], 3);
        // One mandatory-field failure plus one poisoned record.
        assert_eq!(scan.invalid_per_tag[&t1], 2);
        assert_eq!(scan.incoming_per_tag[&Some("t2".to_string())], 1);
        assert!(!scan.invalid_per_tag.contains_key(&Some("t2".to_string())));

        let valid: usize = scan.records_per_partition.values().map(Vec::len).sum();
        assert_eq!(valid, 2);
    }

    #[test]
    fn test_poisoning_is_monotonic() {
        let mut bad = make_record(Some("t1"), Some("fine"));
        bad.log_source_name = None;
        let chunk = as_chunk(vec![
            bad,
            make_record(Some("t1"), Some("valid but poisoned")),
            make_record(Some("t1"), Some("also poisoned")),
        ]);

        let scan = scan_chunk(chunk, &Config::default());

        let t1 = Some("t1".to_string());
        assert_eq!(scan.invalid_per_tag[&t1], 3);
        assert!(scan.records_per_partition.is_empty());
        assert_eq!(
            scan.tag_metrics[&t1].invalid_reason,
            Some(InvalidReason::MissingLogSourceName)
        );
    }

    #[test]
    fn test_untagged_records_do_not_poison_each_other() {
        let chunk = as_chunk(vec![
            make_record(None, None),
            make_record(None, Some("still processed")),
        ]);

        let scan = scan_chunk(chunk, &Config::default());

        assert_eq!(scan.invalid_per_tag[&None], 1);
        assert_eq!(scan.records_per_partition["lg-1"].len(), 1);
    }

    #[test]
    fn test_empty_message_does_not_poison() {
        let chunk = as_chunk(vec![
            make_record(Some("t1"), Some("")),
            make_record(Some("t1"), Some("kept")),
        ]);

        let scan = scan_chunk(chunk, &Config::default());

        let t1 = Some("t1".to_string());
        assert_eq!(scan.invalid_per_tag[&t1], 1);
        assert_eq!(scan.records_per_partition["lg-1"].len(), 1);
        assert_eq!(
            scan.tag_metrics[&t1].invalid_reason,
            Some(InvalidReason::MissingMessage)
        );
    }

    #[test]
    fn test_log_set_memoized_per_tag() {
        let mut first = make_record(Some("t1"), Some("one"));
        first.log_set = Some("set-a".to_string());
        let mut second = make_record(Some("t1"), Some("two"));
        second.log_set = Some("set-b".to_string());

        let scan = scan_chunk(as_chunk(vec![first, second]), &Config::default());

        let records = &scan.records_per_partition["lg-1"];
        assert_eq!(records[0].log_set.as_deref(), Some("set-a"));
        // The second record reuses the tag's cached resolution.
        assert_eq!(records[1].log_set.as_deref(), Some("set-a"));
    }

    #[test]
    fn test_timezone_memoized_and_defaulted() {
        let mut first = make_record(Some("t1"), Some("one"));
        first.timezone = Some("Not/AZone".to_string());
        let mut second = make_record(Some("t1"), Some("two"));
        second.timezone = Some("America/New_York".to_string());

        let scan = scan_chunk(as_chunk(vec![first, second]), &Config::default());

        let records = &scan.records_per_partition["lg-1"];
        assert_eq!(records[0].timezone.as_deref(), Some("UTC"));
        assert_eq!(records[1].timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_latency_counted_for_valid_records_only() {
        let mut bad = make_record(Some("t1"), None);
        bad.log_group_id = None;
        let chunk = as_chunk(vec![make_record(Some("t1"), Some("ok")), bad]);

        let scan = scan_chunk(chunk, &Config::default());
        assert_eq!(scan.tag_metrics[&Some("t1".to_string())].latency_records, 1);
    }

    #[test]
    fn test_partition_order_is_first_seen() {
        let mut r1 = make_record(None, Some("a"));
        r1.log_group_id = Some("lg-b".to_string());
        let mut r2 = make_record(None, Some("b"));
        r2.log_group_id = Some("lg-a".to_string());
        let mut r3 = make_record(None, Some("c"));
        r3.log_group_id = Some("lg-b".to_string());

        let scan = scan_chunk(as_chunk(vec![r1, r2, r3]), &Config::default());
        let keys: Vec<&String> = scan.records_per_partition.keys().collect();
        assert_eq!(keys, ["lg-b", "lg-a"]);
        assert_eq!(scan.records_per_partition["lg-b"].len(), 2);
    }

    fn record_with_log_set(log_set: Option<&str>) -> Record {
        Record {
            message: Some(json!("m")),
            log_set: log_set.map(str::to_string),
            log_group_id: Some("lg-1".to_string()),
            log_source_name: Some("syslog".to_string()),
            ..Record::default()
        }
    }

    #[test]
    fn test_batches_split_by_log_set_count() {
        // max_entries + 1 log sets produce exactly two batches, the first
        // holding max_entries.
        let records: Vec<Record> = (0..11)
            .map(|i| record_with_log_set(Some(&format!("set-{i}"))))
            .collect();
        let batches = partition_batches(records, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].log_sets.len(), 10);
        assert_eq!(batches[1].log_sets.len(), 1);
    }

    #[test]
    fn test_batches_count_log_sets_not_records() {
        // 150 records over 3 log sets stay in a single batch of 3 entries.
        let records: Vec<Record> = (0..150)
            .map(|i| record_with_log_set(Some(["a", "b", "c"][i % 3])))
            .collect();
        let batches = partition_batches(records, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].log_sets.len(), 3);
        assert_eq!(batches[0].log_sets[&Some("a".to_string())].len(), 50);
    }

    #[test]
    fn test_missing_log_set_is_its_own_group() {
        let records = vec![
            record_with_log_set(None),
            record_with_log_set(Some("a")),
            record_with_log_set(None),
        ];
        let batches = partition_batches(records, 100);
        assert_eq!(batches[0].log_sets.len(), 2);
        assert_eq!(batches[0].log_sets[&None].len(), 2);
    }

    #[test]
    fn test_batch_global_metadata_first_wins() {
        let mut with_meta = record_with_log_set(Some("b"));
        with_meta.global_metadata =
            Some(serde_json::from_value(json!({"env": "prod"})).unwrap());
        let mut later_meta = record_with_log_set(Some("c"));
        later_meta.global_metadata =
            Some(serde_json::from_value(json!({"env": "other"})).unwrap());

        let batches = partition_batches(
            vec![record_with_log_set(Some("a")), with_meta, later_meta],
            100,
        );
        assert_eq!(
            batches[0].global_metadata.as_ref().unwrap().get("env"),
            Some(&json!("prod"))
        );
    }

    #[test]
    fn test_group_events_merges_by_identity() {
        let mut r1 = record_with_log_set(Some("a"));
        r1.message = Some(json!("first"));
        r1.entity_id = Some("host-1".to_string());
        let mut r2 = record_with_log_set(Some("a"));
        r2.message = Some(json!("second"));
        r2.entity_id = Some("host-1".to_string());
        let mut r3 = record_with_log_set(Some("a"));
        r3.message = Some(json!("third"));
        r3.entity_id = Some("host-2".to_string());

        let groups = group_events(&[r1, r2, r3]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, ["first", "second"]);
        assert_eq!(groups[1].1, ["third"]);
        assert_eq!(groups[0].0.entity_id.as_deref(), Some("host-1"));
    }

    #[test]
    fn test_group_events_metadata_key_order_insensitive() {
        let mut r1 = record_with_log_set(None);
        r1.metadata = Some(serde_json::from_value(json!({"a": 1, "b": 2})).unwrap());
        let mut r2 = record_with_log_set(None);
        r2.metadata = Some(serde_json::from_value(json!({"b": 2, "a": 1})).unwrap());

        let groups = group_events(&[r1, r2]).unwrap();
        assert_eq!(groups.len(), 1);
    }
}
