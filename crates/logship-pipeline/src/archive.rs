//! Archive assembly: one zip per batch, one JSON entry per log set.

use std::io::{Cursor, Write};
use std::path::Path;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::ArchiveError;
use crate::grouping::{self, ArchiveBatch};

/// One event group on the wire: shared identity fields plus the raw records.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvents {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    pub log_records: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Payload of one archive entry. Absent global metadata is omitted from the
/// JSON entirely, never serialized as null.
#[derive(Debug, Serialize)]
pub struct LogEventsJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMap<String, Value>>,
    #[serde(rename = "logEvents")]
    pub log_events: Vec<LogEvents>,
}

/// A finished, uploadable archive.
#[derive(Debug)]
pub struct BuiltArchive {
    /// Suggested file name, `{partition}_{timestamp}.zip`.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Valid records contained across all entries.
    pub record_count: u64,
}

fn entry_name(partition_key: &str, timestamp: &str, seq: usize, log_set: Option<&str>) -> String {
    match log_set {
        Some(log_set) => format!("{partition_key}_{timestamp}_{seq}_logSet={log_set}.json"),
        None => format!("{partition_key}_{timestamp}_{seq}.json"),
    }
}

/// Builds the zip archive for one batch.
///
/// Entries appear in the batch's log-set order; every entry shares the batch
/// global metadata and carries its log set's event groups.
pub fn build_archive(partition_key: &str, batch: &ArchiveBatch) -> Result<BuiltArchive, ArchiveError> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%fZ").to_string();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions = FileOptions::default();
    let mut record_count: u64 = 0;

    for (seq, (log_set, records)) in batch.log_sets.iter().enumerate() {
        let log_events = grouping::group_events(records)?
            .into_iter()
            .map(|(key, log_records)| {
                record_count += log_records.len() as u64;
                LogEvents {
                    metadata: key.metadata,
                    entity_id: key.entity_id,
                    entity_type: key.entity_type,
                    log_source_name: key.log_source_name,
                    log_path: key.log_path,
                    log_records,
                    timezone: key.timezone,
                }
            })
            .collect();
        let payload = LogEventsJson {
            metadata: batch.global_metadata.clone(),
            log_events,
        };

        let name = entry_name(partition_key, &timestamp, seq + 1, log_set.as_deref());
        writer.start_file(name, options)?;
        writer.write_all(&serde_json::to_vec(&payload)?)?;
    }

    let bytes = writer.finish()?.into_inner();
    debug!(
        "Built archive for partition {partition_key}: {} entries, {record_count} records, {} bytes",
        batch.log_sets.len(),
        bytes.len()
    );
    Ok(BuiltArchive {
        name: format!("{partition_key}_{timestamp}.zip"),
        bytes,
        record_count,
    })
}

/// Writes a finished archive to the configured dump directory.
pub fn dump_archive(dir: &str, archive: &BuiltArchive) -> std::io::Result<()> {
    let path = Path::new(dir).join(&archive.name);
    std::fs::write(&path, &archive.bytes)?;
    info!("Wrote archive copy to {}", path.display());
    Ok(())
}
