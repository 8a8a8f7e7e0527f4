//! The chunk driver: validation pass, metrics checkpoints, archive assembly
//! and upload for every partition in a chunk.

use std::time::Instant;

use tracing::error;

use crate::archive;
use crate::config::Config;
use crate::error::UploadError;
use crate::grouping::{self, Chunk, ChunkScan};
use crate::metrics::{PipelineMetrics, TagMetrics};
use crate::uploader::UploadClient;

/// Processes host-delivered chunks end to end.
///
/// One processor is shared across workers; per-chunk state lives entirely in
/// the [`ChunkScan`] so concurrent chunks never interfere.
#[derive(Clone)]
pub struct ChunkProcessor {
    config: Config,
    metrics: PipelineMetrics,
    client: UploadClient,
}

impl ChunkProcessor {
    pub fn new(config: Config, metrics: PipelineMetrics, client: UploadClient) -> Self {
        ChunkProcessor {
            config,
            metrics,
            client,
        }
    }

    /// Runs one chunk through the pipeline.
    ///
    /// Returns `Err` only for failures the host should retry by re-delivering
    /// the chunk; terminal upload failures and archive assembly failures are
    /// reported through metrics and logs, then swallowed.
    pub async fn process_chunk(&self, chunk: Chunk) -> Result<(), UploadError> {
        let mut scan = grouping::scan_chunk(chunk, &self.config);
        self.record_validation_metrics(&mut scan);
        self.upload_partitions(&scan).await
    }

    /// First metrics checkpoint: receive, valid and invalid counts plus
    /// receive latency, per tag. Runs before any upload so validation
    /// outcomes are visible even when the chunk is retried.
    fn record_validation_metrics(&self, scan: &mut ChunkScan) {
        for (tag, labels) in scan.tag_metrics.iter_mut() {
            if labels.worker_id.is_none() {
                labels.worker_id = Some(scan.worker_id.clone());
            }
            let received = scan.incoming_per_tag.get(tag).copied().unwrap_or(0);
            let invalid = scan.invalid_per_tag.get(tag).copied().unwrap_or(0);
            labels.records_valid = received.saturating_sub(invalid);

            self.metrics.set_received(labels, received);
            if invalid > 0 {
                self.metrics.set_invalid(labels, invalid);
            }
            self.metrics.set_valid(labels, labels.records_valid);
            if labels.latency_records > 0 {
                self.metrics.observe_receive_latency(labels);
            }
        }
    }

    async fn upload_partitions(&self, scan: &ChunkScan) -> Result<(), UploadError> {
        for (partition_key, records) in &scan.records_per_partition {
            let tags: Vec<&TagMetrics> = scan
                .tag_metrics
                .values()
                .filter(|labels| labels.log_group_id.as_deref() == Some(partition_key.as_str()))
                .collect();

            let batches =
                grouping::partition_batches(records.clone(), self.config.max_archive_entries);
            for batch in &batches {
                let built = match archive::build_archive(partition_key, batch) {
                    Ok(built) => built,
                    Err(e) => {
                        // Assembly failures are partition-fatal; a retry
                        // would fail identically, so skip the partition.
                        error!("Failed to build archive for log group {partition_key}: {e}");
                        break;
                    }
                };
                if let Some(dir) = self.config.dump_archive_dir.as_deref() {
                    if let Err(e) = archive::dump_archive(dir, &built) {
                        error!("Failed to write archive copy to {dir}: {e}");
                    }
                }

                let started = Instant::now();
                match self.client.upload(partition_key, &built).await {
                    Ok(()) => {
                        self.metrics.observe_upload_time(
                            &scan.worker_id,
                            partition_key,
                            started.elapsed().as_secs_f64(),
                        );
                        for labels in &tags {
                            self.metrics.set_posted(labels);
                        }
                    }
                    Err(e) => {
                        let code = e.status.map(|s| s.as_u16());
                        for labels in &tags {
                            self.metrics.set_error(labels, code, e.reason);
                        }
                        if e.propagate {
                            return Err(e);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
