//! Chunk-scoped metrics accumulation and the process-wide metric families.
//!
//! The pipeline accumulates counters per tag while a chunk is processed and
//! folds them into the shared prometheus registry at two checkpoints: after
//! validation and after upload. Cross-chunk aggregation is owned by the
//! registry's scrape consumers.

use prometheus::{GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::error::UploadErrorReason;
use crate::record::InvalidReason;

/// Per-tag accumulator, chunk lifetime only.
#[derive(Debug, Clone, Default)]
pub struct TagMetrics {
    pub worker_id: Option<String>,
    pub tag: Option<String>,
    pub log_group_id: Option<String>,
    pub log_source_name: Option<String>,
    pub log_set: Option<String>,
    pub invalid_reason: Option<InvalidReason>,
    /// Valid record count, set once the validation pass completes.
    pub records_valid: u64,
    /// Sum of receive-to-processing latency over valid records, in seconds.
    pub latency_sum: f64,
    /// Number of valid records folded into `latency_sum`.
    pub latency_records: u64,
}

impl TagMetrics {
    /// Average receive latency, rounded to millisecond precision.
    pub fn latency_avg(&self) -> f64 {
        if self.latency_records == 0 {
            return 0.0;
        }
        let avg = self.latency_sum / self.latency_records as f64;
        (avg * 1000.0).round() / 1000.0
    }
}

fn label(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// The metric families emitted by the chunk pipeline.
///
/// Constructed once against an explicit registry handle and shared by
/// reference into every chunk worker; never re-created per chunk.
#[derive(Clone)]
pub struct PipelineMetrics {
    records_received: GaugeVec,
    records_valid: GaugeVec,
    records_invalid: GaugeVec,
    records_posted: GaugeVec,
    records_error: GaugeVec,
    chunk_time_to_receive: HistogramVec,
    chunk_time_to_upload: HistogramVec,
}

const BASE_LABELS: &[&str] = &["worker_id", "tag", "log_group_id", "log_source_name", "log_set"];

impl PipelineMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let records_received = GaugeVec::new(
            Opts::new(
                "logship_records_received",
                "Number of records received by the chunk pipeline.",
            ),
            BASE_LABELS,
        )?;
        let records_valid = GaugeVec::new(
            Opts::new(
                "logship_records_valid",
                "Number of valid records received by the chunk pipeline.",
            ),
            BASE_LABELS,
        )?;
        let records_invalid = GaugeVec::new(
            Opts::new(
                "logship_records_invalid",
                "Number of invalid records received by the chunk pipeline.",
            ),
            &["worker_id", "tag", "log_group_id", "log_source_name", "log_set", "reason"],
        )?;
        let records_posted = GaugeVec::new(
            Opts::new(
                "logship_records_post_success",
                "Number of records posted to the ingestion service.",
            ),
            BASE_LABELS,
        )?;
        let records_error = GaugeVec::new(
            Opts::new(
                "logship_records_post_error",
                "Number of records that failed posting to the ingestion service.",
            ),
            &[
                "worker_id",
                "tag",
                "log_group_id",
                "log_source_name",
                "log_set",
                "error_code",
                "reason",
            ],
        )?;
        let chunk_time_to_receive = HistogramVec::new(
            HistogramOpts::new(
                "logship_chunk_time_to_receive",
                "Average time taken to deliver collected records to the chunk pipeline.",
            ),
            &["worker_id", "tag"],
        )?;
        let chunk_time_to_upload = HistogramVec::new(
            HistogramOpts::new(
                "logship_chunk_time_to_post",
                "Time taken to post the received records to the ingestion service.",
            ),
            &["worker_id", "log_group_id"],
        )?;

        registry.register(Box::new(records_received.clone()))?;
        registry.register(Box::new(records_valid.clone()))?;
        registry.register(Box::new(records_invalid.clone()))?;
        registry.register(Box::new(records_posted.clone()))?;
        registry.register(Box::new(records_error.clone()))?;
        registry.register(Box::new(chunk_time_to_receive.clone()))?;
        registry.register(Box::new(chunk_time_to_upload.clone()))?;

        Ok(PipelineMetrics {
            records_received,
            records_valid,
            records_invalid,
            records_posted,
            records_error,
            chunk_time_to_receive,
            chunk_time_to_upload,
        })
    }

    fn base_values<'a>(labels: &'a TagMetrics) -> [&'a str; 5] {
        [
            label(&labels.worker_id),
            label(&labels.tag),
            label(&labels.log_group_id),
            label(&labels.log_source_name),
            label(&labels.log_set),
        ]
    }

    pub fn set_received(&self, labels: &TagMetrics, count: u64) {
        self.records_received
            .with_label_values(&Self::base_values(labels))
            .set(count as f64);
    }

    pub fn set_valid(&self, labels: &TagMetrics, count: u64) {
        self.records_valid
            .with_label_values(&Self::base_values(labels))
            .set(count as f64);
    }

    pub fn set_invalid(&self, labels: &TagMetrics, count: u64) {
        let reason = labels.invalid_reason.map(|r| r.as_str()).unwrap_or("");
        self.records_invalid
            .with_label_values(&[
                label(&labels.worker_id),
                label(&labels.tag),
                label(&labels.log_group_id),
                label(&labels.log_source_name),
                label(&labels.log_set),
                reason,
            ])
            .set(count as f64);
    }

    pub fn set_posted(&self, labels: &TagMetrics) {
        self.records_posted
            .with_label_values(&Self::base_values(labels))
            .set(labels.records_valid as f64);
    }

    pub fn set_error(&self, labels: &TagMetrics, error_code: Option<u16>, reason: UploadErrorReason) {
        let code = error_code.map(|c| c.to_string()).unwrap_or_default();
        self.records_error
            .with_label_values(&[
                label(&labels.worker_id),
                label(&labels.tag),
                label(&labels.log_group_id),
                label(&labels.log_source_name),
                label(&labels.log_set),
                code.as_str(),
                reason.as_str(),
            ])
            .set(labels.records_valid as f64);
    }

    pub fn observe_receive_latency(&self, labels: &TagMetrics) {
        self.chunk_time_to_receive
            .with_label_values(&[label(&labels.worker_id), label(&labels.tag)])
            .observe(labels.latency_avg());
    }

    pub fn observe_upload_time(&self, worker_id: &str, log_group_id: &str, seconds: f64) {
        self.chunk_time_to_upload
            .with_label_values(&[worker_id, log_group_id])
            .observe((seconds * 1000.0).round() / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_metrics() -> TagMetrics {
        TagMetrics {
            worker_id: Some("0".to_string()),
            tag: Some("t1".to_string()),
            log_group_id: Some("lg-1".to_string()),
            log_source_name: Some("syslog".to_string()),
            log_set: None,
            ..TagMetrics::default()
        }
    }

    #[test]
    fn test_latency_avg_rounding() {
        let labels = TagMetrics {
            latency_sum: 0.30125,
            latency_records: 2,
            ..TagMetrics::default()
        };
        assert_eq!(labels.latency_avg(), 0.151);
    }

    #[test]
    fn test_latency_avg_no_records() {
        assert_eq!(TagMetrics::default().latency_avg(), 0.0);
    }

    #[test]
    fn test_register_and_set() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry).unwrap();

        let labels = tag_metrics();
        metrics.set_received(&labels, 5);
        metrics.set_invalid(&labels, 2);
        metrics.set_valid(&labels, 3);

        let families = registry.gather();
        let received = families
            .iter()
            .find(|f| f.get_name() == "logship_records_received")
            .unwrap();
        assert_eq!(received.get_metric()[0].get_gauge().get_value(), 5.0);

        // Absent log set reports as an empty label value.
        let labels_on_wire = &received.get_metric()[0].get_label();
        assert!(labels_on_wire
            .iter()
            .any(|l| l.get_name() == "log_set" && l.get_value().is_empty()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let _metrics = PipelineMetrics::new(&registry).unwrap();
        assert!(PipelineMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_error_metric_labels() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry).unwrap();

        let mut labels = tag_metrics();
        labels.records_valid = 4;
        metrics.set_error(&labels, Some(429), UploadErrorReason::TooManyRequests);

        let families = registry.gather();
        let errors = families
            .iter()
            .find(|f| f.get_name() == "logship_records_post_error")
            .unwrap();
        let metric = &errors.get_metric()[0];
        assert_eq!(metric.get_gauge().get_value(), 4.0);
        assert!(metric
            .get_label()
            .iter()
            .any(|l| l.get_name() == "reason" && l.get_value() == "TOO_MANY_REQUESTS"));
        assert!(metric
            .get_label()
            .iter()
            .any(|l| l.get_name() == "error_code" && l.get_value() == "429"));
    }
}
