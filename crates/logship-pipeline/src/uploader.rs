//! The upload client: posts finished archives to the ingestion service and
//! classifies failures into retryable and terminal outcomes.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::{error, info, warn};

use crate::archive::BuiltArchive;
use crate::config::Config;
use crate::error::{UploadError, UploadErrorReason};

/// HTTP client for the log-events upload endpoint.
///
/// Built once at startup and shared by every chunk worker; reqwest clients
/// pool connections internally.
#[derive(Clone)]
pub struct UploadClient {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
    collection_source: String,
    retry_on_4xx: bool,
}

impl UploadClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.upload_timeout_secs));
        if let Some(proxy_url) = config.proxy_url.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        Ok(UploadClient {
            client: builder.build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            collection_source: config.collection_source.clone(),
            retry_on_4xx: config.retry_on_4xx,
        })
    }

    /// Posts one archive for the given partition.
    ///
    /// Terminal failures (400, 401, 404 without the retry override) resolve
    /// to an error with `propagate` unset; everything else asks the host to
    /// re-deliver the chunk.
    pub async fn upload(
        &self,
        log_group_id: &str,
        archive: &BuiltArchive,
    ) -> Result<(), UploadError> {
        let url = format!(
            "{}/namespaces/{}/actions/uploadLogEventsFile",
            self.endpoint, self.namespace
        );
        let result = self
            .client
            .post(&url)
            .query(&[("logGroupId", log_group_id)])
            .header(CONTENT_TYPE, "application/zip")
            .header(
                "opc-meta-properties",
                format!(r#"{{"source":"{}"}}"#, self.collection_source),
            )
            .body(archive.bytes.clone())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to send archive for log group {log_group_id}: {e}");
                return Err(UploadError {
                    log_group_id: log_group_id.to_string(),
                    reason: UploadErrorReason::Unknown,
                    status: None,
                    propagate: true,
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            let request_id = response
                .headers()
                .get("opc-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            info!(
                "Uploaded {} records for log group {log_group_id} ({} bytes, request id: {request_id})",
                archive.record_count,
                archive.bytes.len()
            );
            return Ok(());
        }

        let reason = UploadErrorReason::from_status(status);
        let propagate = match reason {
            UploadErrorReason::InvalidParameter
            | UploadErrorReason::AuthenticationFailed
            | UploadErrorReason::AuthorizationFailed => self.retry_on_4xx,
            _ => true,
        };
        if propagate {
            warn!(
                "Upload failed for log group {log_group_id} with status {status}: {reason}. \
                 The chunk will be re-delivered"
            );
        } else {
            error!(
                "Upload failed for log group {log_group_id} with status {status}: {reason}. \
                 Dropping the archive"
            );
        }
        Err(UploadError {
            log_group_id: log_group_id.to_string(),
            reason,
            status: Some(status),
            propagate,
        })
    }
}
