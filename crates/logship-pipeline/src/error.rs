use reqwest::StatusCode;

/// Errors raised while reading the pipeline configuration from the
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("invalid value for {setting}: {value}")]
    InvalidSetting { setting: &'static str, value: String },
}

/// Errors raised while serializing event groups or assembling the zip
/// container. These are partition-fatal: the partition is skipped for the
/// current chunk and no partial archive is uploaded.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to serialize log events: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write archive entry: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write archive stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason taxonomy for failed uploads, keyed by the remote HTTP status.
///
/// The display form is the label value reported on the `records_error`
/// metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorReason {
    InvalidParameter,
    AuthenticationFailed,
    AuthorizationFailed,
    TooManyRequests,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    Unknown,
}

impl UploadErrorReason {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => UploadErrorReason::InvalidParameter,
            401 => UploadErrorReason::AuthenticationFailed,
            404 => UploadErrorReason::AuthorizationFailed,
            429 => UploadErrorReason::TooManyRequests,
            500 => UploadErrorReason::InternalServerError,
            502 => UploadErrorReason::BadGateway,
            503 => UploadErrorReason::ServiceUnavailable,
            504 => UploadErrorReason::GatewayTimeout,
            505 => UploadErrorReason::HttpVersionNotSupported,
            _ => UploadErrorReason::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadErrorReason::InvalidParameter => "INVALID_PARAMETER",
            UploadErrorReason::AuthenticationFailed => "AUTHENTICATION_FAILED",
            UploadErrorReason::AuthorizationFailed => "AUTHORIZATION_FAILED",
            UploadErrorReason::TooManyRequests => "TOO_MANY_REQUESTS",
            UploadErrorReason::InternalServerError => "INTERNAL_SERVER_ERROR",
            UploadErrorReason::BadGateway => "BAD_GATEWAY",
            UploadErrorReason::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            UploadErrorReason::GatewayTimeout => "GATEWAY_TIMEOUT",
            UploadErrorReason::HttpVersionNotSupported => "HTTP_VERSION_NOT_SUPPORTED",
            UploadErrorReason::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for UploadErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified upload failure.
///
/// `propagate` records whether the failure should be surfaced to the host so
/// the whole chunk is re-delivered, or swallowed as terminal.
#[derive(Debug, thiserror::Error)]
#[error("upload failed for log group {log_group_id}: {reason} (status: {status:?})")]
pub struct UploadError {
    pub log_group_id: String,
    pub reason: UploadErrorReason,
    pub status: Option<StatusCode>,
    pub propagate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_from_status() {
        assert_eq!(
            UploadErrorReason::from_status(StatusCode::BAD_REQUEST),
            UploadErrorReason::InvalidParameter
        );
        assert_eq!(
            UploadErrorReason::from_status(StatusCode::NOT_FOUND),
            UploadErrorReason::AuthorizationFailed
        );
        assert_eq!(
            UploadErrorReason::from_status(StatusCode::TOO_MANY_REQUESTS),
            UploadErrorReason::TooManyRequests
        );
        assert_eq!(
            UploadErrorReason::from_status(StatusCode::IM_A_TEAPOT),
            UploadErrorReason::Unknown
        );
    }

    #[test]
    fn test_reason_display_matches_metric_label() {
        assert_eq!(
            UploadErrorReason::TooManyRequests.to_string(),
            "TOO_MANY_REQUESTS"
        );
        assert_eq!(UploadErrorReason::Unknown.to_string(), "UNKNOWN_ERROR");
    }
}
