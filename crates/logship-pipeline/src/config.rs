use std::collections::HashMap;
use std::env;

use tracing::warn;

use crate::constants;
use crate::error::ConfigError;

/// Configuration consumed by the chunk-processing core.
///
/// Owned by the process wiring; constructed once at startup and shared by
/// reference into every chunk worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote ingestion service.
    pub endpoint: String,
    /// Tenancy namespace the upload URL is scoped to.
    pub namespace: String,
    /// Maximum entries (log sets) per archive before splitting.
    pub max_archive_entries: usize,
    /// Dotted-key remapping applied to flattened kubernetes metadata.
    pub kubernetes_metadata_keys_mapping: HashMap<String, String>,
    /// When set, ordinarily-terminal 4xx upload failures (400/401/404) are
    /// propagated to the host retry machinery instead of being swallowed.
    pub retry_on_4xx: bool,
    /// Collection source label sent with every upload.
    pub collection_source: String,
    /// Per-request upload timeout, in seconds.
    pub upload_timeout_secs: u64,
    /// Optional https proxy for the upload client.
    pub proxy_url: Option<String>,
    /// When set, finished archives are also written to this directory for
    /// debugging.
    pub dump_archive_dir: Option<String>,
}

fn default_kubernetes_mapping() -> HashMap<String, String> {
    [
        ("container_name", "Container"),
        ("namespace_name", "Namespace"),
        ("pod_name", "Pod"),
        ("container_image", "Container Image Name"),
        ("host", "Node"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Reads the configuration from the environment.
    ///
    /// `LOGSHIP_ENDPOINT` and `LOGSHIP_NAMESPACE` are required; everything
    /// else falls back to defaults.
    pub fn from_env() -> Result<Config, ConfigError> {
        let endpoint = env::var("LOGSHIP_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingSetting("LOGSHIP_ENDPOINT"))?;
        let namespace = env::var("LOGSHIP_NAMESPACE")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingSetting("LOGSHIP_NAMESPACE"))?;

        let max_archive_entries = match env::var("LOGSHIP_MAX_ARCHIVE_ENTRIES") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidSetting {
                    setting: "LOGSHIP_MAX_ARCHIVE_ENTRIES",
                    value: raw,
                })?,
            Err(_) => constants::MAX_ENTRIES_PER_ARCHIVE,
        };

        let kubernetes_metadata_keys_mapping =
            match env::var("LOGSHIP_KUBERNETES_METADATA_KEYS") {
                Ok(raw) => serde_json::from_str::<HashMap<String, String>>(&raw).map_err(|_| {
                    ConfigError::InvalidSetting {
                        setting: "LOGSHIP_KUBERNETES_METADATA_KEYS",
                        value: raw,
                    }
                })?,
                Err(_) => default_kubernetes_mapping(),
            };

        let retry_on_4xx = env::var("LOGSHIP_RETRY_ON_4XX")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let collection_source = match env::var("LOGSHIP_COLLECTION_SOURCE") {
            Ok(raw)
                if raw == constants::DEFAULT_COLLECTION_SOURCE
                    || raw == constants::KUBERNETES_COLLECTION_SOURCE =>
            {
                raw
            }
            Ok(raw) => {
                warn!(
                    "Unrecognized collection source '{raw}', using {}",
                    constants::DEFAULT_COLLECTION_SOURCE
                );
                constants::DEFAULT_COLLECTION_SOURCE.to_string()
            }
            Err(_) => constants::DEFAULT_COLLECTION_SOURCE.to_string(),
        };

        let upload_timeout_secs = env::var("LOGSHIP_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let proxy_url = env::var("LOGSHIP_PROXY_URL")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        let dump_archive_dir = env::var("LOGSHIP_DUMP_ARCHIVE_DIR")
            .ok()
            .filter(|v| !v.is_empty());

        Ok(Config {
            endpoint,
            namespace,
            max_archive_entries,
            kubernetes_metadata_keys_mapping,
            retry_on_4xx,
            collection_source,
            upload_timeout_secs,
            proxy_url,
            dump_archive_dir,
        })
    }
}

impl Default for Config {
    /// Defaults suitable for tests; production wiring uses
    /// [`Config::from_env`].
    fn default() -> Self {
        Config {
            endpoint: "http://localhost:0".to_string(),
            namespace: "test-namespace".to_string(),
            max_archive_entries: constants::MAX_ENTRIES_PER_ARCHIVE,
            kubernetes_metadata_keys_mapping: default_kubernetes_mapping(),
            retry_on_4xx: false,
            collection_source: constants::DEFAULT_COLLECTION_SOURCE.to_string(),
            upload_timeout_secs: 5,
            proxy_url: None,
            dump_archive_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kubernetes_mapping() {
        let config = Config::default();
        assert_eq!(
            config
                .kubernetes_metadata_keys_mapping
                .get("container_name")
                .map(String::as_str),
            Some("Container")
        );
        assert_eq!(config.max_archive_entries, 100);
        assert!(!config.retry_on_4xx);
    }
}
