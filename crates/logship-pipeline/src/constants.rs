//! Limits for archive construction and upload payloads.

/// Maximum number of entries (one per log set) packed into a single archive.
///
/// A partition whose log sets exceed this count is split across multiple
/// archives, each uploaded independently. The counter advances per log-set
/// group, not per record or per byte, so archive counts stay stable for a
/// given key distribution regardless of record volume.
pub const MAX_ENTRIES_PER_ARCHIVE: usize = 100;

/// Log path assigned to records that carry neither a path nor a tag.
pub const UNDEFINED_LOG_PATH: &str = "UNDEFINED";

/// Timezone substituted when a record names an unknown identifier.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Collection source reported when the configured label is unset or
/// unrecognized.
pub const DEFAULT_COLLECTION_SOURCE: &str = "shipper";

/// Collection source label for records collected by the kubernetes solution.
pub const KUBERNETES_COLLECTION_SOURCE: &str = "kubernetes";
