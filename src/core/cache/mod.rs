mod entry;
mod metacache;

use std::path::Path;

use chrono::{DateTime, Utc};

pub use entry::MetaEntry;
pub use metacache::HttpMetaCache;

/// Namespaces registered by `NetContext`.
pub const LIBRARIES_BASE: &str = "libraries";
pub const VERSIONS_BASE: &str = "versions";
pub const ASSET_INDEXES_BASE: &str = "asset_indexes";
pub const ASSET_OBJECTS_BASE: &str = "asset_objects";
pub const FML_LIBRARIES_BASE: &str = "fmllibs";

/// Modification time of `path` in epoch millis, `None` if it cannot be read.
pub(crate) async fn file_mtime_millis(path: &Path) -> Option<i64> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).timestamp_millis())
}
