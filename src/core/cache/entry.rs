use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Cache metadata for one file, addressed by (namespace, relative path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    #[serde(rename = "base")]
    pub(crate) base_id: String,
    #[serde(rename = "path")]
    pub(crate) relative_path: String,
    /// Resolved from the namespace directory; never persisted.
    #[serde(skip)]
    pub(crate) full_path: PathBuf,
    #[serde(default)]
    pub(crate) etag: String,
    /// Remote `Last-Modified` string, replayed as `If-Modified-Since`.
    #[serde(default, rename = "remote_changed_timestamp")]
    pub(crate) remote_changed_timestamp: String,
    /// Local file modification time at commit, epoch millis.
    #[serde(default, rename = "last_changed_timestamp")]
    pub(crate) local_changed_timestamp: i64,
    #[serde(default)]
    pub(crate) md5sum: String,
    #[serde(default)]
    pub(crate) stale: bool,
}

impl MetaEntry {
    pub(crate) fn new_stale(base_id: &str, relative_path: &str, full_path: PathBuf) -> Self {
        Self {
            base_id: base_id.to_string(),
            relative_path: relative_path.to_string(),
            full_path,
            etag: String::new(),
            remote_changed_timestamp: String::new(),
            local_changed_timestamp: 0,
            md5sum: String::new(),
            stale: true,
        }
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn set_etag(&mut self, etag: impl Into<String>) {
        self.etag = etag.into();
    }

    pub fn remote_changed_timestamp(&self) -> &str {
        &self.remote_changed_timestamp
    }

    pub fn set_remote_changed_timestamp(&mut self, stamp: impl Into<String>) {
        self.remote_changed_timestamp = stamp.into();
    }

    pub fn local_changed_timestamp(&self) -> i64 {
        self.local_changed_timestamp
    }

    pub fn set_local_changed_timestamp(&mut self, millis: i64) {
        self.local_changed_timestamp = millis;
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    pub fn set_md5sum(&mut self, md5sum: impl Into<String>) {
        self.md5sum = md5sum.into();
    }

    /// A stale entry must be refreshed before its file is reused.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    pub(crate) fn key(&self) -> (String, String) {
        (self.base_id.clone(), self.relative_path.clone())
    }
}
