use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use super::{PipelineReport, Stage};
use crate::core::cache::{file_mtime_millis, HttpMetaCache, MetaEntry};
use crate::core::downloader::status::JobStatus;
use crate::core::downloader::transport::{FetchRequest, ResponseHead};

/// Sibling file that receives the body until it is renamed over the target.
///
/// Removed on drop unless it was committed.
struct StagingFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    settled: bool,
}

impl StagingFile {
    async fn create(target: &Path) -> std::io::Result<Self> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = target.with_file_name(format!(
            ".{}.{}.part",
            name,
            uuid::Uuid::new_v4().simple()
        ));
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            settled: false,
        })
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data).await,
            None => Err(std::io::Error::other("staging file already closed")),
        }
    }

    /// Flush, sync and rename over `target`. On error the staging file is removed.
    async fn commit(mut self, target: &Path) -> std::io::Result<()> {
        let result = self.close_and_rename(target).await;
        if result.is_err() {
            self.discard().await;
        } else {
            self.settled = true;
        }
        result
    }

    async fn close_and_rename(&mut self, target: &Path) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            // handle dropped here so the rename also works on Windows
        }
        tokio::fs::rename(&self.path, target).await
    }

    async fn discard(&mut self) {
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove staging file {:?}: {}", self.path, e);
            }
        }
        self.settled = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.settled {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Terminal stage: streams into a staging file, commits it atomically over the
/// entry's path and records the result in the cache index.
pub struct MetaCacheSink {
    entry: MetaEntry,
    cache: Arc<HttpMetaCache>,
    staging: Option<StagingFile>,
    wrote_any_data: bool,
}

impl MetaCacheSink {
    pub fn new(entry: MetaEntry, cache: Arc<HttpMetaCache>) -> Self {
        Self {
            entry,
            cache,
            staging: None,
            wrote_any_data: false,
        }
    }

    pub fn entry(&self) -> &MetaEntry {
        &self.entry
    }

    async fn discard_staging(&mut self) {
        if let Some(mut staging) = self.staging.take() {
            staging.discard().await;
        }
        self.wrote_any_data = false;
    }
}

#[async_trait]
impl Stage for MetaCacheSink {
    async fn init(&mut self, request: &mut FetchRequest) -> JobStatus {
        if !self.entry.is_stale() {
            return JobStatus::Finished;
        }

        // A redirect restarts the attempt; the previous staging file is useless.
        self.discard_staging().await;

        let path = self.entry.full_path().to_path_buf();
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("Could not create folder for {:?}: {}", path, e);
                return JobStatus::Failed;
            }
        }

        match StagingFile::create(&path).await {
            Ok(staging) => self.staging = Some(staging),
            Err(e) => {
                error!("Could not open {:?} for writing: {}", path, e);
                return JobStatus::Failed;
            }
        }

        let has_content = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file() && meta.len() != 0)
            .unwrap_or(false);
        if has_content {
            if !self.entry.remote_changed_timestamp().is_empty() {
                request.set_raw_header(IF_MODIFIED_SINCE, self.entry.remote_changed_timestamp());
            }
            if !self.entry.etag().is_empty() {
                request.set_raw_header(IF_NONE_MATCH, self.entry.etag());
            }
        }

        JobStatus::InProgress
    }

    async fn write(&mut self, data: &mut Vec<u8>) -> JobStatus {
        let Some(staging) = self.staging.as_mut() else {
            error!("Write into {:?} without an open staging file", self.entry.full_path());
            return JobStatus::Failed;
        };
        if let Err(e) = staging.write(data).await {
            error!("Failed writing into {:?}: {}", self.entry.full_path(), e);
            self.discard_staging().await;
            return JobStatus::Failed;
        }
        self.wrote_any_data |= !data.is_empty();
        JobStatus::InProgress
    }

    async fn abort(&mut self) -> JobStatus {
        self.discard_staging().await;
        JobStatus::Failed
    }

    async fn finalize(
        &mut self,
        response: &ResponseHead,
        report: &mut PipelineReport,
    ) -> JobStatus {
        let path = self.entry.full_path().to_path_buf();

        if self.wrote_any_data {
            let Some(staging) = self.staging.take() else {
                error!("Lost staging file for {:?}", path);
                return JobStatus::Failed;
            };
            if let Err(e) = staging.commit(&path).await {
                error!("Failed to commit changes to {:?}: {}", path, e);
                self.wrote_any_data = false;
                return JobStatus::Failed;
            }
            if let Some(digest) = &report.digest {
                self.entry.set_md5sum(digest.clone());
            }
            self.entry.set_etag(response.raw_header("ETag"));
        } else {
            self.discard_staging().await;
            if response.has_raw_header("ETag") {
                self.entry.set_etag(response.raw_header("ETag"));
            }
        }

        if response.has_raw_header("Last-Modified") {
            self.entry
                .set_remote_changed_timestamp(response.raw_header("Last-Modified"));
        }
        self.entry
            .set_local_changed_timestamp(file_mtime_millis(&path).await.unwrap_or(0));
        self.entry.set_stale(false);
        self.wrote_any_data = false;

        if let Err(e) = self.cache.update_entry(&self.entry).await {
            warn!("Could not persist cache entry for {:?}: {}", path, e);
        }
        debug!("Committed {:?}", path);
        JobStatus::Finished
    }
}
