// ─── Processing Pipeline ───
// Ordered stages applied to one download's bytes. Every call reaches the
// stages in order; the combined result is the last stage's result unless an
// earlier stage fails first.

mod cache_sink;
mod checksum;
mod xz;

pub use cache_sink::MetaCacheSink;
pub use checksum::{ChecksumAlgorithm, ChecksumStage};
pub use xz::XzDecodeStage;

use async_trait::async_trait;

use super::status::JobStatus;
use super::transport::{FetchRequest, ResponseHead};

/// Values stages hand to later stages while finalizing.
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    /// Hex digest of everything written, set by a checksum stage.
    pub digest: Option<String>,
}

/// One processing step of a download.
#[async_trait]
pub trait Stage: Send {
    /// Prepare for a new attempt. May add headers to the outgoing request.
    /// `Finished` means the content is already in place and nothing has to be fetched.
    async fn init(&mut self, request: &mut FetchRequest) -> JobStatus;

    /// Consume a chunk. A stage may rewrite `data` in place before later stages see it.
    async fn write(&mut self, data: &mut Vec<u8>) -> JobStatus;

    /// Bytes the stage still holds once the body has ended, appended to `out`.
    fn flush(&mut self, _out: &mut Vec<u8>) -> JobStatus {
        JobStatus::InProgress
    }

    /// Throw away any partial state. Never touches committed output.
    async fn abort(&mut self) -> JobStatus;

    async fn finalize(&mut self, response: &ResponseHead, report: &mut PipelineReport)
        -> JobStatus;
}

/// Owned, ordered sequence of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    report: PipelineReport,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Report of the last successful finalize.
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    pub async fn init(&mut self, request: &mut FetchRequest) -> JobStatus {
        let mut status = JobStatus::InProgress;
        for stage in self.stages.iter_mut() {
            status = stage.init(request).await;
            if status == JobStatus::Failed {
                return status;
            }
        }
        status
    }

    pub async fn write(&mut self, data: &mut Vec<u8>) -> JobStatus {
        Self::write_from(&mut self.stages, data).await
    }

    pub async fn abort(&mut self) -> JobStatus {
        for stage in self.stages.iter_mut() {
            stage.abort().await;
        }
        JobStatus::Failed
    }

    pub async fn finalize(&mut self, response: &ResponseHead) -> JobStatus {
        // Drain buffered bytes front to back so each stage has seen its full
        // input before anything is finalized.
        for idx in 0..self.stages.len() {
            let mut tail = Vec::new();
            if self.stages[idx].flush(&mut tail) == JobStatus::Failed {
                return JobStatus::Failed;
            }
            if !tail.is_empty()
                && Self::write_from(&mut self.stages[idx + 1..], &mut tail).await
                    == JobStatus::Failed
            {
                return JobStatus::Failed;
            }
        }

        let mut report = PipelineReport::default();
        let mut status = JobStatus::Finished;
        for stage in self.stages.iter_mut() {
            status = stage.finalize(response, &mut report).await;
            if status == JobStatus::Failed {
                return status;
            }
        }
        self.report = report;
        status
    }

    async fn write_from(stages: &mut [Box<dyn Stage>], data: &mut Vec<u8>) -> JobStatus {
        let mut status = JobStatus::InProgress;
        for stage in stages.iter_mut() {
            status = stage.write(data).await;
            if status == JobStatus::Failed {
                return status;
            }
        }
        status
    }
}
