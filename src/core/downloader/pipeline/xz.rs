use std::io::Write;

use async_trait::async_trait;
use tracing::error;
use xz2::write::XzDecoder;

use super::{PipelineReport, Stage};
use crate::core::downloader::status::JobStatus;
use crate::core::downloader::transport::{FetchRequest, ResponseHead};

/// Decodes an xz stream in place, so later stages only ever see plain bytes.
pub struct XzDecodeStage {
    decoder: XzDecoder<Vec<u8>>,
}

impl XzDecodeStage {
    pub fn new() -> Self {
        Self {
            decoder: XzDecoder::new(Vec::new()),
        }
    }
}

impl Default for XzDecodeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for XzDecodeStage {
    async fn init(&mut self, _request: &mut FetchRequest) -> JobStatus {
        self.decoder = XzDecoder::new(Vec::new());
        JobStatus::InProgress
    }

    async fn write(&mut self, data: &mut Vec<u8>) -> JobStatus {
        if let Err(e) = self.decoder.write_all(data) {
            error!("Corrupt xz stream: {}", e);
            return JobStatus::Failed;
        }
        *data = std::mem::take(self.decoder.get_mut());
        JobStatus::InProgress
    }

    fn flush(&mut self, out: &mut Vec<u8>) -> JobStatus {
        let mut tail = match self.decoder.finish() {
            Ok(tail) => tail,
            Err(e) => {
                error!("Truncated xz stream: {}", e);
                return JobStatus::Failed;
            }
        };
        out.append(&mut tail);
        JobStatus::InProgress
    }

    async fn abort(&mut self) -> JobStatus {
        self.decoder = XzDecoder::new(Vec::new());
        JobStatus::Failed
    }

    async fn finalize(
        &mut self,
        _response: &ResponseHead,
        _report: &mut PipelineReport,
    ) -> JobStatus {
        JobStatus::Finished
    }
}
