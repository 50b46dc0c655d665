use async_trait::async_trait;
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::{PipelineReport, Stage};
use crate::core::downloader::status::JobStatus;
use crate::core::downloader::transport::{FetchRequest, ResponseHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn hex(&self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha1(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha256(h) => hex::encode(h.clone().finalize()),
        }
    }
}

/// Running digest over every byte that passes through.
///
/// Never changes control flow: the combined pipeline result is decided by the
/// stages after it.
pub struct ChecksumStage {
    algorithm: ChecksumAlgorithm,
    hasher: Hasher,
    digest: Option<String>,
}

impl ChecksumStage {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            hasher: Hasher::new(algorithm),
            digest: None,
        }
    }

    pub fn md5() -> Self {
        Self::new(ChecksumAlgorithm::Md5)
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Hex digest, available after `finalize`.
    pub fn hash(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

#[async_trait]
impl Stage for ChecksumStage {
    async fn init(&mut self, _request: &mut FetchRequest) -> JobStatus {
        self.hasher = Hasher::new(self.algorithm);
        self.digest = None;
        JobStatus::InProgress
    }

    async fn write(&mut self, data: &mut Vec<u8>) -> JobStatus {
        self.hasher.update(data);
        JobStatus::InProgress
    }

    async fn abort(&mut self) -> JobStatus {
        JobStatus::Failed
    }

    async fn finalize(
        &mut self,
        _response: &ResponseHead,
        report: &mut PipelineReport,
    ) -> JobStatus {
        let digest = self.hasher.hex();
        report.digest = Some(digest.clone());
        self.digest = Some(digest);
        JobStatus::Finished
    }
}
