// ─── Downloader ───
// Fetch units (`Download`) pushed through a stage pipeline and scheduled in
// bounded batches (`NetJob`).

mod download;
mod job;
pub mod pipeline;
mod status;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{Download, DEFAULT_MAX_REDIRECTS};
pub use job::{JobEvent, JobHandle, NetJob, PartInfo};
pub use status::JobStatus;
pub use transport::{FetchRequest, FetchResponse, HttpTransport, ResponseHead};
