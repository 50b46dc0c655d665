// ─── Batch Scheduler ───
// A NetJob owns a set of downloads and keeps up to `max_concurrency` of them
// in flight. Every unit runs to a terminal state before the job reports; a
// failing unit never cancels its siblings.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::download::Download;
use super::status::JobStatus;
use super::transport::HttpTransport;
use crate::core::cache::HttpMetaCache;
use crate::core::error::{FetchError, FetchResult};
use crate::core::state::NetContext;

/// Notifications a job sends to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Progress { current: u64, total: u64 },
    PartSucceeded { index: usize },
    PartFailed { index: usize, url: String },
    Succeeded,
    Failed { failed: Vec<PathBuf> },
}

/// Bookkeeping the job keeps for each of its units.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub url: String,
    pub target_path: PathBuf,
    pub current_progress: u64,
    pub total_progress: u64,
    pub failures: u32,
    pub status: JobStatus,
}

impl PartInfo {
    fn of(download: &Download) -> Self {
        Self {
            url: download.url().to_string(),
            target_path: download.target_path().to_path_buf(),
            current_progress: download.current_progress(),
            total_progress: download.total_progress(),
            failures: download.failures(),
            status: download.status(),
        }
    }
}

/// Adds units to a job from elsewhere, including while it runs.
#[derive(Clone)]
pub struct JobHandle {
    tx: UnboundedSender<Download>,
}

impl JobHandle {
    /// Queue `download` on the job. Returns false once the job is gone.
    pub fn add(&self, download: Download) -> bool {
        self.tx.send(download).is_ok()
    }
}

type InFlight = FuturesUnordered<BoxFuture<'static, (usize, Download, JobStatus)>>;

pub struct NetJob {
    name: String,
    transport: Arc<dyn HttpTransport>,
    // Flushed once every unit has settled.
    metacache: Option<Arc<HttpMetaCache>>,
    max_concurrency: usize,
    // `None` while the unit is out being driven.
    downloads: Vec<Option<Download>>,
    parts: Vec<PartInfo>,
    todo: VecDeque<usize>,
    doing: HashSet<usize>,
    done: HashSet<usize>,
    failed: BTreeSet<usize>,
    current_progress: u64,
    total_progress: u64,
    running: bool,
    add_tx: UnboundedSender<Download>,
    add_rx: Option<UnboundedReceiver<Download>>,
    listeners: Vec<UnboundedSender<JobEvent>>,
}

impl NetJob {
    pub fn new(ctx: &NetContext, name: impl Into<String>) -> Self {
        let mut job = Self::with_transport(name, ctx.transport.clone())
            .with_concurrency(ctx.settings.concurrency);
        job.metacache = Some(ctx.metacache.clone());
        job
    }

    pub fn with_transport(name: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        let (add_tx, add_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            transport,
            metacache: None,
            max_concurrency: 8,
            downloads: Vec::new(),
            parts: Vec::new(),
            todo: VecDeque::new(),
            doing: HashSet::new(),
            done: HashSet::new(),
            failed: BTreeSet::new(),
            current_progress: 0,
            total_progress: 0,
            running: false,
            add_tx,
            add_rx: Some(add_rx),
            listeners: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a unit. Returns its index.
    pub fn add(&mut self, download: Download) -> usize {
        let part = PartInfo::of(&download);
        self.current_progress += part.current_progress;
        self.total_progress += part.total_progress;
        self.parts.push(part);
        self.downloads.push(Some(download));
        self.parts.len() - 1
    }

    /// Handle for adding units while `start` is running.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            tx: self.add_tx.clone(),
        }
    }

    /// Subscribe to this job's events.
    pub fn events(&mut self) -> UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn size(&self) -> usize {
        self.parts.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn parts(&self) -> &[PartInfo] {
        &self.parts
    }

    pub fn download(&self, index: usize) -> Option<&Download> {
        self.downloads.get(index).and_then(Option::as_ref)
    }

    pub fn progress(&self) -> (u64, u64) {
        (self.current_progress, self.total_progress)
    }

    /// Target paths of the units that failed in the last run, in index order.
    pub fn failed_files(&self) -> Vec<PathBuf> {
        self.failed
            .iter()
            .map(|&index| self.parts[index].target_path.clone())
            .collect()
    }

    /// Running units cannot be cancelled.
    pub fn abort(&mut self) -> bool {
        false
    }

    /// Run every unit to a terminal state.
    ///
    /// Errors with [`FetchError::JobFailed`] listing the failed targets when
    /// at least one unit failed.
    pub async fn start(&mut self) -> FetchResult<()> {
        info!(
            "Starting job '{}': {} downloads, concurrency={}",
            self.name,
            self.downloads.len(),
            self.max_concurrency
        );
        let Some(mut add_rx) = self.add_rx.take() else {
            return Err(FetchError::Other(format!("job '{}' is already running", self.name)));
        };
        self.running = true;
        self.todo = (0..self.downloads.len()).collect();
        self.doing.clear();
        self.done.clear();
        self.failed.clear();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(usize, u64, u64)>();
        let mut in_flight = InFlight::new();
        self.start_more_parts(&mut in_flight, &progress_tx);

        loop {
            if in_flight.is_empty() {
                match add_rx.try_recv() {
                    Ok(download) => {
                        self.start_added(download, &mut in_flight, &progress_tx);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            tokio::select! {
                Some((index, download, status)) = in_flight.next() => {
                    while let Ok((part, current, total)) = progress_rx.try_recv() {
                        self.part_progress(part, current, total);
                    }
                    self.part_finished(index, download, status);
                    self.start_more_parts(&mut in_flight, &progress_tx);
                }
                Some((part, current, total)) = progress_rx.recv() => {
                    self.part_progress(part, current, total);
                }
                Some(download) = add_rx.recv() => {
                    self.start_added(download, &mut in_flight, &progress_tx);
                }
            }
        }

        self.add_rx = Some(add_rx);
        self.running = false;

        if let Some(cache) = &self.metacache {
            if let Err(e) = cache.flush().await {
                warn!("Job '{}' could not write the cache index: {}", self.name, e);
            }
        }

        if self.failed.is_empty() {
            info!("Job '{}' succeeded", self.name);
            self.emit(JobEvent::Succeeded);
            Ok(())
        } else {
            let failed = self.failed_files();
            warn!("Job '{}' failed: {} of {} units", self.name, failed.len(), self.size());
            self.emit(JobEvent::Failed {
                failed: failed.clone(),
            });
            Err(FetchError::JobFailed {
                job: self.name.clone(),
                failed,
            })
        }
    }

    fn start_more_parts(
        &mut self,
        in_flight: &mut InFlight,
        progress_tx: &UnboundedSender<(usize, u64, u64)>,
    ) {
        while self.doing.len() < self.max_concurrency {
            let Some(index) = self.todo.pop_front() else {
                return;
            };
            self.launch(index, in_flight, progress_tx);
        }
    }

    fn start_added(
        &mut self,
        download: Download,
        in_flight: &mut InFlight,
        progress_tx: &UnboundedSender<(usize, u64, u64)>,
    ) {
        let index = self.add(download);
        debug!("Job '{}' picked up unit {} while running", self.name, index);
        self.emit_progress();
        self.launch(index, in_flight, progress_tx);
    }

    fn launch(
        &mut self,
        index: usize,
        in_flight: &mut InFlight,
        progress_tx: &UnboundedSender<(usize, u64, u64)>,
    ) {
        let Some(mut download) = self.downloads[index].take() else {
            return;
        };
        self.doing.insert(index);
        self.parts[index].status = JobStatus::InProgress;

        let transport = self.transport.clone();
        let tx = progress_tx.clone();
        in_flight.push(
            async move {
                let status = download
                    .run(transport.as_ref(), move |current, total| {
                        let _ = tx.send((index, current, total));
                    })
                    .await;
                (index, download, status)
            }
            .boxed(),
        );
    }

    fn part_progress(&mut self, index: usize, current: u64, total: u64) {
        let Some(part) = self.parts.get_mut(index) else {
            return;
        };
        if part.status.is_terminal() {
            return;
        }
        part.current_progress = current;
        part.total_progress = total;
        self.emit_progress();
    }

    fn part_finished(&mut self, index: usize, download: Download, status: JobStatus) {
        self.doing.remove(&index);
        {
            let part = &mut self.parts[index];
            part.url = download.url().to_string();
            part.failures = download.failures();
            part.status = status;
            if status == JobStatus::Finished {
                part.total_progress = part.total_progress.max(part.current_progress);
                part.current_progress = part.total_progress;
            }
        }
        self.downloads[index] = Some(download);

        if status == JobStatus::Finished {
            self.done.insert(index);
            self.emit(JobEvent::PartSucceeded { index });
        } else {
            self.failed.insert(index);
            let url = self.parts[index].url.clone();
            warn!("Job '{}': unit {} ({}) failed", self.name, index, url);
            self.emit(JobEvent::PartFailed { index, url });
        }
        self.emit_progress();
    }

    fn emit_progress(&mut self) {
        self.current_progress = self.parts.iter().map(|p| p.current_progress).sum();
        self.total_progress = self.parts.iter().map(|p| p.total_progress).sum();
        self.emit(JobEvent::Progress {
            current: self.current_progress,
            total: self.total_progress,
        });
    }

    fn emit(&mut self, event: JobEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
