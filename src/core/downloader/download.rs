use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{StatusCode, Url};
use tracing::{debug, error, warn};

use super::pipeline::{ChecksumStage, MetaCacheSink, Pipeline, XzDecodeStage};
use super::status::JobStatus;
use super::transport::{FetchRequest, FetchResponse, HttpTransport};
use crate::core::cache::MetaEntry;
use crate::core::error::{FetchError, FetchResult};
use crate::core::state::NetContext;

pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// One URL fetched through a pipeline into one target file.
pub struct Download {
    url: Url,
    target_path: PathBuf,
    pipeline: Pipeline,
    status: JobStatus,
    current_progress: u64,
    total_progress: u64,
    failures: u32,
    max_redirects: u32,
}

impl Download {
    /// Cache-backed download: md5 checksum, then the cache sink for `entry`.
    pub fn new(ctx: &NetContext, url: &str, entry: MetaEntry) -> FetchResult<Self> {
        let target = entry.full_path().to_path_buf();
        let pipeline = Pipeline::new()
            .with_stage(ChecksumStage::md5())
            .with_stage(MetaCacheSink::new(entry, ctx.metacache.clone()));
        Ok(Self::with_pipeline(url, target, pipeline)?.max_redirects(ctx.settings.max_redirects))
    }

    /// Like [`Download::new`], but the body is an xz stream that is decoded
    /// before hashing and storing.
    pub fn forge_xz(ctx: &NetContext, url: &str, entry: MetaEntry) -> FetchResult<Self> {
        let target = entry.full_path().to_path_buf();
        let pipeline = Pipeline::new()
            .with_stage(XzDecodeStage::new())
            .with_stage(ChecksumStage::md5())
            .with_stage(MetaCacheSink::new(entry, ctx.metacache.clone()));
        Ok(Self::with_pipeline(url, target, pipeline)?.max_redirects(ctx.settings.max_redirects))
    }

    pub fn with_pipeline(
        url: &str,
        target_path: impl Into<PathBuf>,
        pipeline: Pipeline,
    ) -> FetchResult<Self> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            url,
            target_path: target_path.into(),
            pipeline,
            status: JobStatus::NotStarted,
            current_progress: 0,
            total_progress: 1,
            failures: 0,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        })
    }

    pub fn max_redirects(mut self, limit: u32) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Current URL. Changes when a redirect is followed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn current_progress(&self) -> u64 {
        self.current_progress
    }

    pub fn total_progress(&self) -> u64 {
        self.total_progress
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Digest computed by the checksum stage on the last committed fetch.
    pub fn digest(&self) -> Option<&str> {
        self.pipeline.report().digest.as_deref()
    }

    /// Drive the download to a terminal state.
    ///
    /// `on_progress` gets `(current, total)` after every chunk that made it
    /// through the pipeline.
    pub async fn run<F>(&mut self, transport: &dyn HttpTransport, mut on_progress: F) -> JobStatus
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut redirects = 0u32;

        loop {
            let mut request = FetchRequest::new(self.url.clone());
            match self.pipeline.init(&mut request).await {
                JobStatus::Finished => {
                    debug!("Download cache hit {}", self.url);
                    self.status = JobStatus::Finished;
                    return self.status;
                }
                JobStatus::Failed | JobStatus::NotStarted => {
                    error!("Could not prepare download of {}", self.url);
                    return self.fail().await;
                }
                JobStatus::InProgress => {}
            }
            self.status = JobStatus::InProgress;
            debug!("Downloading {}", self.url);

            let response = match transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Failed {} with reason {}", self.url, e);
                    return self.fail().await;
                }
            };

            if let Some(target) = response.head.redirect_target() {
                if redirects >= self.max_redirects {
                    error!(
                        "Giving up on {} after {} redirects",
                        self.url, self.max_redirects
                    );
                    return self.fail().await;
                }
                redirects += 1;
                debug!("Following redirect from {} to {}", self.url, target);
                self.pipeline.abort().await;
                self.url = target;
                continue;
            }

            return self.receive(response, &mut on_progress).await;
        }
    }

    async fn receive<F>(&mut self, response: FetchResponse, on_progress: &mut F) -> JobStatus
    where
        F: FnMut(u64, u64) + Send,
    {
        let FetchResponse { head, mut body } = response;

        if !(head.status.is_success() || head.status == StatusCode::NOT_MODIFIED) {
            error!("Failed {} with HTTP {}", self.url, head.status.as_u16());
            return self.fail().await;
        }

        self.current_progress = 0;
        self.total_progress = head.content_length.unwrap_or(0);

        while let Some(chunk) = body.next().await {
            let mut data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed {} while reading the body: {}", self.url, e);
                    return self.fail().await;
                }
            };
            let received = data.len() as u64;
            if self.pipeline.write(&mut data).await == JobStatus::Failed {
                return self.fail().await;
            }
            self.current_progress += received;
            self.total_progress = self.total_progress.max(self.current_progress);
            on_progress(self.current_progress, self.total_progress);
        }

        if self.pipeline.finalize(&head).await == JobStatus::Failed {
            warn!("Could not finalize {}", self.url);
            return self.fail().await;
        }
        debug!("Download succeeded {}", self.url);
        self.status = JobStatus::Finished;
        self.status
    }

    async fn fail(&mut self) -> JobStatus {
        self.pipeline.abort().await;
        self.failures += 1;
        self.status = JobStatus::Failed;
        self.status
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
    use xz2::write::XzEncoder;

    use super::*;
    use crate::core::cache::LIBRARIES_BASE;
    use crate::core::downloader::testing::{test_context, ScriptedResponse, ScriptedTransport};

    const LIB_URL: &str = "https://libraries.example.net/org/demo/demo/1.0/demo-1.0.jar";
    const LIB_PATH: &str = "org/demo/demo/1.0/demo-1.0.jar";

    async fn entry(ctx: &NetContext) -> MetaEntry {
        ctx.metacache
            .resolve_entry(LIBRARIES_BASE, LIB_PATH)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_into_target_and_records_entry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            LIB_URL,
            ScriptedResponse::ok(vec![b"hello ".to_vec(), b"world".to_vec()])
                .header("ETag", "\"v1\"")
                .header("Last-Modified", "Tue, 01 Sep 2026 10:00:00 GMT"),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut download = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let status = download
            .run(transport.as_ref(), move |cur, total| {
                sink.lock().unwrap().push((cur, total))
            })
            .await;

        assert_eq!(status, JobStatus::Finished);
        assert_eq!(std::fs::read(download.target_path()).unwrap(), b"hello world");
        assert_eq!(download.digest(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));

        let progress = seen.lock().unwrap().clone();
        assert_eq!(progress.last().map(|p| p.0), Some(11));
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));

        let stored = entry(&ctx).await;
        assert!(!stored.is_stale());
        assert_eq!(stored.etag(), "\"v1\"");
        assert_eq!(stored.md5sum(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn fresh_entry_is_a_cache_hit_without_network() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(LIB_URL, ScriptedResponse::ok(vec![b"jar".to_vec()]));
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut first = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        assert_eq!(first.run(transport.as_ref(), |_, _| {}).await, JobStatus::Finished);

        let mut second = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        assert_eq!(second.run(transport.as_ref(), |_, _| {}).await, JobStatus::Finished);
        assert_eq!(transport.request_count(LIB_URL), 1);
    }

    #[tokio::test]
    async fn follows_redirects_including_scheme_relative() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(LIB_URL, ScriptedResponse::redirect("//mirror.example.org/demo.jar"));
        transport.route(
            "https://mirror.example.org/demo.jar",
            ScriptedResponse::redirect("/final/demo.jar"),
        );
        transport.route(
            "https://mirror.example.org/final/demo.jar",
            ScriptedResponse::ok(vec![b"mirrored".to_vec()]),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut download = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        let status = download.run(transport.as_ref(), |_, _| {}).await;

        assert_eq!(status, JobStatus::Finished);
        assert_eq!(
            download.url().as_str(),
            "https://mirror.example.org/final/demo.jar"
        );
        assert_eq!(std::fs::read(download.target_path()).unwrap(), b"mirrored");
    }

    #[tokio::test]
    async fn redirect_loop_hits_the_limit() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..5 {
            transport.route(LIB_URL, ScriptedResponse::redirect(LIB_URL));
        }
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut download = Download::new(&ctx, LIB_URL, entry(&ctx).await)
            .unwrap()
            .max_redirects(3);
        assert_eq!(download.run(transport.as_ref(), |_, _| {}).await, JobStatus::Failed);
        assert_eq!(transport.request_count(LIB_URL), 4);
        assert_eq!(download.failures(), 1);
    }

    #[tokio::test]
    async fn not_modified_keeps_existing_file() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            LIB_URL,
            ScriptedResponse::ok(vec![b"v1 content".to_vec()])
                .header("ETag", "\"v1\"")
                .header("Last-Modified", "Tue, 01 Sep 2026 10:00:00 GMT"),
        );
        transport.route(LIB_URL, ScriptedResponse::status(304));
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut first = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        assert_eq!(first.run(transport.as_ref(), |_, _| {}).await, JobStatus::Finished);

        let mut stale = entry(&ctx).await;
        stale.set_stale(true);
        let mut second = Download::new(&ctx, LIB_URL, stale).unwrap();
        assert_eq!(second.run(transport.as_ref(), |_, _| {}).await, JobStatus::Finished);

        let requests = transport.requests();
        let conditional = &requests[1];
        assert_eq!(conditional.headers.get(IF_NONE_MATCH).unwrap(), "\"v1\"");
        assert_eq!(
            conditional.headers.get(IF_MODIFIED_SINCE).unwrap(),
            "Tue, 01 Sep 2026 10:00:00 GMT"
        );
        assert_eq!(std::fs::read(second.target_path()).unwrap(), b"v1 content");
        assert_eq!(entry(&ctx).await.md5sum(), first.digest().unwrap());
    }

    #[tokio::test]
    async fn http_error_fails_and_leaves_previous_file() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(LIB_URL, ScriptedResponse::status(404));
        let (_dir, ctx) = test_context(transport.clone()).await;

        let target = entry(&ctx).await.full_path().to_path_buf();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"old").unwrap();

        let mut stale = entry(&ctx).await;
        stale.set_stale(true);
        let mut download = Download::new(&ctx, LIB_URL, stale).unwrap();
        assert_eq!(download.run(transport.as_ref(), |_, _| {}).await, JobStatus::Failed);
        assert_eq!(download.status(), JobStatus::Failed);
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn broken_body_fails_without_touching_target() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            LIB_URL,
            ScriptedResponse::ok(vec![b"partial".to_vec()]).fail_mid_body(),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut download = Download::new(&ctx, LIB_URL, entry(&ctx).await).unwrap();
        assert_eq!(download.run(transport.as_ref(), |_, _| {}).await, JobStatus::Failed);
        assert!(!download.target_path().exists());
        assert!(entry(&ctx).await.is_stale());
    }

    #[tokio::test]
    async fn forge_xz_stores_decoded_bytes() {
        let plain = b"forge universal".repeat(100);
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(&plain).unwrap();
        let packed = encoder.finish().unwrap();

        let url = format!("{}.pack.xz", LIB_URL);
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            &url,
            ScriptedResponse::ok(packed.chunks(64).map(|c| c.to_vec()).collect()),
        );
        let (_dir, ctx) = test_context(transport.clone()).await;

        let mut download = Download::forge_xz(&ctx, &url, entry(&ctx).await).unwrap();
        assert_eq!(download.run(transport.as_ref(), |_, _| {}).await, JobStatus::Finished);
        assert_eq!(std::fs::read(download.target_path()).unwrap(), plain);
    }

    #[test]
    fn rejects_unparseable_url() {
        let err = Download::with_pipeline("not a url", "/tmp/x", Pipeline::new())
            .err()
            .unwrap();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
