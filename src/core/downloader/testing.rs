//! In-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::StatusCode;
use tokio::sync::Notify;

use super::transport::{FetchRequest, FetchResponse, HttpTransport, ResponseHead};
use crate::core::error::{FetchError, FetchResult};
use crate::core::state::{FetchSettings, NetContext};

#[derive(Clone)]
pub(crate) struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    fail_mid_body: bool,
    delay: Option<Duration>,
    hold: Option<Arc<Notify>>,
    release: Option<Arc<Notify>>,
}

impl ScriptedResponse {
    pub(crate) fn ok(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks,
            fail_mid_body: false,
            delay: None,
            hold: None,
            release: None,
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    pub(crate) fn redirect(location: &str) -> Self {
        Self::status(302).header("Location", location)
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn fail_mid_body(mut self) -> Self {
        self.fail_mid_body = true;
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer only after `gate` was notified.
    pub(crate) fn hold(mut self, gate: Arc<Notify>) -> Self {
        self.hold = Some(gate);
        self
    }

    /// Notify `gate` when this response is served.
    pub(crate) fn release(mut self, gate: Arc<Notify>) -> Self {
        self.release = Some(gate);
        self
    }
}

/// Decrements the in-flight counter once the body is gone.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves queued responses per URL and records every request.
///
/// The last queued response of a URL is repeated. Unknown URLs get a 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    requests: Mutex<Vec<FetchRequest>>,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(&self, url: &str, response: ScriptedResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    /// Highest number of responses whose bodies were open at the same time.
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> ScriptedResponse {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| ScriptedResponse::status(404)),
            None => ScriptedResponse::status(404),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: FetchRequest) -> FetchResult<FetchResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let scripted = self.next_response(url.as_str());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());

        if let Some(gate) = &scripted.release {
            gate.notify_one();
        }
        if let Some(gate) = &scripted.hold {
            gate.notified().await;
        }
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &scripted.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let status = StatusCode::from_u16(scripted.status).unwrap();
        let content_length = if status.is_success() && !headers.contains_key(LOCATION) {
            Some(scripted.chunks.iter().map(|c| c.len() as u64).sum())
        } else {
            None
        };

        let mut items: Vec<FetchResult<Vec<u8>>> = scripted.chunks.into_iter().map(Ok).collect();
        if scripted.fail_mid_body {
            items.push(Err(FetchError::Other("connection reset".into())));
        }
        let body = stream::unfold((items.into_iter(), guard), |(mut items, guard)| async move {
            items.next().map(|item| (item, (items, guard)))
        })
        .boxed();

        Ok(FetchResponse {
            head: ResponseHead {
                url,
                status,
                headers,
                content_length,
            },
            body,
        })
    }
}

/// Context rooted in a fresh temp dir, talking to `transport`.
pub(crate) async fn test_context(
    transport: Arc<ScriptedTransport>,
) -> (tempfile::TempDir, NetContext) {
    let dir = tempfile::tempdir().unwrap();
    let settings = FetchSettings {
        library_base_url: "https://libraries.example.net/".to_string(),
        resources_base_url: "https://resources.example.net/".to_string(),
        ..FetchSettings::default()
    };
    let ctx = NetContext::open(dir.path(), settings, transport)
        .await
        .unwrap();
    (dir, ctx)
}
