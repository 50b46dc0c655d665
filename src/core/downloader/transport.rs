// ─── Transport Boundary ───
// The fetch core never talks to a socket itself. Everything goes through
// `HttpTransport`, which issues one request and hands back the response head
// plus a stream of body chunks. Redirects are NOT followed by the transport.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{StatusCode, Url};

use crate::core::error::FetchResult;

/// Outgoing GET request. Pipeline stages may add headers during `init`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Set a raw header. Values that are not valid header text are ignored.
    pub fn set_raw_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => tracing::warn!("Dropping invalid {} header value {:?}", name, value),
        }
    }
}

/// Status line and headers of a response, handed to `finalize`.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// URL that produced this response.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    /// Header value as text, empty when absent or not valid text.
    pub fn raw_header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    pub fn has_raw_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Resolve the redirect target of a 3xx response.
    ///
    /// The Location value is resolved against the current URL. Some servers send
    /// a scheme-relative `//host/path`; that one gets the current scheme prefixed
    /// explicitly.
    pub fn redirect_target(&self) -> Option<Url> {
        if !self.status.is_redirection() || self.status == StatusCode::NOT_MODIFIED {
            return None;
        }
        let raw = self.headers.get(LOCATION)?.to_str().ok()?.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(absolute) = Url::parse(raw) {
            return Some(absolute);
        }

        if raw.len() > 2 && raw.starts_with("//") {
            let patched = format!("{}:{}", self.url.scheme(), raw);
            return Url::parse(&patched).ok();
        }

        self.url.join(raw).ok()
    }
}

/// A response whose body has not been read yet.
pub struct FetchResponse {
    pub head: ResponseHead,
    pub body: BoxStream<'static, FetchResult<Vec<u8>>>,
}

/// External capability to issue HTTP requests and stream responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: FetchRequest) -> FetchResult<FetchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(status: u16, location: Option<&str>) -> ResponseHead {
        let mut headers = HeaderMap::new();
        if let Some(loc) = location {
            headers.insert(LOCATION, HeaderValue::from_str(loc).unwrap());
        }
        ResponseHead {
            url: Url::parse("https://libraries.example.net/a/b.jar").unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            content_length: None,
        }
    }

    #[test]
    fn absolute_location_is_used_verbatim() {
        let target = head(302, Some("https://mirror.example.org/b.jar"))
            .redirect_target()
            .unwrap();
        assert_eq!(target.as_str(), "https://mirror.example.org/b.jar");
    }

    #[test]
    fn scheme_relative_location_gets_original_scheme() {
        let target = head(301, Some("//cdn.example.org/x/b.jar"))
            .redirect_target()
            .unwrap();
        assert_eq!(target.as_str(), "https://cdn.example.org/x/b.jar");
    }

    #[test]
    fn relative_location_resolves_against_current_url() {
        let target = head(307, Some("../c/b.jar")).redirect_target().unwrap();
        assert_eq!(target.as_str(), "https://libraries.example.net/c/b.jar");
    }

    #[test]
    fn missing_location_or_non_redirect_yields_nothing() {
        assert!(head(302, None).redirect_target().is_none());
        assert!(head(200, Some("https://other.example/")).redirect_target().is_none());
    }
}
