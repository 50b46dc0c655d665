use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::core::downloader::{FetchRequest, FetchResponse, HttpTransport, ResponseHead};
use crate::core::error::{FetchError, FetchResult};

/// Client with redirects switched off and transparent compression disabled,
/// so the bytes we hash are the bytes the server sent.
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(default_headers)
        .redirect(Policy::none())
        .build()
}

/// `HttpTransport` backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> FetchResult<Self> {
        Ok(Self {
            client: build_http_client(user_agent)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: FetchRequest) -> FetchResult<FetchResponse> {
        let response = self
            .client
            .get(request.url)
            .headers(request.headers)
            .send()
            .await?;

        let head = ResponseHead {
            url: response.url().clone(),
            status: response.status(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
        };
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(FetchError::from))
            .boxed();

        Ok(FetchResponse { head, body })
    }
}
