//! HTTP seam for talking to the SFU.

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal client: SFU endpoints take a protobuf body and answer with one.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(&self, url: &str, body: Bytes) -> Result<HttpResponse, HttpError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(&self, url: &str, body: Bytes) -> Result<HttpResponse, HttpError> {
        let resp = self
            .client
            .post(url)
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        tracing::debug!(url, status, len = body.len(), "sfu response");
        Ok(HttpResponse { status, body })
    }
}
