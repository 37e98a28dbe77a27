//! HTTP transport adapter.
//!
//! Sends exactly one request and normalizes the response. No provider
//! semantics live here: a non-2xx status or network fault is returned
//! as-is for the caller to propagate.

pub mod encoding;
pub mod runtime;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;
use crate::models::{Method, RequestEnvelope, TransportResponse};

pub use encoding::decode_body;
pub use runtime::HostRuntime;

/// How the request timeout is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStrategy {
    /// reqwest's own per-request timeout
    Native(Duration),
    /// Race the request future against a timer
    Race(Duration),
}

impl TimeoutStrategy {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutStrategy::Native(d) | TimeoutStrategy::Race(d) => *d,
        }
    }
}

/// Sends one request envelope
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: RequestEnvelope) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    strategy: TimeoutStrategy,
}

impl HttpTransport {
    pub fn new(strategy: TimeoutStrategy) -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        Ok(Self { client, strategy })
    }

    /// Transport configured for the detected host runtime
    pub fn for_runtime(runtime: HostRuntime, timeout: Duration) -> Result<Self, TransportError> {
        Self::new(runtime.timeout_strategy(timeout))
    }

    fn to_reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

async fn exchange(request: RequestBuilder) -> Result<(u16, Vec<u8>), reqwest::Error> {
    let response = request.send().await?;
    let status_code = response.status().as_u16();
    let body_bytes = response.bytes().await?.to_vec();
    Ok((status_code, body_bytes))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: RequestEnvelope) -> Result<TransportResponse, TransportError> {
        let method = envelope.resolved_method();
        let timeout = envelope
            .timeout_override()
            .unwrap_or_else(|| self.strategy.duration());

        let mut request = self
            .client
            .request(Self::to_reqwest_method(method), envelope.url.as_str());
        for (name, value) in envelope.outgoing_headers() {
            request = request.header(name, value);
        }
        if let Some(body) = envelope.body_str() {
            request = request.body(body.to_string());
        }

        debug!("{} {}", method.as_str(), envelope.url);

        // the timeout covers the body read as well as the headers
        let (status_code, body_bytes) = match self.strategy {
            TimeoutStrategy::Native(_) => exchange(request.timeout(timeout))
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout(timeout)
                    } else {
                        TransportError::Request(e)
                    }
                })?,
            TimeoutStrategy::Race(_) => {
                tokio::select! {
                    result = exchange(request) => result?,
                    _ = tokio::time::sleep(timeout) => return Err(TransportError::Timeout(timeout)),
                }
            }
        };

        let body = decode_body(&body_bytes, envelope.response_encoding())?;

        if !(200..300).contains(&status_code) {
            return Err(TransportError::Status {
                status: status_code,
                body,
            });
        }

        Ok(TransportResponse {
            status_code,
            ok: true,
            body,
            body_bytes,
        })
    }
}
