use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use portico_core::{GatewayError, Result};

use crate::adapter::{ByteStream, UpstreamRequest};

/// A reply body: buffered for non-streaming calls and for any non-2xx
/// status, raw bytes otherwise.
pub enum UpstreamBody {
    Buffered(bytes::Bytes),
    Stream(ByteStream),
}

/// An upstream HTTP reply before dispatch classifies it.
pub struct UpstreamReply {
    pub status: u16,
    /// Parsed `Retry-After` seconds, when the provider sent one.
    pub retry_after: Option<u64>,
    pub body: UpstreamBody,
}

impl UpstreamReply {
    pub fn buffered(status: u16, body: impl Into<bytes::Bytes>) -> Self {
        Self {
            status,
            retry_after: None,
            body: UpstreamBody::Buffered(body.into()),
        }
    }

    /// The buffered body as text, for error details.
    pub fn body_text(&self) -> String {
        match &self.body {
            UpstreamBody::Buffered(b) => String::from_utf8_lossy(b).into_owned(),
            UpstreamBody::Stream(_) => String::new(),
        }
    }
}

/// The single-call HTTP seam between the dispatch engine and the world.
/// One implementation speaks real HTTP; tests substitute scripted
/// replies.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn execute(
        &self,
        req: UpstreamRequest,
        deadline: Duration,
        stream: bool,
    ) -> Result<UpstreamReply>;
}

/// Production client backed by one shared reqwest connection pool.
pub struct HttpUpstreamClient {
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client init: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn execute(
        &self,
        req: UpstreamRequest,
        deadline: Duration,
        stream: bool,
    ) -> Result<UpstreamReply> {
        let provider = req.provider;
        let transient = |detail: String| GatewayError::Transient {
            provider: provider.to_string(),
            detail,
        };

        let mut builder = self.client.post(&req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder
            .header("content-type", "application/json")
            .body(req.body);

        let resp = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| transient("upstream connect timed out".into()))?
            .map_err(|e| transient(e.to_string()))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        // Error statuses are always read buffered so dispatch can classify
        // with the provider's message.
        let body = if stream && (200..300).contains(&status) {
            let byte_stream = resp
                .bytes_stream()
                .map(move |chunk| {
                    chunk.map_err(|e| GatewayError::Transient {
                        provider: provider.to_string(),
                        detail: e.to_string(),
                    })
                })
                .boxed();
            UpstreamBody::Stream(byte_stream)
        } else {
            let bytes = tokio::time::timeout(deadline, resp.bytes())
                .await
                .map_err(|_| transient("upstream read timed out".into()))?
                .map_err(|e| transient(e.to_string()))?;
            UpstreamBody::Buffered(bytes)
        };

        Ok(UpstreamReply {
            status,
            retry_after,
            body,
        })
    }
}
