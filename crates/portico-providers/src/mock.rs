//! Scripted upstream for deterministic testing — no network, queued
//! replies, recorded requests for assertions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use portico_core::{GatewayError, Result};

use crate::adapter::UpstreamRequest;
use crate::http::{UpstreamBody, UpstreamClient, UpstreamReply};

/// One scripted reply.
pub enum MockReply {
    /// A buffered reply with this status and body.
    Buffered { status: u16, body: String },
    /// A buffered reply with a Retry-After hint.
    RateLimited { retry_after: u64, body: String },
    /// A 2xx reply whose body arrives as a byte stream.
    Stream { chunks: Vec<String> },
    /// The connection itself fails.
    ConnectError(String),
}

/// An `UpstreamClient` that pops scripted replies and records every
/// request it receives.
///
/// # Example
/// ```ignore
/// let upstream = MockUpstream::new()
///     .with_json(200, &serde_json::json!({"choices": []}));
/// ```
#[derive(Clone, Default)]
pub struct MockUpstream {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    /// Every request sent upstream, for assertions in tests.
    pub requests: Arc<Mutex<Vec<UpstreamRequest>>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffered reply.
    pub fn with_reply(self, status: u16, body: impl Into<String>) -> Self {
        self.replies.lock().push_back(MockReply::Buffered {
            status,
            body: body.into(),
        });
        self
    }

    /// Queue a buffered JSON reply.
    pub fn with_json(self, status: u16, body: &serde_json::Value) -> Self {
        self.replies.lock().push_back(MockReply::Buffered {
            status,
            body: body.to_string(),
        });
        self
    }

    /// Queue a 429 with a Retry-After hint.
    pub fn with_rate_limit(self, retry_after: u64) -> Self {
        self.replies.lock().push_back(MockReply::RateLimited {
            retry_after,
            body: r#"{"error":{"message":"rate limited"}}"#.into(),
        });
        self
    }

    /// Queue a streaming reply delivered as these byte chunks.
    pub fn with_stream(self, chunks: Vec<&str>) -> Self {
        self.replies.lock().push_back(MockReply::Stream {
            chunks: chunks.into_iter().map(String::from).collect(),
        });
        self
    }

    /// Queue a connection failure.
    pub fn with_connect_error(self, detail: impl Into<String>) -> Self {
        self.replies
            .lock()
            .push_back(MockReply::ConnectError(detail.into()));
        self
    }

    pub fn recorded_requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn execute(
        &self,
        req: UpstreamRequest,
        _deadline: Duration,
        _stream: bool,
    ) -> Result<UpstreamReply> {
        let provider = req.provider;
        self.requests.lock().push(req);

        let Some(reply) = self.replies.lock().pop_front() else {
            return Ok(UpstreamReply::buffered(
                500,
                r#"{"error":{"message":"mock: no more queued replies"}}"#,
            ));
        };

        match reply {
            MockReply::Buffered { status, body } => Ok(UpstreamReply::buffered(status, body)),
            MockReply::RateLimited { retry_after, body } => Ok(UpstreamReply {
                status: 429,
                retry_after: Some(retry_after),
                body: UpstreamBody::Buffered(body.into()),
            }),
            MockReply::Stream { chunks } => {
                let stream = futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok::<_, GatewayError>(bytes::Bytes::from(c))),
                )
                .boxed();
                Ok(UpstreamReply {
                    status: 200,
                    retry_after: None,
                    body: UpstreamBody::Stream(stream),
                })
            }
            MockReply::ConnectError(detail) => Err(GatewayError::Transient {
                provider: provider.to_string(),
                detail,
            }),
        }
    }
}
