//! # portico-providers
//!
//! Per-provider translation for the gateway. Each adapter is a pure
//! translator between the normalized chat-completion shapes and one
//! provider family's wire format: it builds the upstream HTTP request,
//! parses buffered responses, and decodes provider streaming into
//! canonical frames. Adapters never retry, never log business events,
//! and perform no I/O — the dispatch engine owns the single upstream
//! call per attempt.

pub mod adapter;
pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod credentials;
pub mod google;
pub mod http;
pub mod mock;
pub mod openai;
mod sigv4;
pub mod sse;

pub use adapter::{
    AdapterRegistry, ByteStream, ParsedChoice, ParsedResponse, ProviderAdapter, UpstreamRequest,
};
pub use credentials::{Credential, CredentialMode, CredentialResolver, OrgContext};
pub use http::{HttpUpstreamClient, UpstreamBody, UpstreamClient, UpstreamReply};
pub use mock::MockUpstream;
