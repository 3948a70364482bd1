//! # portico-core
//!
//! Core types for the Portico gateway. This crate defines the shared
//! vocabulary used by every other crate in the workspace: the normalized
//! chat-completion wire shapes, the error taxonomy, token usage accounting,
//! and the usage log record.

pub mod error;
pub mod log;
pub mod message;
pub mod request;
pub mod response;
pub mod stream;

pub use error::{GatewayError, Result};
pub use log::{Attempt, CostBreakdown, LogRecord};
pub use message::{
    ChatMessage, ContentPart, FunctionCall, FunctionDef, ImageUrl, MessageContent, Role, ToolCall,
    ToolDef,
};
pub use request::{ChatRequest, StopSequences};
pub use response::{
    AssistantMessage, ChatResponse, Choice, FinishReason, PromptTokensDetails, ResponseMetadata,
    Usage,
};
pub use stream::{SseFrame, StreamDelta, ToolCallChunk};
