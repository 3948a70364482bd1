//! # portico-gateway
//!
//! The request-dispatch engine and the state it coordinates: candidate
//! selection with retry/fallback and per-provider circuit breaking, the
//! streaming relay, the response cache, the credit ledger interface, and
//! the asynchronous usage log pipeline.

pub mod breaker;
pub mod cache;
pub mod cost;
pub mod dispatch;
pub mod ledger;
pub mod logpipe;

pub use cache::ResponseCache;
pub use cost::{compute_cost, estimate_cost};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use ledger::{CreditLedger, DebitOutcome, InMemoryLedger};
pub use logpipe::{LogHandle, LogPipeline, LogStore};
