//! Crewlink client core.
//!
//! Turns an unreliable, chunked, long-lived HTTP response into a reliable
//! sequence of typed domain events, and folds those events into a consistent
//! workflow state while the hosted service hands control between agents
//! server-side. Three pieces carry the weight:
//!
//! - [`executor::RequestExecutor`] — one retrying HTTP call with failure
//!   classification, backoff and content negotiation.
//! - [`sse::EventStream`] / [`sse::FrameDecoder`] — incremental,
//!   chunk-oblivious decoding of blank-line-terminated event frames.
//! - [`workflow::WorkflowCoordinator`] — the fold from events to an
//!   immutable [`workflow::WorkflowState`] snapshot per event.
//!
//! [`gateway::ConversationGateway`] wires them together for buffered and
//! streaming calls. Each turn owns its own executor call, byte channel,
//! decoder and coordinator; independent conversations run concurrently
//! without shared state.

pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod retry;
pub mod sse;
pub mod workflow;

pub use config::{AgentProfile, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use executor::{ByteStream, RequestExecutor, RequestSpec, ResponsePayload};
pub use gateway::{ConversationGateway, ConversationRequest, TurnKind};
pub use retry::{RetryDecision, RetryPolicy};
pub use sse::{EventStream, FrameDecoder};
pub use workflow::{SnapshotSink, WorkflowCoordinator, WorkflowFailure, WorkflowState};

// Re-export the wire vocabulary so most callers need a single dependency.
pub use crewlink_protocol::{
    ChatCompletion, ChatMessage, DomainEvent, SourceRef, TokenUsage,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
