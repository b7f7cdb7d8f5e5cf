//! Crewlink wire vocabulary.
//!
//! Lowest layer of the workspace: the typed domain events emitted by the
//! hosted multi-agent conversation service, the serde DTOs for its HTTP API,
//! and the best-effort source-reference heuristic. No I/O lives here.

pub mod event;
pub mod source;
pub mod wire;

pub use event::DomainEvent;
pub use source::{extract_source_ref, SourceRef};
pub use wire::{
    ChatCompletion, ChatMessage, CompletionChoice, CompletionMessage, ConversationBody,
    TokenUsage, ToolCallRecord,
};
