//! Typed domain events decoded from the conversation event stream.
//!
//! Every frame is parsed exactly once, here. Unknown event names and payloads
//! that do not match their schema become [`DomainEvent::Unrecognized`] so the
//! vocabulary can grow server-side without breaking deployed clients.

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::wire::{
    AgentHandoffPayload, ConversationDonePayload, ConversationStartedPayload, MessageDeltaPayload,
    TokenUsage, ToolExecutionDonePayload, ToolExecutionStartedPayload,
};

pub const EVENT_CONVERSATION_STARTED: &str = "conversation.response.started";
pub const EVENT_TOOL_EXECUTION_STARTED: &str = "tool.execution.started";
pub const EVENT_TOOL_EXECUTION_DONE: &str = "tool.execution.done";
pub const EVENT_AGENT_HANDOFF_STARTED: &str = "agent.handoff.started";
pub const EVENT_MESSAGE_DELTA: &str = "message.output.delta";
pub const EVENT_CONVERSATION_DONE: &str = "conversation.response.done";

/// One event from the conversation stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ConversationStarted {
        conversation_id: String,
    },
    ToolExecutionStarted {
        name: String,
        output_index: u32,
    },
    ToolExecutionDone {
        name: String,
        output_index: u32,
        outputs: Vec<serde_json::Value>,
    },
    AgentHandoffStarted {
        agent_id: String,
        agent_name: String,
    },
    MessageDelta {
        content: String,
    },
    ConversationDone {
        usage: Option<TokenUsage>,
    },
    /// Forward-compatible catch-all. Carries the frame verbatim and is never
    /// an error.
    Unrecognized {
        event: String,
        raw: String,
    },
}

impl DomainEvent {
    /// Map one complete frame (event name + data payload) to a typed event.
    ///
    /// Never fails: anything that cannot be decoded strictly is preserved as
    /// [`DomainEvent::Unrecognized`].
    pub fn from_frame(event: &str, data: &str) -> DomainEvent {
        match event {
            EVENT_CONVERSATION_STARTED => {
                parse_payload(event, data, |p: ConversationStartedPayload| {
                    DomainEvent::ConversationStarted {
                        conversation_id: p.conversation_id,
                    }
                })
            }
            EVENT_TOOL_EXECUTION_STARTED => {
                parse_payload(event, data, |p: ToolExecutionStartedPayload| {
                    DomainEvent::ToolExecutionStarted {
                        name: p.name,
                        output_index: p.output_index,
                    }
                })
            }
            EVENT_TOOL_EXECUTION_DONE => {
                parse_payload(event, data, |p: ToolExecutionDonePayload| {
                    DomainEvent::ToolExecutionDone {
                        name: p.name,
                        output_index: p.output_index,
                        outputs: p.outputs,
                    }
                })
            }
            EVENT_AGENT_HANDOFF_STARTED => parse_payload(event, data, |p: AgentHandoffPayload| {
                DomainEvent::AgentHandoffStarted {
                    agent_id: p.agent_id,
                    agent_name: p.agent_name,
                }
            }),
            EVENT_MESSAGE_DELTA => parse_payload(event, data, |p: MessageDeltaPayload| {
                DomainEvent::MessageDelta { content: p.content }
            }),
            EVENT_CONVERSATION_DONE => parse_payload(event, data, |p: ConversationDonePayload| {
                DomainEvent::ConversationDone { usage: p.usage }
            }),
            other => DomainEvent::Unrecognized {
                event: other.to_string(),
                raw: data.to_string(),
            },
        }
    }

    /// Stable name of this event as it appears on the wire.
    pub fn name(&self) -> &str {
        match self {
            DomainEvent::ConversationStarted { .. } => EVENT_CONVERSATION_STARTED,
            DomainEvent::ToolExecutionStarted { .. } => EVENT_TOOL_EXECUTION_STARTED,
            DomainEvent::ToolExecutionDone { .. } => EVENT_TOOL_EXECUTION_DONE,
            DomainEvent::AgentHandoffStarted { .. } => EVENT_AGENT_HANDOFF_STARTED,
            DomainEvent::MessageDelta { .. } => EVENT_MESSAGE_DELTA,
            DomainEvent::ConversationDone { .. } => EVENT_CONVERSATION_DONE,
            DomainEvent::Unrecognized { event, .. } => event,
        }
    }
}

fn parse_payload<P, F>(event: &str, data: &str, build: F) -> DomainEvent
where
    P: DeserializeOwned,
    F: FnOnce(P) -> DomainEvent,
{
    match serde_json::from_str::<P>(data) {
        Ok(payload) => build(payload),
        Err(e) => {
            warn!("Undecodable payload for event '{}': {}, data: {}", event, e, data);
            DomainEvent::Unrecognized {
                event: event.to_string(),
                raw: data.to_string(),
            }
        }
    }
}
