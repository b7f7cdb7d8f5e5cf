//! Workflow state aggregation.
//!
//! The coordinator consumes the decoded event sequence and folds it into an
//! immutable [`WorkflowState`] snapshot, one rebuild per event. Snapshots
//! handed to the sink are always fully applied; no caller ever observes a
//! half-updated instance. The coordinator performs no retries itself; by the
//! time events flow, the executor's retry window is over.

use std::time::Duration;

use futures::Stream;
use futures_util::StreamExt;
use log::debug;
use thiserror::Error;
use tokio::time::timeout;

use crewlink_protocol::{extract_source_ref, DomainEvent, SourceRef, TokenUsage};

use crate::error::GatewayError;

/// Pseudo-url recorded when the failure is the stream going quiet rather
/// than any one request.
const IDLE_TIMEOUT_CONTEXT: &str = "event stream (idle)";

/// Sink receiving an immutable snapshot after every applied event.
pub type SnapshotSink = Box<dyn FnMut(&WorkflowState) + Send>;

/// Aggregated view of one conversation turn.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub conversation_id: Option<String>,
    pub current_agent_name: Option<String>,
    /// Agents the turn passed through, in order, no consecutive duplicates.
    pub workflow_path: Vec<String>,
    /// Append-only while the turn is active.
    pub accumulated_text: String,
    /// Sources surfaced by connectors, in arrival order.
    pub sources: Vec<SourceRef>,
    pub usage: Option<TokenUsage>,
    pub is_active: bool,
    pub last_error: Option<GatewayError>,
    /// Every event in exact arrival order, `Unrecognized` included.
    pub event_log: Vec<DomainEvent>,
}

/// Textual marker inserted into the transcript at an agent handoff.
pub fn handoff_marker(agent_name: &str) -> String {
    format!("\n\n[handoff: {agent_name}]\n\n")
}

impl WorkflowState {
    /// Fresh state for a turn owned by `initial_agent`.
    pub fn new(initial_agent: &str) -> Self {
        Self {
            conversation_id: None,
            current_agent_name: Some(initial_agent.to_string()),
            workflow_path: vec![initial_agent.to_string()],
            accumulated_text: String::new(),
            sources: Vec::new(),
            usage: None,
            is_active: true,
            last_error: None,
            event_log: Vec::new(),
        }
    }

    /// Fold one event into a rebuilt state. A finished state admits no
    /// further transitions and is returned unchanged.
    pub fn apply(&self, event: &DomainEvent) -> WorkflowState {
        if !self.is_active {
            debug!("Ignoring event {:?} on finished workflow state", event.name());
            return self.clone();
        }

        let mut next = self.clone();
        next.event_log.push(event.clone());

        match event {
            DomainEvent::ConversationStarted { conversation_id } => {
                next.conversation_id = Some(conversation_id.clone());
            }
            DomainEvent::MessageDelta { content } => {
                next.accumulated_text.push_str(content);
            }
            DomainEvent::AgentHandoffStarted { agent_name, .. } => {
                next.accumulated_text.push_str(&handoff_marker(agent_name));
                next.current_agent_name = Some(agent_name.clone());
                if next.workflow_path.last().map(String::as_str) != Some(agent_name.as_str()) {
                    next.workflow_path.push(agent_name.clone());
                }
            }
            DomainEvent::ToolExecutionDone { name, outputs, .. } => {
                // Best-effort: connectors without citable output add nothing.
                if let Some(source) = extract_source_ref(name, outputs) {
                    next.sources.push(source);
                }
            }
            DomainEvent::ConversationDone { usage } => {
                // Captures accounting only; the turn ends when the sequence
                // is exhausted, not here.
                next.usage = usage.clone();
            }
            DomainEvent::ToolExecutionStarted { .. } | DomainEvent::Unrecognized { .. } => {}
        }

        next
    }

    /// Terminal success: the event sequence is exhausted.
    pub fn finish(&self) -> WorkflowState {
        let mut next = self.clone();
        next.is_active = false;
        next
    }

    /// Terminal failure: everything accumulated so far is preserved.
    pub fn fail(&self, error: &GatewayError) -> WorkflowState {
        let mut next = self.clone();
        next.is_active = false;
        next.last_error = Some(error.clone());
        next
    }
}

/// A failed run, carrying the state as accumulated up to the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct WorkflowFailure {
    pub error: GatewayError,
    pub state: WorkflowState,
}

/// Drives one event sequence to its end.
pub struct WorkflowCoordinator {
    initial_agent: String,
    idle_timeout: Duration,
}

impl WorkflowCoordinator {
    pub fn new(initial_agent: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            initial_agent: initial_agent.into(),
            idle_timeout,
        }
    }

    /// Consume `events` to exhaustion, folding each into the state and
    /// handing every snapshot to `snapshot_sink`.
    ///
    /// A failed stream read (or an idle timeout on one) ends the attempt;
    /// the caller decides whether to re-invoke with a fresh stream.
    pub async fn run<S>(
        &self,
        mut events: S,
        mut snapshot_sink: Option<SnapshotSink>,
    ) -> Result<WorkflowState, WorkflowFailure>
    where
        S: Stream<Item = Result<DomainEvent, GatewayError>> + Unpin,
    {
        let mut state = WorkflowState::new(&self.initial_agent);

        loop {
            match timeout(self.idle_timeout, events.next()).await {
                Ok(Some(Ok(event))) => {
                    state = state.apply(&event);
                    if let Some(sink) = snapshot_sink.as_mut() {
                        sink(&state);
                    }
                }
                Ok(Some(Err(error))) => {
                    let state = state.fail(&error);
                    return Err(WorkflowFailure { error, state });
                }
                Ok(None) => return Ok(state.finish()),
                Err(_) => {
                    let error = GatewayError::Timeout {
                        url: IDLE_TIMEOUT_CONTEXT.to_string(),
                        attempts: 1,
                    };
                    let state = state.fail(&error);
                    return Err(WorkflowFailure { error, state });
                }
            }
        }
    }
}
