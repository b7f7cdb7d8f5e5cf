//! Conversation gateway: request building and dispatch.
//!
//! Ties the executor, decoder and coordinator together. Retries are entirely
//! the executor's business and finish before the first streamed byte is
//! exposed; a mid-stream failure ends that turn only.

use log::info;

use crewlink_protocol::{ChatCompletion, ChatMessage, ConversationBody};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::executor::{RequestExecutor, RequestSpec, ResponsePayload};
use crate::sse::EventStream;
use crate::workflow::{SnapshotSink, WorkflowCoordinator, WorkflowFailure, WorkflowState};

/// Which conversation endpoint a turn targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnKind {
    /// Open a new conversation.
    Start,
    /// Continue an existing conversation.
    Append { conversation_id: String },
    /// Rewind and replay an existing conversation.
    Restart { conversation_id: String },
}

/// One outbound turn.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub kind: TurnKind,
    pub messages: Vec<ChatMessage>,
}

impl ConversationRequest {
    pub fn start(messages: Vec<ChatMessage>) -> Self {
        Self {
            kind: TurnKind::Start,
            messages,
        }
    }

    pub fn append(conversation_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            kind: TurnKind::Append {
                conversation_id: conversation_id.into(),
            },
            messages,
        }
    }

    pub fn restart(conversation_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            kind: TurnKind::Restart {
                conversation_id: conversation_id.into(),
            },
            messages,
        }
    }
}

/// Client for the hosted multi-agent conversation service.
pub struct ConversationGateway {
    config: GatewayConfig,
    executor: RequestExecutor,
}

impl ConversationGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.ensure_valid()?;
        Ok(Self {
            executor: RequestExecutor::new()?,
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Buffered call: the full completion, materialized.
    pub async fn send(&self, request: &ConversationRequest) -> GatewayResult<ChatCompletion> {
        let spec = self.spec_for(request, false)?;
        match self.executor.execute(&spec).await? {
            ResponsePayload::Json(value) => {
                serde_json::from_value(value).map_err(|e| GatewayError::Parse {
                    message: format!("completion body did not match schema: {e}"),
                })
            }
            other => Err(GatewayError::Parse {
                message: format!("expected a JSON completion, got {other:?}"),
            }),
        }
    }

    /// Streaming call: transient failures are retried here, then the live
    /// byte channel is handed to the decoder and returned.
    pub async fn start_stream(&self, request: &ConversationRequest) -> GatewayResult<EventStream> {
        let spec = self.spec_for(request, true)?;
        match self.executor.execute(&spec).await? {
            ResponsePayload::EventStream(bytes) => Ok(EventStream::new(bytes)),
            other => Err(GatewayError::Parse {
                message: format!("expected an event stream, got {other:?}"),
            }),
        }
    }

    /// Full pipeline for one turn: stream the response and fold it into a
    /// final [`WorkflowState`]. A failure to even open the stream is
    /// reported with a fresh, already-failed state.
    pub async fn run_turn(
        &self,
        request: &ConversationRequest,
        snapshot_sink: Option<SnapshotSink>,
    ) -> Result<WorkflowState, Box<WorkflowFailure>> {
        let coordinator = WorkflowCoordinator::new(
            self.config.entry_agent.clone(),
            self.config.stream_idle_timeout,
        );

        let stream = match self.start_stream(request).await {
            Ok(stream) => stream,
            Err(error) => {
                let state = WorkflowState::new(&self.config.entry_agent).fail(&error);
                return Err(Box::new(WorkflowFailure { error, state }));
            }
        };

        info!("Streaming turn opened ({:?})", request.kind);
        coordinator
            .run(stream, snapshot_sink)
            .await
            .map_err(Box::new)
    }

    fn spec_for(&self, request: &ConversationRequest, streaming: bool) -> GatewayResult<RequestSpec> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = match &request.kind {
            TurnKind::Start => format!("{base}/v1/conversations"),
            TurnKind::Append { conversation_id } => {
                format!("{base}/v1/conversations/{conversation_id}/messages")
            }
            TurnKind::Restart { conversation_id } => {
                format!("{base}/v1/conversations/{conversation_id}/restart")
            }
        };

        // The entry agent only matters where the turn (re)opens a workflow.
        let entry_agent = match request.kind {
            TurnKind::Start | TurnKind::Restart { .. } => Some(self.config.entry_agent.clone()),
            TurnKind::Append { .. } => None,
        };

        let body = ConversationBody {
            messages: request.messages.clone(),
            stream: streaming,
            entry_agent,
        };
        let body = serde_json::to_value(&body).map_err(|e| GatewayError::Unknown {
            message: format!("failed to encode request body: {e}"),
        })?;

        let mut spec = RequestSpec::post(url)
            .bearer(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .retry(self.config.retry)
            .json_body(body);
        if streaming {
            spec = spec.event_stream();
        }
        Ok(spec)
    }
}
