//! Serde DTOs for the conversation API: streaming frame payloads on one side,
//! request/response bodies for the buffered endpoints on the other.

use serde::{Deserialize, Serialize};

/// Token accounting reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Payload of `conversation.response.started`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationStartedPayload {
    pub conversation_id: String,
}

/// Payload of `tool.execution.started`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolExecutionStartedPayload {
    pub name: String,
    #[serde(default)]
    pub output_index: u32,
}

/// Payload of `tool.execution.done`.
///
/// `outputs` is whatever the connector produced; consumers treat it as
/// opaque and probe it best-effort (see `source::extract_source_ref`).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolExecutionDonePayload {
    pub name: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub outputs: Vec<serde_json::Value>,
}

/// Payload of `agent.handoff.started`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentHandoffPayload {
    pub agent_id: String,
    pub agent_name: String,
}

/// Payload of `message.output.delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaPayload {
    pub content: String,
}

/// Payload of `conversation.response.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDonePayload {
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// One role/content message pair sent to the conversation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// JSON body POSTed to the start/append/restart endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationBody {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_agent: Option<String>,
}

/// Tool-call record attached to a buffered assistant message.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Assistant message inside a completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    pub message: CompletionMessage,
}

/// Non-streaming response body of the conversation endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatCompletion {
    /// Content of the first assistant choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::ChatCompletion;

    #[test]
    fn deserializes_completion_with_tool_calls() {
        let raw = r#"{
            "id": "conv_42",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "done",
                    "tool_calls": [
                        { "id": "call_1", "name": "docsearch", "arguments": "{\"q\":\"x\"}" }
                    ]
                }
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16 }
        }"#;

        let completion: ChatCompletion = serde_json::from_str(raw).expect("valid completion");
        assert_eq!(completion.first_content(), Some("done"));
        assert_eq!(completion.choices[0].message.tool_calls[0].name, "docsearch");
        assert_eq!(completion.usage.as_ref().map(|u| u.total_tokens), Some(16));
    }

    #[test]
    fn tolerates_missing_usage_and_tool_calls() {
        let raw = r#"{
            "id": "conv_43",
            "choices": [{
                "message": { "role": "assistant", "content": "hi" }
            }]
        }"#;

        let completion: ChatCompletion = serde_json::from_str(raw).expect("valid completion");
        assert!(completion.usage.is_none());
        assert!(completion.choices[0].message.tool_calls.is_empty());
    }
}
