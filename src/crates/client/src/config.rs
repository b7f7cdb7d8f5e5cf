//! Gateway configuration, resolved once at startup and threaded through
//! every call. There are no ambient globals; two gateways with different
//! configs coexist freely.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::retry::RetryPolicy;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;

/// One agent the hosted service may route a conversation through.
///
/// Definitions, instructions and handoff decisions live server-side; the
/// client only needs display identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Configuration for a [`ConversationGateway`](crate::gateway::ConversationGateway).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Service base URL, e.g. `https://agents.example.com`.
    pub base_url: String,
    /// Bearer credential attached to every call.
    pub api_key: String,
    /// Per-attempt deadline for executor calls.
    pub request_timeout: Duration,
    /// Deadline for each read on an open event stream.
    pub stream_idle_timeout: Duration,
    /// Retry budget and backoff shape.
    pub retry: RetryPolicy,
    /// Known agent roster (display metadata only).
    pub agents: Vec<AgentProfile>,
    /// Agent that owns a conversation before any handoff.
    pub entry_agent: String,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stream_idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            agents: Vec::new(),
            entry_agent: "Library".to_string(),
        }
    }

    pub fn with_entry_agent(mut self, entry_agent: impl Into<String>) -> Self {
        self.entry_agent = entry_agent.into();
        self
    }

    pub fn with_agents(mut self, agents: Vec<AgentProfile>) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Reject configurations that can only fail later and further away.
    pub fn ensure_valid(&self) -> GatewayResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(GatewayError::Unknown {
                message: "gateway config: base_url is empty".into(),
            });
        }
        if self.entry_agent.trim().is_empty() {
            return Err(GatewayError::Unknown {
                message: "gateway config: entry_agent is empty".into(),
            });
        }
        Ok(())
    }

    /// Display name for an agent id, falling back to the id itself.
    pub fn agent_name<'a>(&'a self, agent_id: &'a str) -> &'a str {
        self.agents
            .iter()
            .find(|agent| agent.id == agent_id)
            .map(|agent| agent.name.as_str())
            .unwrap_or(agent_id)
    }
}
