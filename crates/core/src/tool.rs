//! Tool capability table (§9 Design Notes: "dynamic tool dispatch -> capability table").
//!
//! Registered tools are held in an immutable map owned by the executor
//! config, keyed by name, each entry pairing a JSON-schema description with
//! an async `execute` function. `ToolRegistry` in `voicecore-tools` builds
//! these from application configuration; this crate only defines the shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::session::{ChatbotId, CompanyId};

/// The conversational context a tool executes under (§4.3 "build an AgentContext").
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub conversation_id: String,
    pub company_id: CompanyId,
    /// The chatbot identity, exposed to tools as the agent id.
    pub agent_id: ChatbotId,
    pub channel: String,
    pub knowledge_categories: Vec<String>,
    pub knowledge_threshold: f32,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown function: {0}")]
    Unknown(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("tool timed out")]
    Timeout,
}

/// Result of a tool invocation, matching `{success, data?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// `data.action == "escalate"` per §4.3's function-call execution rule.
    pub fn escalation(&self) -> Option<Escalation> {
        let data = self.data.as_ref()?;
        if data.get("action")?.as_str()? != "escalate" {
            return None;
        }
        Some(Escalation {
            reason: data
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            urgency: data
                .get("urgency")
                .and_then(|v| v.as_str())
                .unwrap_or("normal")
                .to_string(),
            summary: data
                .get("summary")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Escalation {
    pub reason: String,
    pub urgency: String,
    pub summary: Option<String>,
}

/// A single invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema for the function's parameters, as exposed to providers.
    fn parameters_schema(&self) -> &Value;
    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<ToolOutcome, ToolError>;
}

impl fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// A named reference into the capability table, as carried by `ExecutorConfig`.
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
}

impl RegisteredTool {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self { tool }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name())
            .finish()
    }
}
