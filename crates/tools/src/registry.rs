//! Registered-tool capability table (§4.3, §9 "dynamic tool dispatch ->
//! capability table"). Tools are supplied by the chatbot config at executor
//! construction time and dispatched by name when a provider emits a
//! function-call event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use voicecore_types::{AgentContext, Tool, ToolError, ToolOutcome};

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Immutable per-executor-instance map from tool name to `{schema, execute}`
/// (§9). Built once from the chatbot's configured tool list and shared for
/// the lifetime of the provider executor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// §4.3 function-call execution: missing tool -> `Unknown function`,
    /// wrapped in a timeout so a slow tool cannot stall the audio path
    /// (§5 "must not block the audio path — execute in a separate task").
    pub async fn execute(&self, name: &str, arguments: Value, ctx: &AgentContext) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        tracing::trace!(tool = name, "dispatching tool call");
        match tokio::time::timeout(
            Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            tool.execute(arguments, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(ToolError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        schema: Value,
    }

    impl EchoTool {
        fn new() -> Self {
            Self { schema: json!({"type": "object"}) }
        }
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "returns its input arguments"
        }

        fn parameters_schema(&self) -> &Value {
            &self.schema
        }

        async fn execute(&self, args: Value, _ctx: &AgentContext) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok(args))
        }
    }

    fn ctx() -> AgentContext {
        AgentContext {
            conversation_id: "conv-1".into(),
            company_id: "co-1".into(),
            agent_id: "agent-1".into(),
            channel: "web".into(),
            knowledge_categories: vec![],
            knowledge_threshold: 0.3,
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_unknown_function_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(name) if name == "nope"));
    }

    #[tokio::test]
    async fn registered_tool_round_trips_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        let outcome = registry.execute("echo", json!({"q": "pricing"}), &ctx()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(json!({"q": "pricing"})));
    }
}
