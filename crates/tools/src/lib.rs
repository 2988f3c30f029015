//! Tool registration and dispatch for provider function calls (§4.3, §9
//! "dynamic tool dispatch -> capability table").

pub mod registry;

pub use registry::ToolRegistry;
pub use voicecore_types::{AgentContext, Escalation, RegisteredTool, Tool, ToolError, ToolOutcome};
