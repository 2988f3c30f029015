//! Provider executor contract (§4.3) and the sum-typed event channel used
//! in place of a string-keyed emitter (§9 Design Notes).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::tool::RegisteredTool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice_name: String,
    pub model: Option<String>,
    /// Either a raw VAD threshold (provider A) or a sensitivity bucket the
    /// provider maps itself (provider B); callers pick based on `AiProvider`.
    pub vad_threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub call_greeting: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_name: "Kore".to_string(),
            model: None,
            vad_threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
            call_greeting: None,
        }
    }
}

/// Immutable per-(chatbotId, provider) configuration (§3 Executor-config).
#[derive(Clone)]
pub struct ExecutorConfig {
    pub system_prompt: String,
    pub voice: VoiceConfig,
    pub tools: HashMap<String, RegisteredTool>,
    pub knowledge_categories: Vec<String>,
    pub knowledge_threshold: f32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful AI assistant.".to_string(),
            voice: VoiceConfig::default(),
            tools: HashMap::new(),
            knowledge_categories: Vec::new(),
            knowledge_threshold: 0.3,
        }
    }
}

/// A role-tagged transcript fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDelta {
    pub role: TranscriptRole,
    pub content: String,
    pub timestamp_ms: i64,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalateEvent {
    pub reason: String,
    pub urgency: String,
    pub summary: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("provider transient error: {0}")]
    Transient(String),
    #[error("not connected")]
    NotConnected,
}

/// Events an executor emits, in place of a named-event emitter
/// with a single tagged sum type consumed over a channel.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    AudioDelta(Vec<u8>),
    TranscriptDelta(TranscriptDelta),
    AgentSpeaking,
    AgentListening,
    UserInterrupted,
    TurnComplete,
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
    Escalate(EscalateEvent),
    Error(String),
    ConnectionClosed,
}

/// Common capability set shared by both provider variants (§4.3).
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    async fn connect(&self) -> Result<(), ExecutorError>;
    async fn disconnect(&self);
    /// `pcm16` at the provider's expected input rate.
    async fn send_audio(&self, pcm16: &[u8]) -> Result<(), ExecutorError>;
    async fn cancel_response(&self);
    fn is_connected(&self) -> bool;
    fn is_speaking(&self) -> bool;
    /// Subscribe to this executor's event stream.
    fn subscribe(&self) -> tokio::sync::mpsc::Receiver<ExecutorEvent>;
}
