//! The external configuration provider collaborator (§4.6 "Externals
//! consumed"): resolves a chatbot's call-handling settings so the runner
//! can decide whether and how to build an executor for it.

use async_trait::async_trait;
use std::collections::HashMap;

use voicecore_types::session::AiProvider;
use voicecore_types::{RegisteredTool, VoiceConfig};

/// A chatbot's call-handling configuration, as returned by
/// `configProvider.getChatbot` (§4.6).
#[derive(Clone)]
pub struct ChatbotConfig {
    pub company_id: String,
    pub enabled_call: bool,
    pub call_ai_provider: Option<AiProvider>,
    pub voice: VoiceConfig,
    pub system_prompt: String,
    pub knowledge_categories: Vec<String>,
    pub knowledge_threshold: f32,
    pub tools: HashMap<String, RegisteredTool>,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            company_id: String::new(),
            enabled_call: false,
            call_ai_provider: None,
            voice: VoiceConfig::default(),
            system_prompt: "You are a helpful AI assistant.".to_string(),
            knowledge_categories: Vec::new(),
            knowledge_threshold: 0.3,
            tools: HashMap::new(),
        }
    }
}

/// Resolves a chatbot's call configuration. The production implementation
/// of this trait lives outside the core (§6 "the format is not part of
/// the core"); the runner only depends on this narrow contract.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_chatbot(&self, chatbot_id: &str) -> Option<ChatbotConfig>;
}
