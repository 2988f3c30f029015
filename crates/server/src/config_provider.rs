//! File-backed `ConfigProvider` (§4.6 "Externals consumed"): resolves a
//! chatbot's call configuration from `config/chatbots/{chatbotId}.yaml`,
//! using the same `config` crate the settings loader already carries
//! (`voicecore_config::settings::load_settings`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use config::{Config, File};
use serde::Deserialize;

use voicecore_runner::{ChatbotConfig, ConfigProvider};
use voicecore_tools::ToolRegistry;
use voicecore_types::session::AiProvider;
use voicecore_types::VoiceConfig;

#[derive(Debug, Deserialize)]
struct ChatbotFile {
    company_id: String,
    #[serde(default)]
    enabled_call: bool,
    #[serde(default)]
    call_ai_provider: Option<AiProvider>,
    #[serde(default)]
    voice: VoiceConfig,
    #[serde(default = "default_system_prompt")]
    system_prompt: String,
    #[serde(default)]
    knowledge_categories: Vec<String>,
    #[serde(default = "default_knowledge_threshold")]
    knowledge_threshold: f32,
    #[serde(default)]
    tool_names: Vec<String>,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".to_string()
}

fn default_knowledge_threshold() -> f32 {
    0.3
}

/// Resolves tool names against a registry of concrete `Tool` implementations
/// built once at startup (§4.3 "registered tools"); unknown names are
/// dropped rather than failing the whole chatbot load.
pub struct FileConfigProvider {
    chatbots_dir: String,
    tools: Arc<ToolRegistry>,
}

impl FileConfigProvider {
    pub fn new(chatbots_dir: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self { chatbots_dir: chatbots_dir.into(), tools }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn get_chatbot(&self, chatbot_id: &str) -> Option<ChatbotConfig> {
        let path = format!("{}/{}", self.chatbots_dir, chatbot_id);
        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .build()
            .ok()?;
        let file: ChatbotFile = config.try_deserialize().ok()?;

        let mut tools = HashMap::new();
        for name in &file.tool_names {
            match self.tools.get(name) {
                Some(tool) => {
                    tools.insert(name.clone(), voicecore_types::RegisteredTool { tool });
                }
                None => tracing::warn!(chatbot_id, tool = %name, "unknown tool referenced by chatbot config"),
            }
        }

        Some(ChatbotConfig {
            company_id: file.company_id,
            enabled_call: file.enabled_call,
            call_ai_provider: file.call_ai_provider,
            voice: file.voice,
            system_prompt: file.system_prompt,
            knowledge_categories: file.knowledge_categories,
            knowledge_threshold: file.knowledge_threshold,
            tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_chatbot_file_returns_none() {
        let provider = FileConfigProvider::new("config/nonexistent-dir", Arc::new(ToolRegistry::new()));
        assert!(provider.get_chatbot("no-such-chatbot").await.is_none());
    }
}
