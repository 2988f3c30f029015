//! Environment variables recognized by the core (§6). Each is optional; a
//! missing key must only disable the code paths it feeds, never the whole
//! process.

pub fn openai_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok()
}

/// Provider B accepts either name, `GOOGLE_API_KEY` taking precedence.
pub fn google_api_key() -> Option<String> {
    std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .ok()
}

pub fn whatsapp_webhook_verify_token() -> Option<String> {
    std::env::var("WHATSAPP_WEBHOOK_VERIFY_TOKEN").ok()
}

pub fn whatsapp_app_secret() -> Option<String> {
    std::env::var("WHATSAPP_APP_SECRET").ok()
}

pub fn whatsapp_access_token() -> Option<String> {
    std::env::var("WHATSAPP_ACCESS_TOKEN").ok()
}

pub fn whatsapp_phone_number_id() -> Option<String> {
    std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok()
}

/// Directory the `FileConfigProvider` reads `{chatbotId}.yaml` from.
pub fn chatbots_dir() -> String {
    std::env::var("VOICECORE_CHATBOTS_DIR").unwrap_or_else(|_| "config/chatbots".to_string())
}
