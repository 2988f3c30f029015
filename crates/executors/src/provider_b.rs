//! Provider B: vendor realtime API executor, PCM16 @ 16 kHz in / 24 kHz out
//! (§4.3 Variant B). The vendor's bidirectional realtime session is itself a
//! WebSocket protocol, so this reuses the pack's WebSocket-client idiom
//! (`OutboundMessage` enum, split outbound/inbound tasks) rather than
//! depending on an unpublished vendor SDK crate — the wire shapes below
//! (response modality, VAD sensitivity enum, function-declarations tool
//! list) are this variant's, not provider A's.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use voicecore_types::{
    EscalateEvent, ExecutorConfig, ExecutorError, ExecutorEvent, ProviderExecutor,
    TranscriptDelta, TranscriptRole,
};
use voicecore_tools::{AgentContext, ToolRegistry};

use crate::common::{CONNECT_TIMEOUT, INTERRUPTION_DEBOUNCE_MS};

const REALTIME_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const INPUT_SAMPLE_RATE_HZ: u32 = 16000;
pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 24000;

/// §4.3 "VAD sensitivity is enum LOW|MEDIUM|HIGH".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSensitivity {
    Low,
    Medium,
    High,
}

impl VadSensitivity {
    /// `t <= 0.3 -> HIGH`, `t <= 0.6 -> MEDIUM`, else `LOW`.
    pub fn from_threshold(t: f32) -> Self {
        if t <= 0.3 {
            VadSensitivity::High
        } else if t <= 0.6 {
            VadSensitivity::Medium
        } else {
            VadSensitivity::Low
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            VadSensitivity::Low => "LOW",
            VadSensitivity::Medium => "MEDIUM",
            VadSensitivity::High => "HIGH",
        }
    }
}

#[derive(Debug)]
enum OutboundMessage {
    Audio(Vec<u8>),
    Json(Value),
    Close,
}

struct Shared {
    connected: AtomicBool,
    speaking: AtomicBool,
    event_tx: Mutex<Option<mpsc::Sender<ExecutorEvent>>>,
    tools: ToolRegistry,
    conversation_id: Mutex<String>,
    company_id: String,
    chatbot_id: String,
    knowledge_categories: Vec<String>,
    knowledge_threshold: f32,
    tool_call_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = self.event_tx.lock().clone() {
            let _ = tx.try_send(event);
        }
    }

    fn agent_context(&self) -> AgentContext {
        AgentContext {
            conversation_id: self.conversation_id.lock().clone(),
            company_id: self.company_id.clone(),
            agent_id: self.chatbot_id.clone(),
            channel: "web".to_string(),
            knowledge_categories: self.knowledge_categories.clone(),
            knowledge_threshold: self.knowledge_threshold,
        }
    }
}

pub struct ProviderBExecutor {
    config: ExecutorConfig,
    api_key: String,
    model: String,
    outbound_tx: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    shared: Arc<Shared>,
}

impl ProviderBExecutor {
    pub fn new(config: ExecutorConfig, company_id: String, chatbot_id: String, api_key: String) -> Self {
        let model = config.voice.model.clone().unwrap_or_else(|| "gemini-2.0-flash-live".to_string());

        let mut tools = ToolRegistry::new();
        for registered in config.tools.values() {
            tools.register_boxed(registered.tool.clone());
        }

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            event_tx: Mutex::new(None),
            tools,
            conversation_id: Mutex::new(uuid::Uuid::new_v4().to_string()),
            company_id,
            chatbot_id,
            knowledge_categories: config.knowledge_categories.clone(),
            knowledge_threshold: config.knowledge_threshold,
            tool_call_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        Self { config, api_key, model, outbound_tx: Mutex::new(None), shared }
    }

    /// Number of function calls dispatched so far, for observability/tests.
    pub fn tool_call_count(&self) -> u64 {
        self.shared.tool_call_count.load(Ordering::SeqCst)
    }

    /// Most recent tool execution error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    fn tool_declarations(&self) -> Vec<Value> {
        self.config
            .tools
            .values()
            .map(|t| {
                json!({
                    "name": t.tool.name(),
                    "description": t.tool.description(),
                    "parameters": t.tool.parameters_schema(),
                })
            })
            .collect()
    }

    /// §4.3 "Session config sets response modality audio-only ... automatic
    /// VAD with start/end sensitivities, prefixPaddingMs (default 300),
    /// silenceDurationMs (default 700)."
    fn build_setup_message(&self) -> Value {
        let voice = &self.config.voice;
        let sensitivity = VadSensitivity::from_threshold(voice.vad_threshold.unwrap_or(0.5)).as_str();

        json!({
            "setup": {
                "model": self.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": voice.voice_name },
                        }
                    },
                },
                "systemInstruction": { "parts": [{ "text": self.config.system_prompt }] },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {},
                "tools": [{ "functionDeclarations": self.tool_declarations() }],
                "realtimeInputConfig": {
                    "automaticActivityDetection": {
                        "startOfSpeechSensitivity": sensitivity,
                        "endOfSpeechSensitivity": sensitivity,
                        "prefixPaddingMs": voice.prefix_padding_ms.unwrap_or(300),
                        "silenceDurationMs": voice.silence_duration_ms.unwrap_or(700),
                    }
                },
            }
        })
    }
}

#[async_trait]
impl ProviderExecutor for ProviderBExecutor {
    async fn connect(&self) -> Result<(), ExecutorError> {
        let url = format!("{REALTIME_WS_URL}?key={}", self.api_key);
        let request = url
            .into_client_request()
            .map_err(|e| ExecutorError::Transient(e.to_string()))?;

        let connect_result = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(ExecutorError::Transient(e.to_string())),
            Err(_elapsed) => return Err(ExecutorError::ConnectTimeout),
        };

        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let setup = self.build_setup_message();
        if ws_sender.send(WsMessage::Text(setup.to_string())).await.is_err() {
            return Err(ExecutorError::Transient("failed to send setup message".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);
        *self.outbound_tx.lock() = Some(outbound_tx.clone());
        *self.shared.conversation_id.lock() = uuid::Uuid::new_v4().to_string();
        self.shared.connected.store(true, Ordering::SeqCst);

        let shared_out = Arc::clone(&self.shared);
        tokio::spawn(async move {
            outbound_loop(outbound_rx, ws_sender).await;
            shared_out.connected.store(false, Ordering::SeqCst);
        });

        let shared_in = Arc::clone(&self.shared);
        let greeting = self.config.voice.call_greeting.clone();
        let outbound_for_greeting = outbound_tx.clone();
        tokio::spawn(async move {
            if let Some(greeting_text) = greeting {
                send_greeting(&outbound_for_greeting, &greeting_text).await;
            }
            inbound_loop(ws_receiver, shared_in, outbound_for_greeting).await;
        });

        Ok(())
    }

    async fn disconnect(&self) {
        let tx = self.outbound_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(OutboundMessage::Close).await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.speaking.store(false, Ordering::SeqCst);
    }

    async fn send_audio(&self, pcm16: &[u8]) -> Result<(), ExecutorError> {
        if pcm16.is_empty() {
            return Ok(());
        }
        let tx = self.outbound_tx.lock().clone().ok_or(ExecutorError::NotConnected)?;
        tx.send(OutboundMessage::Audio(pcm16.to_vec()))
            .await
            .map_err(|_| ExecutorError::Transient("outbound channel closed".to_string()))
    }

    /// The vendor protocol has no explicit cancel frame; interruption is
    /// signalled by the server's own `interrupted` part (handled in
    /// `handle_server_event`). Locally this just clears `isSpeaking` so a
    /// cancelled turn's late audio deltas aren't mistaken for a new one.
    async fn cancel_response(&self) {
        self.shared.speaking.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::Receiver<ExecutorEvent> {
        let (tx, rx) = mpsc::channel(256);
        *self.shared.event_tx.lock() = Some(tx);
        rx
    }
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        WsMessage,
    >,
) {
    while let Some(msg) = rx.recv().await {
        let sent = match msg {
            OutboundMessage::Audio(pcm) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&pcm);
                let frame = json!({
                    "realtimeInput": {
                        "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": b64 }]
                    }
                });
                ws_sender.send(WsMessage::Text(frame.to_string())).await
            }
            OutboundMessage::Json(value) => ws_sender.send(WsMessage::Text(value.to_string())).await,
            OutboundMessage::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        };
        if sent.is_err() {
            tracing::warn!("provider B outbound send failed, closing outbound loop");
            break;
        }
    }
}

async fn inbound_loop(
    mut ws_receiver: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
) {
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => {
                handle_server_event(&text, &shared, &outbound_tx).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "provider B websocket error");
                shared.emit(ExecutorEvent::Error(e.to_string()));
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.emit(ExecutorEvent::ConnectionClosed);
}

/// §4.3 "Event mapping (server-content parts)".
async fn handle_server_event(text: &str, shared: &Arc<Shared>, outbound_tx: &mpsc::Sender<OutboundMessage>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            shared.emit(ExecutorEvent::Error(format!("malformed provider event: {e}")));
            return;
        }
    };

    let Some(server_content) = value.get("serverContent") else {
        if let Some(tool_call) = value.get("toolCall") {
            handle_tool_call(tool_call, shared, outbound_tx).await;
        }
        return;
    };

    if let Some(parts) = server_content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(audio_b64) = part
                .get("inlineData")
                .and_then(|d| d.get("data"))
                .and_then(Value::as_str)
            {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(audio_b64) {
                    if !shared.speaking.swap(true, Ordering::SeqCst) {
                        shared.emit(ExecutorEvent::AgentSpeaking);
                    }
                    shared.emit(ExecutorEvent::AudioDelta(bytes));
                }
            }
        }
    }

    if let Some(text) = server_content.get("inputTranscription").and_then(|t| t.get("text")).and_then(Value::as_str) {
        shared.emit(ExecutorEvent::TranscriptDelta(TranscriptDelta {
            role: TranscriptRole::User,
            content: text.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            is_final: true,
        }));
    }

    let turn_complete = server_content.get("turnComplete").and_then(Value::as_bool).unwrap_or(false);
    if let Some(text) = server_content.get("outputTranscription").and_then(|t| t.get("text")).and_then(Value::as_str) {
        shared.emit(ExecutorEvent::TranscriptDelta(TranscriptDelta {
            role: TranscriptRole::Assistant,
            content: text.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            is_final: turn_complete,
        }));
    }

    if turn_complete {
        shared.speaking.store(false, Ordering::SeqCst);
        shared.emit(ExecutorEvent::AgentListening);
        shared.emit(ExecutorEvent::TurnComplete);
    }

    if server_content.get("interrupted").and_then(Value::as_bool).unwrap_or(false) {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(INTERRUPTION_DEBOUNCE_MS)).await;
            shared.speaking.store(false, Ordering::SeqCst);
            shared.emit(ExecutorEvent::AgentListening);
            shared.emit(ExecutorEvent::UserInterrupted);
        });
    }
}

async fn handle_tool_call(tool_call: &Value, shared: &Arc<Shared>, outbound_tx: &mpsc::Sender<OutboundMessage>) {
    let Some(calls) = tool_call.get("functionCalls").and_then(Value::as_array) else {
        return;
    };
    for call in calls {
        let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let call_id = call.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let arguments = call.get("args").cloned().unwrap_or(json!({}));

        shared.emit(ExecutorEvent::FunctionCall {
            name: name.clone(),
            arguments: arguments.to_string(),
            call_id: call_id.clone(),
        });

        let shared = Arc::clone(shared);
        let outbound_tx = outbound_tx.clone();
        tokio::spawn(async move {
            execute_function_call(shared, outbound_tx, name, arguments, call_id).await;
        });
    }
}

async fn execute_function_call(shared: Arc<Shared>, outbound_tx: mpsc::Sender<OutboundMessage>, name: String, arguments: Value, call_id: String) {
    let ctx = shared.agent_context();
    shared.tool_call_count.fetch_add(1, Ordering::SeqCst);
    let outcome = match shared.tools.execute(&name, arguments, &ctx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            *shared.last_error.lock() = Some(err.to_string());
            voicecore_types::ToolOutcome::failure("Unknown function")
        }
    };

    if let Some(escalation) = outcome.escalation() {
        shared.emit(ExecutorEvent::Escalate(EscalateEvent {
            reason: escalation.reason,
            urgency: escalation.urgency,
            summary: escalation.summary,
            conversation_id: Some(ctx.conversation_id.clone()),
        }));
    }

    let response = json!({
        "toolResponse": {
            "functionResponses": [{
                "id": call_id,
                "name": name,
                "response": outcome,
            }]
        }
    });
    let _ = outbound_tx.send(OutboundMessage::Json(response)).await;
}

async fn send_greeting(outbound_tx: &mpsc::Sender<OutboundMessage>, greeting: &str) {
    let turn = json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{ "text": format!("Greet the caller with exactly this phrase: \"{greeting}\"") }],
            }],
            "turnComplete": true,
        }
    });
    let _ = outbound_tx.send(OutboundMessage::Json(turn)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicecore_types::VoiceConfig;

    #[test]
    fn vad_sensitivity_thresholds_match_spec() {
        assert_eq!(VadSensitivity::from_threshold(0.1), VadSensitivity::High);
        assert_eq!(VadSensitivity::from_threshold(0.3), VadSensitivity::High);
        assert_eq!(VadSensitivity::from_threshold(0.45), VadSensitivity::Medium);
        assert_eq!(VadSensitivity::from_threshold(0.6), VadSensitivity::Medium);
        assert_eq!(VadSensitivity::from_threshold(0.9), VadSensitivity::Low);
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            voice: VoiceConfig { vad_threshold: Some(0.2), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn setup_message_uses_audio_only_modality_and_mapped_sensitivity() {
        let exec = ProviderBExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let setup = exec.build_setup_message();
        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"]["startOfSpeechSensitivity"],
            "HIGH"
        );
        assert_eq!(
            setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"]["prefixPaddingMs"],
            300
        );
    }

    #[tokio::test]
    async fn send_audio_without_connection_fails_not_connected() {
        let exec = ProviderBExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let err = exec.send_audio(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NotConnected));
    }

    #[tokio::test]
    async fn fresh_executor_has_no_tool_calls_or_errors() {
        let exec = ProviderBExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        assert_eq!(exec.tool_call_count(), 0);
        assert_eq!(exec.last_error(), None);
    }

    #[tokio::test]
    async fn unknown_tool_call_increments_count_and_records_error() {
        let exec = ProviderBExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let (tx, _rx) = mpsc::channel(8);
        execute_function_call(exec.shared.clone(), tx, "nope".to_string(), json!({}), "call1".to_string()).await;
        assert_eq!(exec.tool_call_count(), 1);
        assert!(exec.last_error().is_some());
    }
}
