//! Provider A: WebSocket realtime executor, PCM16 @ 24 kHz in/out (§4.3).
//!
//! Grounded on the retrieval pack's OpenAI Realtime client: the
//! `OutboundMessage` enum, the `outbound_loop`/`inbound_loop` task split
//! over a `tokio_tungstenite` connection, and `parse_server_event`'s
//! match-on-`type` dispatch, adapted here onto `ExecutorEvent` and the
//! full §4.3 event-mapping table (this pack's source only handled a subset:
//! no function calls, no interruption debounce, no cancel-suppression
//! window).

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

use crate::common::{CancelGuard, CONNECT_TIMEOUT, INTERRUPTION_DEBOUNCE_MS};

const REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";
pub const INPUT_SAMPLE_RATE_HZ: u32 = 24000;
pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 24000;

#[derive(Debug)]
enum OutboundMessage {
    Audio(Vec<u8>),
    Json(Value),
    Close,
}

struct Shared {
    connected: AtomicBool,
    speaking: AtomicBool,
    current_response_id: Mutex<Option<String>>,
    cancel_guard: CancelGuard,
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

pub struct ProviderAExecutor {
    config: ExecutorConfig,
    api_key: String,
    model: String,
    outbound_tx: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    shared: Arc<Shared>,
}

impl ProviderAExecutor {
    pub fn new(config: ExecutorConfig, company_id: String, chatbot_id: String, api_key: String) -> Self {
        let model = config
            .voice
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-realtime-preview".to_string());

        let mut tools = ToolRegistry::new();
        for registered in config.tools.values() {
            tools.register_boxed(registered.tool.clone());
        }

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            current_response_id: Mutex::new(None),
            cancel_guard: CancelGuard::new(),
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

        Self {
            config,
            api_key,
            model,
            outbound_tx: Mutex::new(None),
            shared,
        }
    }

    /// Number of function calls dispatched so far, for observability/tests.
    pub fn tool_call_count(&self) -> u64 {
        self.shared.tool_call_count.load(Ordering::SeqCst)
    }

    /// Most recent tool execution error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    fn tool_schemas(&self) -> Vec<Value> {
        self.config
            .tools
            .values()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.tool.name(),
                    "description": t.tool.description(),
                    "parameters": t.tool.parameters_schema(),
                })
            })
            .collect()
    }

    /// §4.3 "Session configuration sent at open".
    fn build_session_update(&self) -> Value {
        let voice = &self.config.voice;
        json!({
            "type": "session.update",
            "session": {
                "modalities": ["text", "audio"],
                "instructions": self.config.system_prompt,
                "voice": voice.voice_name,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": { "model": "whisper-1" },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": voice.vad_threshold.unwrap_or(0.5),
                    "prefix_padding_ms": voice.prefix_padding_ms.unwrap_or(300),
                    "silence_duration_ms": voice.silence_duration_ms.unwrap_or(500),
                },
                "tools": self.tool_schemas(),
                "tool_choice": "auto",
                "temperature": 0.8,
                "max_output_tokens": 4096,
            }
        })
    }
}

#[async_trait]
impl ProviderExecutor for ProviderAExecutor {
    async fn connect(&self) -> Result<(), ExecutorError> {
        let url = format!("{REALTIME_WS_URL}?model={}", self.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| ExecutorError::Transient(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| ExecutorError::Transient("invalid auth header".to_string()))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| ExecutorError::Transient("invalid header".to_string()))?,
        );

        let connect_result = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(ExecutorError::Transient(e.to_string())),
            Err(_elapsed) => return Err(ExecutorError::ConnectTimeout),
        };

        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let session_update = self.build_session_update();
        if ws_sender
            .send(WsMessage::Text(session_update.to_string()))
            .await
            .is_err()
        {
            return Err(ExecutorError::Transient("failed to send session.update".to_string()));
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
            inbound_loop(ws_receiver, shared_in, outbound_for_greeting, greeting).await;
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
        let tx = self
            .outbound_tx
            .lock()
            .clone()
            .ok_or(ExecutorError::NotConnected)?;
        tx.send(OutboundMessage::Audio(pcm16.to_vec()))
            .await
            .map_err(|_| ExecutorError::Transient("outbound channel closed".to_string()))
    }

    /// §4.3 "cancelResponse() sets isCancelling, sends response.cancel,
    /// clears isSpeaking and currentResponseId, and clears isCancelling 1s
    /// later."
    async fn cancel_response(&self) {
        let tx = self.outbound_tx.lock().clone();
        cancel_response_now(&self.shared, tx.as_ref()).await;
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

/// Shared body of §4.3 `cancelResponse()`, usable both from the executor's
/// own method and from the inbound loop's `speech_started` handling, which
/// must cancel the in-flight response itself rather than only notifying the
/// runner.
async fn cancel_response_now(shared: &Arc<Shared>, outbound_tx: Option<&mpsc::Sender<OutboundMessage>>) {
    shared.cancel_guard.begin();
    shared.speaking.store(false, Ordering::SeqCst);
    *shared.current_response_id.lock() = None;

    if let Some(tx) = outbound_tx {
        let _ = tx.send(OutboundMessage::Json(json!({"type": "response.cancel"}))).await;
    }

    let guard = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(crate::common::CANCEL_SUPPRESSION_WINDOW).await;
        guard.cancel_guard.clear();
    });
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
                let frame = json!({"type": "input_audio_buffer.append", "audio": b64});
                ws_sender.send(WsMessage::Text(frame.to_string())).await
            }
            OutboundMessage::Json(value) => ws_sender.send(WsMessage::Text(value.to_string())).await,
            OutboundMessage::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        };
        if sent.is_err() {
            tracing::warn!("provider A outbound send failed, closing outbound loop");
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
    greeting: Option<String>,
    // NB: greeting delivery is spawned from the `session.created` branch below.
) {
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => {
                handle_server_event(&text, &shared, &outbound_tx, &greeting).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "provider A websocket error");
                shared.emit(ExecutorEvent::Error(e.to_string()));
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.emit(ExecutorEvent::ConnectionClosed);
}

async fn handle_server_event(
    text: &str,
    shared: &Arc<Shared>,
    outbound_tx: &mpsc::Sender<OutboundMessage>,
    greeting: &Option<String>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            shared.emit(ExecutorEvent::Error(format!("malformed provider event: {e}")));
            return;
        }
    };
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "session.created" => {
            if let Some(greeting_text) = greeting {
                send_greeting(outbound_tx, greeting_text).await;
            }
        }
        "response.created" => {
            let response_id = value
                .get("response")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            *shared.current_response_id.lock() = response_id;
            shared.speaking.store(true, Ordering::SeqCst);
            shared.emit(ExecutorEvent::AgentSpeaking);
        }
        "response.audio.delta" => {
            if let Some(delta) = value.get("delta").and_then(Value::as_str) {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(delta) {
                    shared.emit(ExecutorEvent::AudioDelta(bytes));
                }
            }
        }
        "response.audio_transcript.delta" => {
            if let Some(text) = value.get("delta").and_then(Value::as_str) {
                shared.emit(ExecutorEvent::TranscriptDelta(TranscriptDelta {
                    role: TranscriptRole::Assistant,
                    content: text.to_string(),
                    timestamp_ms: now_millis(),
                    is_final: false,
                }));
            }
        }
        "response.audio_transcript.done" => {
            if let Some(text) = value.get("transcript").and_then(Value::as_str) {
                shared.emit(ExecutorEvent::TranscriptDelta(TranscriptDelta {
                    role: TranscriptRole::Assistant,
                    content: text.to_string(),
                    timestamp_ms: now_millis(),
                    is_final: true,
                }));
            }
        }
        "response.done" => {
            *shared.current_response_id.lock() = None;
            shared.speaking.store(false, Ordering::SeqCst);
            shared.emit(ExecutorEvent::AgentListening);
            shared.emit(ExecutorEvent::TurnComplete);
        }
        "response.function_call_arguments.done" => {
            let name = value.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = value.get("arguments").and_then(Value::as_str).unwrap_or_default().to_string();
            let call_id = value.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let shared = Arc::clone(shared);
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                execute_function_call(shared, outbound_tx, name, arguments, call_id).await;
            });
        }
        "input_audio_buffer.speech_started" => {
            if shared.speaking.load(Ordering::SeqCst) {
                cancel_response_now(shared, Some(outbound_tx)).await;
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(INTERRUPTION_DEBOUNCE_MS)).await;
                    shared.emit(ExecutorEvent::UserInterrupted);
                });
            }
        }
        "error" => {
            if !shared.cancel_guard.is_suppressing() {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider error");
                shared.emit(ExecutorEvent::Error(message.to_string()));
            }
        }
        _ => {
            tracing::trace!(event_type, "provider A event (unhandled)");
        }
    }
}

async fn send_greeting(outbound_tx: &mpsc::Sender<OutboundMessage>, greeting: &str) {
    let item = json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": greeting}],
        }
    });
    if outbound_tx.send(OutboundMessage::Json(item)).await.is_ok() {
        let _ = outbound_tx
            .send(OutboundMessage::Json(json!({"type": "response.create"})))
            .await;
    }
}

/// §4.3 "Function-call execution": parse args (empty on failure), look up
/// the tool, round-trip the result back to the provider, then issue
/// `response.create` to resume. Runs off the inbound loop so a slow tool
/// cannot stall the audio path (§5).
async fn execute_function_call(
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    name: String,
    arguments: String,
    call_id: String,
) {
    let args: Value = serde_json::from_str(&arguments).unwrap_or_else(|_| json!({}));
    let ctx = shared.agent_context();

    shared.tool_call_count.fetch_add(1, Ordering::SeqCst);
    let outcome = match shared.tools.execute(&name, args, &ctx).await {
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

    let output_json = serde_json::to_string(&outcome).unwrap_or_else(|_| "{}".to_string());
    let item = json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output_json,
        }
    });
    if outbound_tx.send(OutboundMessage::Json(item)).await.is_ok() {
        let _ = outbound_tx
            .send(OutboundMessage::Json(json!({"type": "response.create"})))
            .await;
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicecore_types::VoiceConfig;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            system_prompt: "Be helpful.".to_string(),
            voice: VoiceConfig {
                voice_name: "alloy".to_string(),
                vad_threshold: Some(0.4),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn session_update_carries_instructions_and_vad() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let update = exec.build_session_update();
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["instructions"], "Be helpful.");
        assert_eq!(update["session"]["input_audio_format"], "pcm16");
        assert_eq!(update["session"]["turn_detection"]["threshold"], 0.4);
        assert_eq!(update["session"]["tool_choice"], "auto");
        assert_eq!(update["session"]["max_output_tokens"], 4096);
    }

    #[test]
    fn fresh_executor_is_not_connected_or_speaking() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        assert!(!exec.is_connected());
        assert!(!exec.is_speaking());
    }

    #[tokio::test]
    async fn send_audio_without_connection_fails_not_connected() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let err = exec.send_audio(&[1, 2, 3, 4]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NotConnected));
    }

    #[tokio::test]
    async fn empty_audio_is_a_no_op_even_when_connected() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        assert!(exec.send_audio(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn fresh_executor_has_no_tool_calls_or_errors() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        assert_eq!(exec.tool_call_count(), 0);
        assert_eq!(exec.last_error(), None);
    }

    #[tokio::test]
    async fn unknown_tool_call_increments_count_and_records_error() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        let (tx, _rx) = mpsc::channel(8);
        execute_function_call(exec.shared.clone(), tx, "nope".to_string(), "{}".to_string(), "call1".to_string())
            .await;
        assert_eq!(exec.tool_call_count(), 1);
        assert!(exec.last_error().is_some());
    }

    #[tokio::test]
    async fn speech_started_while_speaking_cancels_the_response() {
        let exec = ProviderAExecutor::new(config(), "co1".into(), "bot1".into(), "key".into());
        exec.shared.speaking.store(true, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::channel(8);

        handle_server_event(r#"{"type":"input_audio_buffer.speech_started"}"#, &exec.shared, &tx, &None).await;

        assert!(!exec.is_speaking());
        assert!(exec.shared.cancel_guard.is_cancelling());
        match rx.recv().await.unwrap() {
            OutboundMessage::Json(v) => assert_eq!(v["type"], "response.cancel"),
            other => panic!("expected a response.cancel frame, got {other:?}"),
        }
    }
}
