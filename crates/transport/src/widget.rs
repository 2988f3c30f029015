//! H1 web-widget WebSocket handler (§4.4). JSON framing with a `type`
//! discriminator; audio passes through to the executor with no codec or
//! rate conversion.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use voicecore_types::handler::{HandlerCore, HandlerError, HandlerEvent};
use voicecore_types::session::{CallId, SessionId};
use voicecore_types::{TransportHandler, TranscriptRole};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsInbound {
    StartCall,
    AudioData { data: AudioDataPayload },
    EndCall,
}

#[derive(Debug, Deserialize)]
struct AudioDataPayload {
    audio: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsOutbound {
    Status {
        state: String,
    },
    CallStarted {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "callId")]
        call_id: CallId,
    },
    CallEnded {
        reason: String,
        #[serde(rename = "callId")]
        call_id: CallId,
        timestamp: i64,
    },
    AudioResponse {
        audio: String,
    },
    Transcript {
        text: String,
        role: TranscriptRole,
        timestamp: i64,
    },
    AgentSpeaking,
    AgentListening,
    StopAudio {
        reason: String,
    },
    Error {
        message: String,
        timestamp: i64,
    },
    EscalationStarted {
        reason: String,
        urgency: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        message: String,
        timestamp: i64,
    },
}

/// H1 handler: owns one upgraded widget WebSocket connection for the
/// lifetime of a call.
pub struct WidgetHandler {
    core: HandlerCore,
    sink: AsyncMutex<SplitSink<WebSocket, WsMessage>>,
    stream: AsyncMutex<Option<SplitStream<WebSocket>>>,
    event_tx: SyncMutex<Option<mpsc::Sender<HandlerEvent>>>,
}

impl WidgetHandler {
    pub fn new(session_id: SessionId, call_id: CallId, socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let core = HandlerCore::new(session_id);
        core.set_call_id(call_id);
        Self {
            core,
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(Some(stream)),
            event_tx: SyncMutex::new(None),
        }
    }

    fn emit(&self, event: HandlerEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.try_send(event);
        }
    }

    async fn send_frame(&self, frame: &WsOutbound) -> Result<(), HandlerError> {
        if !self.core.is_active() {
            return Ok(());
        }
        let text = serde_json::to_string(frame).map_err(|e| HandlerError::SendFailed(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| HandlerError::SendFailed(e.to_string()))
    }

    async fn run_inbound_loop(&self) {
        let mut stream = match self.stream.lock().await.take() {
            Some(s) => s,
            None => return,
        };
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.handle_text(&text).await,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "widget socket read error");
                    break;
                }
            }
        }
        if self.core.is_active() {
            let _ = self.end(Some("Client disconnected".to_string())).await;
        }
    }

    async fn handle_text(&self, text: &str) {
        let parsed: Result<WsInbound, _> = serde_json::from_str(text);
        match parsed {
            Ok(WsInbound::StartCall) => {
                let call_id = self.core.call_id().unwrap_or_default();
                let _ = self
                    .send_frame(&WsOutbound::CallStarted {
                        session_id: self.core.session_id.clone(),
                        call_id,
                    })
                    .await;
                self.emit(HandlerEvent::CallStarted);
            }
            Ok(WsInbound::AudioData { data }) => match BASE64.decode(data.audio.as_bytes()) {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => self.emit(HandlerEvent::AudioReceived(bytes)),
                Err(e) => tracing::debug!(error = %e, "dropping malformed audio_data frame"),
            },
            Ok(WsInbound::EndCall) => {
                let _ = self.end(Some("User ended call".to_string())).await;
            }
            Err(e) => tracing::debug!(error = %e, raw = %text, "dropping unrecognized widget frame"),
        }
    }

    fn json_escalation(value: &Value) -> Option<(String, String, Option<String>)> {
        let reason = value.get("reason")?.as_str()?.to_string();
        let urgency = value.get("urgency")?.as_str()?.to_string();
        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Some((reason, urgency, summary))
    }

    /// Sent by the runner when a tool outcome carries `{action: "escalate"}`.
    pub async fn send_escalation(&self, escalation: &Value) -> Result<(), HandlerError> {
        let Some((reason, urgency, summary)) = Self::json_escalation(escalation) else {
            return Ok(());
        };
        self.send_frame(&WsOutbound::EscalationStarted {
            reason: reason.clone(),
            urgency,
            summary,
            message: format!("Escalating: {reason}"),
            timestamp: Utc::now().timestamp_millis(),
        })
        .await
    }
}

#[async_trait]
impl TransportHandler for WidgetHandler {
    fn session_id(&self) -> &SessionId {
        &self.core.session_id
    }

    fn call_id(&self) -> Option<CallId> {
        self.core.call_id()
    }

    fn is_handler_active(&self) -> bool {
        self.core.is_active()
    }

    async fn start(&self) -> Result<(), HandlerError> {
        self.send_frame(&WsOutbound::Status {
            state: "connected".to_string(),
        })
        .await?;
        Ok(())
    }

    async fn handle_audio(&self, bytes: &[u8]) -> Result<(), HandlerError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.emit(HandlerEvent::AudioReceived(bytes.to_vec()));
        Ok(())
    }

    async fn send_audio(&self, pcm16: &[u8]) -> Result<(), HandlerError> {
        if pcm16.is_empty() {
            return Ok(());
        }
        self.send_frame(&WsOutbound::AudioResponse {
            audio: BASE64.encode(pcm16),
        })
        .await
    }

    async fn end(&self, reason: Option<String>) -> Result<(), HandlerError> {
        if !self.core.is_active() {
            return Ok(());
        }
        let reason = reason.unwrap_or_else(|| "Call ended".to_string());
        let call_id = self.core.call_id().unwrap_or_default();
        let _ = self
            .send_frame(&WsOutbound::CallEnded {
                reason: reason.clone(),
                call_id,
                timestamp: Utc::now().timestamp_millis(),
            })
            .await;
        self.core.deactivate();
        let _ = self.sink.lock().await.send(WsMessage::Close(None)).await;
        self.emit(HandlerEvent::CallEnded(Some(reason)));
        Ok(())
    }

    async fn handle_transcript(&self, text: &str, role: TranscriptRole) {
        let _ = self
            .send_frame(&WsOutbound::Transcript {
                text: text.to_string(),
                role,
                timestamp: Utc::now().timestamp_millis(),
            })
            .await;
    }

    async fn handle_agent_speaking(&self) {
        let _ = self.send_frame(&WsOutbound::AgentSpeaking).await;
    }

    async fn handle_agent_listening(&self) {
        let _ = self.send_frame(&WsOutbound::AgentListening).await;
    }

    async fn handle_user_interrupted(&self) {
        let _ = self
            .send_frame(&WsOutbound::StopAudio {
                reason: "user_interrupted".to_string(),
            })
            .await;
    }

    fn subscribe(&self) -> mpsc::Receiver<HandlerEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.event_tx.lock() = Some(tx);
        rx
    }
}

/// Spawn the handler's inbound read loop; returns once the socket closes.
pub async fn drive(handler: &WidgetHandler) {
    handler.run_inbound_loop().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_call_frame_parses() {
        let msg: WsInbound = serde_json::from_str(r#"{"type":"start_call"}"#).unwrap();
        assert!(matches!(msg, WsInbound::StartCall));
    }

    #[test]
    fn audio_data_frame_parses_nested_payload() {
        let msg: WsInbound =
            serde_json::from_str(r#"{"type":"audio_data","data":{"audio":"AAEC"}}"#).unwrap();
        match msg {
            WsInbound::AudioData { data } => assert_eq!(data.audio, "AAEC"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn call_started_frame_serializes_camel_case_ids() {
        let frame = WsOutbound::CallStarted {
            session_id: "s1".to_string(),
            call_id: "c1".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "call_started");
        assert_eq!(json["data"]["sessionId"], "s1");
        assert_eq!(json["data"]["callId"], "c1");
    }

    #[test]
    fn unknown_frame_is_ignored_not_a_panic() {
        let result: Result<WsInbound, _> = serde_json::from_str(r#"{"type":"bogus"}"#);
        assert!(result.is_err());
    }
}
