//! H2 telephony media-stream handler (§4.4). Framing is JSON with an
//! `event` discriminator following the carrier media-stream schema; audio
//! is µ-law @ 8 kHz mono and must be converted to/from the bound
//! executor's PCM16 rate.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use voicecore_audio::{linear_resample, mulaw_to_pcm16, pcm16_to_mulaw};
use voicecore_types::handler::{HandlerCore, HandlerError, HandlerEvent};
use voicecore_types::session::{CallId, SessionId};
use voicecore_types::{TransportHandler, TranscriptRole};

const TELEPHONY_RATE_HZ: u32 = 8000;
/// Both provider variants emit PCM16 at this rate (§4.3).
const EXECUTOR_OUTPUT_RATE_HZ: u32 = 24000;

/// H2 handler: owns one upgraded telephony media-stream WebSocket.
pub struct TelephonyHandler {
    core: HandlerCore,
    sink: AsyncMutex<SplitSink<WebSocket, WsMessage>>,
    stream: AsyncMutex<Option<SplitStream<WebSocket>>>,
    event_tx: SyncMutex<Option<mpsc::Sender<HandlerEvent>>>,
    stream_sid: SyncMutex<Option<String>>,
    provider_input_rate_hz: u32,
    mark_seq: SyncMutex<u64>,
}

impl TelephonyHandler {
    /// `provider_input_rate_hz` is 24000 for provider A, 16000 for provider B
    /// (§4.3/§6) — the rate inbound audio must be resampled to before
    /// reaching the executor.
    pub fn new(
        session_id: SessionId,
        call_id: CallId,
        socket: WebSocket,
        provider_input_rate_hz: u32,
    ) -> Self {
        let (sink, stream) = socket.split();
        let core = HandlerCore::new(session_id);
        core.set_call_id(call_id);
        Self {
            core,
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(Some(stream)),
            event_tx: SyncMutex::new(None),
            stream_sid: SyncMutex::new(None),
            provider_input_rate_hz,
            mark_seq: SyncMutex::new(0),
        }
    }

    fn emit(&self, event: HandlerEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.try_send(event);
        }
    }

    fn stream_sid(&self) -> Option<String> {
        self.stream_sid.lock().clone()
    }

    async fn send_json(&self, value: Value) -> Result<(), HandlerError> {
        if !self.core.is_active() || self.stream_sid().is_none() {
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(value.to_string()))
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
                    tracing::warn!(error = %e, "telephony socket read error");
                    break;
                }
            }
        }
        if self.core.is_active() {
            let _ = self.end(Some("Transport closed".to_string())).await;
        }
    }

    async fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring non-JSON media-stream frame");
                return;
            }
        };
        match value.get("event").and_then(Value::as_str) {
            Some("connected") => {}
            Some("start") => {
                let sid = value
                    .get("start")
                    .and_then(|s| s.get("streamSid"))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                *self.stream_sid.lock() = sid;
                self.emit(HandlerEvent::CallStarted);
            }
            Some("media") => {
                let Some(payload) = value
                    .get("media")
                    .and_then(|m| m.get("payload"))
                    .and_then(Value::as_str)
                else {
                    return;
                };
                let Ok(mulaw) = BASE64.decode(payload.as_bytes()) else {
                    tracing::debug!("dropping malformed media payload");
                    return;
                };
                if mulaw.is_empty() {
                    return;
                }
                let pcm16 = mulaw_to_pcm16(&mulaw);
                let resampled =
                    linear_resample(&pcm16, TELEPHONY_RATE_HZ, self.provider_input_rate_hz);
                self.emit(HandlerEvent::AudioReceived(resampled));
            }
            Some("stop") => {
                let _ = self.end(Some("Stream stopped".to_string())).await;
            }
            Some("mark") => {}
            Some(other) => tracing::trace!(event = other, "unhandled media-stream event"),
            None => tracing::debug!("media-stream frame missing event discriminator"),
        }
    }

    /// Tracks outbound playback position; no fixed trigger cadence is
    /// mandated by the wire protocol, so callers invoke this per chunk.
    pub async fn send_mark(&self) -> Result<(), HandlerError> {
        let Some(sid) = self.stream_sid() else {
            return Ok(());
        };
        let seq = {
            let mut guard = self.mark_seq.lock();
            *guard += 1;
            *guard
        };
        self.send_json(json!({
            "event": "mark",
            "streamSid": sid,
            "mark": { "name": format!("chunk-{seq}") },
        }))
        .await
    }
}

#[async_trait]
impl TransportHandler for TelephonyHandler {
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
        let Some(sid) = self.stream_sid() else {
            return Ok(());
        };
        let resampled = linear_resample(pcm16, EXECUTOR_OUTPUT_RATE_HZ, TELEPHONY_RATE_HZ);
        let mulaw = pcm16_to_mulaw(&resampled);
        self.send_json(json!({
            "event": "media",
            "streamSid": sid,
            "media": { "payload": BASE64.encode(mulaw) },
        }))
        .await
    }

    async fn end(&self, reason: Option<String>) -> Result<(), HandlerError> {
        if !self.core.is_active() {
            return Ok(());
        }
        self.core.deactivate();
        let _ = self.sink.lock().await.send(WsMessage::Close(None)).await;
        self.emit(HandlerEvent::CallEnded(reason));
        Ok(())
    }

    async fn handle_transcript(&self, _text: &str, _role: TranscriptRole) {
        // No wire representation in the carrier media-stream protocol.
    }

    async fn handle_agent_speaking(&self) {}

    async fn handle_agent_listening(&self) {}

    async fn handle_user_interrupted(&self) {
        if let Some(sid) = self.stream_sid() {
            let _ = self.send_json(json!({ "event": "clear", "streamSid": sid })).await;
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<HandlerEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.event_tx.lock() = Some(tx);
        rx
    }
}

/// Spawn the handler's inbound read loop; returns once the socket closes.
pub async fn drive(handler: &TelephonyHandler) {
    handler.run_inbound_loop().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_is_recognized() {
        let value: Value =
            serde_json::from_str(r#"{"event":"start","start":{"streamSid":"MZ1"}}"#).unwrap();
        assert_eq!(value["event"], "start");
        assert_eq!(value["start"]["streamSid"], "MZ1");
    }

    #[test]
    fn media_payload_round_trips_through_mulaw() {
        let pcm16: Vec<u8> = (0..320i16)
            .flat_map(|s| (s * 50).to_le_bytes())
            .collect();
        let mulaw = voicecore_audio::pcm16_to_mulaw(&pcm16);
        let b64 = BASE64.encode(&mulaw);
        let decoded = BASE64.decode(b64.as_bytes()).unwrap();
        assert_eq!(decoded, mulaw);
        let back = mulaw_to_pcm16(&decoded);
        assert_eq!(back.len(), pcm16.len());
    }
}
