//! H3 messenger WebRTC handler (§4.4). The handler itself is transport-
//! protocol-agnostic; it drives an injected `WebRtcSubsystem` rather than
//! talking to the `webrtc` crate directly, so the handler logic is testable
//! without a real peer connection. A concrete `webrtc`-crate-backed
//! subsystem is provided behind the `webrtc` feature.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use voicecore_audio::{linear_resample, mono_to_stereo, mulaw_to_pcm16};
use voicecore_types::handler::{HandlerCore, HandlerError, HandlerEvent};
use voicecore_types::session::{CallId, SessionId};
use voicecore_types::{TransportHandler, TranscriptRole};

const OUTBOUND_STEREO_RATE_HZ: u32 = 48000;
/// Both provider variants emit PCM16 at this rate (§4.3).
const EXECUTOR_OUTPUT_RATE_HZ: u32 = 24000;

/// Maps a negotiated audio codec to its native sample rate (§4.4).
pub fn codec_sample_rate_hz(codec: &str) -> u32 {
    match codec.to_ascii_uppercase().as_str() {
        "PCMU" | "PCMA" => 8000,
        "G722" => 16000,
        "OPUS" => 48000,
        "L16" => 16000,
        _ => 8000,
    }
}

#[derive(Debug, Clone)]
pub struct SdpValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WebRtcSession {
    pub sdp_answer: String,
}

#[derive(Debug, Clone)]
pub struct WebRtcAudioEvent {
    pub call_id: CallId,
    pub audio: Vec<u8>,
    pub codec: String,
    pub sample_rate_hz: u32,
}

#[derive(Debug, Error)]
pub enum WebRtcSubsystemError {
    #[error("invalid SDP offer: {0}")]
    InvalidOffer(String),
    #[error("no active session for call {0}")]
    NoSession(CallId),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// The WebRTC signaling/media surface the messenger handler depends on
/// (§4.4). Implementations own peer-connection lifecycle keyed by `callId`.
#[async_trait]
pub trait WebRtcSubsystem: Send + Sync {
    fn validate_sdp_offer(&self, sdp: &str) -> SdpValidation;
    fn preferred_audio_codec(&self, sdp: &str) -> Option<String>;

    async fn create_session(
        &self,
        call_id: &CallId,
        sdp_offer: Option<&str>,
        audio_codec: &str,
        audio_sample_rate_hz: u32,
    ) -> Result<WebRtcSession, WebRtcSubsystemError>;

    async fn send_audio(
        &self,
        call_id: &CallId,
        stereo_pcm16: &[u8],
    ) -> Result<(), WebRtcSubsystemError>;

    async fn clear_audio_queue(&self, call_id: &CallId) -> Result<(), WebRtcSubsystemError>;
    async fn end_session(&self, call_id: &CallId) -> Result<(), WebRtcSubsystemError>;

    /// Per-call inbound audio stream; callers subscribe once per call.
    fn subscribe_audio(&self, call_id: &CallId) -> mpsc::Receiver<WebRtcAudioEvent>;
}

pub type SharedWebRtcSubsystem = Arc<dyn WebRtcSubsystem>;

/// H3 handler: one messenger call bound to a WebRTC subsystem session.
pub struct MessengerHandler {
    core: HandlerCore,
    subsystem: SharedWebRtcSubsystem,
    event_tx: std::sync::Mutex<Option<mpsc::Sender<HandlerEvent>>>,
    answer_sdp: std::sync::Mutex<Option<String>>,
    audio_codec: String,
    provider_input_rate_hz: u32,
}

impl MessengerHandler {
    /// `provider_input_rate_hz` is 24000 for provider A, 16000 for provider B.
    pub fn new(
        session_id: SessionId,
        call_id: CallId,
        subsystem: SharedWebRtcSubsystem,
        audio_codec: String,
        provider_input_rate_hz: u32,
    ) -> Self {
        let core = HandlerCore::new(session_id);
        core.set_call_id(call_id);
        Self {
            core,
            subsystem,
            event_tx: std::sync::Mutex::new(None),
            answer_sdp: std::sync::Mutex::new(None),
            audio_codec,
            provider_input_rate_hz,
        }
    }

    fn emit(&self, event: HandlerEvent) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.try_send(event);
        }
    }

    pub fn sdp_answer(&self) -> Option<String> {
        self.answer_sdp.lock().unwrap().clone()
    }

    /// Connects the offer (if any) and begins relaying inbound WebRTC audio
    /// toward `emitAudioReceived` as provider-rate PCM16 (§4.4).
    pub async fn negotiate(&self, sdp_offer: Option<&str>) -> Result<(), HandlerError> {
        if let Some(sdp) = sdp_offer {
            let validation = self.subsystem.validate_sdp_offer(sdp);
            if !validation.valid {
                return Err(HandlerError::SendFailed(format!(
                    "invalid SDP offer: {}",
                    validation.issues.join(", ")
                )));
            }
        }
        let native_rate = codec_sample_rate_hz(&self.audio_codec);
        let session = self
            .subsystem
            .create_session(
                self.core.call_id().as_ref().unwrap_or(&String::new()),
                sdp_offer,
                &self.audio_codec,
                native_rate,
            )
            .await
            .map_err(|e| HandlerError::SendFailed(e.to_string()))?;
        *self.answer_sdp.lock().unwrap() = Some(session.sdp_answer);
        Ok(())
    }

    fn decode_native(&self, audio: &[u8], codec: &str) -> Vec<u8> {
        match codec.to_ascii_uppercase().as_str() {
            "PCMU" => mulaw_to_pcm16(audio),
            _ => audio.to_vec(),
        }
    }

    async fn forward_inbound_audio(&self, mut audio_rx: mpsc::Receiver<WebRtcAudioEvent>) {
        while let Some(evt) = audio_rx.recv().await {
            if evt.audio.is_empty() {
                continue;
            }
            let pcm16 = self.decode_native(&evt.audio, &evt.codec);
            let resampled = linear_resample(&pcm16, evt.sample_rate_hz, self.provider_input_rate_hz);
            self.emit(HandlerEvent::AudioReceived(resampled));
        }
    }

    /// Applies a carrier call-status callback (`completed|failed|no-answer|
    /// busy|in-progress`, unknowns ignored) to local handler state (§4.4).
    pub async fn handle_status(&self, status: &str) {
        match status {
            "in-progress" => self.emit(HandlerEvent::CallStarted),
            "completed" | "failed" | "no-answer" | "busy" => {
                let _ = self.end(Some(format!("carrier status: {status}"))).await;
            }
            _ => tracing::trace!(status, "ignoring unknown carrier call status"),
        }
    }
}

#[async_trait]
impl TransportHandler for MessengerHandler {
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
        let resampled = linear_resample(pcm16, EXECUTOR_OUTPUT_RATE_HZ, OUTBOUND_STEREO_RATE_HZ);
        let stereo = mono_to_stereo(&resampled);
        let call_id = self.core.call_id().unwrap_or_default();
        self.subsystem
            .send_audio(&call_id, &stereo)
            .await
            .map_err(|e| HandlerError::SendFailed(e.to_string()))
    }

    async fn end(&self, reason: Option<String>) -> Result<(), HandlerError> {
        if !self.core.is_active() {
            return Ok(());
        }
        self.core.deactivate();
        let call_id = self.core.call_id().unwrap_or_default();
        let _ = self.subsystem.end_session(&call_id).await;
        self.emit(HandlerEvent::CallEnded(reason));
        Ok(())
    }

    async fn handle_transcript(&self, _text: &str, _role: TranscriptRole) {}

    async fn handle_agent_speaking(&self) {}

    async fn handle_agent_listening(&self) {}

    async fn handle_user_interrupted(&self) {
        let call_id = self.core.call_id().unwrap_or_default();
        let _ = self.subsystem.clear_audio_queue(&call_id).await;
    }

    fn subscribe(&self) -> mpsc::Receiver<HandlerEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.event_tx.lock().unwrap() = Some(tx);
        rx
    }
}

/// Drives the inbound WebRTC audio relay for the handler's lifetime; the
/// caller spawns this once alongside `negotiate`.
pub async fn drive(handler: Arc<MessengerHandler>, call_id: CallId) {
    let audio_rx = handler.subsystem.subscribe_audio(&call_id);
    handler.forward_inbound_audio(audio_rx).await;
}

#[cfg(feature = "webrtc")]
pub mod native {
    //! Concrete `webrtc`-crate-backed subsystem. One `RTCPeerConnection`
    //! per call, Opus-only media line, outbound audio pushed as
    //! `TrackLocalStaticSample` frames.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as SyncMutex;
    use webrtc::api::interceptor_registry::register_default_interceptors;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::api::{APIBuilder, API};
    use webrtc::ice_transport::ice_server::RTCIceServer;
    use webrtc::interceptor::registry::Registry;
    use webrtc::media::Sample;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
    use webrtc::track::track_local::TrackLocal;

    struct CallSession {
        peer_connection: Arc<RTCPeerConnection>,
        outbound_track: Arc<TrackLocalStaticSample>,
    }

    type AudioSubscribers = Arc<SyncMutex<HashMap<CallId, mpsc::Sender<WebRtcAudioEvent>>>>;

    pub struct WebRtcPeerSubsystem {
        sessions: AsyncMutex<HashMap<CallId, CallSession>>,
        audio_subscribers: AudioSubscribers,
    }

    impl Default for WebRtcPeerSubsystem {
        fn default() -> Self {
            Self {
                sessions: AsyncMutex::new(HashMap::new()),
                audio_subscribers: Arc::new(SyncMutex::new(HashMap::new())),
            }
        }
    }

    impl WebRtcPeerSubsystem {
        pub fn new() -> Self {
            Self::default()
        }

        async fn build_api() -> Result<API, WebRtcSubsystemError> {
            let mut media_engine = MediaEngine::default();
            media_engine
                .register_codec(
                    webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: "audio/opus".to_string(),
                            clock_rate: 48000,
                            channels: 2,
                            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                            rtcp_feedback: vec![],
                        },
                        payload_type: 111,
                        stats_id: String::new(),
                    },
                    RTPCodecType::Audio,
                )
                .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;

            let mut registry = Registry::new();
            registry = register_default_interceptors(registry, &mut media_engine)
                .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;

            Ok(APIBuilder::new()
                .with_media_engine(media_engine)
                .with_interceptor_registry(registry)
                .build())
        }
    }

    #[async_trait]
    impl WebRtcSubsystem for WebRtcPeerSubsystem {
        fn validate_sdp_offer(&self, sdp: &str) -> SdpValidation {
            if sdp.trim().is_empty() {
                return SdpValidation {
                    valid: false,
                    issues: vec!["empty SDP body".to_string()],
                };
            }
            if !sdp.contains("v=0") {
                return SdpValidation {
                    valid: false,
                    issues: vec!["missing v=0 line".to_string()],
                };
            }
            SdpValidation { valid: true, issues: Vec::new() }
        }

        fn preferred_audio_codec(&self, sdp: &str) -> Option<String> {
            for codec in ["opus", "PCMU", "PCMA", "G722", "L16"] {
                if sdp.to_ascii_lowercase().contains(&codec.to_ascii_lowercase()) {
                    return Some(codec.to_string());
                }
            }
            None
        }

        async fn create_session(
            &self,
            call_id: &CallId,
            sdp_offer: Option<&str>,
            _audio_codec: &str,
            _audio_sample_rate_hz: u32,
        ) -> Result<WebRtcSession, WebRtcSubsystemError> {
            let api = Self::build_api().await?;
            let config = RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: vec!["stun:stun.l.google.com:19302".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            };
            let peer_connection = Arc::new(
                api.new_peer_connection(config)
                    .await
                    .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?,
            );

            let outbound_track = Arc::new(TrackLocalStaticSample::new(
                webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                format!("voicecore-{call_id}"),
            ));
            peer_connection
                .add_track(outbound_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;

            let subscribers = self.audio_subscribers.clone();
            let track_call_id = call_id.clone();
            peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                let subscribers = subscribers.clone();
                let call_id = track_call_id.clone();
                Box::pin(async move {
                    let mut buf = vec![0u8; 1500];
                    while let Ok((packet, _attrs)) = track.read(&mut buf).await {
                        let Ok(samples) = voicecore_audio::opus::decode(&packet.payload, 960) else {
                            continue;
                        };
                        let audio: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                        if let Some(tx) = subscribers.lock().unwrap().get(&call_id) {
                            let _ = tx.try_send(WebRtcAudioEvent {
                                call_id: call_id.clone(),
                                audio,
                                codec: "opus".to_string(),
                                sample_rate_hz: 48000,
                            });
                        }
                    }
                })
            }));

            let answer = if let Some(offer_sdp) = sdp_offer {
                let offer = RTCSessionDescription::offer(offer_sdp.to_string())
                    .map_err(|e| WebRtcSubsystemError::InvalidOffer(e.to_string()))?;
                peer_connection
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;
                let answer = peer_connection
                    .create_answer(None)
                    .await
                    .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;
                peer_connection
                    .set_local_description(answer.clone())
                    .await
                    .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;
                answer.sdp
            } else {
                String::new()
            };

            self.sessions.lock().await.insert(
                call_id.clone(),
                CallSession { peer_connection, outbound_track },
            );

            Ok(WebRtcSession { sdp_answer: answer })
        }

        async fn send_audio(
            &self,
            call_id: &CallId,
            stereo_pcm16: &[u8],
        ) -> Result<(), WebRtcSubsystemError> {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(call_id)
                .ok_or_else(|| WebRtcSubsystemError::NoSession(call_id.clone()))?;
            let samples: Vec<i16> = stereo_pcm16
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect();
            let encoded = voicecore_audio::opus::encode(&samples)
                .map_err(|_| WebRtcSubsystemError::Negotiation("opus encode unavailable".into()))?;
            session
                .outbound_track
                .write_sample(&Sample {
                    data: encoded.into(),
                    duration: std::time::Duration::from_millis(20),
                    ..Default::default()
                })
                .await
                .map_err(|e| WebRtcSubsystemError::Negotiation(e.to_string()))?;
            Ok(())
        }

        async fn clear_audio_queue(&self, call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
            if !self.sessions.lock().await.contains_key(call_id) {
                return Err(WebRtcSubsystemError::NoSession(call_id.clone()));
            }
            Ok(())
        }

        async fn end_session(&self, call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
            if let Some(session) = self.sessions.lock().await.remove(call_id) {
                let _ = session.peer_connection.close().await;
            }
            self.audio_subscribers.lock().unwrap().remove(call_id);
            Ok(())
        }

        fn subscribe_audio(&self, call_id: &CallId) -> mpsc::Receiver<WebRtcAudioEvent> {
            let (tx, rx) = mpsc::channel(256);
            self.audio_subscribers.lock().unwrap().insert(call_id.clone(), tx);
            rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_rate_map_matches_spec() {
        assert_eq!(codec_sample_rate_hz("PCMU"), 8000);
        assert_eq!(codec_sample_rate_hz("PCMA"), 8000);
        assert_eq!(codec_sample_rate_hz("G722"), 16000);
        assert_eq!(codec_sample_rate_hz("opus"), 48000);
        assert_eq!(codec_sample_rate_hz("L16"), 16000);
        assert_eq!(codec_sample_rate_hz("unknown-codec"), 8000);
    }

    struct NullSubsystem;

    #[async_trait]
    impl WebRtcSubsystem for NullSubsystem {
        fn validate_sdp_offer(&self, sdp: &str) -> SdpValidation {
            SdpValidation { valid: !sdp.is_empty(), issues: Vec::new() }
        }
        fn preferred_audio_codec(&self, _sdp: &str) -> Option<String> {
            Some("opus".to_string())
        }
        async fn create_session(
            &self,
            _call_id: &CallId,
            _sdp_offer: Option<&str>,
            _audio_codec: &str,
            _audio_sample_rate_hz: u32,
        ) -> Result<WebRtcSession, WebRtcSubsystemError> {
            Ok(WebRtcSession { sdp_answer: "v=0".to_string() })
        }
        async fn send_audio(&self, _call_id: &CallId, _stereo_pcm16: &[u8]) -> Result<(), WebRtcSubsystemError> {
            Ok(())
        }
        async fn clear_audio_queue(&self, _call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
            Ok(())
        }
        async fn end_session(&self, _call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
            Ok(())
        }
        fn subscribe_audio(&self, _call_id: &CallId) -> mpsc::Receiver<WebRtcAudioEvent> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    #[tokio::test]
    async fn negotiate_stores_sdp_answer() {
        let handler = MessengerHandler::new(
            "s1".to_string(),
            "c1".to_string(),
            Arc::new(NullSubsystem),
            "opus".to_string(),
            24000,
        );
        handler.negotiate(Some("v=0\r\n...")).await.unwrap();
        assert_eq!(handler.sdp_answer(), Some("v=0".to_string()));
    }

    #[tokio::test]
    async fn send_audio_on_inactive_handler_after_end_is_a_no_op() {
        let handler = MessengerHandler::new(
            "s1".to_string(),
            "c1".to_string(),
            Arc::new(NullSubsystem),
            "opus".to_string(),
            24000,
        );
        handler.end(None).await.unwrap();
        assert!(!handler.is_handler_active());
    }
}
