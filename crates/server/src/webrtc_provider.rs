//! Selects the WebRTC subsystem backing the messenger handler (§4.4 H3).
//! Behind the `webrtc` feature this is a real `webrtc`-crate peer
//! connection per call; without it, every call negotiation fails cleanly
//! so the webhook can still reject with a reason instead of panicking.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voicecore_transport::webrtc_subsystem::{SdpValidation, WebRtcAudioEvent};
use voicecore_transport::{WebRtcSession, WebRtcSubsystem, WebRtcSubsystemError};
use voicecore_types::session::CallId;

#[cfg(feature = "webrtc")]
pub fn build() -> Arc<dyn WebRtcSubsystem> {
    Arc::new(voicecore_transport::webrtc_subsystem::native::WebRtcPeerSubsystem::new())
}

#[cfg(not(feature = "webrtc"))]
pub fn build() -> Arc<dyn WebRtcSubsystem> {
    Arc::new(DisabledWebRtcSubsystem)
}

/// Used when the crate is built without the `webrtc` feature (~200 deps).
struct DisabledWebRtcSubsystem;

#[async_trait]
impl WebRtcSubsystem for DisabledWebRtcSubsystem {
    fn validate_sdp_offer(&self, _sdp: &str) -> SdpValidation {
        SdpValidation { valid: false, issues: vec!["webrtc support not built in".to_string()] }
    }

    fn preferred_audio_codec(&self, _sdp: &str) -> Option<String> {
        None
    }

    async fn create_session(
        &self,
        call_id: &CallId,
        _sdp_offer: Option<&str>,
        _audio_codec: &str,
        _audio_sample_rate_hz: u32,
    ) -> Result<WebRtcSession, WebRtcSubsystemError> {
        Err(WebRtcSubsystemError::Negotiation(format!(
            "webrtc support not built in (call {call_id})"
        )))
    }

    async fn send_audio(&self, call_id: &CallId, _stereo_pcm16: &[u8]) -> Result<(), WebRtcSubsystemError> {
        Err(WebRtcSubsystemError::NoSession(call_id.clone()))
    }

    async fn clear_audio_queue(&self, call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
        Err(WebRtcSubsystemError::NoSession(call_id.clone()))
    }

    async fn end_session(&self, _call_id: &CallId) -> Result<(), WebRtcSubsystemError> {
        Ok(())
    }

    fn subscribe_audio(&self, _call_id: &CallId) -> mpsc::Receiver<WebRtcAudioEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}
