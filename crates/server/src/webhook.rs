//! Messenger webhook (§6): verification handshake plus the signed POST
//! carrying `connect`/`terminate`/`media` call events. A `connect` that
//! can't be resolved to a session and chatbot is rejected at the carrier
//! rather than surfaced into the core (§7 category 2, Authorization).
//!
//! Carrier `connect` payloads are observed with slightly different
//! SDP-envelope shapes and no canonical field set; this parses via
//! `serde_json::Value` and logs unrecognized shapes instead of assuming
//! defaults (§9 open question).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use voicecore_transport::MessengerHandler;
use voicecore_types::session::{AiProvider, CreateSessionParams, SessionSource};
use voicecore_types::TransportHandler;

use crate::state::AppState;
use crate::ServerError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// `GET` handshake: echoes the challenge only if the mode is `subscribe`
/// and the token matches the configured value.
pub async fn verify(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> impl IntoResponse {
    let configured = state
        .settings
        .webhook
        .verify_token
        .clone()
        .or_else(voicecore_config::env::whatsapp_webhook_verify_token);

    match (query.mode.as_deref(), &query.verify_token, &configured, query.challenge) {
        (Some("subscribe"), Some(got), Some(want), Some(challenge)) if got == want => {
            (StatusCode::OK, challenge).into_response()
        }
        _ => (StatusCode::FORBIDDEN, "verification failed").into_response(),
    }
}

fn signature_valid(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig).is_ok()
}

/// `POST` ingestion: verifies the raw-body signature (if a secret is
/// configured) before touching JSON, then dispatches each `calls[]` entry.
/// Signature and parse failures map onto the §7 Authorization/Validation
/// categories via `ServerError` rather than building ad-hoc JSON bodies.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let secret = state.settings.webhook.app_secret.clone().or_else(voicecore_config::env::whatsapp_app_secret);
    if let Some(secret) = secret {
        let valid = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .map(|header| signature_valid(&secret, &body, header))
            .unwrap_or(false);
        if !valid {
            // §8(f) pins the exact wire body, so this bypasses `ServerError`'s
            // generic "authorization failed: ..." prefix.
            return Ok((StatusCode::UNAUTHORIZED, axum::Json(json!({ "error": "Invalid signature" }))));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| ServerError::Validation(format!("malformed payload: {err}")))?;

    for call in extract_calls(&payload) {
        dispatch_call_event(&state, call).await;
    }

    Ok((StatusCode::OK, axum::Json(json!({ "status": "ok" }))))
}

/// Narrow mapper over `entry[*].changes[*].value.calls[*]`; any shape that
/// doesn't match is logged and skipped rather than defaulted.
fn extract_calls(payload: &Value) -> Vec<&Value> {
    let mut calls = Vec::new();
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        tracing::debug!(?payload, "messenger webhook: no entry[] in payload");
        return calls;
    };
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else { continue };
        for change in changes {
            let Some(entries) = change.pointer("/value/calls").and_then(Value::as_array) else { continue };
            calls.extend(entries.iter());
        }
    }
    calls
}

async fn dispatch_call_event(state: &AppState, call: &Value) {
    let event = call.get("event").and_then(Value::as_str).unwrap_or("");
    let carrier_call_id = call.get("id").and_then(Value::as_str).unwrap_or_default().to_string();

    match event {
        "connect" => handle_connect(state, call, &carrier_call_id).await,
        "terminate" => handle_terminate(state, call, &carrier_call_id).await,
        "media" => handle_media(state, call, &carrier_call_id).await,
        other => tracing::debug!(event = other, carrier_call_id, "messenger webhook: unrecognized call event"),
    }
}

async fn handle_connect(state: &AppState, call: &Value, carrier_call_id: &str) {
    let session_id = call.get("session_id").and_then(Value::as_str).map(str::to_string);
    let chatbot_id = call
        .get("chatbot_id")
        .and_then(Value::as_str)
        .or_else(|| call.pointer("/metadata/phone_number_id").and_then(Value::as_str))
        .map(str::to_string);
    let sdp_offer = call.get("sdp").and_then(Value::as_str).map(str::to_string);
    let caller = call.get("from").and_then(Value::as_str).map(str::to_string);

    let session = match session_id.and_then(|id| state.session_manager.get_session(&id)) {
        Some(session) => Some(session),
        None => match &chatbot_id {
            Some(chatbot_id) => resolve_or_create_session(state, chatbot_id, caller).await,
            None => None,
        },
    };

    let Some(session) = session else {
        state.carrier_client.reject_call(carrier_call_id, "no_chatbot").await;
        return;
    };

    let audio_codec = sdp_offer
        .as_deref()
        .and_then(|sdp| state.webrtc_subsystem.preferred_audio_codec(sdp))
        .unwrap_or_else(|| "opus".to_string());
    let provider_rate = match session.ai_provider {
        AiProvider::A => 24000,
        AiProvider::B => 16000,
    };

    let handler = Arc::new(MessengerHandler::new(
        session.session_id.clone(),
        session.call_id.clone(),
        state.webrtc_subsystem.clone(),
        audio_codec,
        provider_rate,
    ));

    if let Err(err) = handler.negotiate(sdp_offer.as_deref()).await {
        tracing::warn!(carrier_call_id, error = %err, "messenger webhook: SDP negotiation failed");
        state.carrier_client.reject_call(carrier_call_id, "negotiation_failed").await;
        return;
    }

    // Keyed by the carrier's own call id (not our internal `callId`):
    // `terminate`/`media` events reference the id the carrier assigned.
    state.register_messenger_handler(carrier_call_id.to_string(), handler.clone());

    if let Err(err) = state.runner.start_call(&session.session_id, handler.clone(), None).await {
        tracing::warn!(session_id = %session.session_id, error = %err, "messenger webhook: start_call failed");
        state.remove_messenger_handler(carrier_call_id);
        state.carrier_client.reject_call(carrier_call_id, "internal_error").await;
        return;
    }

    tokio::spawn(voicecore_transport::webrtc_subsystem::drive(handler, session.call_id));
}

/// Falls back to creating a fresh session when the carrier didn't echo a
/// pre-reserved `session_id` (§3 "created on reservation by the
/// reservation endpoint (external)" assumes the common case; some carrier
/// configurations only ever deliver `connect` with just a phone number).
async fn resolve_or_create_session(
    state: &AppState,
    chatbot_id: &str,
    caller: Option<String>,
) -> Option<voicecore_types::session::Session> {
    let chatbot = state.config_provider.get_chatbot(chatbot_id).await?;
    let ai_provider = chatbot.call_ai_provider?;
    state
        .runner
        .create_session(CreateSessionParams {
            call_id: String::new(),
            chatbot_id: chatbot_id.to_string(),
            company_id: chatbot.company_id,
            end_user_id: caller,
            source: SessionSource::Whatsapp,
            ai_provider,
        })
        .await
}

async fn handle_terminate(state: &AppState, call: &Value, carrier_call_id: &str) {
    let reason = call.get("reason").and_then(Value::as_str).unwrap_or("carrier terminated").to_string();
    let Some(handler) = state.messenger_handler(carrier_call_id) else {
        tracing::debug!(carrier_call_id, "messenger webhook: terminate for unknown call");
        return;
    };
    state.runner.end_call(handler.session_id(), Some(reason)).await;
    state.remove_messenger_handler(carrier_call_id);
}

/// Inbound audio normally arrives over the negotiated WebRTC media line,
/// not the webhook body; this only covers carriers that also echo base64
/// chunks here (§9 open question — shape not observed in the fixtures).
async fn handle_media(state: &AppState, call: &Value, carrier_call_id: &str) {
    let Some(handler) = state.messenger_handler(carrier_call_id) else {
        return;
    };
    let Some(chunks) = call.get("media").and_then(Value::as_array) else {
        return;
    };
    for chunk in chunks {
        let Some(b64) = chunk.as_str() else { continue };
        match BASE64.decode(b64) {
            Ok(bytes) => {
                if let Err(err) = handler.handle_audio(&bytes).await {
                    tracing::warn!(carrier_call_id, error = %err, "messenger webhook: media forward failed");
                }
            }
            Err(err) => tracing::debug!(carrier_call_id, error = %err, "messenger webhook: bad base64 media chunk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_round_trips() {
        let body = br#"{"entry":[]}"#;
        let header = sign("shh", body);
        assert!(signature_valid("shh", body, &header));
    }

    #[test]
    fn tampered_body_fails_signature() {
        let header = sign("shh", b"original");
        assert!(!signature_valid("shh", b"tampered", &header));
    }

    #[test]
    fn missing_sha256_prefix_rejected() {
        assert!(!signature_valid("shh", b"body", "deadbeef"));
    }

    #[test]
    fn extract_calls_reads_nested_envelope() {
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "calls": [
                            {"event": "connect", "id": "c1"},
                            {"event": "terminate", "id": "c1", "reason": "completed"},
                        ]
                    }
                }]
            }]
        });
        let calls = extract_calls(&payload);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["event"], "connect");
    }

    #[test]
    fn extract_calls_tolerates_missing_entry() {
        let payload = json!({ "object": "whatsapp_business_account" });
        assert!(extract_calls(&payload).is_empty());
    }
}
