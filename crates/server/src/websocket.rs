//! Browser and telephony transport upgrades (§4.7): the 5-step algorithm
//! shared by both paths, differing only in which handler variant gets
//! instantiated and which input rate its audio is resampled to.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use voicecore_transport::{telephony, widget, TelephonyHandler, WidgetHandler};
use voicecore_types::session::{AiProvider, SessionId};
use voicecore_types::{HandlerEvent, SharedHandler, TransportHandler};

use crate::state::AppState;

const CLOSE_MISSING_SESSION_ID: u16 = 4000;
const CLOSE_SESSION_NOT_FOUND: u16 = 4001;
const CLOSE_ALREADY_CONNECTED: u16 = 4002;

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<SessionId>,
}

/// Both provider variants' native input rate (§4.3, §6): 24 kHz for
/// provider A, 16 kHz for provider B.
fn provider_input_rate_hz(provider: AiProvider) -> u32 {
    match provider {
        AiProvider::A => 24000,
        AiProvider::B => 16000,
    }
}

async fn close_with_code(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await;
}

/// Steps 1-3 of §4.7: validate the query param and session state before a
/// handler is ever built.
async fn admit(state: &AppState, socket: &mut WebSocket, query: &UpgradeQuery) -> Option<SessionId> {
    let Some(session_id) = query.session_id.clone() else {
        close_with_code(socket, CLOSE_MISSING_SESSION_ID, "Missing sessionId").await;
        return None;
    };
    if state.session_manager.get_session(&session_id).is_none() {
        close_with_code(socket, CLOSE_SESSION_NOT_FOUND, "Session not found").await;
        return None;
    }
    if !state.try_bind(&session_id) {
        close_with_code(socket, CLOSE_ALREADY_CONNECTED, "Session already connected").await;
        return None;
    }
    Some(session_id)
}

/// Step 4: subscribes before the transport's inbound loop starts so no
/// `callStarted` is missed, and invokes `runner.startCall` on the first one.
/// The task exits once the channel closes (the runner resubscribes for the
/// rest of the call, which drops this sender and ends this drain loop).
fn spawn_call_starter(state: AppState, session_id: SessionId, handler: SharedHandler) {
    let mut events = handler.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let HandlerEvent::CallStarted = event {
                if let Err(err) = state.runner.start_call(&session_id, handler.clone(), None).await {
                    tracing::warn!(session_id = %session_id, error = %err, "failed to start call");
                    let _ = handler.end(Some("internal error".to_string())).await;
                }
                break;
            }
        }
        while events.recv().await.is_some() {}
    });
}

pub async fn widget_upgrade(
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        let Some(session_id) = admit(&state, &mut socket, &query).await else {
            return;
        };
        let Some(session) = state.session_manager.get_session(&session_id) else {
            state.unbind(&session_id);
            return;
        };

        let handler = Arc::new(WidgetHandler::new(session_id.clone(), session.call_id.clone(), socket));
        spawn_call_starter(state.clone(), session_id.clone(), handler.clone());

        if let Err(err) = handler.start().await {
            tracing::warn!(session_id = %session_id, error = %err, "widget transport start failed");
        }
        widget::drive(&handler).await;
        state.unbind(&session_id);
    })
}

pub async fn telephony_upgrade(
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        let Some(session_id) = admit(&state, &mut socket, &query).await else {
            return;
        };
        let Some(session) = state.session_manager.get_session(&session_id) else {
            state.unbind(&session_id);
            return;
        };

        let rate = provider_input_rate_hz(session.ai_provider);
        let handler = Arc::new(TelephonyHandler::new(
            session_id.clone(),
            session.call_id.clone(),
            socket,
            rate,
        ));
        spawn_call_starter(state.clone(), session_id.clone(), handler.clone());

        if let Err(err) = handler.start().await {
            tracing::warn!(session_id = %session_id, error = %err, "telephony transport start failed");
        }
        telephony::drive(&handler).await;
        state.unbind(&session_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_input_rates_match_spec() {
        assert_eq!(provider_input_rate_hz(AiProvider::A), 24000);
        assert_eq!(provider_input_rate_hz(AiProvider::B), 16000);
    }

    #[test]
    fn upgrade_query_requires_no_fields_to_deserialize() {
        let query: UpgradeQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(query.session_id.is_none());
    }

    #[test]
    fn upgrade_query_reads_camel_case_session_id() {
        let query: UpgradeQuery = serde_json::from_value(serde_json::json!({ "sessionId": "s1" })).unwrap();
        assert_eq!(query.session_id.as_deref(), Some("s1"));
    }
}
