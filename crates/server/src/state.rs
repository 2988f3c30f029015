//! Shared application state (§9 "composition, not inheritance"): the
//! runner and session manager the whole route table depends on, the
//! per-connection table the WebSocket upgrade path uses to reject a second
//! handler for an already-bound session (§4.7 step 2), and the messenger
//! handler table the webhook uses to route `terminate`/`media` events that
//! arrive after a call's `connect` (§4.4 H3, §6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use voicecore_config::Settings;
use voicecore_runner::{CallRunner, ConfigProvider};
use voicecore_session::SessionManager;
use voicecore_transport::{MessengerHandler, WebRtcSubsystem};
use voicecore_types::session::{CallId, SessionId};

use crate::carrier::CarrierClient;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub session_manager: Arc<SessionManager>,
    pub runner: Arc<CallRunner>,
    pub config_provider: Arc<dyn ConfigProvider>,
    pub webrtc_subsystem: Arc<dyn WebRtcSubsystem>,
    pub carrier_client: Arc<dyn CarrierClient>,
    pub metrics_handle: PrometheusHandle,
    bound_sessions: Arc<RwLock<HashSet<SessionId>>>,
    messenger_handlers: Arc<RwLock<HashMap<CallId, Arc<MessengerHandler>>>>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        session_manager: Arc<SessionManager>,
        runner: Arc<CallRunner>,
        config_provider: Arc<dyn ConfigProvider>,
        webrtc_subsystem: Arc<dyn WebRtcSubsystem>,
        carrier_client: Arc<dyn CarrierClient>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            settings,
            session_manager,
            runner,
            config_provider,
            webrtc_subsystem,
            carrier_client,
            metrics_handle,
            bound_sessions: Arc::new(RwLock::new(HashSet::new())),
            messenger_handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claims `session_id` for a handler; `false` means one is already bound
    /// (§4.7 step 2, close code 4002).
    pub fn try_bind(&self, session_id: &SessionId) -> bool {
        self.bound_sessions.write().insert(session_id.clone())
    }

    pub fn unbind(&self, session_id: &SessionId) {
        self.bound_sessions.write().remove(session_id);
    }

    pub fn register_messenger_handler(&self, call_id: CallId, handler: Arc<MessengerHandler>) {
        self.messenger_handlers.write().insert(call_id, handler);
    }

    pub fn messenger_handler(&self, call_id: &str) -> Option<Arc<MessengerHandler>> {
        self.messenger_handlers.read().get(call_id).cloned()
    }

    pub fn remove_messenger_handler(&self, call_id: &str) {
        self.messenger_handlers.write().remove(call_id);
    }
}
