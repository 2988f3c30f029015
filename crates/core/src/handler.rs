//! Transport handler contract (§4.4) shared by all three transport variants.
//!
//! Rather than an abstract base class with shared emit helpers, this is an
//! interface for the public surface (`TransportHandler`) plus a plain
//! composition struct (`HandlerCore`) carrying the fields every variant
//! needs; no virtual dispatch is required outside the variant boundary.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::executor::TranscriptRole;
use crate::session::{CallId, SessionId};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Events a transport handler emits toward the call runner.
#[derive(Debug, Clone)]
pub enum HandlerEvent {
    AudioReceived(Vec<u8>),
    CallStarted,
    CallEnded(Option<String>),
    Error(String),
}

/// Shared mutable state every handler variant needs; composed into each
/// concrete handler rather than inherited.
pub struct HandlerCore {
    pub session_id: SessionId,
    pub call_id: RwLock<Option<CallId>>,
    active: AtomicBool,
}

impl HandlerCore {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            call_id: RwLock::new(None),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id.read().clone()
    }

    pub fn set_call_id(&self, call_id: CallId) {
        *self.call_id.write() = Some(call_id);
    }
}

/// The public surface every transport handler variant implements.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    fn session_id(&self) -> &SessionId;
    fn call_id(&self) -> Option<CallId>;
    fn is_handler_active(&self) -> bool;

    async fn start(&self) -> Result<(), HandlerError>;
    /// Inbound bytes from the transport, already framing-decoded.
    async fn handle_audio(&self, bytes: &[u8]) -> Result<(), HandlerError>;
    /// Outbound PCM16 (or codec-native bytes, per variant) toward the transport.
    async fn send_audio(&self, pcm16: &[u8]) -> Result<(), HandlerError>;
    async fn end(&self, reason: Option<String>) -> Result<(), HandlerError>;

    /// Call-runner hooks (§4.4).
    async fn handle_transcript(&self, text: &str, role: TranscriptRole);
    async fn handle_agent_speaking(&self);
    async fn handle_agent_listening(&self);
    async fn handle_user_interrupted(&self);

    fn subscribe(&self) -> tokio::sync::mpsc::Receiver<HandlerEvent>;
}

pub type SharedHandler = Arc<dyn TransportHandler>;
