//! External persistence and recording collaborators (§4.6 "Externals
//! consumed"). The core hands call/transcript records to these narrow
//! interfaces; their storage format is outside the core (§6).

use async_trait::async_trait;

use voicecore_types::session::SessionId;
use voicecore_types::TranscriptRole;

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub session_id: SessionId,
    pub call_id: String,
    pub chatbot_id: String,
    pub company_id: String,
}

#[async_trait]
pub trait CallPersistence: Send + Sync {
    async fn record_call(&self, record: CallRecord);
    async fn record_transcript(&self, session_id: &str, role: TranscriptRole, content: &str);
    async fn update_call_status(&self, session_id: &str, status: &str, duration_ms: Option<i64>);
}

/// A no-op implementation for callers that don't need persistence (tests,
/// or deployments that record elsewhere).
pub struct NullPersistence;

#[async_trait]
impl CallPersistence for NullPersistence {
    async fn record_call(&self, _record: CallRecord) {}
    async fn record_transcript(&self, _session_id: &str, _role: TranscriptRole, _content: &str) {}
    async fn update_call_status(&self, _session_id: &str, _status: &str, _duration_ms: Option<i64>) {}
}

/// Optional per-call audio recording collaborator (§4.6). The core only
/// calls `start`/`stop`/`cancel`; it never mixes or stores audio itself.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    async fn start(&self, call_id: &str);
    async fn stop(&self, call_id: &str);
    async fn cancel(&self, call_id: &str);
}
