//! Session data model (§3 Session / state machine).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = String;
pub type CallId = String;
pub type ChatbotId = String;
pub type CompanyId = String;

/// Where a call originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Web,
    Whatsapp,
    Twilio,
    Vonage,
}

/// Which realtime provider variant this session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    A,
    B,
}

/// The session state machine (§4.1).
///
/// `pending -> connecting -> ringing -> in_progress -> {terminal}`.
/// Transitions may skip intermediate states. Once terminal, a session
/// never returns to a live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Connecting,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
    Cancelled,
    Timeout,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::NoAnswer
                | SessionStatus::Busy
                | SessionStatus::Cancelled
                | SessionStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub call_id: CallId,
    pub chatbot_id: ChatbotId,
    pub company_id: CompanyId,
    pub end_user_id: Option<String>,
    pub source: SessionSource,
    pub status: SessionStatus,
    pub ai_provider: AiProvider,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub call_id: CallId,
    pub chatbot_id: ChatbotId,
    pub company_id: CompanyId,
    pub end_user_id: Option<String>,
    pub source: SessionSource,
    pub ai_provider: AiProvider,
}

impl Session {
    pub fn new(session_id: SessionId, params: CreateSessionParams, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            call_id: params.call_id,
            chatbot_id: params.chatbot_id,
            company_id: params.company_id,
            end_user_id: params.end_user_id,
            source: params.source,
            status: SessionStatus::Pending,
            ai_provider: params.ai_provider,
            started_at: now,
            last_activity: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Timeout.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
    }
}
