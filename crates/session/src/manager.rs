//! Session state table (C1, §4.1): a keyed mapping from `sessionId` to
//! session state, a silence-timeout sweep, and a stale-terminal GC sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use voicecore_config::SessionConfig;
use voicecore_types::session::{CreateSessionParams, Session, SessionId, SessionStatus};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
}

/// Owns the live session table. Missing-session operations are no-ops
/// (§4.1 Failure semantics) except where a caller needs to distinguish
/// "not found" explicitly.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn create_session(&self, session_id: SessionId, params: CreateSessionParams) -> Session {
        let now = Utc::now();
        let session = Session::new(session_id.clone(), params, now);
        self.sessions.write().insert(session_id, session.clone());
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn update_session_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.status = status;
            session.last_activity = Utc::now();
        }
    }

    pub fn update_last_activity(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn end_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().remove(session_id)
    }

    pub fn get_active_session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.session_id.clone())
            .collect()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    pub fn get_company_sessions(&self, company_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect()
    }

    pub fn get_chatbot_sessions(&self, chatbot_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.chatbot_id == chatbot_id)
            .cloned()
            .collect()
    }

    /// One tick: transitions `in_progress` sessions past the silence
    /// timeout to `timeout` and removes terminal sessions past the
    /// stale-GC horizon. Returns the sessions that just timed out so the
    /// caller can end their call runner state; the scan itself never
    /// aborts partway, so one bad entry can't block the rest of the sweep.
    fn sweep(&self) -> Vec<SessionId> {
        let now = Utc::now();
        let silence_timeout = ChronoDuration::seconds(self.config.silence_timeout_secs as i64);
        let stale_after = ChronoDuration::seconds(self.config.stale_terminal_secs as i64);

        let mut timed_out = Vec::new();
        let mut stale = Vec::new();
        {
            let mut sessions = self.sessions.write();
            for session in sessions.values_mut() {
                if session.status == SessionStatus::InProgress
                    && now - session.last_activity >= silence_timeout
                {
                    session.status = SessionStatus::Timeout;
                    session.last_activity = now;
                    timed_out.push(session.session_id.clone());
                } else if session.status.is_terminal() && now - session.last_activity >= stale_after
                {
                    stale.push(session.session_id.clone());
                }
            }
            for session_id in &stale {
                sessions.remove(session_id);
            }
        }
        timed_out
    }

    /// Spawns the silence-timeout + stale-GC tick loop (§4.1 Timers and
    /// policies), invoking `on_timeout` for each session the sweep just
    /// moved into `timeout` so the caller can tear down its runner state.
    /// The returned sender stops the loop without blocking shutdown.
    pub fn start_timers<F>(self: &Arc<Self>, on_timeout: F) -> watch::Sender<bool>
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let gc_interval = Duration::from_secs(manager.config.gc_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(gc_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for session_id in manager.sweep() {
                            tracing::info!(session_id = %session_id, "session silence timeout");
                            on_timeout(session_id);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        shutdown_tx
    }

    /// Stops the timers and clears the table.
    pub fn shutdown(&self, shutdown_tx: &watch::Sender<bool>) {
        let _ = shutdown_tx.send(true);
        self.sessions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicecore_types::session::{AiProvider, SessionSource};

    fn params() -> CreateSessionParams {
        CreateSessionParams {
            call_id: "call-1".to_string(),
            chatbot_id: "bot-1".to_string(),
            company_id: "co-1".to_string(),
            end_user_id: None,
            source: SessionSource::Web,
            ai_provider: AiProvider::A,
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            silence_timeout_secs: 180,
            gc_interval_secs: 60,
            stale_terminal_secs: 600,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let manager = SessionManager::new(config());
        let created = manager.create_session("sess-1".to_string(), params());
        let fetched = manager.get_session("sess-1").unwrap();
        assert_eq!(created.session_id, fetched.session_id);
        assert_eq!(fetched.status, SessionStatus::Pending);
    }

    #[test]
    fn missing_session_operations_are_no_ops() {
        let manager = SessionManager::new(config());
        manager.update_last_activity("nope");
        manager.update_session_status("nope", SessionStatus::Completed);
        assert!(manager.get_session("nope").is_none());
        assert!(manager.end_session("nope").is_none());
    }

    #[test]
    fn end_session_removes_it() {
        let manager = SessionManager::new(config());
        manager.create_session("sess-1".to_string(), params());
        assert!(manager.end_session("sess-1").is_some());
        assert!(manager.get_session("sess-1").is_none());
    }

    #[test]
    fn active_session_count_excludes_terminal() {
        let manager = SessionManager::new(config());
        manager.create_session("sess-1".to_string(), params());
        manager.create_session("sess-2".to_string(), params());
        manager.update_session_status("sess-2", SessionStatus::Completed);
        assert_eq!(manager.active_session_count(), 1);
        assert_eq!(manager.get_active_session_ids(), vec!["sess-1".to_string()]);
    }

    #[test]
    fn sweep_times_out_silent_in_progress_sessions() {
        let mut cfg = config();
        cfg.silence_timeout_secs = 0;
        let manager = SessionManager::new(cfg);
        manager.create_session("sess-1".to_string(), params());
        manager.update_session_status("sess-1", SessionStatus::InProgress);
        let timed_out = manager.sweep();
        assert_eq!(timed_out, vec!["sess-1".to_string()]);
        assert_eq!(
            manager.get_session("sess-1").unwrap().status,
            SessionStatus::Timeout
        );
    }

    #[test]
    fn sweep_removes_stale_terminal_sessions() {
        let mut cfg = config();
        cfg.stale_terminal_secs = 0;
        let manager = SessionManager::new(cfg);
        manager.create_session("sess-1".to_string(), params());
        manager.update_session_status("sess-1", SessionStatus::Completed);
        manager.sweep();
        assert!(manager.get_session("sess-1").is_none());
    }

    #[tokio::test]
    async fn shutdown_clears_the_table() {
        let manager = SessionManager::new(config());
        manager.create_session("sess-1".to_string(), params());
        let shutdown_tx = manager.start_timers(|_| {});
        manager.shutdown(&shutdown_tx);
        assert_eq!(manager.active_session_count(), 0);
    }
}
