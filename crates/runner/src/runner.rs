//! Call Runner (C6, §4.6): the orchestrator for one session. Owns both the
//! transport handler and the provider executor; neither side holds a
//! reference to the other (§9 "the runner is the sole owner of both sides").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use voicecore_audio::{PacedQueue, PacerEvent};
use voicecore_config::AudioConfig;
use voicecore_executors::{ProviderAExecutor, ProviderBExecutor};
use voicecore_session::{CacheStats, ExecutorCache, SessionManager};
use voicecore_types::executor::ExecutorConfig;
use voicecore_types::session::{AiProvider, CreateSessionParams, Session, SessionId, SessionStatus};
use voicecore_types::{Escalation, ExecutorEvent, HandlerEvent, ProviderExecutor, SharedHandler};

use crate::config::ConfigProvider;
use crate::persistence::CallPersistence;

/// Executor output is PCM16 mono at this rate regardless of variant
/// (§4.3: both wires emit 24 kHz outbound).
const EXECUTOR_OUTPUT_RATE_HZ: u32 = 24000;
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("session not found")]
    SessionNotFound,
    #[error("no executor available for this chatbot")]
    ExecutorUnavailable,
}

/// Lets the runner forward an `escalate` event to a handler that declares
/// support for it, without widening the shared `TransportHandler` contract
/// (§4.6 "forwarded to handler when the handler declares escalation
/// support"). Callers that construct a concrete handler (e.g. the WS
/// server, which still holds the un-erased type) supply an adapter.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn send_escalation(&self, escalation: &Escalation);
}

struct SessionRuntime {
    handler: SharedHandler,
    executor: Arc<dyn ProviderExecutor>,
    escalation_sink: Option<Arc<dyn EscalationSink>>,
    cancel: CancellationToken,
    became_active: AtomicBool,
}

pub struct CallRunner {
    session_manager: Arc<SessionManager>,
    executor_cache: Arc<ExecutorCache>,
    config_provider: Arc<dyn ConfigProvider>,
    persistence: Arc<dyn CallPersistence>,
    audio_config: AudioConfig,
    bindings: RwLock<HashMap<SessionId, Arc<SessionRuntime>>>,
}

impl CallRunner {
    pub fn new(
        session_manager: Arc<SessionManager>,
        executor_cache: Arc<ExecutorCache>,
        config_provider: Arc<dyn ConfigProvider>,
        persistence: Arc<dyn CallPersistence>,
        audio_config: AudioConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_manager,
            executor_cache,
            config_provider,
            persistence,
            audio_config,
            bindings: RwLock::new(HashMap::new()),
        })
    }

    /// Cache-hit returns the cached executor. Cache-miss loads the chatbot
    /// config, refuses chatbots with calls disabled or no provider
    /// configured, builds a provider-specific executor, connects it (10 s
    /// timeout, §5), and inserts it into the cache.
    pub async fn load_executor(&self, chatbot_id: &str) -> Option<Arc<dyn ProviderExecutor>> {
        if let Some(executor) = self.executor_cache.get(chatbot_id).await {
            return Some(executor);
        }

        let chatbot = self.config_provider.get_chatbot(chatbot_id).await?;
        if !chatbot.enabled_call {
            tracing::debug!(chatbot_id, "calls disabled for chatbot");
            return None;
        }
        let provider = chatbot.call_ai_provider?;
        let company_id = chatbot.company_id.clone();

        let executor_config = ExecutorConfig {
            system_prompt: chatbot.system_prompt,
            voice: chatbot.voice,
            tools: chatbot.tools,
            knowledge_categories: chatbot.knowledge_categories,
            knowledge_threshold: chatbot.knowledge_threshold,
        };

        let executor: Arc<dyn ProviderExecutor> = match provider {
            AiProvider::A => {
                let Some(api_key) = voicecore_config::env::openai_api_key() else {
                    tracing::warn!(chatbot_id, "OPENAI_API_KEY missing, cannot build provider A executor");
                    return None;
                };
                Arc::new(ProviderAExecutor::new(
                    executor_config,
                    company_id,
                    chatbot_id.to_string(),
                    api_key,
                ))
            }
            AiProvider::B => {
                let Some(api_key) = voicecore_config::env::google_api_key() else {
                    tracing::warn!(chatbot_id, "GOOGLE_API_KEY/GEMINI_API_KEY missing, cannot build provider B executor");
                    return None;
                };
                Arc::new(ProviderBExecutor::new(
                    executor_config,
                    company_id,
                    chatbot_id.to_string(),
                    api_key,
                ))
            }
        };

        match tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), executor.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(chatbot_id, error = %e, "executor connect failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(chatbot_id, "executor connect timed out");
                return None;
            }
        }

        self.executor_cache.set(chatbot_id.to_string(), executor.clone()).await;
        Some(executor)
    }

    /// Builds and loads an executor, then generates fresh `sessionId`/
    /// `callId` and delegates to the Session Manager.
    pub async fn create_session(&self, mut params: CreateSessionParams) -> Option<Session> {
        self.load_executor(&params.chatbot_id).await?;
        let session_id = uuid::Uuid::new_v4().to_string();
        params.call_id = uuid::Uuid::new_v4().to_string();
        Some(self.session_manager.create_session(session_id, params))
    }

    /// Binds `handler` to the session's executor and spawns the two
    /// fan-in tasks that drive the call (§4.6, §9 "coroutine fan-in for
    /// one call"). `escalation_sink` is optional — only handlers whose
    /// caller supplies one receive `escalate` forwarding.
    pub async fn start_call(
        self: &Arc<Self>,
        session_id: &str,
        handler: SharedHandler,
        escalation_sink: Option<Arc<dyn EscalationSink>>,
    ) -> Result<(), RunnerError> {
        let session = self
            .session_manager
            .get_session(session_id)
            .ok_or(RunnerError::SessionNotFound)?;
        let executor = self
            .load_executor(&session.chatbot_id)
            .await
            .ok_or(RunnerError::ExecutorUnavailable)?;

        self.persistence
            .record_call(crate::persistence::CallRecord {
                session_id: session.session_id.clone(),
                call_id: session.call_id.clone(),
                chatbot_id: session.chatbot_id.clone(),
                company_id: session.company_id.clone(),
            })
            .await;

        let runtime = Arc::new(SessionRuntime {
            handler: handler.clone(),
            executor: executor.clone(),
            escalation_sink,
            cancel: CancellationToken::new(),
            became_active: AtomicBool::new(false),
        });
        self.bindings.write().insert(session_id.to_string(), runtime.clone());
        self.session_manager
            .update_session_status(session_id, SessionStatus::Connecting);

        let handler_rx = handler.subscribe();
        let executor_rx = executor.subscribe();

        self.spawn_handler_task(session_id.to_string(), runtime.clone(), handler_rx);
        self.spawn_executor_task(session_id.to_string(), runtime, executor_rx);

        Ok(())
    }

    fn mark_active_once(&self, session_id: &str, runtime: &SessionRuntime) {
        if !runtime.became_active.swap(true, Ordering::SeqCst) {
            self.session_manager
                .update_session_status(session_id, SessionStatus::InProgress);
        }
    }

    fn spawn_handler_task(
        self: &Arc<Self>,
        session_id: SessionId,
        runtime: Arc<SessionRuntime>,
        mut handler_rx: mpsc::Receiver<HandlerEvent>,
    ) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = runtime.cancel.cancelled() => break,
                    event = handler_rx.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            HandlerEvent::AudioReceived(bytes) => {
                                if runtime.executor.is_connected() {
                                    let _ = runtime.executor.send_audio(&bytes).await;
                                }
                                runner.session_manager.update_last_activity(&session_id);
                                runner.mark_active_once(&session_id, &runtime);
                            }
                            HandlerEvent::CallStarted => {}
                            HandlerEvent::CallEnded(reason) => {
                                runner.end_call(&session_id, reason).await;
                                break;
                            }
                            HandlerEvent::Error(message) => {
                                tracing::warn!(session_id = %session_id, error = %message, "transport handler error");
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_executor_task(
        self: &Arc<Self>,
        session_id: SessionId,
        runtime: Arc<SessionRuntime>,
        mut executor_rx: mpsc::Receiver<ExecutorEvent>,
    ) {
        let runner = Arc::clone(self);
        let send_interval_ms = runner.audio_config.send_interval_ms.max(1);
        let max_queue_chunks = runner.audio_config.max_queue_chunks;
        let chunk_size =
            ((EXECUTOR_OUTPUT_RATE_HZ as u64 * send_interval_ms / 1000) * 2).max(2) as usize;

        tokio::spawn(async move {
            let mut queue = PacedQueue::new(max_queue_chunks, chunk_size, EXECUTOR_OUTPUT_RATE_HZ);
            let mut ticker = tokio::time::interval(Duration::from_millis(send_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let suppress_audio = AtomicBool::new(false);

            loop {
                tokio::select! {
                    _ = runtime.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(PacerEvent::AudioChunk(chunk)) = queue.tick() {
                            let _ = runtime.handler.send_audio(&chunk).await;
                        }
                    }
                    event = executor_rx.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            ExecutorEvent::AudioDelta(bytes) => {
                                if !suppress_audio.load(Ordering::SeqCst) {
                                    queue.enqueue(bytes);
                                }
                            }
                            ExecutorEvent::TranscriptDelta(delta) => {
                                runner
                                    .persistence
                                    .record_transcript(&session_id, delta.role, &delta.content)
                                    .await;
                                runtime.handler.handle_transcript(&delta.content, delta.role).await;
                            }
                            ExecutorEvent::AgentSpeaking => {
                                suppress_audio.store(false, Ordering::SeqCst);
                                queue.clear();
                                runner.mark_active_once(&session_id, &runtime);
                                runtime.handler.handle_agent_speaking().await;
                            }
                            ExecutorEvent::AgentListening => {
                                runtime.handler.handle_agent_listening().await;
                            }
                            ExecutorEvent::UserInterrupted => {
                                suppress_audio.store(true, Ordering::SeqCst);
                                queue.interrupt();
                                runtime.handler.handle_user_interrupted().await;
                            }
                            ExecutorEvent::TurnComplete => {}
                            ExecutorEvent::FunctionCall { name, .. } => {
                                tracing::trace!(session_id = %session_id, tool = %name, "function call handled inside executor");
                            }
                            ExecutorEvent::Escalate(escalate) => {
                                if let Some(sink) = runtime.escalation_sink.as_ref() {
                                    let escalation = Escalation {
                                        reason: escalate.reason,
                                        urgency: escalate.urgency,
                                        summary: escalate.summary,
                                    };
                                    sink.send_escalation(&escalation).await;
                                }
                            }
                            ExecutorEvent::Error(message) => {
                                tracing::warn!(session_id = %session_id, error = %message, "executor error");
                                runner.end_call(&session_id, Some(message)).await;
                                break;
                            }
                            ExecutorEvent::ConnectionClosed => {
                                runner
                                    .end_call(&session_id, Some("Executor connection closed".to_string()))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Touches `lastActivity` and forwards `bytes` to the session's bound
    /// executor; no-op if the session isn't bound.
    pub async fn send_audio(&self, session_id: &str, bytes: &[u8]) {
        self.session_manager.update_last_activity(session_id);
        let runtime = self.bindings.read().get(session_id).cloned();
        if let Some(runtime) = runtime {
            let _ = runtime.executor.send_audio(bytes).await;
        }
    }

    /// No-op if already terminal (idempotent, §8 round-trip law). Ends the
    /// handler (executor stays cached for reuse) and surfaces duration.
    pub async fn end_call(&self, session_id: &str, reason: Option<String>) {
        let Some(session) = self.session_manager.get_session(session_id) else {
            return;
        };
        if session.status.is_terminal() {
            return;
        }

        let status = match reason.as_deref() {
            Some("timeout") => SessionStatus::Timeout,
            Some(r) if r.to_lowercase().contains("error") || r.to_lowercase().contains("fail") => {
                SessionStatus::Failed
            }
            _ => SessionStatus::Completed,
        };
        self.session_manager.update_session_status(session_id, status);

        let runtime = self.bindings.write().remove(session_id);
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            if runtime.handler.is_handler_active() {
                let _ = runtime.handler.end(reason.clone()).await;
            }
        }

        let duration_ms = (Utc::now() - session.started_at).num_milliseconds();
        self.persistence
            .update_call_status(session_id, status_label(status), Some(duration_ms))
            .await;
        self.session_manager.end_session(session_id);
    }

    pub async fn invalidate_executor(&self, chatbot_id: &str) {
        self.executor_cache.invalidate(chatbot_id).await;
    }

    pub async fn clear_cache(&self) {
        self.executor_cache.clear().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.executor_cache.stats()
    }

    pub fn active_session_count(&self) -> usize {
        self.session_manager.active_session_count()
    }

    /// Ends every live session, then stops the shared session/cache
    /// background timers.
    pub async fn shutdown(&self, session_timers: &tokio::sync::watch::Sender<bool>, cache_timers: &tokio::sync::watch::Sender<bool>) {
        let live: Vec<SessionId> = self.bindings.read().keys().cloned().collect();
        for session_id in live {
            self.end_call(&session_id, Some("Server shutting down".to_string())).await;
        }
        self.session_manager.shutdown(session_timers);
        self.executor_cache.clear().await;
        let _ = cache_timers.send(true);
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Timeout => "timeout",
        SessionStatus::Cancelled => "cancelled",
        SessionStatus::NoAnswer => "no_answer",
        SessionStatus::Busy => "busy",
        SessionStatus::Pending => "pending",
        SessionStatus::Connecting => "connecting",
        SessionStatus::Ringing => "ringing",
        SessionStatus::InProgress => "in_progress",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatbotConfig;
    use crate::persistence::NullPersistence;
    use voicecore_config::{ExecutorCacheConfig, SessionConfig};
    use voicecore_types::session::SessionSource;

    struct FakeConfigProvider {
        chatbot: Option<ChatbotConfig>,
    }

    #[async_trait]
    impl ConfigProvider for FakeConfigProvider {
        async fn get_chatbot(&self, _chatbot_id: &str) -> Option<ChatbotConfig> {
            self.chatbot.clone()
        }
    }

    fn make_runner(chatbot: Option<ChatbotConfig>) -> Arc<CallRunner> {
        let session_manager = SessionManager::new(SessionConfig {
            silence_timeout_secs: 180,
            gc_interval_secs: 60,
            stale_terminal_secs: 600,
        });
        let executor_cache = ExecutorCache::new(ExecutorCacheConfig {
            max_size: 10,
            inactivity_ttl_secs: 3600,
            cleanup_interval_secs: 900,
        });
        CallRunner::new(
            session_manager,
            executor_cache,
            Arc::new(FakeConfigProvider { chatbot }),
            Arc::new(NullPersistence),
            AudioConfig {
                send_interval_ms: 10,
                max_queue_chunks: 500,
                silence_rms_threshold: 0.01,
            },
        )
    }

    fn params() -> CreateSessionParams {
        CreateSessionParams {
            call_id: "unused".to_string(),
            chatbot_id: "bot-1".to_string(),
            company_id: "co-1".to_string(),
            end_user_id: None,
            source: SessionSource::Web,
            ai_provider: AiProvider::A,
        }
    }

    #[tokio::test]
    async fn load_executor_returns_none_when_chatbot_unknown() {
        let runner = make_runner(None);
        assert!(runner.load_executor("bot-1").await.is_none());
    }

    #[tokio::test]
    async fn load_executor_returns_none_when_calls_disabled() {
        let runner = make_runner(Some(ChatbotConfig {
            enabled_call: false,
            call_ai_provider: Some(AiProvider::A),
            ..ChatbotConfig::default()
        }));
        assert!(runner.load_executor("bot-1").await.is_none());
    }

    #[tokio::test]
    async fn load_executor_returns_none_when_no_provider_configured() {
        let runner = make_runner(Some(ChatbotConfig {
            enabled_call: true,
            call_ai_provider: None,
            ..ChatbotConfig::default()
        }));
        assert!(runner.load_executor("bot-1").await.is_none());
    }

    #[tokio::test]
    async fn create_session_returns_none_for_disabled_chatbot() {
        let runner = make_runner(Some(ChatbotConfig {
            enabled_call: false,
            call_ai_provider: Some(AiProvider::A),
            ..ChatbotConfig::default()
        }));
        assert!(runner.create_session(params()).await.is_none());
        assert_eq!(runner.active_session_count(), 0);
    }

    #[tokio::test]
    async fn end_call_on_unknown_session_is_a_no_op() {
        let runner = make_runner(None);
        runner.end_call("nope", Some("whatever".to_string())).await;
    }

    #[tokio::test]
    async fn end_call_is_idempotent() {
        let runner = make_runner(None);
        let session_manager = runner.session_manager.clone();
        let session = session_manager.create_session("sess-1".to_string(), params());
        assert_eq!(session.status, SessionStatus::Pending);
        runner.end_call("sess-1", Some("User ended call".to_string())).await;
        assert!(session_manager.get_session("sess-1").is_none());
        // Second call observes the session already gone; must not panic.
        runner.end_call("sess-1", Some("User ended call".to_string())).await;
    }
}
