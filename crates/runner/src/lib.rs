//! Call Runner (C6, §4.6): binds one transport handler to one provider
//! executor per session and drives the call for its lifetime.

pub mod config;
pub mod persistence;
pub mod runner;

pub use config::{ChatbotConfig, ConfigProvider};
pub use persistence::{AudioRecorder, CallPersistence, CallRecord, NullPersistence};
pub use runner::{CallRunner, EscalationSink, RunnerError};
