//! Core error taxonomy shared by every crate in the workspace.
//!
//! Variants line up with the eight error kinds the orchestration core
//! distinguishes: validation, authorization, configuration,
//! provider-transient, provider-cancellation-race, tool-execution,
//! audio-pipeline, and internal. A failing call must never be able to
//! propagate one of these outside the call it belongs to.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("audio pipeline error: {0}")]
    AudioPipeline(#[from] AudioError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("buffer size mismatch: expected a multiple of {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("codec unavailable: {0}")]
    CodecUnavailable(&'static str),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

pub type CoreResult<T> = Result<T, CoreError>;
