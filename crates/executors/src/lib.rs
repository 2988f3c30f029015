//! Provider executors (§4.3): two wire-incompatible realtime voice AI
//! backends behind the shared `ProviderExecutor` contract.

pub mod common;
pub mod provider_a;
pub mod provider_b;

pub use provider_a::ProviderAExecutor;
pub use provider_b::{ProviderBExecutor, VadSensitivity};
