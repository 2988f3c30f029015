//! Transport handler variants (§4.4): the three ways a call reaches the
//! orchestration core. Each implements the shared `TransportHandler`
//! contract from `voicecore_types::handler`; the call runner is the only
//! thing that ever talks to a handler directly.

pub mod telephony;
pub mod webrtc_subsystem;
pub mod widget;

pub use telephony::TelephonyHandler;
pub use widget::WidgetHandler;
pub use webrtc_subsystem::{MessengerHandler, WebRtcSession, WebRtcSubsystem, WebRtcSubsystemError};
