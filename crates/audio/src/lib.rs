//! Codec conversion, resampling, channel mixing, and paced playback over
//! raw little-endian PCM16 byte buffers — the audio pipeline (§4.5).

pub mod channels;
pub mod mulaw;
pub mod opus;
pub mod pacer;
pub mod resample;
pub mod utils;

pub use channels::{mono_to_stereo, stereo_to_mono};
pub use mulaw::{mulaw_to_pcm16, pcm16_to_mulaw};
pub use pacer::{PacedQueue, PacerEvent};
pub use resample::{linear_resample, HighQualityResampler, LinearResampler, Resampler};
pub use utils::{is_silence, normalize, rms};
