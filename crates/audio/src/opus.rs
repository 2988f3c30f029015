//! Optional Opus capability (§4.5). The pipeline must keep working for
//! µ-law/L16 codecs with this feature off; callers of these paths get a
//! well-defined failure instead (§7 item 7).

use voicecore_types::AudioError;

#[cfg(feature = "opus")]
pub fn encode(pcm16_mono_48k: &[i16]) -> Result<Vec<u8>, AudioError> {
    use audiopus::{coder::Encoder, Application, Channels, SampleRate};

    let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
        .map_err(|_| AudioError::CodecUnavailable("opus"))?;
    let mut out = vec![0u8; 4000];
    let len = encoder
        .encode(pcm16_mono_48k, &mut out)
        .map_err(|_| AudioError::CodecUnavailable("opus"))?;
    out.truncate(len);
    Ok(out)
}

#[cfg(not(feature = "opus"))]
pub fn encode(_pcm16_mono_48k: &[i16]) -> Result<Vec<u8>, AudioError> {
    Err(AudioError::CodecUnavailable("opus"))
}

#[cfg(feature = "opus")]
pub fn decode(opus_bytes: &[u8], frame_size: usize) -> Result<Vec<i16>, AudioError> {
    use audiopus::{coder::Decoder, Channels, SampleRate};

    let mut decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
        .map_err(|_| AudioError::CodecUnavailable("opus"))?;
    let mut out = vec![0i16; frame_size];
    let len = decoder
        .decode(Some(opus_bytes), &mut out, false)
        .map_err(|_| AudioError::CodecUnavailable("opus"))?;
    out.truncate(len);
    Ok(out)
}

#[cfg(not(feature = "opus"))]
pub fn decode(_opus_bytes: &[u8], _frame_size: usize) -> Result<Vec<i16>, AudioError> {
    Err(AudioError::CodecUnavailable("opus"))
}

#[cfg(all(test, not(feature = "opus")))]
mod tests {
    use super::*;

    #[test]
    fn encode_without_feature_is_a_well_defined_failure() {
        assert!(matches!(
            encode(&[0i16; 960]),
            Err(AudioError::CodecUnavailable("opus"))
        ));
    }
}
