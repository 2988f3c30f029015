//! Resampling over raw little-endian PCM16 byte buffers (§4.5).
//!
//! Linear interpolation is the default path and the one the length contract
//! is specified against. A rubato-backed high-quality path is available as
//! an alternate `Resampler` impl (teacher's `AudioFrame::resample` did the
//! same thing, operating on `f32` frames instead of raw bytes).

use voicecore_types::SampleRate;

pub trait Resampler: Send + Sync {
    fn resample(&self, pcm16: &[u8], from: SampleRate, to: SampleRate) -> Vec<u8>;
}

/// Linear interpolation between adjacent samples, clamped to i16 range.
pub struct LinearResampler;

impl Resampler for LinearResampler {
    fn resample(&self, pcm16: &[u8], from: SampleRate, to: SampleRate) -> Vec<u8> {
        linear_resample(pcm16, from.as_u32(), to.as_u32())
    }
}

pub fn linear_resample(pcm16: &[u8], from_hz: u32, to_hz: u32) -> Vec<u8> {
    if from_hz == to_hz {
        return pcm16.to_vec();
    }

    let samples: Vec<i16> = pcm16
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let new_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(new_len * 2);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len() - 1);
        let frac = src_idx - idx_floor as f64;

        let a = samples[idx_floor.min(samples.len() - 1)] as f64;
        let b = samples[idx_ceil] as f64;
        let interpolated = a + (b - a) * frac;
        let clamped = interpolated.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }

    out
}

/// Rubato FFT-based resampler, used when higher quality is worth the extra
/// CPU (e.g. WebRTC's 24kHz -> 48kHz upsampling path). Falls back to linear
/// interpolation for short buffers where FFT framing doesn't pay off.
pub struct HighQualityResampler;

impl Resampler for HighQualityResampler {
    fn resample(&self, pcm16: &[u8], from: SampleRate, to: SampleRate) -> Vec<u8> {
        use rubato::{FftFixedIn, Resampler as _};

        if from == to {
            return pcm16.to_vec();
        }

        let samples: Vec<f64> = pcm16
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
            .collect();

        if samples.len() < 64 {
            return linear_resample(pcm16, from.as_u32(), to.as_u32());
        }

        let chunk_size = samples.len().min(1024);
        match FftFixedIn::<f64>::new(from.as_u32() as usize, to.as_u32() as usize, chunk_size, 2, 1)
        {
            Ok(mut resampler) => match resampler.process(&[samples], None) {
                Ok(output) => output[0]
                    .iter()
                    .flat_map(|&s| {
                        (s.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16).to_le_bytes()
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("rubato processing failed, using linear fallback: {e}");
                    linear_resample(pcm16, from.as_u32(), to.as_u32())
                },
            },
            Err(e) => {
                tracing::warn!("rubato init failed, using linear fallback: {e}");
                linear_resample(pcm16, from.as_u32(), to.as_u32())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rate_is_identity() {
        let pcm: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(
            linear_resample(&pcm, 16000, 16000),
            pcm,
            "resample(x, r, r) = x"
        );
    }

    #[test]
    fn downsample_preserves_length_contract() {
        let samples: Vec<i16> = (0..160).map(|i| (i * 10) as i16).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let resampled = linear_resample(&pcm, 16000, 8000);
        let expected = samples.len() / 2;
        let actual = resampled.len() / 2;
        assert!(
            (actual as i64 - expected as i64).abs() <= 1,
            "expected ~{expected} samples, got {actual}"
        );
    }
}
