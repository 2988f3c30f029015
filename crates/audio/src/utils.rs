//! Level utilities over little-endian PCM16 byte buffers (§4.5).

fn samples(pcm16: &[u8]) -> impl Iterator<Item = i16> + '_ {
    pcm16
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
}

/// Normalized RMS in `[0, 1]`, where 1.0 corresponds to full-scale i16.
pub fn rms(pcm16: &[u8]) -> f32 {
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for s in samples(pcm16) {
        sum_squares += (s as f64) * (s as f64);
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let rms = (sum_squares / count as f64).sqrt();
    (rms / i16::MAX as f64) as f32
}

pub fn is_silence(pcm16: &[u8], threshold: f32) -> bool {
    rms(pcm16) < threshold
}

/// Scale down (never up) so the peak sample magnitude hits `target_peak`
/// (fraction of full scale), clamping to i16 range.
pub fn normalize(pcm16: &[u8], target_peak: f32) -> Vec<u8> {
    let peak = samples(pcm16).map(|s| s.unsigned_abs()).max().unwrap_or(0) as f32;
    if peak == 0.0 {
        return pcm16.to_vec();
    }

    let target = target_peak.clamp(0.0, 1.0) * i16::MAX as f32;
    let gain = (target / peak).min(1.0);

    samples(pcm16)
        .flat_map(|s| {
            let scaled = (s as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            scaled.to_le_bytes()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_rms() {
        let pcm = vec![0u8; 320];
        assert_eq!(rms(&pcm), 0.0);
        assert!(is_silence(&pcm, 0.01));
    }

    #[test]
    fn full_scale_tone_is_not_silent() {
        let pcm: Vec<u8> = std::iter::repeat(i16::MAX.to_le_bytes())
            .take(160)
            .flatten()
            .collect();
        assert!(!is_silence(&pcm, 0.01));
    }

    #[test]
    fn normalize_never_amplifies_above_target() {
        let pcm: Vec<u8> = std::iter::repeat(100i16.to_le_bytes())
            .take(100)
            .flatten()
            .collect();
        let out = normalize(&pcm, 0.9);
        // peak (100) is already far below target, gain would be > 1 -> clamp to 1 (no amplification)
        assert_eq!(out, pcm);
    }
}
