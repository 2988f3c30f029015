//! Mono/stereo mixing over little-endian PCM16 byte buffers (§4.5).

/// Average left/right per sample, clamped. Bit-exact inverse of
/// `mono_to_stereo` when the input actually came from a duplicated mono
/// signal (round trip invariant, §8).
pub fn stereo_to_mono(stereo: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(stereo.len() / 2);
    for pair in stereo.chunks_exact(4) {
        let left = i16::from_le_bytes([pair[0], pair[1]]) as i32;
        let right = i16::from_le_bytes([pair[2], pair[3]]) as i32;
        let mixed = ((left + right) / 2) as i16;
        out.extend_from_slice(&mixed.to_le_bytes());
    }
    out
}

/// Duplicate each mono sample to both channels.
pub fn mono_to_stereo(mono: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for sample in mono.chunks_exact(2) {
        out.extend_from_slice(sample);
        out.extend_from_slice(sample);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_stereo_mono_round_trip_is_identity() {
        let mono: Vec<u8> = (0..320i16)
            .flat_map(|i| (i * 7).to_le_bytes())
            .collect();
        let stereo = mono_to_stereo(&mono);
        let back = stereo_to_mono(&stereo);
        assert_eq!(back, mono);
    }

    #[test]
    fn mono_to_stereo_duplicates_samples() {
        let mono: Vec<u8> = 42i16.to_le_bytes().to_vec();
        let stereo = mono_to_stereo(&mono);
        assert_eq!(stereo.len(), 4);
        assert_eq!(&stereo[0..2], &stereo[2..4]);
    }
}
