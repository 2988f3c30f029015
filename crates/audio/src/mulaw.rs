//! G.711 µ-law codec (§4.5). Bias 0x84 (132), clip 32635, standard 256-entry
//! decode table. All PCM16 here is little-endian signed.

const BIAS: i16 = 0x84; // 132
const CLIP: i16 = 32635;

/// Decode table built once; `decode(byte)` is a direct lookup.
fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0usize;
    while i < 256 {
        table[i] = decode_sample(i as u8);
        i += 1;
    }
    table
}

fn decode_sample(mulaw_byte: u8) -> i16 {
    let mulaw = !mulaw_byte;
    let sign = (mulaw & 0x80) != 0;
    let exponent = (mulaw >> 4) & 0x07;
    let mantissa = mulaw & 0x0F;

    let mut sample = ((mantissa as i32) << 3) + 0x84;
    sample <<= exponent as i32;
    sample -= 0x84;

    let sample = sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    if sign {
        -sample
    } else {
        sample
    }
}

/// Decode a buffer of µ-law bytes into little-endian PCM16.
pub fn mulaw_to_pcm16(mulaw: &[u8]) -> Vec<u8> {
    let table = build_decode_table();
    let mut out = Vec::with_capacity(mulaw.len() * 2);
    for &b in mulaw {
        let sample = table[b as usize];
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Encode little-endian PCM16 into µ-law bytes.
pub fn pcm16_to_mulaw(pcm16: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm16.len() / 2);
    for chunk in pcm16.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(encode_sample(sample));
    }
    out
}

fn encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = if sample < 0 {
        // avoid overflow negating i16::MIN
        (-(sample as i32)) as i16
    } else {
        sample
    };
    let magnitude = magnitude.saturating_add(BIAS).min(CLIP);

    let exponent = exponent_for(magnitude);
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    let mulaw = sign | ((exponent as u8) << 4) | mantissa;
    !mulaw
}

fn exponent_for(magnitude: i16) -> u8 {
    const EXP_LUT: [i16; 8] = [0, 132, 396, 924, 1980, 4092, 8316, 16764];
    for (exp, &threshold) in EXP_LUT.iter().enumerate().rev() {
        if magnitude >= threshold {
            return exp as u8;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_byte_decodes_near_zero() {
        let pcm = mulaw_to_pcm16(&[0xFF]);
        let sample = i16::from_le_bytes([pcm[0], pcm[1]]);
        assert!(sample.abs() < 10, "expected near-zero, got {sample}");
    }

    #[test]
    fn round_trip_correlates_on_a_tone() {
        // 10ms of a 440Hz tone at 8kHz.
        let sample_rate = 8000.0_f64;
        let freq = 440.0_f64;
        let n = 80;
        let mut pcm = Vec::with_capacity(n * 2);
        let mut original = Vec::with_capacity(n);
        for i in 0..n {
            let t = i as f64 / sample_rate;
            let s = (2.0 * std::f64::consts::PI * freq * t).sin();
            let sample = (s * 16000.0) as i16;
            original.push(sample as f64);
            pcm.extend_from_slice(&sample.to_le_bytes());
        }

        let encoded = pcm16_to_mulaw(&pcm);
        let decoded = mulaw_to_pcm16(&encoded);

        let decoded_samples: Vec<f64> = decoded
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
            .collect();

        let mean_o: f64 = original.iter().sum::<f64>() / n as f64;
        let mean_d: f64 = decoded_samples.iter().sum::<f64>() / n as f64;
        let mut num = 0.0;
        let mut den_o = 0.0;
        let mut den_d = 0.0;
        for i in 0..n {
            let do_ = original[i] - mean_o;
            let dd = decoded_samples[i] - mean_d;
            num += do_ * dd;
            den_o += do_ * do_;
            den_d += dd * dd;
        }
        let correlation = num / (den_o.sqrt() * den_d.sqrt());
        assert!(correlation > 0.9, "correlation was {correlation}");
    }
}
