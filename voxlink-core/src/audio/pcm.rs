//! Float ↔ 16-bit PCM conversion.
//!
//! Quantization scales by 32768 for both signs, truncates toward zero and
//! clamps to the `i16` range. Dequantization divides by 32768, so a sample
//! round-trips within `1 / 32768`.

/// Convert one float sample to 16-bit PCM.
///
/// With `soft_clip`, the sample first passes through `tanh`, which saturates
/// smoothly instead of hard-clipping at ±1.
#[inline]
pub fn quantize_sample(sample: f32, soft_clip: bool) -> i16 {
    let s = if soft_clip {
        sample.tanh()
    } else {
        sample.clamp(-1.0, 1.0)
    };
    // `as` truncates toward zero and saturates at the i16 bounds.
    (s * 32_768.0) as i16
}

/// Quantize a frame of float samples.
pub fn quantize(samples: &[f32], soft_clip: bool) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| quantize_sample(s, soft_clip))
        .collect()
}

/// Convert one 16-bit sample back to a normalised float.
#[inline]
pub fn dequantize_sample(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| dequantize_sample(s)).collect()
}

/// Serialise samples as raw little-endian PCM bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Parse raw little-endian PCM bytes. A trailing odd byte is ignored.
pub fn from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
