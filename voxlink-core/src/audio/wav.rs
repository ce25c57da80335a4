//! WAV container export and import.
//!
//! Export writes the canonical 44-byte RIFF/WAVE header (PCM, mono, 16-bit)
//! followed by every chunk's samples as little-endian `i16`. Import uses
//! `hound` and downmixes to mono f32 so a file can stand in for a capture
//! device.

use std::path::Path;

use crate::error::{Result, VoxlinkError};

/// Size of the canonical PCM WAV header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Encode accumulated 16-bit chunks into an in-memory WAV file.
pub fn encode_wav<C: AsRef<[i16]>>(chunks: &[C], sample_rate: u32) -> Vec<u8> {
    let total_samples: usize = chunks.iter().map(|c| c.as_ref().len()).sum();
    let data_len = (total_samples * 2) as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);

    // RIFF descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // AudioFormat = PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // ByteRate
    out.extend_from_slice(&2u16.to_le_bytes()); // BlockAlign
    out.extend_from_slice(&16u16.to_le_bytes()); // BitsPerSample

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for chunk in chunks {
        for s in chunk.as_ref() {
            out.extend_from_slice(&s.to_le_bytes());
        }
    }

    out
}

/// Write accumulated chunks to `path` as a WAV file.
pub fn write_wav<C: AsRef<[i16]>>(path: &Path, chunks: &[C], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, encode_wav(chunks, sample_rate))?;
    Ok(())
}

/// Read any PCM/float WAV file as mono f32 plus its sample rate.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| VoxlinkError::Wav(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxlinkError::Wav(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| VoxlinkError::Wav(e.to_string()))?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}
