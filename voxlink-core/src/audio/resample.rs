//! Per-frame sample-rate conversion to the pipeline's target rate.
//!
//! ## Design
//!
//! `cpal` captures audio at the device's native rate (commonly 44.1 or
//! 48 kHz). The pipeline works at a fixed target rate (16 kHz by default).
//!
//! Two strategies are available through [`FrameResampler`]:
//!
//! - **Linear** (default): [`resample`] maps each frame independently with
//!   linear interpolation. Every input frame yields exactly one output frame,
//!   which keeps VAD and hangover accounting frame-aligned.
//! - **Cubic**: a rubato `FastFixedIn` session. Higher quality, but it
//!   accumulates input internally, so a frame may produce no output.
//!
//! When source rate == target rate both strategies are passthrough.

use std::borrow::Cow;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{Result, VoxlinkError};

/// Linearly resample one mono frame from `from_rate` to `to_rate`.
///
/// Returns the input borrowed when the rates match. Otherwise the output has
/// `round(len / ratio)` samples where `ratio = from_rate / to_rate`; output
/// index `i` interpolates between the floor and ceil of source position
/// `i * ratio`, clamped to the last input sample.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Cow<'_, [f32]> {
    if from_rate == to_rate || input.is_empty() || to_rate == 0 {
        return Cow::Borrowed(input);
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let last = input.len() - 1;

    let out = (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let weight = (pos - lo as f64) as f32;
            input[lo] * (1.0 - weight) + input[hi] * weight
        })
        .collect();

    Cow::Owned(out)
}

/// Which resampling strategy the capture pipeline uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerKind {
    /// Frame-aligned linear interpolation.
    #[default]
    Linear,
    /// rubato cubic polynomial resampler (buffers across frames).
    Cubic,
}

/// Stateful wrapper chosen once per capture session.
pub enum FrameResampler {
    Linear { from_rate: u32, to_rate: u32 },
    Cubic(RateConverter),
}

impl FrameResampler {
    /// Build the resampler for a session. `frame_size` is the device frame
    /// length and is only used by the cubic path.
    pub fn new(kind: ResamplerKind, from_rate: u32, to_rate: u32, frame_size: usize) -> Result<Self> {
        match kind {
            ResamplerKind::Linear => Ok(Self::Linear { from_rate, to_rate }),
            ResamplerKind::Cubic => Ok(Self::Cubic(RateConverter::new(
                from_rate, to_rate, frame_size,
            )?)),
        }
    }

    /// Convert one device frame. May be empty on the cubic path.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        match self {
            Self::Linear { from_rate, to_rate } => resample(samples, *from_rate, *to_rate).into_owned(),
            Self::Cubic(rc) => rc.process(samples),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        match self {
            Self::Linear { from_rate, to_rate } => from_rate == to_rate,
            Self::Cubic(rc) => rc.is_passthrough(),
        }
    }
}

/// Converts f32 mono audio from one fixed sample rate to another using rubato.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer: holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `VoxlinkError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio: no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| VoxlinkError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, target_rate, chunk_size, max_out, "cubic resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_borrow_input() {
        let samples: Vec<f32> = (0..128).map(|i| i as f32 * 0.001).collect();
        let out = resample(&samples, 16_000, 16_000);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &samples[..]);
    }

    #[test]
    fn downsample_48k_to_16k_length_and_values() {
        let samples: Vec<f32> = (0..128).map(|i| i as f32).collect();
        let out = resample(&samples, 48_000, 16_000);
        // round(128 / 3) = 43
        assert_eq!(out.len(), 43);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 3.0).abs() < 1e-5);
        assert!((out[42] - 126.0).abs() < 1e-4);
    }

    #[test]
    fn fractional_positions_interpolate() {
        let samples = [0.0f32, 1.0, 2.0, 3.0];
        // 44.1k → 16k: ratio 2.75625
        let out = resample(&samples, 44_100, 16_000);
        assert_eq!(out.len(), 1);
        let up = resample(&samples, 8_000, 16_000);
        assert_eq!(up.len(), 8);
        assert!((up[1] - 0.5).abs() < 1e-6);
        // Tail positions clamp to the last sample.
        assert!((up[7] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn linear_frame_resampler_is_frame_aligned() {
        let mut fr = FrameResampler::new(ResamplerKind::Linear, 48_000, 16_000, 128).unwrap();
        assert!(!fr.is_passthrough());
        for _ in 0..4 {
            assert_eq!(fr.process(&[0.1; 128]).len(), 43);
        }
    }

    #[test]
    fn cubic_passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn cubic_accumulates_partial_chunks() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(!out.is_empty(), "second push should trigger processing");
        assert!((out.len() as isize - 320).unsigned_abs() <= 10);
    }
}
