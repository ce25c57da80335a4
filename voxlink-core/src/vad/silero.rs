//! Silero VAD neural voice activity detector.
//!
//! Wraps the Silero VAD ONNX model (v3/v4 LSTM interface) published at
//! <https://github.com/snakers4/silero-vad>.
//!
//! ## Model I/O
//!
//! | Name     | Shape      | DType | Direction |
//! |----------|------------|-------|-----------|
//! | `input`  | `[1, N]`   | f32   | in        |
//! | `sr`     | `[1]`      | i64   | in        |
//! | `h`      | `[2,1,64]` | f32   | in        |
//! | `c`      | `[2,1,64]` | f32   | in        |
//! | `output` | `[1, 1]`   | f32   | out       |
//! | `hn`     | `[2,1,64]` | f32   | out       |
//! | `cn`     | `[2,1,64]` | f32   | out       |
//!
//! ## Loading
//!
//! `SileroVad::new` never fails. The session is built on a background thread
//! and picked up by the first `classify` after it lands. Until then, and
//! forever if loading fails, frames are classified by RMS against a separate
//! fallback threshold.
//!
//! ## Windows
//!
//! Pipeline frames are short (128 samples) while the model scores 512-sample
//! windows (256 at 8 kHz). Frames are buffered until a window fills; frames in
//! between repeat the last window's decision. After
//! `MAX_INFERENCE_FAILURES` consecutive failed windows the model is dropped
//! for the rest of the session and the energy fallback takes over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, error, info, warn};

use super::{energy::EnergyVad, VadDecision, VoiceActivityDetector};
use crate::{
    buffering::chunk::AudioChunk,
    error::{Result, VoxlinkError},
};

/// LSTM state size: 2 layers × 1 batch × 64 units.
const STATE_SHAPE: (usize, usize, usize) = (2, 1, 64);
const STATE_LEN: usize = 2 * 64;

/// Default speech-probability threshold.
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.5;
/// RMS threshold used while the model is unavailable.
pub const DEFAULT_FALLBACK_THRESHOLD: f32 = 0.02;

/// Consecutive failed windows before the model is abandoned.
pub const MAX_INFERENCE_FAILURES: u32 = 8;

/// Samples the model scores at once for `sample_rate`.
fn window_len(sample_rate: i64) -> usize {
    if sample_rate <= 8_000 {
        256
    } else {
        512
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streak {
    First,
    Repeat,
    Exhausted,
}

/// Counts consecutive inference failures.
#[derive(Debug, Default)]
struct FailureStreak {
    count: u32,
}

impl FailureStreak {
    fn record(&mut self) -> Streak {
        self.count = self.count.saturating_add(1);
        match self.count {
            1 => Streak::First,
            n if n >= MAX_INFERENCE_FAILURES => Streak::Exhausted,
            _ => Streak::Repeat,
        }
    }

    fn clear(&mut self) {
        self.count = 0;
    }
}

/// Tensor names resolved against the loaded graph.
struct LoadedModel {
    session: Session,
    input_name: String,
    sr_name: Option<String>,
    h_name: String,
    c_name: String,
    output_name: String,
    hn_name: String,
    cn_name: String,
}

enum ModelState {
    Loading(Receiver<Result<LoadedModel>>),
    Ready(Box<LoadedModel>),
    Unavailable,
}

/// Neural VAD backed by the Silero LSTM model.
pub struct SileroVad {
    state: ModelState,
    h: Vec<f32>,
    c: Vec<f32>,
    sample_rate: i64,
    speech_threshold: f32,
    fallback_threshold: f32,
    input_buf: Vec<f32>,
    /// Decision of the last scored window; `None` until one is scored.
    last_decision: Option<VadDecision>,
    failures: FailureStreak,
}

impl SileroVad {
    /// Start loading the model at `path` in the background.
    pub fn new(
        path: impl Into<PathBuf>,
        sample_rate: u32,
        speech_threshold: f32,
        fallback_threshold: f32,
    ) -> Self {
        let path = path.into();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let spawned = std::thread::Builder::new()
            .name("silero-load".into())
            .spawn(move || {
                let _ = tx.send(load_model(&path));
            });

        let state = match spawned {
            Ok(_) => ModelState::Loading(rx),
            Err(e) => {
                warn!("could not spawn VAD loader thread ({e}); using energy fallback");
                ModelState::Unavailable
            }
        };

        Self {
            state,
            h: vec![0.0; STATE_LEN],
            c: vec![0.0; STATE_LEN],
            sample_rate: i64::from(sample_rate),
            speech_threshold,
            fallback_threshold,
            input_buf: Vec::new(),
            last_decision: None,
            failures: FailureStreak::default(),
        }
    }

    /// `true` once the session is ready for inference.
    pub fn is_loaded(&mut self) -> bool {
        self.poll_load();
        matches!(self.state, ModelState::Ready(_))
    }

    /// Block up to `timeout` for the background load to resolve.
    ///
    /// Returns whether the model is ready. Used by hosts that prefer a
    /// warm model over an immediate start.
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        if let ModelState::Loading(rx) = &self.state {
            let outcome = rx.recv_timeout(timeout);
            match outcome {
                Ok(result) => self.finish_load(result),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => return false,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("VAD loader thread exited without a result; using energy fallback");
                    self.state = ModelState::Unavailable;
                }
            }
        }
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn set_fallback_threshold(&mut self, threshold: f32) {
        self.fallback_threshold = threshold;
    }

    fn poll_load(&mut self) {
        let ModelState::Loading(rx) = &self.state else {
            return;
        };
        match rx.try_recv() {
            Ok(result) => self.finish_load(result),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("VAD loader thread exited without a result; using energy fallback");
                self.state = ModelState::Unavailable;
            }
        }
    }

    fn finish_load(&mut self, result: Result<LoadedModel>) {
        match result {
            Ok(model) => {
                info!("Silero VAD ready");
                self.reset();
                self.state = ModelState::Ready(Box::new(model));
            }
            Err(e) => {
                warn!("Silero VAD load failed ({e}); using energy fallback");
                self.state = ModelState::Unavailable;
            }
        }
    }

    /// Feed one frame plus the previous state; return the speech probability.
    fn infer(&mut self, samples: &[f32]) -> Result<f32> {
        let ModelState::Ready(model) = &mut self.state else {
            return Err(VoxlinkError::ModelLoad("model not loaded".into()));
        };

        let onnx = |e: ort::Error| VoxlinkError::OnnxSession(e.to_string());
        let shape = |e: ndarray::ShapeError| VoxlinkError::OnnxSession(e.to_string());

        let input = Array2::<f32>::from_shape_vec((1, samples.len()), samples.to_vec()).map_err(shape)?;
        let h = Array3::<f32>::from_shape_vec(STATE_SHAPE, self.h.clone()).map_err(shape)?;
        let c = Array3::<f32>::from_shape_vec(STATE_SHAPE, self.c.clone()).map_err(shape)?;

        let mut feeds: Vec<(String, SessionInputValue<'_>)> = vec![
            (model.input_name.clone(), Value::from_array(input).map_err(onnx)?.into()),
            (model.h_name.clone(), Value::from_array(h).map_err(onnx)?.into()),
            (model.c_name.clone(), Value::from_array(c).map_err(onnx)?.into()),
        ];
        if let Some(sr_name) = &model.sr_name {
            let sr = Array1::<i64>::from_elem(1, self.sample_rate);
            feeds.push((sr_name.clone(), Value::from_array(sr).map_err(onnx)?.into()));
        }

        let outputs = model.session.run(feeds).map_err(onnx)?;

        let read = |name: &str| -> Result<Vec<f32>> {
            let value = outputs
                .get(name)
                .ok_or_else(|| VoxlinkError::OnnxSession(format!("missing output `{name}`")))?;
            let (_, data) = value.try_extract_tensor::<f32>().map_err(onnx)?;
            Ok(data.to_vec())
        };

        let prob = read(&model.output_name)?.first().copied().unwrap_or(0.0);
        let hn = read(&model.hn_name)?;
        let cn = read(&model.cn_name)?;
        if hn.len() == STATE_LEN && cn.len() == STATE_LEN {
            self.h = hn;
            self.c = cn;
        }

        Ok(prob)
    }
}

impl VoiceActivityDetector for SileroVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        self.poll_load();

        let fallback =
            VadDecision::from_bool(EnergyVad::is_speech(&chunk.samples, self.fallback_threshold));
        if !matches!(self.state, ModelState::Ready(_)) || chunk.is_empty() {
            return fallback;
        }

        let window = window_len(self.sample_rate);
        self.input_buf.extend_from_slice(&chunk.samples);
        while self.input_buf.len() >= window {
            let samples: Vec<f32> = self.input_buf.drain(..window).collect();
            match self.infer(&samples) {
                Ok(prob) => {
                    self.failures.clear();
                    self.last_decision = Some(VadDecision::from_bool(prob > self.speech_threshold));
                }
                Err(e) => {
                    match self.failures.record() {
                        Streak::First => error!("Silero VAD inference error: {e}"),
                        Streak::Repeat => debug!("Silero VAD inference error: {e}"),
                        Streak::Exhausted => {
                            warn!(
                                failures = MAX_INFERENCE_FAILURES,
                                "Silero VAD keeps failing ({e}); using energy fallback"
                            );
                            self.state = ModelState::Unavailable;
                            self.input_buf.clear();
                        }
                    }
                    self.last_decision = None;
                    return fallback;
                }
            }
        }
        self.last_decision.unwrap_or(fallback)
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.input_buf.clear();
        self.last_decision = None;
        self.failures.clear();
    }

    fn set_threshold(&mut self, threshold: f32) {
        self.set_fallback_threshold(threshold);
    }
}

fn load_model(path: &Path) -> Result<LoadedModel> {
    if !path.exists() {
        return Err(VoxlinkError::ModelNotFound {
            path: path.to_path_buf(),
        });
    }

    info!(path = ?path, "loading Silero VAD");

    let session = SessionBuilder::new()
        .map_err(|e| VoxlinkError::ModelLoad(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| VoxlinkError::ModelLoad(e.to_string()))?;

    let inputs: Vec<String> = session
        .inputs()
        .iter()
        .map(|outlet| outlet.name().to_string())
        .collect();
    let outputs: Vec<String> = session
        .outputs()
        .iter()
        .map(|outlet| outlet.name().to_string())
        .collect();

    let require = |names: &[String], preferred: &[&str]| {
        resolve_name(names, preferred).ok_or_else(|| {
            VoxlinkError::ModelLoad(format!(
                "graph lacks any of {preferred:?} (has {names:?})"
            ))
        })
    };

    Ok(LoadedModel {
        input_name: require(&inputs, &["input", "audio", "x"])?,
        sr_name: resolve_name(&inputs, &["sr", "sample_rate"]),
        h_name: require(&inputs, &["h", "state_h"])?,
        c_name: require(&inputs, &["c", "state_c"])?,
        output_name: require(&outputs, &["output", "speech_prob", "prob"])?,
        hn_name: require(&outputs, &["hn", "state_hn", "h_out"])?,
        cn_name: require(&outputs, &["cn", "state_cn", "c_out"])?,
        session,
    })
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(amplitude: f32) -> AudioChunk {
        AudioChunk::new(vec![amplitude; 512], 16_000)
    }

    #[test]
    fn missing_model_falls_back_to_energy() {
        let mut vad = SileroVad::new(
            "/nonexistent/silero_vad.onnx",
            16_000,
            DEFAULT_SPEECH_THRESHOLD,
            DEFAULT_FALLBACK_THRESHOLD,
        );
        assert!(!vad.wait_for_load(Duration::from_secs(5)));
        assert!(!vad.is_loaded());

        // Fallback threshold (0.02) is independent of the energy default (0.01).
        assert_eq!(vad.classify(&chunk(0.015)), VadDecision::Silence);
        assert_eq!(vad.classify(&chunk(0.05)), VadDecision::Speech);
    }

    #[test]
    fn classify_before_load_resolves_never_panics() {
        let mut vad = SileroVad::new("/nonexistent/model.onnx", 16_000, 0.5, 0.02);
        for _ in 0..10 {
            let _ = vad.classify(&chunk(0.3));
        }
        vad.reset();
    }

    #[test]
    fn failure_streak_logs_once_then_gives_up() {
        let mut streak = FailureStreak::default();
        assert_eq!(streak.record(), Streak::First);
        for _ in 2..MAX_INFERENCE_FAILURES {
            assert_eq!(streak.record(), Streak::Repeat);
        }
        assert_eq!(streak.record(), Streak::Exhausted);

        streak.clear();
        assert_eq!(streak.record(), Streak::First);
    }

    #[test]
    fn window_matches_model_rate() {
        assert_eq!(window_len(16_000), 512);
        assert_eq!(window_len(8_000), 256);
    }

    #[test]
    fn reset_drops_partial_window() {
        let mut vad = SileroVad::new("/nonexistent/model.onnx", 16_000, 0.5, 0.02);
        vad.input_buf.extend_from_slice(&[0.1; 300]);
        vad.last_decision = Some(VadDecision::Speech);
        vad.reset();
        assert!(vad.input_buf.is_empty());
        assert_eq!(vad.last_decision, None);
    }

    #[test]
    fn resolve_name_is_case_insensitive_and_ordered() {
        let names = vec!["Input".to_string(), "sr".to_string()];
        assert_eq!(resolve_name(&names, &["audio", "input"]), Some("Input".into()));
        assert_eq!(resolve_name(&names, &["h"]), None);
    }
}
