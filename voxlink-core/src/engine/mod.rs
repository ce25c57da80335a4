//! `CaptureEngine`: top-level capture lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! CaptureEngine::new()
//!     └─► start()            → device open, pipeline spawned, status = Recording
//!         ├─► pause()/resume() → frames drained and dropped while paused
//!         └─► stop()         → running=false, pipeline joined, device released
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioCapture` is therefore created *inside* the `spawn_blocking` closure so
//! it never crosses a thread boundary. A sync oneshot channel propagates any
//! open-device errors back to the `start()` caller.

pub mod gate;
pub mod pipeline;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    audio::{resample::ResamplerKind, AudioCapture},
    buffering::{create_audio_ring, AudioProducer, Observer, Producer},
    error::{Result, VoxlinkError},
    ipc::events::{
        AudioActivityEvent, AudioDataPayload, CaptureStatus, CaptureStatusEvent,
        SpeakingChangedEvent,
    },
    vad::{
        energy::{EnergyVad, DEFAULT_ENERGY_THRESHOLD},
        VadKind, VoiceActivityDetector,
    },
};

pub use gate::HangoverPolicy;
pub use pipeline::{CapturePipeline, DiagnosticsSnapshot, PipelineControl};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How long `stop()` waits for the pipeline thread to release the device.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Receiving half of the payload stream returned by every `start*` call.
pub type PayloadStream = mpsc::UnboundedReceiver<AudioDataPayload>;

/// How outbound payloads are encoded before they reach the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum EncoderKind {
    /// Raw little-endian 16-bit PCM.
    #[default]
    Pcm,
    /// A host-supplied encoder registered under `name`.
    External { name: String },
}

/// Configuration for `CaptureEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Rate every frame is normalised to before VAD (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Device samples per frame. Default: 128.
    pub frame_size: usize,
    /// Input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    pub vad: VadKind,
    /// Energy VAD RMS threshold. Default: 0.01.
    pub vad_threshold: f32,
    /// RMS threshold used while the neural model is unavailable. Default: 0.02.
    pub neural_fallback_threshold: f32,
    /// Neural speech probability threshold. Default: 0.5.
    pub neural_speech_threshold: f32,
    /// Override path for the neural VAD model.
    /// `None` falls back to the platform default models directory.
    pub vad_model_path: Option<PathBuf>,
    pub hangover: HangoverPolicy,
    /// Fixed payload size in samples; `None` emits one payload per frame.
    pub chunk_size: Option<usize>,
    /// Emit the accumulator remainder as one short payload at stop.
    pub flush_remainder_on_stop: bool,
    /// `tanh` soft clipping before quantization instead of hard clamping.
    pub soft_clip: bool,
    pub encoder: EncoderKind,
    pub resampler: ResamplerKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            frame_size: 128,
            preferred_input_device: None,
            vad: VadKind::Energy,
            vad_threshold: DEFAULT_ENERGY_THRESHOLD,
            neural_fallback_threshold: 0.02,
            neural_speech_threshold: 0.5,
            vad_model_path: None,
            hangover: HangoverPolicy::default(),
            chunk_size: None,
            flush_remainder_on_stop: true,
            soft_clip: false,
            encoder: EncoderKind::Pcm,
            resampler: ResamplerKind::Linear,
        }
    }
}

/// Where a capture session reads its frames from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// A live input device, optionally by name.
    Device { preferred: Option<String> },
    /// Pre-decoded mono samples (e.g. a WAV file). When `realtime` is set they
    /// are fed at the rate a device would deliver them.
    Samples {
        samples: Vec<f32>,
        sample_rate: u32,
        realtime: bool,
    },
}

/// Build the detector selected by `config`.
///
/// The neural detector never fails to construct: a missing model or a build
/// without the `onnx` feature degrades to an energy decision at
/// `neural_fallback_threshold`.
pub fn build_vad(config: &EngineConfig) -> Box<dyn VoiceActivityDetector> {
    match config.vad {
        VadKind::Energy => Box::new(EnergyVad::new(config.vad_threshold)),
        #[cfg(feature = "onnx")]
        VadKind::Silero => {
            let path = config
                .vad_model_path
                .clone()
                .unwrap_or_else(crate::vad::default_silero_model_path);
            info!(path = %path.display(), threshold = config.neural_speech_threshold, "using SileroVad");
            Box::new(crate::vad::SileroVad::new(
                path,
                config.target_sample_rate,
                config.neural_speech_threshold,
                config.neural_fallback_threshold,
            ))
        }
        #[cfg(not(feature = "onnx"))]
        VadKind::Silero => {
            warn!("built without the onnx feature; neural VAD falls back to energy");
            Box::new(EnergyVad::new(config.neural_fallback_threshold))
        }
    }
}

/// Status cell plus its broadcast channel, cloneable into the pipeline thread.
#[derive(Clone)]
struct StatusCell {
    status: Arc<Mutex<CaptureStatus>>,
    tx: broadcast::Sender<CaptureStatusEvent>,
}

impl StatusCell {
    fn set(&self, status: CaptureStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.tx.send(CaptureStatusEvent { status, detail });
    }
}

/// The capture engine handle.
///
/// `CaptureEngine` is `Send + Sync`: all fields use interior mutability.
/// Wrap in `Arc<CaptureEngine>` to share with event-forwarding tasks.
pub struct CaptureEngine {
    config: Mutex<EngineConfig>,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    status: StatusCell,
    speaking_tx: broadcast::Sender<SpeakingChangedEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    /// Monotonically increasing activity event counter (across sessions).
    activity_seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    control_tx: Mutex<Option<Sender<PipelineControl>>>,
    /// Fires once the pipeline thread has exited and dropped the device.
    done_rx: Mutex<Option<Receiver<()>>>,
}

impl CaptureEngine {
    /// Create a new engine. Does not open any device until `start()`.
    pub fn new(config: EngineConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (speaking_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config: Mutex::new(config),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            status: StatusCell {
                status: Arc::new(Mutex::new(CaptureStatus::Idle)),
                tx: status_tx,
            },
            speaking_tx,
            activity_tx,
            activity_seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            control_tx: Mutex::new(None),
            done_rx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    /// Start capturing from the configured input device.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then returns
    /// the payload stream. The pipeline keeps running on a blocking thread.
    ///
    /// # Errors
    /// - `VoxlinkError::AlreadyRunning` if already started.
    /// - `VoxlinkError::NoDefaultInputDevice` / `VoxlinkError::AudioStream` on device error.
    pub fn start(&self) -> Result<PayloadStream> {
        let preferred = self.config.lock().preferred_input_device.clone();
        self.start_with_device(preferred)
    }

    /// Start capturing from a named input device (`None` = default).
    pub fn start_with_device(&self, preferred: Option<String>) -> Result<PayloadStream> {
        self.start_source(CaptureSource::Device { preferred })
    }

    /// Run the pipeline over pre-decoded samples instead of a device.
    ///
    /// The session ends by itself once every full frame has been processed.
    pub fn start_from_samples(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        realtime: bool,
    ) -> Result<PayloadStream> {
        self.start_source(CaptureSource::Samples {
            samples,
            sample_rate,
            realtime,
        })
    }

    pub fn start_source(&self, source: CaptureSource) -> Result<PayloadStream> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VoxlinkError::AlreadyRunning);
        }
        // A session that ended on its own may still be unwinding.
        self.wait_for_pipeline_exit();

        self.diagnostics.reset();
        self.paused.store(false, Ordering::SeqCst);

        let (producer, consumer) = create_audio_ring();
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        *self.control_tx.lock() = Some(control_tx);
        *self.done_rx.lock() = Some(done_rx);

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.lock().clone();
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let status = self.status.clone();
        let speaking_tx = self.speaking_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let activity_seq = Arc::clone(&self.activity_seq);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: pipeline thread signals open success/failure to start().
        // Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            let source_done = Arc::new(AtomicBool::new(false));

            // Open the frame source (must happen on THIS thread: cpal::Stream is !Send).
            let opened = match source {
                CaptureSource::Device { preferred } => AudioCapture::open_with_preference(
                    producer,
                    Arc::clone(&running),
                    preferred.as_deref(),
                )
                .map(|c| (c.sample_rate, Some(c))),
                CaptureSource::Samples {
                    samples,
                    sample_rate,
                    realtime,
                } => spawn_sample_feeder(
                    producer,
                    samples,
                    sample_rate,
                    realtime,
                    config.frame_size,
                    Arc::clone(&running),
                    Arc::clone(&source_done),
                )
                .map(|()| (sample_rate, None)),
            };

            let (source_rate, capture) = match opened {
                Ok(v) => v,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let pipeline = match CapturePipeline::new(&config, source_rate, build_vad(&config)) {
                Ok(p) => p,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let _ = open_tx.send(Ok(source_rate));

            pipeline::run(pipeline::PipelineContext {
                pipeline,
                frame_size: config.frame_size,
                flush_remainder_on_stop: config.flush_remainder_on_stop,
                consumer,
                running: Arc::clone(&running),
                paused,
                source_done,
                control_rx,
                payload_tx,
                speaking_tx,
                activity_tx,
                activity_seq,
                diagnostics,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);

            // A finite source ran dry without an explicit stop().
            if running.swap(false, Ordering::SeqCst) {
                info!("capture source exhausted");
                status.set(CaptureStatus::Stopped, None);
            }
            let _ = done_tx.send(());
        });

        // Block start() until device open is confirmed (receives actual sample rate).
        match open_rx.recv() {
            Ok(Ok(rate)) => {
                self.status.set(CaptureStatus::Recording, None);
                info!(sample_rate = rate, "capture started");
                Ok(payload_rx)
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.status.set(CaptureStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.status
                    .set(CaptureStatus::Error, Some("pipeline failed to start".into()));
                Err(VoxlinkError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop capture and wait for the pipeline to release the device.
    ///
    /// No frame is processed after this returns. The payload stream yields
    /// any remainder flush and then ends.
    ///
    /// # Errors
    /// - `VoxlinkError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VoxlinkError::NotRunning);
        }
        info!("capture stop requested");
        self.wait_for_pipeline_exit();
        *self.control_tx.lock() = None;
        self.status.set(CaptureStatus::Stopped, None);
        Ok(())
    }

    /// Keep the device open but drop frames until `resume()`.
    pub fn pause(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VoxlinkError::NotRunning);
        }
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.status.set(CaptureStatus::Paused, None);
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VoxlinkError::NotRunning);
        }
        if self.paused.swap(false, Ordering::SeqCst) {
            self.status.set(CaptureStatus::Recording, None);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Change the energy threshold; applies from the next frame of a running
    /// session and to every later session.
    ///
    /// The value lands in the field the configured detector reads: the energy
    /// threshold for `VadKind::Energy`, the RMS fallback for `VadKind::Silero`.
    pub fn set_vad_threshold(&self, threshold: f32) {
        let threshold = threshold.max(0.0);
        {
            let mut config = self.config.lock();
            match config.vad {
                VadKind::Energy => config.vad_threshold = threshold,
                VadKind::Silero => config.neural_fallback_threshold = threshold,
            }
        }
        if let Some(tx) = self.control_tx.lock().as_ref() {
            if tx.send(PipelineControl::SetVadThreshold(threshold)).is_err() {
                debug!("pipeline gone; threshold kept for the next session");
            }
        }
    }

    /// Current capture status (snapshot).
    pub fn status(&self) -> CaptureStatus {
        *self.status.status.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<CaptureStatusEvent> {
        self.status.tx.subscribe()
    }

    /// Subscribe to VAD_START / VAD_END notifications.
    pub fn subscribe_speaking(&self) -> broadcast::Receiver<SpeakingChangedEvent> {
        self.speaking_tx.subscribe()
    }

    /// Subscribe to per-frame activity events (RMS + speech classification).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn wait_for_pipeline_exit(&self) {
        let Some(rx) = self.done_rx.lock().take() else {
            return;
        };
        // Disconnected means the thread exited before signalling.
        if let Err(crossbeam_channel::RecvTimeoutError::Timeout) = rx.recv_timeout(STOP_TIMEOUT) {
            warn!("pipeline thread did not exit within {STOP_TIMEOUT:?}");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Feed `samples` into the ring from a helper thread, one frame at a time.
fn spawn_sample_feeder(
    mut producer: AudioProducer,
    samples: Vec<f32>,
    sample_rate: u32,
    realtime: bool,
    frame_size: usize,
    running: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
) -> Result<()> {
    if sample_rate == 0 {
        return Err(VoxlinkError::AudioStream("source sample rate is 0".into()));
    }
    let frame_size = frame_size.max(1);
    let frame_period = Duration::from_secs_f64(frame_size as f64 / sample_rate as f64);

    std::thread::Builder::new()
        .name("voxlink-feeder".into())
        .spawn(move || {
            for frame in samples.chunks(frame_size) {
                while producer.vacant_len() < frame.len() {
                    if !running.load(Ordering::Relaxed) {
                        done.store(true, Ordering::Release);
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                producer.push_slice(frame);
                if realtime {
                    std::thread::sleep(frame_period);
                }
            }
            done.store(true, Ordering::Release);
        })
        .map(|_| ())
        .map_err(|e| VoxlinkError::AudioStream(format!("failed to spawn feeder: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.target_sample_rate, 16_000);
        assert_eq!(c.frame_size, 128);
        assert_eq!(c.vad, VadKind::Energy);
        assert_eq!(c.chunk_size, None);
        assert!(c.flush_remainder_on_stop);
        assert!(!c.soft_clip);
        assert_eq!(c.encoder, EncoderKind::Pcm);
    }

    #[test]
    fn config_deserializes_partial_camel_case() {
        let c: EngineConfig = serde_json::from_str(
            r#"{"chunkSize":4096,"vad":"silero","hangover":{"mode":"fixed","frames":10}}"#,
        )
        .unwrap();
        assert_eq!(c.chunk_size, Some(4096));
        assert_eq!(c.vad, VadKind::Silero);
        assert_eq!(c.hangover, HangoverPolicy::Fixed { frames: 10 });
        assert_eq!(c.target_sample_rate, 16_000);
    }

    #[test]
    fn external_encoder_round_trips() {
        let kind = EncoderKind::External {
            name: "opus".into(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"kind":"external","name":"opus"}"#);
        assert_eq!(serde_json::from_str::<EncoderKind>(&json).unwrap(), kind);
    }

    #[test]
    fn stop_without_start_is_not_running() {
        let engine = CaptureEngine::new(EngineConfig::default());
        assert!(matches!(engine.stop(), Err(VoxlinkError::NotRunning)));
        assert!(matches!(engine.pause(), Err(VoxlinkError::NotRunning)));
        assert_eq!(engine.status(), CaptureStatus::Idle);
    }

    #[test]
    fn threshold_update_persists_for_next_session() {
        let engine = CaptureEngine::new(EngineConfig::default());
        engine.set_vad_threshold(0.2);
        assert_eq!(engine.config().vad_threshold, 0.2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn neural_threshold_update_survives_restart() {
        let engine = CaptureEngine::new(EngineConfig {
            vad: VadKind::Silero,
            vad_model_path: Some(PathBuf::from("/nonexistent/silero.onnx")),
            ..EngineConfig::default()
        });
        let _rx = engine
            .start_from_samples(vec![0.0; 128 * 1000], 16_000, true)
            .unwrap();
        engine.set_vad_threshold(0.3);
        engine.stop().unwrap();

        let config = engine.config();
        assert_eq!(config.neural_fallback_threshold, 0.3);
        assert_eq!(config.vad_threshold, DEFAULT_ENERGY_THRESHOLD);

        // The next session's detector uses the updated fallback.
        let mut vad = build_vad(&config);
        let mid = crate::buffering::chunk::AudioChunk::new(vec![0.1; 512], 16_000);
        let loud = crate::buffering::chunk::AudioChunk::new(vec![0.5; 512], 16_000);
        assert!(!vad.classify(&mid).is_speech());
        assert!(vad.classify(&loud).is_speech());
    }

    #[test]
    fn concurrent_starts_admit_one_session() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let engine = Arc::new(CaptureEngine::new(EngineConfig::default()));
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                let handle = rt.handle().clone();
                std::thread::spawn(move || {
                    let _guard = handle.enter();
                    barrier.wait();
                    engine
                        .start_from_samples(vec![0.0; 128 * 1000], 16_000, true)
                        .is_ok()
                })
            })
            .collect();
        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(started, 1);
        engine.stop().unwrap();
    }

    #[test]
    fn silero_without_model_still_classifies() {
        let config = EngineConfig {
            vad: VadKind::Silero,
            vad_model_path: Some(PathBuf::from("/nonexistent/silero.onnx")),
            ..EngineConfig::default()
        };
        let mut vad = build_vad(&config);
        let loud = crate::buffering::chunk::AudioChunk::new(vec![0.5; 512], 16_000);
        let quiet = crate::buffering::chunk::AudioChunk::new(vec![0.01; 512], 16_000);
        assert!(vad.classify(&loud).is_speech());
        assert!(!vad.classify(&quiet).is_speech());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replay_session_ends_by_itself() {
        let engine = CaptureEngine::new(EngineConfig::default());
        let mut status = engine.subscribe_status();
        let samples = vec![0.5f32; 128 * 10];
        let mut rx = engine.start_from_samples(samples, 16_000, false).unwrap();

        let mut got = Vec::new();
        while let Some(p) = rx.recv().await {
            got.push(p);
        }
        assert_eq!(got.len(), 10);
        assert!(got.iter().enumerate().all(|(i, p)| p.sequence == i as u64));

        let stopped = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match status.recv().await {
                    Ok(ev) if ev.status == CaptureStatus::Stopped => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_twice_is_already_running() {
        let engine = CaptureEngine::new(EngineConfig::default());
        let _rx = engine
            .start_from_samples(vec![0.0; 128 * 1000], 16_000, true)
            .unwrap();
        assert!(matches!(
            engine.start_from_samples(vec![0.0; 128], 16_000, false),
            Err(VoxlinkError::AlreadyRunning)
        ));
        engine.stop().unwrap();
        assert_eq!(engine.status(), CaptureStatus::Stopped);
    }
}
