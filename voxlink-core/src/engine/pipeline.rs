//! Per-frame capture processing and the blocking drain loop around it.
//!
//! ## Stages (per frame)
//!
//! ```text
//! 1. Drain exactly `frame_size` device samples from the ring buffer
//! 2. Resample to the target rate
//! 3. VAD classify → Speech | Silence
//! 4. Speech gate → VAD_START / VAD_END, forward or drop
//! 5. Quantize forwarded audio to i16
//! 6. Emit one payload per frame, or fixed-size slices via the accumulator
//! ```
//!
//! The loop runs in `spawn_blocking`. Everything it hands out goes through
//! channels whose `send` never blocks, so a slow consumer cannot stall the
//! frame timeline.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, info_span, warn};

use crate::{
    audio::{pcm, resample::FrameResampler},
    buffering::{
        accumulator::SampleAccumulator, chunk::AudioChunk, AudioConsumer, Consumer, Observer,
    },
    engine::{
        gate::{GateTransition, SpeechGate},
        EngineConfig,
    },
    error::Result,
    ipc::events::{AudioActivityEvent, AudioDataPayload, SpeakingChangedEvent},
    vad::VoiceActivityDetector,
};

/// Sleep when the ring holds less than one frame (avoids a busy-wait).
const EMPTY_SLEEP: Duration = Duration::from_millis(2);

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_dropped_paused: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub vad_speech_frames: AtomicUsize,
    pub utterances: AtomicUsize,
    pub payloads_emitted: AtomicUsize,
    pub samples_emitted: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_dropped_paused.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.vad_speech_frames.store(0, Ordering::Relaxed);
        self.utterances.store(0, Ordering::Relaxed);
        self.payloads_emitted.store(0, Ordering::Relaxed);
        self.samples_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_dropped_paused: self.frames_dropped_paused.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            vad_speech_frames: self.vad_speech_frames.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            payloads_emitted: self.payloads_emitted.load(Ordering::Relaxed),
            samples_emitted: self.samples_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_dropped_paused: usize,
    pub samples_resampled: usize,
    pub vad_speech_frames: usize,
    pub utterances: usize,
    pub payloads_emitted: usize,
    pub samples_emitted: usize,
}

/// Everything one frame produced.
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    /// `Some(true)` on VAD_START, `Some(false)` on VAD_END.
    pub speaking_changed: Option<bool>,
    pub payloads: Vec<AudioDataPayload>,
    pub rms: f32,
    pub is_speech: bool,
    /// Samples after resampling.
    pub resampled_len: usize,
    /// Whether the frame reached quantization.
    pub forwarded: bool,
}

/// Synchronous frame processor: resampler → VAD → gate → quantize → chunk.
///
/// Owns the VAD and the sequence counter for exactly one capture session.
pub struct CapturePipeline {
    target_sample_rate: u32,
    soft_clip: bool,
    resampler: FrameResampler,
    vad: Box<dyn VoiceActivityDetector>,
    gate: SpeechGate,
    accumulator: Option<SampleAccumulator>,
    next_sequence: u64,
    clock: fn() -> i64,
}

impl CapturePipeline {
    /// Build a pipeline for a session whose device runs at `source_rate`.
    ///
    /// Resets the VAD, so hidden state never leaks between sessions.
    pub fn new(
        config: &EngineConfig,
        source_rate: u32,
        mut vad: Box<dyn VoiceActivityDetector>,
    ) -> Result<Self> {
        let resampler = FrameResampler::new(
            config.resampler,
            source_rate,
            config.target_sample_rate,
            config.frame_size,
        )?;
        if !resampler.is_passthrough() {
            info!(
                from = source_rate,
                to = config.target_sample_rate,
                kind = ?config.resampler,
                "resampling capture frames"
            );
        }
        vad.reset();

        Ok(Self {
            target_sample_rate: config.target_sample_rate,
            soft_clip: config.soft_clip,
            resampler,
            vad,
            gate: SpeechGate::new(config.hangover),
            accumulator: config.chunk_size.map(SampleAccumulator::new),
            next_sequence: 0,
            clock: now_ms,
        })
    }

    /// Replace the wall clock used for payload timestamps.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn vad_mut(&mut self) -> &mut dyn VoiceActivityDetector {
        self.vad.as_mut()
    }

    pub fn is_speaking(&self) -> bool {
        self.gate.is_speaking()
    }

    /// Next sequence number to be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Process one device frame.
    pub fn process_frame(&mut self, raw: &[f32]) -> FrameOutput {
        let resampled = self.resampler.process(raw);
        if resampled.is_empty() {
            return FrameOutput::default();
        }

        let resampled_len = resampled.len();
        let chunk = AudioChunk::new(resampled, self.target_sample_rate);
        let rms = chunk.rms();
        let is_speech = self.vad.classify(&chunk).is_speech();

        let outcome = self.gate.update(is_speech);
        let speaking_changed = outcome.transition.map(|t| t == GateTransition::Started);

        let mut out = FrameOutput {
            speaking_changed,
            payloads: Vec::new(),
            rms,
            is_speech,
            resampled_len,
            forwarded: outcome.forward,
        };

        if !outcome.forward {
            return out;
        }

        let quantized = pcm::quantize(&chunk.samples, self.soft_clip);
        match self.accumulator.as_mut() {
            Some(acc) => {
                for slice in acc.push(&quantized) {
                    out.payloads.push(self.make_payload(slice));
                }
            }
            None => out.payloads.push(self.make_payload(quantized)),
        }
        out
    }

    /// Flush whatever the accumulator still holds as one short payload.
    pub fn flush_remainder(&mut self) -> Option<AudioDataPayload> {
        let rest = self.accumulator.as_mut()?.take_remainder()?;
        Some(self.make_payload(rest))
    }

    fn make_payload(&mut self, samples: Vec<i16>) -> AudioDataPayload {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        AudioDataPayload {
            samples,
            timestamp_ms: (self.clock)(),
            sequence,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Messages from the control side to the frame loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineControl {
    SetVadThreshold(f32),
}

/// All context the drain loop needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub pipeline: CapturePipeline,
    pub frame_size: usize,
    pub flush_remainder_on_stop: bool,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
    /// Set by a finite source once it has pushed its last sample.
    pub source_done: Arc<AtomicBool>,
    pub control_rx: Receiver<PipelineControl>,
    pub payload_tx: mpsc::UnboundedSender<AudioDataPayload>,
    pub speaking_tx: broadcast::Sender<SpeakingChangedEvent>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub activity_seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the blocking loop until `ctx.running` clears or a finite source drains.
pub fn run(mut ctx: PipelineContext) {
    info!(frame_size = ctx.frame_size, "capture pipeline started");

    let frame_size = ctx.frame_size.max(1);
    let mut frame = vec![0f32; frame_size];
    let mut utterance_span = None;

    loop {
        // Checked before every frame: nothing is processed once stop is observed.
        if !ctx.running.load(Ordering::Acquire) {
            break;
        }

        while let Ok(msg) = ctx.control_rx.try_recv() {
            match msg {
                PipelineControl::SetVadThreshold(t) => {
                    info!(threshold = t, "VAD threshold updated");
                    ctx.pipeline.vad_mut().set_threshold(t);
                }
            }
        }

        if ctx.consumer.occupied_len() < frame_size {
            // Re-read after the flag: the last push may land between the two loads.
            if ctx.source_done.load(Ordering::Acquire)
                && ctx.consumer.occupied_len() < frame_size
            {
                debug!(
                    leftover = ctx.consumer.occupied_len(),
                    "source exhausted; ending capture"
                );
                break;
            }
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }

        let n = ctx.consumer.pop_slice(&mut frame);
        ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        if ctx.paused.load(Ordering::Relaxed) {
            ctx.diagnostics
                .frames_dropped_paused
                .fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let out = ctx.pipeline.process_frame(&frame[..n]);
        dispatch(&mut ctx, out, &mut utterance_span);
    }

    if ctx.flush_remainder_on_stop {
        if let Some(payload) = ctx.pipeline.flush_remainder() {
            debug!(samples = payload.len(), "flushing accumulator remainder");
            send_payload(&ctx, payload);
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        frames_dropped_paused = snap.frames_dropped_paused,
        vad_speech_frames = snap.vad_speech_frames,
        utterances = snap.utterances,
        payloads_emitted = snap.payloads_emitted,
        samples_emitted = snap.samples_emitted,
        "capture pipeline stopped"
    );
}

fn dispatch(ctx: &mut PipelineContext, out: FrameOutput, span: &mut Option<tracing::Span>) {
    ctx.diagnostics
        .samples_resampled
        .fetch_add(out.resampled_len, Ordering::Relaxed);
    if out.is_speech {
        ctx.diagnostics
            .vad_speech_frames
            .fetch_add(1, Ordering::Relaxed);
    }

    let seq = ctx.activity_seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.activity_tx.send(AudioActivityEvent {
        seq,
        rms: out.rms,
        is_speech: out.is_speech,
    });

    if let Some(speaking) = out.speaking_changed {
        if speaking {
            let n = ctx.diagnostics.utterances.fetch_add(1, Ordering::Relaxed);
            *span = Some(info_span!("utterance", index = n));
            info!(rms = out.rms, "VAD_START");
        } else {
            if let Some(s) = span.as_ref() {
                let _enter = s.enter();
                info!("VAD_END");
            }
            *span = None;
        }
        let _ = ctx.speaking_tx.send(SpeakingChangedEvent {
            speaking,
            timestamp_ms: now_ms(),
        });
    }

    for payload in out.payloads {
        send_payload(ctx, payload);
    }
}

fn send_payload(ctx: &PipelineContext, payload: AudioDataPayload) {
    let samples = payload.len();
    let sequence = payload.sequence;
    match ctx.payload_tx.send(payload) {
        Ok(()) => {
            ctx.diagnostics
                .payloads_emitted
                .fetch_add(1, Ordering::Relaxed);
            ctx.diagnostics
                .samples_emitted
                .fetch_add(samples, Ordering::Relaxed);
        }
        Err(_) => {
            // Receiver gone: the session is tearing down.
            warn!(sequence, "payload receiver closed; dropping payload");
        }
    }
}
