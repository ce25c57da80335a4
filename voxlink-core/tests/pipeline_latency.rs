use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use voxlink_core::buffering::{chunk::AudioChunk, create_audio_ring, Producer};
use voxlink_core::engine::{pipeline, CapturePipeline, EngineConfig};
use voxlink_core::vad::{VadDecision, VoiceActivityDetector};
use voxlink_core::AudioDataPayload;

struct AlwaysSpeechVad;

impl VoiceActivityDetector for AlwaysSpeechVad {
    fn classify(&mut self, _chunk: &AudioChunk) -> VadDecision {
        VadDecision::Speech
    }

    fn reset(&mut self) {}
}

/// Stands in for a neural VAD whose inference takes `delay` per frame.
struct SlowVad {
    delay: Duration,
}

impl VoiceActivityDetector for SlowVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        thread::sleep(self.delay);
        VadDecision::from_bool(chunk.rms() > 0.01)
    }

    fn reset(&mut self) {}
}

struct Harness {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
    payload_rx: mpsc::UnboundedReceiver<AudioDataPayload>,
}

fn spawn_pipeline(
    vad: Box<dyn VoiceActivityDetector>,
    samples: &[f32],
) -> Harness {
    let (mut producer, consumer) = create_audio_ring();
    producer.push_slice(samples);

    let config = EngineConfig::default();
    let running = Arc::new(AtomicBool::new(true));
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let (speaking_tx, _) = broadcast::channel(16);
    let (activity_tx, _) = broadcast::channel(1024);
    let (_control_tx, control_rx) = crossbeam_channel::unbounded();

    let ctx = pipeline::PipelineContext {
        pipeline: CapturePipeline::new(&config, 16_000, vad).expect("pipeline"),
        frame_size: config.frame_size,
        flush_remainder_on_stop: true,
        consumer,
        running: Arc::clone(&running),
        paused: Arc::new(AtomicBool::new(false)),
        source_done: Arc::new(AtomicBool::new(false)),
        control_rx,
        payload_tx,
        speaking_tx,
        activity_tx,
        activity_seq: Arc::new(AtomicU64::new(0)),
        diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
    };

    let handle = thread::spawn(move || pipeline::run(ctx));
    Harness {
        running,
        handle,
        payload_rx,
    }
}

fn recv_with_timeout(
    rx: &mut mpsc::UnboundedReceiver<AudioDataPayload>,
    timeout: Duration,
) -> AudioDataPayload {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(p) => return p,
            Err(mpsc::error::TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for payload");
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(mpsc::error::TryRecvError::Disconnected) => {
                panic!("payload channel closed unexpectedly")
            }
        }
    }
}

#[test]
fn first_payload_latency_under_50ms() {
    let mut h = spawn_pipeline(Box::new(AlwaysSpeechVad), &[0.2; 128]);

    let start = Instant::now();
    let first = recv_with_timeout(&mut h.payload_rx, Duration::from_secs(2));
    let elapsed = start.elapsed();

    h.running.store(false, Ordering::SeqCst);
    h.handle.join().expect("pipeline thread panicked");

    assert_eq!(first.sequence, 0);
    assert_eq!(first.len(), 128);
    assert!(
        elapsed < Duration::from_millis(50),
        "first payload too slow: {:?} (target < 50ms)",
        elapsed
    );
}

#[test]
fn slow_vad_queues_frames_instead_of_dropping_them() {
    // 40 frames arrive at once; each classification takes 5 ms.
    let mut h = spawn_pipeline(
        Box::new(SlowVad {
            delay: Duration::from_millis(5),
        }),
        &[0.3; 128 * 40],
    );

    let mut seqs = Vec::new();
    for _ in 0..40 {
        seqs.push(recv_with_timeout(&mut h.payload_rx, Duration::from_secs(5)).sequence);
    }

    h.running.store(false, Ordering::SeqCst);
    h.handle.join().expect("pipeline thread panicked");

    assert_eq!(seqs, (0..40).collect::<Vec<u64>>());
}

#[test]
fn stop_is_observed_before_the_next_frame() {
    let h = spawn_pipeline(
        Box::new(SlowVad {
            delay: Duration::from_millis(20),
        }),
        &[0.3; 128 * 200],
    );

    thread::sleep(Duration::from_millis(50));
    h.running.store(false, Ordering::SeqCst);
    h.handle.join().expect("pipeline thread panicked");

    let mut rx = h.payload_rx;
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    // At most one frame can be in flight when the flag flips.
    assert!(count < 10, "processed {count} frames after stop");
}
