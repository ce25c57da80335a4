//! Speaker output backed by cpal.
//!
//! The `cpal::Stream` lives on a dedicated thread (it is `!Send` on some
//! hosts). The handle talks to the device callback only through channels and
//! an atomic sample clock, so scheduling never takes a lock the callback
//! could contend on.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleRate, StreamConfig,
};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{mixer::SegmentMixer, PlaybackOutput, ScheduledSegment, SegmentId};
use crate::error::{Result, VoxlinkError};

enum MixerCommand {
    Schedule(ScheduledSegment),
    Stop(SegmentId),
    StopAll,
}

/// Plays scheduled segments on an output device.
pub struct CpalOutput {
    sample_rate: u32,
    clock: Arc<AtomicU64>,
    cmd_tx: Sender<MixerCommand>,
    ended_rx: Receiver<SegmentId>,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device (or `preferred` by name) at `sample_rate`.
    ///
    /// # Errors
    /// `NoDefaultOutputDevice` when no speaker exists, `AudioStream` when the
    /// stream cannot be built or started.
    pub fn open(preferred: Option<&str>, sample_rate: u32) -> Result<Self> {
        let clock = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ended_tx, ended_rx) = crossbeam_channel::bounded(1024);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let preferred = preferred.map(str::to_owned);
        let thread_clock = Arc::clone(&clock);
        let thread = std::thread::Builder::new()
            .name("voxlink-playback".into())
            .spawn(move || {
                let stream = match build_stream(
                    preferred.as_deref(),
                    sample_rate,
                    cmd_rx,
                    ended_tx,
                    thread_clock,
                ) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the handle drops; the stream is released here.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("playback stream closed");
            })
            .map_err(|e| VoxlinkError::AudioStream(format!("failed to spawn playback thread: {e}")))?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoxlinkError::AudioStream(
                    "playback thread died unexpectedly".into(),
                ))
            }
        };

        Ok(Self {
            sample_rate: device_rate,
            clock,
            cmd_tx,
            ended_rx,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Rate the device actually runs at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Silence everything immediately.
    pub fn stop_all(&self) {
        let _ = self.cmd_tx.send(MixerCommand::StopAll);
    }
}

impl PlaybackOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, segment: &ScheduledSegment) -> Result<()> {
        self.cmd_tx
            .send(MixerCommand::Schedule(segment.clone()))
            .map_err(|_| VoxlinkError::PlaybackScheduling("playback stream closed".into()))
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        self.cmd_tx
            .send(MixerCommand::Stop(id))
            .map_err(|_| VoxlinkError::PlaybackScheduling("playback stream closed".into()))
    }

    fn drain_ended(&mut self) -> Vec<SegmentId> {
        self.ended_rx.try_iter().collect()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop_all();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn build_stream(
    preferred: Option<&str>,
    sample_rate: u32,
    cmd_rx: Receiver<MixerCommand>,
    ended_tx: Sender<SegmentId>,
    clock: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let preferred = preferred.and_then(|wanted| {
        let found = host
            .output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
        if found.is_none() {
            warn!(device = wanted, "preferred output device not found, falling back");
        }
        found
    });
    let device = preferred
        .or_else(|| host.default_output_device())
        .ok_or(VoxlinkError::NoDefaultOutputDevice)?;

    let wanted = SampleRate(sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .min_by_key(|c| c.channels());

    let config: StreamConfig = match supported {
        Some(c) => c.with_sample_rate(wanted).config(),
        None => {
            let fallback = device
                .default_output_config()
                .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?;
            warn!(
                wanted = sample_rate,
                got = fallback.sample_rate().0,
                "output device does not support the stream rate; segments will be rate-converted"
            );
            fallback.config()
        }
    };

    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = device_rate,
        channels,
        "opening output device"
    );

    let mut mixer = SegmentMixer::new(device_rate);
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                for cmd in cmd_rx.try_iter() {
                    match cmd {
                        MixerCommand::Schedule(seg) => mixer.add(seg),
                        MixerCommand::Stop(id) => {
                            mixer.stop(id);
                        }
                        MixerCommand::StopAll => mixer.stop_all(),
                    }
                }

                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                // A full ended queue is harmless: the scheduler also reaps by clock.
                mixer.render(&mut mono, |id| {
                    let _ = ended_tx.try_send(id);
                });
                for (frame, &s) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.iter_mut().for_each(|out| *out = s);
                }
                clock.store(mixer.clock(), Ordering::Release);
            },
            |err| error!("audio playback error: {err}"),
            None,
        )
        .map_err(|e| VoxlinkError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoxlinkError::AudioStream(e.to_string()))?;

    Ok((stream, device_rate))
}
