//! Subcommand handlers.
//!
//! Events go to stdout as JSON lines; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use voxlink_core::{
    audio::{device, wav},
    transport::codec::build_encoder,
    vad::VadKind,
    AudioDataPayload, CaptureEngine, CaptureSource, ConnectionState, EngineConfig, LiveSession,
    LoopbackTransport, PlaybackScheduler, Reconnector, SessionParts, TcpTransport, Transport,
};

use crate::settings::{save_settings, AppSettings};
use crate::{CaptureArgs, LiveArgs, RecordArgs, ReplayArgs};

/// Settings merged with per-invocation flags.
pub fn engine_config(settings: &AppSettings, args: &CaptureArgs) -> EngineConfig {
    let mut config = settings.engine.clone();
    if let Some(device) = args.device.as_ref() {
        config.preferred_input_device = Some(device.clone());
    }
    if let Some(t) = args.vad_threshold {
        config.vad_threshold = t.clamp(0.0, 1.0);
    }
    if let Some(n) = args.chunk_size.filter(|&n| n > 0) {
        config.chunk_size = Some(n);
    }
    if args.neural_vad {
        config.vad = VadKind::Silero;
    }
    config
}

pub fn devices(json: bool) -> anyhow::Result<()> {
    let inputs = device::list_input_devices();
    let outputs = device::list_output_devices();

    if json {
        #[derive(Serialize)]
        struct Listing {
            inputs: Vec<device::DeviceInfo>,
            outputs: Vec<device::DeviceInfo>,
        }
        println!("{}", serde_json::to_string_pretty(&Listing { inputs, outputs })?);
        return Ok(());
    }

    for (title, list) in [("Input devices", inputs), ("Output devices", outputs)] {
        println!("{title}:");
        if list.is_empty() {
            println!("  (none)");
        }
        for d in list {
            let rate = d
                .default_sample_rate
                .map(|r| format!("{r} Hz"))
                .unwrap_or_else(|| "? Hz".into());
            let mut flags = Vec::new();
            if d.is_default {
                flags.push("default");
            }
            if d.is_loopback_like {
                flags.push("loopback");
            }
            println!("  {:<48} {:>9}  {}", d.name, rate, flags.join(","));
        }
    }
    Ok(())
}

pub async fn record(settings: &AppSettings, args: RecordArgs) -> anyhow::Result<()> {
    let config = engine_config(settings, &args.capture);
    let rate = config.target_sample_rate;
    let out = args
        .out
        .unwrap_or_else(|| default_recording_path(settings.recordings_dir.as_deref()));

    let engine = Arc::new(CaptureEngine::new(config));
    let printer = print_speaking_events(&engine);
    let rx = engine.start().context("failed to start capture")?;
    let collector = collect_payloads(rx);
    info!(path = %out.display(), "recording; press Ctrl-C to stop");

    wait_for_stop(args.seconds).await;
    let stopper = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopper.stop()).await??;

    let payloads = collector.await?;
    printer.abort();
    finish_recording(&out, &payloads, rate)?;
    print_diagnostics(&engine)?;
    Ok(())
}

pub async fn replay(settings: &AppSettings, args: ReplayArgs) -> anyhow::Result<()> {
    let config = engine_config(settings, &args.capture);
    let rate = config.target_sample_rate;
    let (samples, source_rate) = wav::read_wav_mono(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    info!(
        path = %args.input.display(),
        samples = samples.len(),
        sample_rate = source_rate,
        "replaying"
    );

    let engine = Arc::new(CaptureEngine::new(config));
    let printer = print_speaking_events(&engine);
    let rx = engine.start_from_samples(samples, source_rate, args.realtime)?;
    let payloads = collect_payloads(rx).await?;
    printer.abort();

    if let Some(out) = args.out.as_ref() {
        finish_recording(out, &payloads, rate)?;
    }
    print_diagnostics(&engine)?;
    Ok(())
}

pub async fn live(settings: &AppSettings, args: LiveArgs) -> anyhow::Result<()> {
    let config = engine_config(settings, &args.capture);
    let mut playback = settings.playback;

    let transport: Arc<dyn Transport> = if args.loopback {
        // Echoed audio comes back at the capture rate.
        playback.sample_rate = config.target_sample_rate;
        info!("using loopback transport");
        Arc::new(LoopbackTransport::new(true).with_sent_log_cap(0))
    } else {
        let addr = args
            .server
            .map(|s| crate::settings::normalize_server_addr(&s))
            .unwrap_or_else(|| settings.server_addr.clone());
        info!(server = %addr, "using tcp transport");
        Arc::new(TcpTransport::new(addr))
    };

    let output_device = args
        .output_device
        .as_deref()
        .or(settings.preferred_output_device.as_deref());
    let output = voxlink_core::CpalOutput::open(output_device, playback.sample_rate)
        .context("failed to open output device")?;

    let reconnector = Arc::new(Reconnector::new(settings.backoff).with_observer(Arc::new(
        |state: ConnectionState, attempt: u32| info!(?state, attempt, "connection state"),
    )));
    let encoder = build_encoder(&config.encoder, None);
    let source = CaptureSource::Device {
        preferred: config.preferred_input_device.clone(),
    };
    let engine = Arc::new(CaptureEngine::new(config));

    let session = LiveSession::start(SessionParts {
        engine,
        source,
        transport,
        scheduler: PlaybackScheduler::new(output, playback),
        reconnector,
        encoder,
    })
    .await
    .context("failed to start live session")?;

    let mut states = session.subscribe_state();
    let printer = tokio::spawn(async move {
        while let Ok(ev) = states.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
        }
    });

    info!("live; press Ctrl-C to stop");
    wait_for_stop(None).await;
    session.stop().await?;
    printer.abort();
    Ok(())
}

pub fn show_settings(path: &Path, settings: AppSettings, reset: bool) -> anyhow::Result<()> {
    let settings = if reset {
        let defaults = AppSettings::default();
        save_settings(path, &defaults)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "settings reset to defaults");
        defaults
    } else {
        settings
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn default_recording_path(dir: Option<&Path>) -> PathBuf {
    let name = format!("voxlink-{}.wav", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    dir.map(|d| d.join(&name)).unwrap_or_else(|| PathBuf::from(name))
}

fn collect_payloads(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<AudioDataPayload>,
) -> JoinHandle<Vec<AudioDataPayload>> {
    tokio::spawn(async move {
        let mut payloads = Vec::new();
        while let Some(p) = rx.recv().await {
            payloads.push(p);
        }
        payloads
    })
}

fn print_speaking_events(engine: &CaptureEngine) -> JoinHandle<()> {
    let mut rx = engine.subscribe_speaking();
    tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
        }
    })
}

async fn wait_for_stop(seconds: Option<f64>) {
    match seconds.filter(|s| s.is_finite() && *s > 0.0) {
        Some(s) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(s)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C ({e}); stopping now");
            }
        }
    }
}

fn finish_recording(out: &Path, payloads: &[AudioDataPayload], rate: u32) -> anyhow::Result<()> {
    let chunks: Vec<&[i16]> = payloads.iter().map(|p| p.samples.as_slice()).collect();
    wav::write_wav(out, &chunks, rate)
        .with_context(|| format!("failed to write {}", out.display()))?;
    let samples: usize = payloads.iter().map(AudioDataPayload::len).sum();
    info!(
        path = %out.display(),
        payloads = payloads.len(),
        seconds = samples as f64 / f64::from(rate),
        "wrote recording"
    );
    Ok(())
}

fn print_diagnostics(engine: &CaptureEngine) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&engine.diagnostics())?);
    Ok(())
}
