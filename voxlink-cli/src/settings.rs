//! Persistent CLI settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use voxlink_core::{BackoffPolicy, EngineConfig, HangoverPolicy, PlaybackConfig};

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:7700";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Voice agent endpoint for `live`.
    pub server_addr: String,
    pub preferred_output_device: Option<String>,
    /// Where `record` writes when no path is given.
    pub recordings_dir: Option<PathBuf>,
    pub engine: EngineConfig,
    pub playback: PlaybackConfig,
    pub backoff: BackoffPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.into(),
            preferred_output_device: None,
            recordings_dir: None,
            engine: EngineConfig::default(),
            playback: PlaybackConfig::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.server_addr = normalize_server_addr(&self.server_addr);
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.take());

        let engine = &mut self.engine;
        engine.preferred_input_device = normalize_device_name(engine.preferred_input_device.take());
        engine.target_sample_rate = engine.target_sample_rate.clamp(8_000, 48_000);
        engine.frame_size = engine.frame_size.clamp(32, 4_096);
        engine.vad_threshold = engine.vad_threshold.clamp(0.0, 1.0);
        engine.neural_fallback_threshold = engine.neural_fallback_threshold.clamp(0.0, 1.0);
        engine.neural_speech_threshold = engine.neural_speech_threshold.clamp(0.05, 0.95);
        engine.chunk_size = engine.chunk_size.filter(|&n| n > 0);
        engine.hangover = normalize_hangover(engine.hangover);

        let playback = &mut self.playback;
        playback.sample_rate = playback.sample_rate.clamp(8_000, 96_000);
        playback.initial_buffer_ms = playback.initial_buffer_ms.min(1_000);
        playback.max_latency_ms = playback.max_latency_ms.clamp(playback.initial_buffer_ms, 5_000);
        playback.catch_up_rate = if playback.catch_up_rate.is_finite() {
            playback.catch_up_rate.clamp(1.0, 2.0)
        } else {
            1.05
        };

        let backoff = &mut self.backoff;
        backoff.first_retry_ms = backoff.first_retry_ms.max(1);
        backoff.base_ms = backoff.base_ms.max(1);
        backoff.max_ms = backoff.max_ms.max(backoff.base_ms);
        backoff.stable_after_ms = backoff.stable_after_ms.min(60_000);
    }
}

pub fn normalize_server_addr(raw: &str) -> String {
    let addr = raw.trim();
    let addr = addr.strip_prefix("tcp://").unwrap_or(addr);
    if addr.is_empty() {
        DEFAULT_SERVER_ADDR.into()
    } else {
        addr.into()
    }
}

fn normalize_device_name(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

fn normalize_hangover(policy: HangoverPolicy) -> HangoverPolicy {
    const MAX_FRAMES: u32 = 10_000;
    match policy {
        HangoverPolicy::Fixed { frames } => HangoverPolicy::Fixed {
            frames: frames.min(MAX_FRAMES),
        },
        HangoverPolicy::Adaptive {
            short_frames,
            long_frames,
            long_after_frames,
        } => {
            let short_frames = short_frames.min(MAX_FRAMES);
            HangoverPolicy::Adaptive {
                short_frames,
                long_frames: long_frames.clamp(short_frames, MAX_FRAMES),
                long_after_frames: long_after_frames.min(MAX_FRAMES),
            }
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxlink")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxlink")
            .join("settings.json")
    }
}

/// Load and normalise settings; a missing or unreadable file yields defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring corrupt settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
