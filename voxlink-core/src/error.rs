use thiserror::Error;

/// All errors produced by voxlink-core.
#[derive(Debug, Error)]
pub enum VoxlinkError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("VAD model load error: {0}")]
    ModelLoad(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("transport connect failed: {0}")]
    TransportConnect(String),

    #[error("transport is not connected")]
    TransportClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("playback scheduling error: {0}")]
    PlaybackScheduling(String),

    #[error("WAV error: {0}")]
    Wav(String),

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxlinkError {
    /// Device/permission failures abort `start` and are reported to the caller.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            VoxlinkError::AudioDevice(_)
                | VoxlinkError::AudioStream(_)
                | VoxlinkError::NoDefaultInputDevice
                | VoxlinkError::NoDefaultOutputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, VoxlinkError>;
