/// Failures surfaced by a playback engine.
///
/// `Clone` so that a repeated `initialize` can hand back the first outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Failed to configure audio output: {0}")]
    OutputConfig(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Failed to read audio source: {0}")]
    Decode(String),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("No audio loaded")]
    NoAudioLoaded,

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Engine has been destroyed")]
    Destroyed,
}

/// Failures of a single spectrogram request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid spectrogram parameters: {0}")]
    InvalidParams(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Worker {worker} faulted while processing the task")]
    WorkerFault { worker: usize },

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Chunk {index} has height {found}, expected {expected}")]
    HeightMismatch {
        expected: u32,
        found: u32,
        index: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    Open(#[from] std::io::Error),

    #[error("Failed to probe format: {0}")]
    Probe(String),

    #[error("No default track found")]
    NoTrack,

    #[error("No sample rate in track")]
    NoSampleRate,

    #[error("Decode error: {0}")]
    Codec(String),
}

impl From<DecodeError> for EngineError {
    fn from(e: DecodeError) -> Self {
        EngineError::Decode(e.to_string())
    }
}
