use thiserror::Error;

/// Faults raised inside the fingerprint pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid pipeline parameters: {0}")]
    InvalidParams(String),

    #[error("batch of {got} frames exceeds the {max}-frame window")]
    OversizedBatch { got: usize, max: usize },

    #[error("expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("fingerprint lock poisoned")]
    LockPoisoned,
}

/// Faults reported by an audio source at the collaborator boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no input device available")]
    NoDevice,

    #[error("audio source did not become active")]
    Inactive,

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),

    #[error(transparent)]
    Play(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Pause(#[from] cpal::PauseStreamError),

    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
}
