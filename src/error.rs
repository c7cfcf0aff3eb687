//! Error types for the matting pipeline

use thiserror::Error;

/// Result type alias for the matting library
pub type Result<T> = std::result::Result<T, MatteError>;

/// Model initialization failures. Fatal: the pipeline stays uninitialized
/// until the operator re-triggers loading.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model payload too small ({size} bytes, expected at least {minimum}); not an ONNX file? starts with: {head:?}")]
    TooSmall {
        size: usize,
        minimum: usize,
        head: String,
    },

    #[error("runtime rejected model: {0}")]
    Corrupt(String),

    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer or tensor shape mismatch. A contract violation, not a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    TensorShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Per-frame execution failure. Recovered by discarding the frame's result.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference failed: {0}")]
    Runtime(String),

    #[error("model output '{0}' missing")]
    MissingOutput(&'static str),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl InferenceError {
    /// Shape or size mismatches will not go away by retrying the next frame.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

/// Allocation of a large frame buffer failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to allocate {bytes} bytes for frame buffer")]
pub struct ResourceExhaustion {
    pub bytes: usize,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for library operations
#[derive(Error, Debug)]
pub enum MatteError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Resource(#[from] ResourceExhaustion),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start inference worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("inference worker is gone")]
    WorkerDisconnected,
}

impl InferenceError {
    pub fn runtime<E: std::fmt::Display>(err: E) -> Self {
        Self::Runtime(err.to_string())
    }
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }
}
