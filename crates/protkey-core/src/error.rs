use thiserror::Error;

pub type ProtkeyResult<T> = Result<T, ProtkeyError>;

/// Failure classes reported by the key-protection oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtectError {
    #[error("key protection service busy")]
    Busy,

    #[error("key protection service out of memory")]
    OutOfMemory,

    #[error("key blob format not recognized")]
    InvalidFormat,

    #[error("not authorized to use this key blob")]
    NotAuthorized,
}

impl ProtectError {
    /// Busy and out-of-memory are worth another attempt after a short wait.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::OutOfMemory)
    }
}

#[derive(Debug, Error)]
pub enum ProtkeyError {
    #[error("invalid key length: {len} bytes (allowed {min}..={max})")]
    InvalidKeyLength { len: usize, min: usize, max: usize },

    #[error("key storage allocation failed")]
    AllocationFailure,

    #[error("key type mismatch: {0}")]
    KeyTypeMismatch(String),

    #[error("hardware rejected protected key after {processed} bytes: {reason}")]
    HardwareKeyRejected { processed: usize, reason: String },

    #[error("mode unavailable: {0}")]
    ModeUnavailable(String),

    #[error("interrupted while waiting for key protection service")]
    Interrupted,

    #[error("buffer shortfall: need {expected} bytes, got {actual}")]
    IoShortfall { expected: usize, actual: usize },

    #[error("invalid data length {len} for {mode} (block size {block})")]
    InvalidDataLength {
        mode: &'static str,
        len: usize,
        block: usize,
    },

    #[error("invalid IV length: {actual} bytes (expected {expected})")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("no key set")]
    NotKeyed,

    #[error("key conversion failed: {0}")]
    KeyConversion(#[from] ProtectError),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
