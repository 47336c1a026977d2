use thiserror::Error;

/// Engine-level error codes surfaced to the host.
///
/// Every non-success operation result maps onto exactly one of these
/// variants. None of them abort the process; the host translates them into
/// protocol responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("key not found")]
    KeyNotFound,

    #[error("key already exists")]
    KeyExists,

    #[error("out of memory")]
    OutOfMemory,

    #[error("item not stored")]
    NotStored,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("item too large")]
    TooBig,

    #[error("not supported")]
    NotSupported,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation failed")]
    Failed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
