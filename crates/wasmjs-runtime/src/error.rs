//! wasmjs runtime errors

use thiserror::Error;

/// Standard runtime result type
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime errors
///
/// Bounds violations are ordinary failures returned to the caller; the
/// instance stays usable afterwards.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A memory range request outside the buffer
    #[error("Range [{start}, {end}) is out of bounds. [0, {len})")]
    OutOfBounds { start: i64, end: i64, len: usize },

    /// Invalid length or index outside of range checks above
    #[error("RangeError: {0}")]
    Range(String),

    /// Operation applied to a value of the wrong kind
    #[error("TypeError: {0}")]
    Type(String),

    /// Unknown variable name
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    /// A foreign import shadowing a runtime capability
    #[error("`{0}` is reserved by the runtime and cannot be imported")]
    ReservedImport(String),

    #[error("instance has no export `{0}`")]
    MissingExport(String),

    /// Worker thread could not be started
    #[error("failed to start worker: {0}")]
    Spawn(String),
}
