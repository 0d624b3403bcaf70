//! IR errors

use thiserror::Error;

/// Result alias for IR operations
pub type IrResult<T> = Result<T, IrError>;

/// Errors raised while loading or rewriting a module.
///
/// All of these are fatal for the stage that raised them: a module that
/// produced one is not handed to later stages.
#[derive(Debug, Error)]
pub enum IrError {
    /// A type token that is not one of the known value types
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// A memory access type token that has no view
    #[error("unknown memory type `{0}`")]
    UnknownMemType(String),

    /// A node whose shape cannot be rewritten
    #[error("malformed IR: {0}")]
    Malformed(String),

    /// The module failed structural validation
    #[error("invalid module ({0} error(s))")]
    Invalid(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
