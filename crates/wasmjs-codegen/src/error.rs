//! Code generation errors

use thiserror::Error;
use wasmjs_ir::{ExternId, FuncId, IrError, LocalId, Type};

/// Result alias for code generation
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Errors raised while translating a module.
///
/// None of these occur on a correctly desugared module; each one means an
/// earlier stage let something through, so no partial output is produced.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A construct with no translation, e.g. a `while` left by a frontend
    /// that skipped desugaring or an `i64` value
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A coercion target outside `i32`, `f32` and `f64`
    #[error("cannot coerce to `{0}`")]
    UnsupportedCoercion(Type),

    #[error("call to unknown function {0}")]
    UnknownFunction(FuncId),

    #[error("call to unknown extern {0}")]
    UnknownExtern(ExternId),

    #[error("unknown local {local} in `{func}`")]
    UnknownLocal { func: String, local: LocalId },

    /// Desugaring failed before generation started
    #[error(transparent)]
    Ir(#[from] IrError),
}
