//! wasmjs-ir - Typed intermediate representation of wasmjs modules
//!
//! The IR is a typed tree produced by a frontend and consumed by every
//! later stage:
//!
//! ```text
//! frontend (text or JSON)
//!         ↓
//!   IR Module
//!   ├── Functions (params, locals, body)
//!   ├── Externs (imported functions)
//!   └── Config (memory size, shared memory flag)
//!         ↓
//!    [Desugar]      narrow integers, while loops, `!=` and
//!         ↓         non-i32 logical not are rewritten away
//!   machine-typed IR
//!         ↓
//!    [Codegen]      (wasmjs-codegen)
//! ```
//!
//! Every expression carries its evaluated type (`etype`). Before desugaring
//! it may be any of `i8 i16 i32 i64 f32 f64`; afterwards only the machine
//! types `i32 i64 f32 f64` remain.

pub mod desugar;
pub mod error;
pub mod instruction;
pub mod module;
pub mod traverse;
pub mod types;
pub mod validate;

pub use error::{IrError, IrResult};
pub use instruction::{BinaryOp, Expr, ExprKind, PrefixOp, Stmt};
pub use module::{Config, Extern, Func, FuncId, ExternId, FuncType, Local, LocalId, MemoryConfig, Module};
pub use types::{MemType, Type};
