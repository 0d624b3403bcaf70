//! wasmjs-codegen - Code generation for wasmjs modules
//!
//! Lowers a desugared IR module to a JavaScript module factory:
//!
//! ```text
//!   IR Module (desugared)
//!         ↓
//!    [JsBackend]     coercions, memory views, imports, exports
//!         ↓
//!   js::Expr          function(foreign) { ... }
//!         ↓
//!   GeneratedProgram  factory + config + export names
//!         ↓
//!   source text / wasmjs-runtime
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use wasmjs_codegen::{CodeGen, JsBackend};
//!
//! let mut module: wasmjs_ir::Module = /* ... */;
//! wasmjs_ir::desugar::process(&mut module)?;
//! let program = JsBackend::new().generate(&module)?;
//! println!("{}", program.source());
//! ```

pub mod error;
pub mod js;
pub mod js_backend;
pub mod views;

pub use error::{CodegenError, CodegenResult};
pub use js_backend::{coerce, JsBackend, COPY_OUT};
pub use views::{view_by_constructor, view_for, View, VIEWS};

use wasmjs_ir::{Config, Module};

/// Trait for code generation backends
pub trait CodeGen {
    /// Backend output type
    type Output;

    /// Generates code from a desugared IR module
    fn generate(&self, module: &Module) -> Self::Output;
}

/// Output formatting options
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Spaces per indentation level
    pub indent: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

/// A generated module factory.
///
/// Evaluating `factory` with a foreign-function table yields an instance
/// exposing every name in `exports` plus `_copyOut`. The configuration the
/// module was compiled with travels along so the runtime can size memory
/// and pick its atomics.
#[derive(Debug, Clone)]
pub struct GeneratedProgram {
    pub factory: js::Expr,
    pub config: Config,
    /// Exported function names, in declaration order
    pub exports: Vec<String>,
}

impl GeneratedProgram {
    /// Renders the factory as source text
    pub fn source(&self) -> String {
        self.source_with(&CodegenOptions::default())
    }

    pub fn source_with(&self, options: &CodegenOptions) -> String {
        let mut printer = js::Printer::new(options.indent);
        printer.expr(&self.factory, 0);
        printer.finish()
    }
}

/// Desugars `module` and generates its program
pub fn compile(mut module: Module) -> CodegenResult<GeneratedProgram> {
    wasmjs_ir::desugar::process(&mut module)?;
    JsBackend::new().generate(&module)
}
