//! wasmjs-runtime - runtime for generated wasmjs programs
//!
//! Provides:
//! - **Memory**: the fixed-size linear buffer shared by every context
//! - **Atomics**: native 32-bit atomics, or a single-thread polyfill when
//!   shared memory is off
//! - **System**: the capability object merged into the foreign table
//! - **Contexts**: main and worker bootstrap, with workers on OS threads
//! - **Host**: an evaluator for the generated factory
//!
//! ```text
//!   Factory::instantiate ──► main context ── threadCreate ──► worker context
//!            │                    │                               │
//!            └── Memory::new ─────┴──────── same buffer ──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use wasmjs_runtime::{Factory, ForeignTable};
//!
//! let program = wasmjs_codegen::compile(module)?;
//! let factory = Factory::new(program);
//! let instance = factory.instantiate(ForeignTable::new(), factory.worker_param())?;
//! println!("JS result: {}", instance.call("main", &[])?);
//! ```

pub mod atomics;
pub mod console;
pub mod context;
pub mod error;
pub mod host;
pub mod memory;
pub mod system;
pub mod value;

pub use atomics::{Atomics, NativeAtomics, PolyfillAtomics};
pub use console::{CapturedConsole, Console, StdoutConsole};
pub use context::{spawn_worker, ExecutionContext, Factory, ForeignTable, Instance, Role, WorkerMessage};
pub use error::{RuntimeError, RuntimeResult};
pub use memory::Memory;
pub use system::{System, RESERVED};
pub use value::Value;

/// Installs a stderr subscriber logging at DEBUG when `verbose`, WARN
/// otherwise. Does nothing if a subscriber is already set.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}
