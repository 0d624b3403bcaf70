//! Execution contexts and the worker bootstrap
//!
//! A program runs in one main context and any number of worker contexts.
//! Each context evaluates the generated factory on its own interpreter;
//! they share nothing but the linear memory. The main context allocates a
//! fresh buffer, workers receive the main context's buffer in their start
//! message.

use crate::atomics;
use crate::console::{Console, StdoutConsole};
use crate::error::{RuntimeError, RuntimeResult};
use crate::host::Interpreter;
use crate::memory::Memory;
use crate::system::{is_reserved, System};
use crate::value::{arg, expect_view, Object, Value};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::oneshot;
use wasmjs_codegen::{GeneratedProgram, COPY_OUT};

/// Stack size of worker threads
pub const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Which kind of context an instance lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Main,
    Worker,
}

/// User-supplied foreign functions
#[derive(Default)]
pub struct ForeignTable {
    entries: Vec<(String, Value)>,
}

impl ForeignTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a native function
    pub fn function(
        self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static,
    ) -> Self {
        let name = name.into();
        let value = Value::native(name.clone(), func);
        self.insert(name, value)
    }

    pub fn insert(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Builds the object handed to the factory: the capability entries
    /// followed by the user imports.
    pub fn merge(self, system: &System) -> RuntimeResult<Value> {
        if let Some(name) = self.names().find(|name| is_reserved(name)) {
            return Err(RuntimeError::ReservedImport(name.to_string()));
        }
        let object = Object::from_entries(system.entries());
        for (name, value) in self.entries {
            object.set(&name, value);
        }
        Ok(Value::Object(Rc::new(object)))
    }
}

/// Start message sent to a worker
pub struct WorkerMessage {
    /// The spawning context's buffer
    pub memory: Memory,
    /// Function pointer passed to `threadStart`
    pub entry: f64,
    pub context: f64,
}

/// One context's view of a program before instantiation
pub struct ExecutionContext {
    role: Role,
    program: Arc<GeneratedProgram>,
    memory: Memory,
    console: Arc<dyn Console>,
    worker_param: Option<Arc<GeneratedProgram>>,
}

impl ExecutionContext {
    /// Main context with a freshly allocated buffer
    pub fn main(
        program: Arc<GeneratedProgram>,
        console: Arc<dyn Console>,
        worker_param: Option<Arc<GeneratedProgram>>,
    ) -> RuntimeResult<Self> {
        let memory = Memory::new(program.config.memory.fixed as usize)?;
        Ok(Self {
            role: Role::Main,
            program,
            memory,
            console,
            worker_param,
        })
    }

    /// Worker context over a buffer received from another context
    pub fn worker(program: Arc<GeneratedProgram>, memory: Memory, console: Arc<dyn Console>) -> Self {
        Self {
            role: Role::Worker,
            program,
            memory,
            console,
            worker_param: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Evaluates the factory against this context's buffer and capabilities
    pub fn instantiate(self, foreign: ForeignTable) -> RuntimeResult<Instance> {
        let atomics = atomics::select(self.program.config.use_shared_memory);
        let system = Rc::new(System::new(
            self.memory.clone(),
            atomics,
            self.console,
            self.worker_param,
        ));
        let foreign = foreign.merge(&system)?;

        let interpreter = match self.role {
            Role::Main => Interpreter::new(self.memory.clone()),
            Role::Worker => Interpreter::with_stack_budget(self.memory.clone(), WORKER_STACK_SIZE / 2),
        };
        let exports = match interpreter.run_factory(&self.program.factory, foreign)? {
            Value::Object(object) => object,
            other => {
                return Err(RuntimeError::Type(format!(
                    "module factory returned {}",
                    other.type_name()
                )))
            }
        };
        exports.set(COPY_OUT, bounded_copy_out(self.memory.clone()));

        if self.role == Role::Main {
            system.init_main_thread();
        }

        Ok(Instance {
            role: self.role,
            interpreter,
            exports,
            system,
            memory: self.memory,
        })
    }
}

/// `_copyOut(src, size, dst, dstOff)` with the range checked against the
/// buffer before any byte moves. `dstOff` is a byte offset whatever the
/// element type of `dst`.
///
/// Views reachable from generated code all cover the context's own buffer,
/// so this copies within linear memory; the host reads bytes out through
/// [`Instance::copy_out`].
fn bounded_copy_out(memory: Memory) -> Value {
    Value::native(COPY_OUT, move |args| {
        let src = arg(args, 0).to_number().trunc() as i64;
        let size = arg(args, 1).to_number().trunc() as i64;
        let dst = expect_view(&arg(args, 2), "copy destination")?;
        let dst_offset = arg(args, 3).to_number().trunc() as i64;

        let bytes = memory.read_range(src, size)?;
        dst.memory.write_bytes(dst_offset, &bytes)?;
        Ok(Value::Undefined)
    })
}

/// An instantiated program
pub struct Instance {
    role: Role,
    interpreter: Interpreter,
    exports: Rc<Object>,
    system: Rc<System>,
    memory: Memory,
}

impl Instance {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_main_thread(&self) -> bool {
        self.system.is_main_thread()
    }

    /// Exported names, including `_copyOut`
    pub fn exports(&self) -> Vec<String> {
        self.exports.keys()
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.contains(name)
    }

    /// Calls export `name` with numeric arguments
    pub fn call(&self, name: &str, args: &[f64]) -> RuntimeResult<Value> {
        let args = args.iter().map(|&n| Value::Number(n)).collect();
        self.call_values(name, args)
    }

    pub fn call_values(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let function = self
            .exports
            .get(name)
            .ok_or_else(|| RuntimeError::MissingExport(name.to_string()))?;
        tracing::trace!("calling export {}", name);
        self.interpreter.call(&function, args)
    }

    /// Copies `[src, src + size)` into `dst`
    pub fn copy_out(&self, src: i64, size: i64, dst: &mut [u8]) -> RuntimeResult<()> {
        self.memory.copy_out(src, size, dst)
    }

    pub fn read_range(&self, src: i64, size: i64) -> RuntimeResult<Vec<u8>> {
        self.memory.read_range(src, size)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

/// Entry point for instantiating a generated program
#[derive(Clone)]
pub struct Factory {
    program: Arc<GeneratedProgram>,
    console: Arc<dyn Console>,
}

impl Factory {
    pub fn new(program: GeneratedProgram) -> Self {
        Self::from_arc(Arc::new(program))
    }

    pub fn from_arc(program: Arc<GeneratedProgram>) -> Self {
        Self {
            program,
            console: Arc::new(StdoutConsole),
        }
    }

    /// Routes `consoleI32`/`consoleString` output, workers included
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    pub fn program(&self) -> &Arc<GeneratedProgram> {
        &self.program
    }

    /// The bootstrap parameter workers are started from: the program
    /// itself when shared memory is on, otherwise nothing.
    pub fn worker_param(&self) -> Option<Arc<GeneratedProgram>> {
        self.program
            .config
            .use_shared_memory
            .then(|| Arc::clone(&self.program))
    }

    /// Main bootstrap: allocate memory, build the capabilities, merge the
    /// foreign table, evaluate the factory, install the bounded
    /// `_copyOut` and mark the main thread.
    pub fn instantiate(
        &self,
        foreign: ForeignTable,
        worker_param: Option<Arc<GeneratedProgram>>,
    ) -> RuntimeResult<Instance> {
        tracing::info!(
            "instantiating program: {} bytes of memory, shared={}",
            self.program.config.memory.fixed,
            self.program.config.use_shared_memory
        );
        let context = ExecutionContext::main(
            Arc::clone(&self.program),
            Arc::clone(&self.console),
            worker_param,
        )?;
        context.instantiate(foreign)
    }
}

/// Starts a worker thread and hands it `message`. The worker instantiates
/// `program` over the received buffer with an empty foreign table, runs
/// `threadStart(entry, context)` if exported and exits. It is never joined.
pub fn spawn_worker(
    program: Arc<GeneratedProgram>,
    message: WorkerMessage,
    console: Arc<dyn Console>,
) -> RuntimeResult<()> {
    let (tx, rx) = oneshot::channel::<WorkerMessage>();

    std::thread::Builder::new()
        .name("wasmjs-worker".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let message = match rx.blocking_recv() {
                Ok(message) => message,
                Err(_) => {
                    tracing::warn!("worker dropped before receiving its start message");
                    return;
                }
            };
            if let Err(err) = run_worker(program, message, console) {
                tracing::warn!("worker failed: {}", err);
            }
        })
        .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

    tx.send(message)
        .map_err(|_| RuntimeError::Spawn("worker exited before its start message".to_string()))?;
    tracing::debug!("worker spawned");
    Ok(())
}

fn run_worker(
    program: Arc<GeneratedProgram>,
    message: WorkerMessage,
    console: Arc<dyn Console>,
) -> RuntimeResult<()> {
    let instance = ExecutionContext::worker(program, message.memory, console).instantiate(ForeignTable::new())?;
    if instance.has_export("threadStart") {
        instance.call_values(
            "threadStart",
            vec![Value::Number(message.entry), Value::Number(message.context)],
        )?;
    }
    Ok(())
}
