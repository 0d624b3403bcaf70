//! The capability object
//!
//! Every execution context builds one `System` and merges its entries into
//! the program's foreign table. Generated code reaches math intrinsics,
//! atomics, threads and the console only through these names.

use crate::atomics::Atomics;
use crate::console::Console;
use crate::context::{spawn_worker, WorkerMessage};
use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::Memory;
use crate::value::{arg, format_number, Value};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use wasmjs_codegen::GeneratedProgram;

/// Names owned by the runtime. A foreign import may not reuse them.
pub const RESERVED: [&str; 14] = [
    "powF32",
    "sinF32",
    "cosF32",
    "powF64",
    "sinF64",
    "cosF64",
    "threadingSupported",
    "atomicLoadI32",
    "atomicStoreI32",
    "atomicCompareExchangeI32",
    "threadCreate",
    "consoleI32",
    "consoleString",
    "isMainThread",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Per-context runtime capabilities
pub struct System {
    memory: Memory,
    atomics: Arc<dyn Atomics>,
    console: Arc<dyn Console>,
    /// Program to start workers from; only the main context has one
    worker_param: Option<Arc<GeneratedProgram>>,
    main_thread: Rc<Cell<bool>>,
}

impl System {
    pub fn new(
        memory: Memory,
        atomics: Arc<dyn Atomics>,
        console: Arc<dyn Console>,
        worker_param: Option<Arc<GeneratedProgram>>,
    ) -> Self {
        Self {
            memory,
            atomics,
            console,
            worker_param,
            main_thread: Rc::new(Cell::new(false)),
        }
    }

    pub fn threading_supported(&self) -> bool {
        self.atomics.is_native()
    }

    /// True when `threadCreate` is offered to the program
    pub fn can_create_threads(&self) -> bool {
        self.threading_supported() && self.worker_param.is_some()
    }

    /// Marks this context as the main thread. Called once after the main
    /// instance is created; workers never call it.
    pub fn init_main_thread(&self) {
        self.main_thread.set(true);
    }

    pub fn is_main_thread(&self) -> bool {
        self.main_thread.get()
    }

    /// The capability entries, in `RESERVED` order
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries = vec![
            math2("powF32", |b, e| b.powf(e) as f32 as f64),
            math1("sinF32", |x| x.sin() as f32 as f64),
            math1("cosF32", |x| x.cos() as f32 as f64),
            math2("powF64", f64::powf),
            math1("sinF64", f64::sin),
            math1("cosF64", f64::cos),
        ];

        let supported = self.threading_supported();
        entries.push(entry("threadingSupported", move |_| Ok(flag(supported))));

        let (memory, atomics) = (self.memory.clone(), Arc::clone(&self.atomics));
        entries.push(entry("atomicLoadI32", move |args| {
            let value = atomics.load(&memory, word_index(&arg(args, 0)))?;
            Ok(Value::Number(value as f64))
        }));

        let (memory, atomics) = (self.memory.clone(), Arc::clone(&self.atomics));
        entries.push(entry("atomicStoreI32", move |args| {
            atomics.store(&memory, word_index(&arg(args, 0)), arg(args, 1).to_int32())?;
            Ok(Value::Undefined)
        }));

        let (memory, atomics) = (self.memory.clone(), Arc::clone(&self.atomics));
        entries.push(entry("atomicCompareExchangeI32", move |args| {
            let previous = atomics.compare_exchange(
                &memory,
                word_index(&arg(args, 0)),
                arg(args, 1).to_int32(),
                arg(args, 2).to_int32(),
            )?;
            Ok(Value::Number(previous as f64))
        }));

        if let (true, Some(program)) = (supported, &self.worker_param) {
            let program = Arc::clone(program);
            let memory = self.memory.clone();
            let console = Arc::clone(&self.console);
            entries.push(entry("threadCreate", move |args| {
                let message = WorkerMessage {
                    memory: memory.clone(),
                    entry: arg(args, 0).to_number(),
                    context: arg(args, 1).to_number(),
                };
                spawn_worker(Arc::clone(&program), message, Arc::clone(&console))?;
                Ok(Value::Undefined)
            }));
        }

        let console = Arc::clone(&self.console);
        entries.push(entry("consoleI32", move |args| {
            console.log(&format_number(arg(args, 0).to_number()));
            Ok(Value::Undefined)
        }));

        let (memory, console) = (self.memory.clone(), Arc::clone(&self.console));
        entries.push(entry("consoleString", move |args| {
            let ptr = integer_arg(&arg(args, 0))?;
            let size = integer_arg(&arg(args, 1))?;
            let bytes = memory.read_range(ptr, size)?;
            // One character per byte; multi-byte sequences are not decoded.
            let line: String = bytes.iter().map(|&b| b as char).collect();
            console.log(&line);
            Ok(Value::Undefined)
        }));

        let main_thread = Rc::clone(&self.main_thread);
        entries.push(entry("isMainThread", move |_| Ok(flag(main_thread.get()))));

        entries
    }
}

fn entry(
    name: &'static str,
    func: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static,
) -> (String, Value) {
    (name.to_string(), Value::native(name, func))
}

fn math1(name: &'static str, f: fn(f64) -> f64) -> (String, Value) {
    entry(name, move |args| Ok(Value::Number(f(arg(args, 0).to_number()))))
}

fn math2(name: &'static str, f: fn(f64, f64) -> f64) -> (String, Value) {
    entry(name, move |args| {
        Ok(Value::Number(f(arg(args, 0).to_number(), arg(args, 1).to_number())))
    })
}

fn flag(value: bool) -> Value {
    Value::Number(if value { 1.0 } else { 0.0 })
}

/// Byte address to 32-bit word index (`addr >> 2`)
fn word_index(addr: &Value) -> usize {
    (addr.to_int32() >> 2) as u32 as usize
}

fn integer_arg(value: &Value) -> RuntimeResult<i64> {
    let n = value.to_number();
    if n.is_finite() {
        Ok(n.trunc() as i64)
    } else {
        Err(RuntimeError::Type(format!("expected an integer, got {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomics::{self, NativeAtomics};
    use crate::console::CapturedConsole;
    use crate::value::Object;
    use wasmjs_ir::MemType;

    fn system(shared: bool, console: Arc<CapturedConsole>) -> (System, Object) {
        let memory = Memory::new(64).unwrap();
        let system = System::new(memory, atomics::select(shared), console, None);
        let object = Object::from_entries(system.entries());
        (system, object)
    }

    fn call(object: &Object, name: &str, args: &[f64]) -> RuntimeResult<Value> {
        let args: Vec<Value> = args.iter().map(|&n| Value::Number(n)).collect();
        match object.get(name) {
            Some(Value::Native(native)) => (native.func)(args.as_slice()),
            _ => panic!("missing capability {}", name),
        }
    }

    #[test]
    fn test_capability_names() {
        let (_, object) = system(false, Arc::new(CapturedConsole::new()));
        let keys = object.keys();
        assert_eq!(keys.len(), RESERVED.len() - 1);
        assert!(!object.contains("threadCreate"));
        assert!(keys.iter().all(|k| is_reserved(k)));
    }

    #[test]
    fn test_thread_create_needs_a_worker_param() {
        let (system, object) = system(true, Arc::new(CapturedConsole::new()));
        assert!(system.threading_supported());
        assert!(!system.can_create_threads());
        assert!(!object.contains("threadCreate"));
    }

    #[test]
    fn test_f32_math_is_rounded() {
        let (_, object) = system(false, Arc::new(CapturedConsole::new()));
        let sin32 = call(&object, "sinF32", &[1.0]).unwrap().to_number();
        assert_eq!(sin32, 1.0f64.sin() as f32 as f64);
        let pow64 = call(&object, "powF64", &[2.0, 0.5]).unwrap().to_number();
        assert_eq!(pow64, 2.0f64.sqrt());
    }

    #[test]
    fn test_atomics_use_byte_addresses() {
        let memory = Memory::new(16).unwrap();
        let console = Arc::new(CapturedConsole::new());
        let system = System::new(memory.clone(), Arc::new(NativeAtomics), console, None);
        let object = Object::from_entries(system.entries());

        call(&object, "atomicStoreI32", &[8.0, 77.0]).unwrap();
        assert_eq!(memory.get(MemType::I32, 2), Some(77.0));

        let seen = call(&object, "atomicCompareExchangeI32", &[8.0, 77.0, 5.0]).unwrap();
        assert_eq!(seen.to_number(), 77.0);
        assert_eq!(call(&object, "atomicLoadI32", &[8.0]).unwrap().to_number(), 5.0);
    }

    #[test]
    fn test_console_output() {
        let console = Arc::new(CapturedConsole::new());
        let memory = Memory::new(16).unwrap();
        memory.write_bytes(4, b"hi!").unwrap();
        let system = System::new(memory, atomics::select(false), console.clone(), None);
        let object = Object::from_entries(system.entries());

        call(&object, "consoleI32", &[-3.0]).unwrap();
        call(&object, "consoleString", &[4.0, 3.0]).unwrap();
        assert_eq!(console.lines(), vec!["-3", "hi!"]);

        let err = call(&object, "consoleString", &[12.0, 8.0]).unwrap_err();
        assert_eq!(err.to_string(), "Range [12, 20) is out of bounds. [0, 16)");
    }

    #[test]
    fn test_main_thread_flag() {
        let (system, object) = system(false, Arc::new(CapturedConsole::new()));
        assert_eq!(call(&object, "isMainThread", &[]).unwrap().to_number(), 0.0);
        system.init_main_thread();
        assert_eq!(call(&object, "isMainThread", &[]).unwrap().to_number(), 1.0);
    }
}
