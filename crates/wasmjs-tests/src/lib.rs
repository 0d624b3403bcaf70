//! Integration tests for the wasmjs compiler and runtime
//!
//! This crate drives the complete pipeline end to end:
//! Module → Validate → Desugar → Codegen → Runtime

use std::sync::Arc;
use wasmjs_codegen::{CodeGen, GeneratedProgram, JsBackend};
use wasmjs_error::Diagnostics;
use wasmjs_ir::validate::check_module;
use wasmjs_ir::Module;
use wasmjs_runtime::{CapturedConsole, Factory, ForeignTable, Instance};

/// Result of compiling a module
#[derive(Debug)]
pub struct CompileResult {
    /// Whether compilation succeeded without errors
    pub success: bool,
    /// Any diagnostics (errors/warnings) produced
    pub diagnostics: Diagnostics,
    /// Generated program (if successful)
    pub program: Option<GeneratedProgram>,
    /// Desugared IR (for debugging)
    pub ir_debug: Option<String>,
}

/// Compiles a module through the full pipeline
pub fn compile(mut module: Module) -> CompileResult {
    // Phase 1: Validation
    let diagnostics = check_module(&module);
    if diagnostics.has_errors() {
        return CompileResult {
            success: false,
            diagnostics,
            program: None,
            ir_debug: None,
        };
    }

    // Phase 2: Desugaring
    if let Err(e) = wasmjs_ir::desugar::process(&mut module) {
        let mut diagnostics = diagnostics;
        diagnostics.error(e.to_string());
        return CompileResult {
            success: false,
            diagnostics,
            program: None,
            ir_debug: None,
        };
    }
    let ir_debug = module.to_string();

    // Phase 3: Code generation
    let mut diagnostics = diagnostics;
    match JsBackend::new().generate(&module) {
        Ok(program) => CompileResult {
            success: true,
            diagnostics,
            program: Some(program),
            ir_debug: Some(ir_debug),
        },
        Err(e) => {
            diagnostics.error(e.to_string());
            CompileResult {
                success: false,
                diagnostics,
                program: None,
                ir_debug: Some(ir_debug),
            }
        }
    }
}

/// Compiles `module` and instantiates it on the main context, with
/// console output captured.
pub fn instantiate(module: Module, foreign: ForeignTable) -> (Instance, Arc<CapturedConsole>) {
    let program = compiled(module);
    let console = Arc::new(CapturedConsole::new());
    let factory = Factory::new(program).with_console(console.clone());
    let instance = match factory.instantiate(foreign, factory.worker_param()) {
        Ok(instance) => instance,
        Err(e) => panic!("Expected module to instantiate, but got: {}", e),
    };
    (instance, console)
}

/// Compiles, instantiates and calls `entry`, returning the numeric result
pub fn run(module: Module, entry: &str, args: &[f64]) -> f64 {
    let (instance, _) = instantiate(module, ForeignTable::new());
    match instance.call(entry, args) {
        Ok(value) => value.to_number(),
        Err(e) => panic!("Expected `{}` to run, but got: {}", entry, e),
    }
}

/// Asserts that a module compiles and returns its program
pub fn compiled(module: Module) -> GeneratedProgram {
    let result = compile(module);
    match result.program {
        Some(program) if result.success => program,
        _ => panic!(
            "Expected module to compile, but got errors:\n{}",
            result.diagnostics.render()
        ),
    }
}

/// Asserts that a module fails to compile
pub fn assert_compile_fails(module: Module) {
    let result = compile(module);
    if result.success {
        panic!("Expected module to fail compilation, but it succeeded");
    }
}

/// Asserts that a module compiles and the generated source contains `expected`
pub fn assert_js_contains(module: Module, expected: &str) {
    let source = compiled(module).source();
    if !source.contains(expected) {
        panic!(
            "Expected JS output to contain '{}', but it didn't.\n\nGenerated code:\n{}",
            expected, source
        );
    }
}

/// Asserts that a module compiles and the desugared IR contains `expected`
pub fn assert_ir_contains(module: Module, expected: &str) {
    let result = compile(module);
    let ir_debug = match result.ir_debug {
        Some(ir) if result.success => ir,
        _ => panic!(
            "Expected module to compile, but got errors:\n{}",
            result.diagnostics.render()
        ),
    };
    if !ir_debug.contains(expected) {
        panic!(
            "Expected IR to contain '{}', but it didn't.\n\nDesugared IR:\n{}",
            expected, ir_debug
        );
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};
    use wasmjs_ir::{
        BinaryOp, Config, Expr, Extern, ExternId, Func, FuncId, FuncType, Local, LocalId, MemType, PrefixOp, Stmt,
        Type,
    };
    use wasmjs_runtime::value::arg;
    use wasmjs_runtime::{Atomics, NativeAtomics, RuntimeError, Value};

    fn module() -> Module {
        Module::new(Config::default().with_memory(1024))
    }

    fn get(id: usize, ty: Type) -> Expr {
        Expr::get_local(LocalId(id), ty)
    }

    fn i32_params(names: &[&str]) -> Vec<Local> {
        names.iter().map(|n| Local::new(*n, Type::I32)).collect()
    }

    fn add_module() -> Module {
        let mut m = module();
        let mut add = Func::new("add", i32_params(&["a", "b"]), Type::I32).exported();
        add.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Add,
            Type::I32,
            get(0, Type::I32),
            get(1, Type::I32),
        ))));
        m.add_func(add);
        m
    }

    // =========================================
    // Arithmetic
    // =========================================

    #[test]
    fn test_add() {
        assert_eq!(run(add_module(), "add", &[2.0, 3.0]), 5.0);
    }

    #[test]
    fn test_add_truncates_arguments() {
        assert_eq!(run(add_module(), "add", &[2.7, 3.2]), 5.0);
        assert_eq!(run(add_module(), "add", &[2147483647.0, 1.0]), -2147483648.0);
    }

    #[test]
    fn test_i32_multiply_uses_imul() {
        let mut m = module();
        let mut mul = Func::new("mul", i32_params(&["a", "b"]), Type::I32).exported();
        mul.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Mul,
            Type::I32,
            get(0, Type::I32),
            get(1, Type::I32),
        ))));
        m.add_func(mul);

        assert_js_contains(m.clone(), "imul(a, b)");
        assert_eq!(run(m.clone(), "mul", &[2147483647.0, 2.0]), -2.0);
        assert_eq!(run(m, "mul", &[2147483647.0, 2147483647.0]), 1.0);
    }

    #[test]
    fn test_f32_arithmetic_is_rounded() {
        let mut m = module();
        let mut f = Func::new("addf", vec![Local::new("x", Type::F32)], Type::F32).exported();
        f.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Add,
            Type::F32,
            get(0, Type::F32),
            Expr::const_f32(0.1),
        ))));
        m.add_func(f);

        let expected = (0.1f32 as f64 + 0.1f32 as f64) as f32 as f64;
        assert_eq!(run(m, "addf", &[0.1]), expected);
    }

    #[test]
    fn test_i8_arithmetic_wraps() {
        let mut m = module();
        let mut f = Func::new("inc8", i32_params(&["x"]), Type::I8).exported();
        f.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Add,
            Type::I8,
            get(0, Type::I32),
            Expr::const_i32(1),
        ))));
        m.add_func(f);

        assert_js_contains(m.clone(), "<< 24) >> 24)");
        assert_eq!(run(m.clone(), "inc8", &[199.0]), -56.0);
        assert_eq!(run(m, "inc8", &[5.0]), 6.0);
    }

    #[test]
    fn test_i16_arithmetic_wraps() {
        let mut m = module();
        let mut f = Func::new("inc16", i32_params(&["x"]), Type::I16).exported();
        f.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Add,
            Type::I16,
            get(0, Type::I32),
            Expr::const_i32(1),
        ))));
        m.add_func(f);

        assert_eq!(run(m, "inc16", &[32767.0]), -32768.0);
    }

    // =========================================
    // Comparisons and control flow
    // =========================================

    fn compare_module(op: BinaryOp) -> Module {
        let mut m = module();
        let mut f = Func::new("cmp", i32_params(&["a", "b"]), Type::I32).exported();
        f.push(Stmt::ret(Some(Expr::compare(
            op,
            Type::I32,
            get(0, Type::I32),
            get(1, Type::I32),
        ))));
        m.add_func(f);
        m
    }

    #[test]
    fn test_ne_matches_not_eq() {
        let ne = compare_module(BinaryOp::Ne);
        let eq = compare_module(BinaryOp::Eq);
        assert_ir_contains(ne.clone(), "!:i32");

        for (a, b) in [(3.0, 3.0), (3.0, 4.0), (-1.0, 1.0)] {
            let not_eq = 1.0 - run(eq.clone(), "cmp", &[a, b]);
            assert_eq!(run(ne.clone(), "cmp", &[a, b]), not_eq);
        }
    }

    #[test]
    fn test_comparisons_yield_zero_or_one() {
        assert_eq!(run(compare_module(BinaryOp::Lt), "cmp", &[1.0, 2.0]), 1.0);
        assert_eq!(run(compare_module(BinaryOp::Ge), "cmp", &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_logical_not() {
        let mut m = module();
        let mut f = Func::new("not", i32_params(&["x"]), Type::I32).exported();
        f.push(Stmt::ret(Some(Expr::not(get(0, Type::I32)))));
        m.add_func(f);

        assert_eq!(run(m.clone(), "not", &[0.0]), 1.0);
        assert_eq!(run(m, "not", &[7.0]), 0.0);
    }

    #[test]
    fn test_negation() {
        let mut m = module();
        let mut f = Func::new("neg", i32_params(&["x"]), Type::I32).exported();
        f.push(Stmt::ret(Some(Expr::prefix(PrefixOp::Neg, get(0, Type::I32), Type::I32))));
        m.add_func(f);

        assert_eq!(run(m.clone(), "neg", &[5.0]), -5.0);
        assert_eq!(run(m, "neg", &[-2147483648.0]), -2147483648.0);
    }

    /// sum(n) = 0 + 1 + ... + (n - 1), written with a `while` loop
    fn sum_module() -> Module {
        let mut m = module();
        let mut f = Func::new("sum", i32_params(&["n"]), Type::I32).exported();
        let s = f.add_local("s", Type::I32);
        let i = f.add_local("i", Type::I32);
        f.push(Stmt::while_loop(
            Expr::compare(BinaryOp::Lt, Type::I32, get(i.0, Type::I32), get(0, Type::I32)),
            vec![
                Stmt::set_local(
                    s,
                    Expr::arith(BinaryOp::Add, Type::I32, get(s.0, Type::I32), get(i.0, Type::I32)),
                ),
                Stmt::set_local(
                    i,
                    Expr::arith(BinaryOp::Add, Type::I32, get(i.0, Type::I32), Expr::const_i32(1)),
                ),
            ],
        ));
        f.push(Stmt::ret(Some(get(s.0, Type::I32))));
        m.add_func(f);
        m
    }

    #[test]
    fn test_while_loop_runs_as_infinite_loop_with_break() {
        assert_js_contains(sum_module(), "while (true)");
        assert_js_contains(sum_module(), "break;");

        for n in [0.0, 1.0, 10.0, 100.0] {
            let expected = n * (n - 1.0) / 2.0;
            assert_eq!(run(sum_module(), "sum", &[n]), expected.max(0.0));
        }
    }

    #[test]
    fn test_if_else() {
        let mut m = module();
        let mut f = Func::new("max", i32_params(&["a", "b"]), Type::I32).exported();
        f.push(Stmt::if_else(
            Expr::compare(BinaryOp::Gt, Type::I32, get(0, Type::I32), get(1, Type::I32)),
            vec![Stmt::ret(Some(get(0, Type::I32)))],
            vec![Stmt::ret(Some(get(1, Type::I32)))],
        ));
        m.add_func(f);

        assert_eq!(run(m.clone(), "max", &[3.0, 9.0]), 9.0);
        assert_eq!(run(m, "max", &[-3.0, -9.0]), -3.0);
    }

    #[test]
    fn test_direct_calls() {
        let mut m = add_module();
        let mut twice = Func::new("twice", i32_params(&["x"]), Type::I32).exported();
        twice.push(Stmt::ret(Some(Expr::call(
            FuncId(0),
            vec![get(0, Type::I32), get(0, Type::I32)],
            Type::I32,
        ))));
        m.add_func(twice);

        assert_eq!(run(m, "twice", &[21.0]), 42.0);
    }

    /// depth(n) = n <= 0 ? 0 : depth(n - 1) + 1
    fn depth_module() -> Module {
        let mut m = module();
        let mut depth = Func::new("depth", i32_params(&["n"]), Type::I32).exported();
        depth.push(Stmt::if_then(
            Expr::compare(BinaryOp::Le, Type::I32, get(0, Type::I32), Expr::const_i32(0)),
            vec![Stmt::ret(Some(Expr::const_i32(0)))],
        ));
        let rest = Expr::call(
            FuncId(0),
            vec![Expr::arith(BinaryOp::Sub, Type::I32, get(0, Type::I32), Expr::const_i32(1))],
            Type::I32,
        );
        depth.push(Stmt::ret(Some(Expr::arith(
            BinaryOp::Add,
            Type::I32,
            rest,
            Expr::const_i32(1),
        ))));
        m.add_func(depth);
        m
    }

    #[test]
    fn test_deep_recursion_fails_without_killing_the_instance() {
        let (instance, _) = instantiate(depth_module(), ForeignTable::new());
        assert_eq!(instance.call("depth", &[20.0]).unwrap().to_number(), 20.0);

        let err = instance.call("depth", &[1_000_000.0]).unwrap_err();
        assert!(matches!(err, RuntimeError::Range(ref msg) if msg == "Maximum call stack size exceeded"));
        assert_eq!(err.to_string(), "RangeError: Maximum call stack size exceeded");

        assert_eq!(instance.call("depth", &[20.0]).unwrap().to_number(), 20.0);
    }

    // =========================================
    // Memory
    // =========================================

    fn memory_module(mtype: MemType) -> Module {
        let mut m = module();
        let value_type = mtype.value_type();
        let mut poke = Func::new(
            "poke",
            vec![Local::new("addr", Type::I32), Local::new("v", value_type)],
            Type::Void,
        )
        .exported();
        poke.push(Stmt::expr(Expr::store(mtype, get(0, Type::I32), get(1, value_type))));
        m.add_func(poke);

        let mut peek = Func::new("peek", i32_params(&["addr"]), value_type).exported();
        peek.push(Stmt::ret(Some(Expr::load(mtype, get(0, Type::I32)))));
        m.add_func(peek);
        m
    }

    #[test]
    fn test_memory_store_then_load() {
        let (instance, _) = instantiate(memory_module(MemType::I32), ForeignTable::new());
        instance.call("poke", &[16.0, -123.0]).unwrap();
        assert_eq!(instance.call("peek", &[16.0]).unwrap().to_number(), -123.0);
        assert_eq!(instance.read_range(16, 4).unwrap(), (-123i32).to_le_bytes().to_vec());
    }

    #[test]
    fn test_byte_views_wrap() {
        let (instance, _) = instantiate(memory_module(MemType::I8), ForeignTable::new());
        instance.call("poke", &[3.0, 200.0]).unwrap();
        assert_eq!(instance.call("peek", &[3.0]).unwrap().to_number(), -56.0);
        assert_eq!(instance.read_range(3, 1).unwrap(), vec![200]);
    }

    #[test]
    fn test_f64_memory() {
        let (instance, _) = instantiate(memory_module(MemType::F64), ForeignTable::new());
        instance.call("poke", &[8.0, 0.1]).unwrap();
        assert_eq!(instance.call("peek", &[8.0]).unwrap().to_number(), 0.1);
        assert_js_contains(memory_module(MemType::F64), "F64[(addr >> 3)]");
    }

    #[test]
    fn test_copy_out_bounds() {
        let (instance, _) = instantiate(add_module(), ForeignTable::new());
        let mut dst = [0u8; 16];

        assert!(instance.copy_out(0, 16, &mut dst).is_ok());
        assert!(instance.copy_out(1020, 4, &mut dst).is_ok());

        let err = instance.copy_out(1020, 8, &mut dst).unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfBounds { .. }));
        assert_eq!(err.to_string(), "Range [1020, 1028) is out of bounds. [0, 1024)");
        assert!(instance.copy_out(-4, 4, &mut dst).is_err());
        assert!(instance.copy_out(8, -4, &mut dst).is_err());

        assert_eq!(instance.call("add", &[1.0, 2.0]).unwrap().to_number(), 3.0);
    }

    // =========================================
    // Foreign functions and capabilities
    // =========================================

    fn console_module() -> Module {
        let mut m = module();
        let console_i32 = m.add_extern(Extern::new("consoleI32", FuncType::new(vec![Type::I32], Type::Void)));
        let console_string = m.add_extern(Extern::new(
            "consoleString",
            FuncType::new(vec![Type::I32, Type::I32], Type::Void),
        ));

        let mut f = Func::new("say", i32_params(&["ptr", "len"]), Type::Void).exported();
        f.push(Stmt::expr(Expr::call_extern(console_i32, vec![get(1, Type::I32)], Type::Void)));
        f.push(Stmt::expr(Expr::call_extern(
            console_string,
            vec![get(0, Type::I32), get(1, Type::I32)],
            Type::Void,
        )));
        m.add_func(f);
        m
    }

    #[test]
    fn test_console_capabilities() {
        let (instance, console) = instantiate(console_module(), ForeignTable::new());
        instance.memory().write_bytes(64, b"hello").unwrap();
        instance.call("say", &[64.0, 5.0]).unwrap();

        assert_eq!(console.lines(), vec!["5".to_string(), "hello".to_string()]);
    }

    #[test]
    fn test_console_string_out_of_bounds() {
        let (instance, console) = instantiate(console_module(), ForeignTable::new());
        let err = instance.call("say", &[1020.0, 8.0]).unwrap_err();
        assert_eq!(err.to_string(), "Range [1020, 1028) is out of bounds. [0, 1024)");
        assert_eq!(console.lines(), vec!["8".to_string()]);
    }

    #[test]
    fn test_user_foreign_function() {
        let mut m = module();
        let double = m.add_extern(Extern::new("double", FuncType::new(vec![Type::F64], Type::F64)));
        let mut f = Func::new("quad", vec![Local::new("x", Type::F64)], Type::F64).exported();
        let inner = Expr::call_extern(double, vec![get(0, Type::F64)], Type::F64);
        f.push(Stmt::ret(Some(Expr::call_extern(double, vec![inner], Type::F64))));
        m.add_func(f);

        let foreign = ForeignTable::new().function("double", |args| Ok(Value::Number(arg(args, 0).to_number() * 2.0)));
        let (instance, _) = instantiate(m, foreign);
        assert_eq!(instance.call("quad", &[1.5]).unwrap().to_number(), 6.0);
    }

    #[test]
    fn test_reserved_import_rejected() {
        let program = compiled(add_module());
        let factory = Factory::new(program);
        let foreign = ForeignTable::new().function("atomicLoadI32", |_| Ok(Value::Undefined));
        let err = factory.instantiate(foreign, None).err().unwrap();
        assert!(matches!(err, RuntimeError::ReservedImport(_)));
    }

    #[test]
    fn test_polyfill_atomics() {
        let mut m = module();
        let store = m.add_extern(Extern::new(
            "atomicStoreI32",
            FuncType::new(vec![Type::I32, Type::I32], Type::Void),
        ));
        let cas = m.add_extern(Extern::new(
            "atomicCompareExchangeI32",
            FuncType::new(vec![Type::I32, Type::I32, Type::I32], Type::I32),
        ));
        let mut f = Func::new("swap", Vec::new(), Type::I32).exported();
        f.push(Stmt::expr(Expr::call_extern(
            store,
            vec![Expr::const_i32(32), Expr::const_i32(5)],
            Type::Void,
        )));
        f.push(Stmt::ret(Some(Expr::call_extern(
            cas,
            vec![Expr::const_i32(32), Expr::const_i32(5), Expr::const_i32(9)],
            Type::I32,
        ))));
        m.add_func(f);

        let (instance, _) = instantiate(m, ForeignTable::new());
        assert_eq!(instance.call("swap", &[]).unwrap().to_number(), 5.0);
        assert_eq!(instance.read_range(32, 4).unwrap(), 9i32.to_le_bytes().to_vec());
    }

    // =========================================
    // Threads
    // =========================================

    /// `main` starts a worker whose `threadStart(f, context)` atomically
    /// stores `f` at byte address `context`.
    fn threaded_module() -> Module {
        let mut m = Module::new(Config::default().with_memory(1024).with_shared_memory(true));
        let thread_create = m.add_extern(Extern::new(
            "threadCreate",
            FuncType::new(vec![Type::I32, Type::I32], Type::Void),
        ));
        let store = m.add_extern(Extern::new(
            "atomicStoreI32",
            FuncType::new(vec![Type::I32, Type::I32], Type::Void),
        ));

        let mut start = Func::new("threadStart", i32_params(&["f", "context"]), Type::Void).exported();
        start.push(Stmt::expr(Expr::call_extern(
            store,
            vec![get(1, Type::I32), get(0, Type::I32)],
            Type::Void,
        )));
        m.add_func(start);

        let mut main = Func::new("main", Vec::new(), Type::I32).exported();
        main.push(Stmt::expr(Expr::call_extern(
            thread_create,
            vec![Expr::const_i32(42), Expr::const_i32(128)],
            Type::Void,
        )));
        main.push(Stmt::ret(Some(Expr::const_i32(0))));
        m.add_func(main);
        m
    }

    #[test]
    fn test_worker_shares_memory() {
        let (instance, _) = instantiate(threaded_module(), ForeignTable::new());
        assert!(instance.is_main_thread());
        assert_eq!(instance.call("main", &[]).unwrap().to_number(), 0.0);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = 0;
        while Instant::now() < deadline {
            seen = NativeAtomics.load(instance.memory(), 128 / 4).unwrap();
            if seen == 42 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen, 42);
    }

    #[test]
    fn test_no_thread_create_without_shared_memory() {
        let mut m = threaded_module();
        m.config.use_shared_memory = false;
        let (instance, _) = instantiate(m, ForeignTable::new());

        // `threadCreate` is not offered, so the call has nothing to invoke.
        let err = instance.call("main", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Type(_)));
    }

    // =========================================
    // Validation and loading
    // =========================================

    #[test]
    fn test_unknown_callee_fails() {
        let mut m = module();
        let mut f = Func::new("f", Vec::new(), Type::I32).exported();
        f.push(Stmt::ret(Some(Expr::call(FuncId(7), Vec::new(), Type::I32))));
        m.add_func(f);
        assert_compile_fails(m);
    }

    #[test]
    fn test_i64_is_unsupported() {
        let mut m = module();
        let mut f = Func::new("big", Vec::new(), Type::I32).exported();
        f.push(Stmt::expr(Expr::const_i64(1)));
        f.push(Stmt::ret(Some(Expr::const_i32(0))));
        m.add_func(f);
        assert_compile_fails(m);
    }

    #[test]
    fn test_unknown_extern_id_fails() {
        let mut m = module();
        let mut f = Func::new("f", Vec::new(), Type::Void).exported();
        f.push(Stmt::expr(Expr::call_extern(ExternId(3), Vec::new(), Type::Void)));
        m.add_func(f);
        assert_compile_fails(m);
    }

    #[test]
    fn test_module_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sum.json");
        std::fs::write(&path, sum_module().to_json().unwrap()).unwrap();

        let loaded = Module::from_file(&path).unwrap();
        assert_eq!(loaded, sum_module());
        assert_eq!(run(loaded, "sum", &[5.0]), 10.0);
    }
}
