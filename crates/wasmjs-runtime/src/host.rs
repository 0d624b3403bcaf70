//! Host evaluator for generated programs
//!
//! Walks the `js` tree produced by the code generator with the host
//! language's semantics: every number is an `f64`, bitwise operators go
//! through `ToInt32`, `var` is function scoped and functions close over
//! the scope they were created in.
//!
//! Each execution context owns one interpreter. Its `ArrayBuffer`
//! constructor does not allocate: it hands out the context's linear memory,
//! so the generated wrapper's `new ArrayBuffer(size)` binds whichever
//! buffer the context was given.
//!
//! Scopes captured by functions are owned by the interpreter and closures
//! only hold weak references to them, so dropping the interpreter frees
//! every scope and the views over linear memory they hold.

use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::Memory;
use crate::value::{arg, strict_equals, to_int32, to_uint32, Closure, Constructor, Object, Value, View};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use wasmjs_codegen::js::{BinOp, Expr, Stmt, UnaryOp};
use wasmjs_codegen::VIEWS;

/// Variable scope; one per function call plus the global scope
#[derive(Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Defines `name` in this scope, replacing any previous binding
    pub fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Looks `name` up from this scope outward
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Updates the innermost binding of `name`; false if there is none
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }
}

/// Outcome of executing a statement
enum Flow {
    Normal,
    Break,
    Return(Value),
}

/// Deepest nesting of program function calls
pub const MAX_CALL_DEPTH: usize = 10_000;

/// Stack the evaluator may use below its outermost call
pub const DEFAULT_STACK_BUDGET: usize = 1024 * 1024;

const STACK_EXHAUSTED: &str = "Maximum call stack size exceeded";

/// Evaluator bound to one linear memory
pub struct Interpreter {
    globals: Rc<Scope>,
    memory: Memory,
    /// Scopes closed over by program functions
    scopes: RefCell<Vec<Rc<Scope>>>,
    depth: Cell<usize>,
    stack_base: Cell<usize>,
    stack_budget: usize,
}

/// Live program call; leaving it pops the depth counter
struct CallFrame<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// Address of a local in the caller's frame
#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

impl Interpreter {
    pub fn new(memory: Memory) -> Self {
        Self::with_stack_budget(memory, DEFAULT_STACK_BUDGET)
    }

    /// Interpreter for a thread that has `stack_budget` bytes of stack to
    /// spare for program calls
    pub fn with_stack_budget(memory: Memory, stack_budget: usize) -> Self {
        let globals = Scope::root();
        install_globals(&globals);
        Self {
            globals,
            memory,
            scopes: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            stack_base: Cell::new(0),
            stack_budget,
        }
    }

    pub fn globals(&self) -> &Rc<Scope> {
        &self.globals
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Evaluates a module factory and calls it with `foreign`
    pub fn run_factory(&self, factory: &Expr, foreign: Value) -> RuntimeResult<Value> {
        let factory = self.eval(factory, &self.globals)?;
        self.call(&factory, vec![foreign])
    }

    /// Calls a function value
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        match callee {
            Value::Closure(closure) => {
                let _frame = self.enter()?;
                let parent = closure.scope.upgrade().ok_or_else(|| {
                    RuntimeError::Type("function called after its context was dropped".to_string())
                })?;
                let scope = Scope::child(&parent);
                for (i, param) in closure.def.params.iter().enumerate() {
                    scope.define(param, arg(&args, i));
                }
                match self.exec_block(&closure.def.body, &scope)? {
                    Flow::Return(value) => Ok(value),
                    Flow::Normal | Flow::Break => Ok(Value::Undefined),
                }
            }
            Value::Native(native) => (native.func)(args.as_slice()),
            other => Err(RuntimeError::Type(format!("{} is not a function", other))),
        }
    }

    /// Pushes a call frame, failing with a `RangeError` once the depth
    /// limit or the stack budget is reached
    fn enter(&self) -> RuntimeResult<CallFrame<'_>> {
        let depth = self.depth.get();
        let here = stack_position();
        if depth == 0 {
            self.stack_base.set(here);
        } else if depth >= MAX_CALL_DEPTH || here.abs_diff(self.stack_base.get()) > self.stack_budget {
            tracing::debug!("call stack exhausted at depth {}", depth);
            return Err(RuntimeError::Range(STACK_EXHAUSTED.to_string()));
        }
        self.depth.set(depth + 1);
        Ok(CallFrame { depth: &self.depth })
    }

    /// Keeps `scope` alive for as long as the interpreter
    fn retain(&self, scope: &Rc<Scope>) {
        let mut scopes = self.scopes.borrow_mut();
        if !scopes.iter().any(|kept| Rc::ptr_eq(kept, scope)) {
            scopes.push(Rc::clone(scope));
        }
    }

    pub fn eval(&self, expr: &Expr, scope: &Rc<Scope>) -> RuntimeResult<Value> {
        match expr {
            Expr::Num(value) => Ok(Value::Number(*value)),
            Expr::Name(name) => scope
                .lookup(name)
                .ok_or_else(|| RuntimeError::Reference(name.clone())),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Prefix { op, expr } => {
                let operand = self.eval(expr, scope)?;
                Ok(prefix(*op, &operand))
            }
            Expr::Call { callee, args } => {
                let function = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                if !function.is_callable() {
                    return Err(RuntimeError::Type(format!("{} is not a function", callee)));
                }
                self.call(&function, args)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                read_index(&target, &index)
            }
            Expr::Attr { target, attr } => {
                let object = self.eval(target, scope)?;
                read_attr(&object, attr)
            }
            Expr::Assign { target, value } => self.assign(target, value, scope),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                match constructor {
                    Value::Constructor(ctor) => self.construct(ctor, &args),
                    _ => Err(RuntimeError::Type(format!("{} is not a constructor", callee))),
                }
            }
            Expr::Object(entries) => {
                let object = Object::new();
                for (key, value) in entries {
                    object.set(key, self.eval(value, scope)?);
                }
                Ok(Value::Object(Rc::new(object)))
            }
            Expr::Function(def) => {
                self.retain(scope);
                Ok(Value::Closure(Rc::new(Closure {
                    def: def.clone(),
                    scope: Rc::downgrade(scope),
                })))
            }
        }
    }

    fn eval_args(&self, args: &[Expr], scope: &Rc<Scope>) -> RuntimeResult<Vec<Value>> {
        args.iter().map(|a| self.eval(a, scope)).collect()
    }

    fn assign(&self, target: &Expr, value: &Expr, scope: &Rc<Scope>) -> RuntimeResult<Value> {
        match target {
            Expr::Name(name) => {
                let value = self.eval(value, scope)?;
                if scope.assign(name, value.clone()) {
                    Ok(value)
                } else {
                    Err(RuntimeError::Reference(name.clone()))
                }
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                let value = self.eval(value, scope)?;
                match &target {
                    Value::View(view) => {
                        if let Some(index) = element_index(&index) {
                            view.memory.set(view.mtype, index, value.to_number());
                        }
                        Ok(value)
                    }
                    Value::Undefined => Err(RuntimeError::Type(
                        "cannot set properties of undefined".to_string(),
                    )),
                    _ => Ok(value),
                }
            }
            Expr::Attr { target, attr } => {
                let object = self.eval(target, scope)?;
                let value = self.eval(value, scope)?;
                match &object {
                    Value::Object(object) => {
                        object.set(attr, value.clone());
                        Ok(value)
                    }
                    Value::Undefined => Err(RuntimeError::Type(format!(
                        "cannot set property '{}' of undefined",
                        attr
                    ))),
                    _ => Ok(value),
                }
            }
            other => Err(RuntimeError::Type(format!("invalid assignment target {}", other))),
        }
    }

    fn construct(&self, ctor: Constructor, args: &[Value]) -> RuntimeResult<Value> {
        match ctor {
            Constructor::ArrayBuffer => {
                let requested = arg(args, 0).to_number();
                if requested != self.memory.len() as f64 {
                    return Err(RuntimeError::Range(format!(
                        "context buffer holds {} bytes, {} requested",
                        self.memory.len(),
                        requested
                    )));
                }
                Ok(Value::Buffer(self.memory.clone()))
            }
            Constructor::View(mtype) => match arg(args, 0) {
                Value::Buffer(memory) => {
                    let size = mtype.size_of() as usize;
                    if memory.len() % size != 0 {
                        return Err(RuntimeError::Range(format!(
                            "buffer length {} is not a multiple of {}",
                            memory.len(),
                            size
                        )));
                    }
                    Ok(Value::View(View { mtype, memory }))
                }
                other => Err(RuntimeError::Type(format!(
                    "typed array needs an ArrayBuffer, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn exec_block(&self, block: &[Stmt], scope: &Rc<Scope>) -> RuntimeResult<Flow> {
        for stmt in block {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, stmt: &Stmt, scope: &Rc<Scope>) -> RuntimeResult<Flow> {
        match stmt {
            Stmt::Var { name, init } => {
                let value = self.eval(init, scope)?;
                scope.define(name, value);
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, scope)?.truthy() {
                    return self.exec_block(then, scope);
                }
                if let Some(otherwise) = otherwise {
                    return self.exec_block(otherwise, scope);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }
}

/// Element index named by `index`, if it is a non-negative integer
fn element_index(index: &Value) -> Option<usize> {
    let n = index.as_number()?;
    if n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

fn read_index(target: &Value, index: &Value) -> RuntimeResult<Value> {
    match target {
        Value::View(view) => Ok(element_index(index)
            .and_then(|i| view.memory.get(view.mtype, i))
            .map(Value::Number)
            .unwrap_or(Value::Undefined)),
        Value::Undefined => Err(RuntimeError::Type(
            "cannot read properties of undefined".to_string(),
        )),
        _ => Ok(Value::Undefined),
    }
}

fn read_attr(target: &Value, attr: &str) -> RuntimeResult<Value> {
    match target {
        Value::Object(object) => Ok(object.get(attr).unwrap_or(Value::Undefined)),
        Value::Undefined => Err(RuntimeError::Type(format!(
            "cannot read property '{}' of undefined",
            attr
        ))),
        _ => Ok(Value::Undefined),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Value {
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinOp::Add => Value::Number(a + b),
        BinOp::Sub => Value::Number(a - b),
        BinOp::Mul => Value::Number(a * b),
        BinOp::Div => Value::Number(a / b),
        BinOp::Rem => Value::Number(a % b),
        BinOp::BitAnd => Value::Number((to_int32(a) & to_int32(b)) as f64),
        BinOp::BitOr => Value::Number((to_int32(a) | to_int32(b)) as f64),
        BinOp::BitXor => Value::Number((to_int32(a) ^ to_int32(b)) as f64),
        BinOp::Shl => Value::Number(to_int32(a).wrapping_shl(to_uint32(b) & 31) as f64),
        BinOp::Shr => Value::Number(to_int32(a).wrapping_shr(to_uint32(b) & 31) as f64),
        BinOp::Eq => Value::Bool(strict_equals(left, right)),
        BinOp::Ne => Value::Bool(!strict_equals(left, right)),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
    }
}

fn prefix(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!operand.truthy()),
        UnaryOp::Neg => Value::Number(-operand.to_number()),
        UnaryOp::BitNot => Value::Number(!operand.to_int32() as f64),
        UnaryOp::Plus => Value::Number(operand.to_number()),
    }
}

/// `Math`, the view constructors, `ArrayBuffer` and the value globals
fn install_globals(globals: &Scope) {
    let unary = |name: &'static str, f: fn(f64) -> f64| {
        (
            name.to_string(),
            Value::native(name, move |args| Ok(Value::Number(f(arg(args, 0).to_number())))),
        )
    };

    let math = Value::object(vec![
        unary("fround", |x| x as f32 as f64),
        (
            "imul".to_string(),
            Value::native("imul", |args| {
                let product = arg(args, 0).to_int32().wrapping_mul(arg(args, 1).to_int32());
                Ok(Value::Number(product as f64))
            }),
        ),
        (
            "pow".to_string(),
            Value::native("pow", |args| {
                Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
            }),
        ),
        unary("sin", f64::sin),
        unary("cos", f64::cos),
    ]);
    globals.define("Math", math);

    for view in &VIEWS {
        globals.define(view.constructor, Value::Constructor(Constructor::View(view.mtype)));
    }
    globals.define("ArrayBuffer", Value::Constructor(Constructor::ArrayBuffer));

    globals.define("undefined", Value::Undefined);
    globals.define("true", Value::Bool(true));
    globals.define("false", Value::Bool(false));
    globals.define("NaN", Value::Number(f64::NAN));
    globals.define("Infinity", Value::Number(f64::INFINITY));
}
