//! Host values
//!
//! The value model of the host the generated programs are written for:
//! untyped `f64` numbers, booleans, `undefined`, plain objects, functions
//! and typed views over linear memory. Numeric conversions follow the
//! host's rules (`ToInt32`, `ToUint32`, truthiness).

use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::Memory;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use wasmjs_codegen::js::FunctionDef;
use wasmjs_ir::MemType;

use crate::host::Scope;

/// Signature of functions implemented natively
pub type NativeFn = dyn Fn(&[Value]) -> RuntimeResult<Value>;

/// A host value
#[derive(Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Number(f64),
    Object(Rc<Object>),
    /// Function defined by the program, with the scope it closes over
    Closure(Rc<Closure>),
    Native(Rc<Native>),
    /// Constructor usable with `new`
    Constructor(Constructor),
    Buffer(Memory),
    View(View),
}

/// Built-in constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constructor {
    ArrayBuffer,
    View(MemType),
}

/// The scope is owned by the interpreter that created the closure
pub struct Closure {
    pub def: Arc<FunctionDef>,
    pub scope: Weak<Scope>,
}

pub struct Native {
    pub name: String,
    pub func: Box<NativeFn>,
}

/// A typed view over a whole buffer
#[derive(Debug, Clone)]
pub struct View {
    pub mtype: MemType,
    pub memory: Memory,
}

/// Plain object; properties keep insertion order
#[derive(Default)]
pub struct Object {
    props: RefCell<Vec<(String, Value)>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        let object = Self::new();
        for (key, value) in entries {
            object.set(&key, value);
        }
        object
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut props = self.props.borrow_mut();
        match props.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key.to_string(), value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.props.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.borrow().iter().map(|(k, _)| k.clone()).collect()
    }
}

impl Value {
    /// Wraps a Rust closure as a callable value
    pub fn native(name: impl Into<String>, func: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static) -> Self {
        Value::Native(Rc::new(Native {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(Object::from_entries(entries)))
    }

    /// `ToNumber`
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            _ => f64::NAN,
        }
    }

    pub fn to_int32(&self) -> i32 {
        to_int32(self.to_number())
    }

    /// `ToBoolean`
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_))
    }

    /// Number payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Object(_) | Value::Buffer(_) | Value::View(_) => "object",
            Value::Closure(_) | Value::Native(_) | Value::Constructor(_) => "function",
        }
    }
}

/// Argument `index` of a native call; missing arguments are `undefined`
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Host `ToInt32`: truncate, then wrap modulo 2^32 into the signed range
pub fn to_int32(value: f64) -> i32 {
    to_uint32(value) as i32
}

/// Host `ToUint32`
pub fn to_uint32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4294967296.0) as u32
}

/// Formats a number the way the host prints it
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Strict equality over the values generated code compares
pub fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
        (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
        _ => left.to_number() == right.to_number(),
    }
}

/// Checks that `value` is a byte view and returns it
pub fn expect_view(value: &Value, what: &str) -> RuntimeResult<View> {
    match value {
        Value::View(view) => Ok(view.clone()),
        other => Err(RuntimeError::Type(format!(
            "{} must be a typed array, got {}",
            what,
            other.type_name()
        ))),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Closure(_) => f.write_str("function() { [code] }"),
            Value::Native(native) => write!(f, "function {}() {{ [native code] }}", native.name),
            Value::Constructor(Constructor::ArrayBuffer) => f.write_str("function ArrayBuffer() { [native code] }"),
            Value::Constructor(Constructor::View(mtype)) => {
                write!(f, "function {}() {{ [native code] }}", wasmjs_codegen::view_for(*mtype).constructor)
            }
            Value::Buffer(_) => f.write_str("[object ArrayBuffer]"),
            Value::View(view) => write!(f, "[object {}]", wasmjs_codegen::view_for(view.mtype).constructor),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({})", format_number(*n)),
            Value::Object(object) => f.debug_list().entries(object.keys()).finish(),
            other => write!(f, "{}", other),
        }
    }
}
