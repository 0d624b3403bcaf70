//! IR Module - high-level structure
//!
//! A module owns its functions, its imported functions (externs) and its
//! configuration. Functions and externs are addressed by position; an
//! ordinal is never renumbered once assigned.

use crate::error::IrResult;
use crate::instruction::{fmt_block, Stmt};
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Position of a function in `Module::funcs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncId(pub usize);

/// Position of an extern in `Module::externs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternId(pub usize);

/// Position of a local in `Func::locals` (parameters come first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub usize);

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#f{}", self.0)
    }
}

impl fmt::Display for ExternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#e{}", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// A named, typed slot: parameter or local variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

impl Local {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Function in IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Func {
    /// Function name
    pub name: String,
    /// Parameters, in call order
    pub params: Vec<Local>,
    /// All locals; the parameters are repeated as a prefix
    pub locals: Vec<Local>,
    /// Return type (`void` for none)
    pub return_type: Type,
    /// Statements
    pub body: Vec<Stmt>,
    /// Whether the function is visible on the instance
    #[serde(default)]
    pub export: bool,
}

impl Func {
    pub fn new(name: impl Into<String>, params: Vec<Local>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            locals: params.clone(),
            params,
            return_type,
            body: Vec::new(),
            export: false,
        }
    }

    /// Marks the function as exported
    pub fn exported(mut self) -> Self {
        self.export = true;
        self
    }

    /// Adds a local variable and returns its ordinal
    pub fn add_local(&mut self, name: impl Into<String>, ty: Type) -> LocalId {
        self.locals.push(Local::new(name, ty));
        LocalId(self.locals.len() - 1)
    }

    /// Ordinal of the parameter or local named `name`
    pub fn local_id(&self, name: &str) -> Option<LocalId> {
        self.locals.iter().position(|l| l.name == name).map(LocalId)
    }

    pub fn local(&self, id: LocalId) -> Option<&Local> {
        self.locals.get(id.0)
    }

    /// Adds statement to the body
    pub fn push(&mut self, stmt: Stmt) {
        self.body.push(stmt);
    }

    /// Signature of this function
    pub fn signature(&self) -> FuncType {
        FuncType {
            params: self.params.iter().map(|p| p.ty).collect(),
            ret: self.return_type,
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let export = if self.export { "export " } else { "" };
        write!(f, "{}func {}(", export, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", p.ty, p.name)?;
        }
        writeln!(f, ") -> {} {{", self.return_type)?;

        for (i, local) in self.locals.iter().enumerate().skip(self.params.len()) {
            writeln!(f, "  local ${} {} {}", i, local.ty, local.name)?;
        }

        fmt_block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FuncType {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Imported function, satisfied by the foreign-function table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extern {
    pub name: String,
    pub ftype: FuncType,
}

impl Extern {
    pub fn new(name: impl Into<String>, ftype: FuncType) -> Self {
        Self {
            name: name.into(),
            ftype,
        }
    }
}

/// Linear memory configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Buffer length in bytes
    pub fixed: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { fixed: 64 * 1024 }
    }
}

/// Module configuration, threaded from the driver through code generation
/// into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Real shared memory and atomics; otherwise the single-thread polyfill
    #[serde(default)]
    pub use_shared_memory: bool,
}

impl Config {
    pub fn with_memory(mut self, fixed: u32) -> Self {
        self.memory.fixed = fixed;
        self
    }

    pub fn with_shared_memory(mut self, shared: bool) -> Self {
        self.use_shared_memory = shared;
        self
    }
}

/// IR Module - a complete program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Functions
    #[serde(default)]
    pub funcs: Vec<Func>,
    /// Imported functions
    #[serde(default)]
    pub externs: Vec<Extern>,
    /// Configuration
    #[serde(default)]
    pub config: Config,
}

impl Module {
    pub fn new(config: Config) -> Self {
        Self {
            funcs: Vec::new(),
            externs: Vec::new(),
            config,
        }
    }

    /// Adds a function and returns its ordinal
    pub fn add_func(&mut self, func: Func) -> FuncId {
        self.funcs.push(func);
        FuncId(self.funcs.len() - 1)
    }

    /// Adds an extern and returns its ordinal
    pub fn add_extern(&mut self, ext: Extern) -> ExternId {
        self.externs.push(ext);
        ExternId(self.externs.len() - 1)
    }

    pub fn func(&self, id: FuncId) -> Option<&Func> {
        self.funcs.get(id.0)
    }

    pub fn func_mut(&mut self, id: FuncId) -> Option<&mut Func> {
        self.funcs.get_mut(id.0)
    }

    pub fn extern_(&self, id: ExternId) -> Option<&Extern> {
        self.externs.get(id.0)
    }

    /// Finds a function by name
    pub fn func_id(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().position(|f| f.name == name).map(FuncId)
    }

    /// Names of exported functions, in declaration order
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.funcs.iter().filter(|f| f.export).map(|f| f.name.as_str())
    }

    /// Parses a module from its JSON form
    pub fn from_json(json: &str) -> IrResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> IrResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a module from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> IrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; memory: {} bytes{}",
            self.config.memory.fixed,
            if self.config.use_shared_memory { " (shared)" } else { "" }
        )?;

        for (i, ext) in self.externs.iter().enumerate() {
            writeln!(f, "extern #e{} {}{}", i, ext.name, ext.ftype)?;
        }
        if !self.externs.is_empty() {
            writeln!(f)?;
        }

        for func in &self.funcs {
            writeln!(f, "{}", func)?;
        }

        Ok(())
    }
}
