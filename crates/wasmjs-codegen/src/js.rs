//! Output-language AST
//!
//! A small JavaScript subset: just enough for the module wrapper, memory
//! views, numeric coercions and structured control flow. The tree is what
//! the runtime evaluates; the printer renders the same tree as source text.
//!
//! Function bodies sit behind an `Arc` so a finished program can be shared
//! with worker threads without copying it.

use std::fmt::{self, Write};
use std::sync::Arc;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    /// Type the host gives the result of this operator
    pub fn implicit_type(&self) -> Implicit {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => Implicit::F64,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Implicit::Bool,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => Implicit::I32,
        }
    }
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `!x`
    Not,
    /// `-x`
    Neg,
    /// `~x`
    BitNot,
    /// `+x`, the `f64` coercion
    Plus,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Plus => "+",
        }
    }
}

/// Result type an expression has in the host purely from its shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implicit {
    I32,
    F32,
    F64,
    Bool,
    Unknown,
}

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Name(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Prefix {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `target[index]`
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// `target.attr`
    Attr {
        target: Box<Expr>,
        attr: String,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Object literal; keys keep their insertion order
    Object(Vec<(String, Expr)>),
    Function(Arc<FunctionDef>),
}

/// `function(params) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Var {
        name: String,
        init: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Return(Option<Expr>),
}

/// View bindings whose element reads are already exactly typed. `U32`
/// is absent: its elements can exceed the `i32` range.
const TYPED_READS: [(&str, Implicit); 7] = [
    ("U8", Implicit::I32),
    ("I8", Implicit::I32),
    ("U16", Implicit::I32),
    ("I16", Implicit::I32),
    ("I32", Implicit::I32),
    ("F32", Implicit::F32),
    ("F64", Implicit::F64),
];

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Num(value)
    }

    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn prefix(op: UnaryOp, expr: Expr) -> Self {
        Expr::Prefix {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// Call of a plain name
    pub fn call_name(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::call(Self::name(name), args)
    }

    pub fn index(target: Expr, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn attr(target: Expr, attr: impl Into<String>) -> Self {
        Expr::Attr {
            target: Box::new(target),
            attr: attr.into(),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn new_object(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::New {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn function(params: Vec<String>, body: Vec<Stmt>) -> Self {
        Expr::Function(Arc::new(FunctionDef { params, body }))
    }

    /// Infers the host type of this expression from its shape alone.
    ///
    /// The coercion forms are recognised (`x|0`, `+x`, `fround(x)`) as are
    /// `imul(..)` and reads of exactly typed views, so coercing an
    /// expression twice never stacks a second wrapper.
    pub fn implicit_type(&self) -> Implicit {
        match self {
            Expr::Num(_) => Implicit::F64,
            Expr::Binary { op, .. } => op.implicit_type(),
            Expr::Prefix { op, .. } => match op {
                UnaryOp::Not => Implicit::Bool,
                UnaryOp::BitNot => Implicit::I32,
                UnaryOp::Neg | UnaryOp::Plus => Implicit::F64,
            },
            Expr::Call { callee, .. } => match callee.as_ref() {
                Expr::Name(name) if name == "fround" => Implicit::F32,
                Expr::Name(name) if name == "imul" => Implicit::I32,
                _ => Implicit::Unknown,
            },
            Expr::Index { target, .. } => match target.as_ref() {
                Expr::Name(name) => TYPED_READS
                    .iter()
                    .find(|(view, _)| view == name)
                    .map(|(_, ty)| *ty)
                    .unwrap_or(Implicit::Unknown),
                _ => Implicit::Unknown,
            },
            Expr::Assign { value, .. } => value.implicit_type(),
            Expr::Name(_) | Expr::Attr { .. } | Expr::New { .. } | Expr::Object(_) | Expr::Function(_) => {
                Implicit::Unknown
            }
        }
    }
}

/// Source printer
pub struct Printer {
    indent: usize,
    out: String,
}

impl Printer {
    pub fn new(indent: usize) -> Self {
        Self {
            indent,
            out: String::new(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn pad(&mut self, depth: usize) {
        for _ in 0..depth * self.indent {
            self.out.push(' ');
        }
    }

    pub fn expr(&mut self, expr: &Expr, depth: usize) {
        match expr {
            Expr::Num(value) => self.number(*value),
            Expr::Name(name) => self.out.push_str(name),
            Expr::Binary { op, left, right } => {
                self.out.push('(');
                self.expr(left, depth);
                let _ = write!(self.out, " {} ", op.symbol());
                self.expr(right, depth);
                self.out.push(')');
            }
            Expr::Prefix { op, expr } => {
                self.out.push('(');
                self.out.push_str(op.symbol());
                self.expr(expr, depth);
                self.out.push(')');
            }
            Expr::Call { callee, args } => {
                if matches!(callee.as_ref(), Expr::Function(_)) {
                    self.out.push('(');
                    self.expr(callee, depth);
                    self.out.push(')');
                } else {
                    self.expr(callee, depth);
                }
                self.args(args, depth);
            }
            Expr::Index { target, index } => {
                self.expr(target, depth);
                self.out.push('[');
                self.expr(index, depth);
                self.out.push(']');
            }
            Expr::Attr { target, attr } => {
                self.expr(target, depth);
                self.out.push('.');
                self.out.push_str(attr);
            }
            Expr::Assign { target, value } => {
                self.out.push('(');
                self.assignment(target, value, depth);
                self.out.push(')');
            }
            Expr::New { callee, args } => {
                self.out.push_str("new ");
                self.expr(callee, depth);
                self.args(args, depth);
            }
            Expr::Object(entries) => {
                if entries.is_empty() {
                    self.out.push_str("{}");
                    return;
                }
                self.out.push_str("{\n");
                for (i, (key, value)) in entries.iter().enumerate() {
                    self.pad(depth + 1);
                    self.out.push_str(key);
                    self.out.push_str(": ");
                    self.expr(value, depth + 1);
                    if i + 1 < entries.len() {
                        self.out.push(',');
                    }
                    self.out.push('\n');
                }
                self.pad(depth);
                self.out.push('}');
            }
            Expr::Function(def) => {
                let _ = writeln!(self.out, "function({}) {{", def.params.join(", "));
                self.block(&def.body, depth + 1);
                self.pad(depth);
                self.out.push('}');
            }
        }
    }

    fn number(&mut self, value: f64) {
        if value.is_nan() {
            self.out.push_str("NaN");
        } else if value.is_infinite() {
            self.out.push_str(if value > 0.0 { "Infinity" } else { "(-Infinity)" });
        } else if value.is_sign_negative() {
            let _ = write!(self.out, "(-{})", -value);
        } else {
            let _ = write!(self.out, "{}", value);
        }
    }

    fn args(&mut self, args: &[Expr], depth: usize) {
        self.out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg, depth);
        }
        self.out.push(')');
    }

    fn assignment(&mut self, target: &Expr, value: &Expr, depth: usize) {
        self.expr(target, depth);
        self.out.push_str(" = ");
        self.expr(value, depth);
    }

    pub fn block(&mut self, block: &[Stmt], depth: usize) {
        for stmt in block {
            self.stmt(stmt, depth);
        }
    }

    pub fn stmt(&mut self, stmt: &Stmt, depth: usize) {
        self.pad(depth);
        match stmt {
            Stmt::Var { name, init } => {
                let _ = write!(self.out, "var {} = ", name);
                self.expr(init, depth);
                self.out.push_str(";\n");
            }
            Stmt::Expr(Expr::Assign { target, value }) => {
                self.assignment(target, value, depth);
                self.out.push_str(";\n");
            }
            Stmt::Expr(expr) => {
                self.expr(expr, depth);
                self.out.push_str(";\n");
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.out.push_str("if (");
                self.expr(cond, depth);
                self.out.push_str(") {\n");
                self.block(then, depth + 1);
                self.pad(depth);
                self.out.push('}');
                if let Some(otherwise) = otherwise {
                    self.out.push_str(" else {\n");
                    self.block(otherwise, depth + 1);
                    self.pad(depth);
                    self.out.push('}');
                }
                self.out.push('\n');
            }
            Stmt::While { cond, body } => {
                self.out.push_str("while (");
                self.expr(cond, depth);
                self.out.push_str(") {\n");
                self.block(body, depth + 1);
                self.pad(depth);
                self.out.push_str("}\n");
            }
            Stmt::Break => self.out.push_str("break;\n"),
            Stmt::Return(None) => self.out.push_str("return;\n"),
            Stmt::Return(Some(expr)) => {
                self.out.push_str("return ");
                self.expr(expr, depth);
                self.out.push_str(";\n");
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::new(2);
        printer.expr(self, 0);
        f.write_str(&printer.finish())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::new(2);
        printer.stmt(self, 0);
        f.write_str(&printer.finish())
    }
}
