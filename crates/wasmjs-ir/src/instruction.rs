//! IR expressions and statements
//!
//! The tree is owned top-down: a function owns its statements, statements
//! own their expressions, and no node has two parents.

use crate::module::{ExternId, FuncId, LocalId};
use crate::types::{MemType, Type};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    Shr,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Comparisons always produce a canonical 0/1 `i32`
    pub fn is_compare(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Operator spelling shared by the IR dump and the output language
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Prefix (unary) operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixOp {
    /// Logical negation, yields 0/1
    Not,
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    BitNot,
}

impl PrefixOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            PrefixOp::Not => "!",
            PrefixOp::Neg => "-",
            PrefixOp::BitNot => "~",
        }
    }
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Expression node: a kind plus its evaluated type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    pub etype: Type,
}

/// Expression kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExprKind {
    ConstI32 {
        value: i32,
    },
    ConstI64 {
        value: i64,
    },
    ConstF32 {
        value: f32,
    },
    ConstF64 {
        value: f64,
    },
    GetLocal {
        local: LocalId,
    },
    /// Read one element; `address` is a byte offset (`i32`)
    Load {
        mtype: MemType,
        address: Box<Expr>,
    },
    /// Write one element and yield the written value
    Store {
        mtype: MemType,
        address: Box<Expr>,
        value: Box<Expr>,
    },
    PrefixOp {
        op: PrefixOp,
        expr: Box<Expr>,
    },
    /// `optype` is the width the operator executes at; it differs from the
    /// node's `etype` for comparisons (e.g. `f64` compare yielding `i32`).
    BinaryOp {
        op: BinaryOp,
        optype: Type,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Coerce {
        mtype: Type,
        expr: Box<Expr>,
    },
    CallDirect {
        func: FuncId,
        args: Vec<Expr>,
    },
    CallExternal {
        func: ExternId,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, etype: Type) -> Self {
        Self { kind, etype }
    }

    pub fn const_i32(value: i32) -> Self {
        Self::new(ExprKind::ConstI32 { value }, Type::I32)
    }

    pub fn const_i64(value: i64) -> Self {
        Self::new(ExprKind::ConstI64 { value }, Type::I64)
    }

    pub fn const_f32(value: f32) -> Self {
        Self::new(ExprKind::ConstF32 { value }, Type::F32)
    }

    pub fn const_f64(value: f64) -> Self {
        Self::new(ExprKind::ConstF64 { value }, Type::F64)
    }

    pub fn get_local(local: LocalId, ty: Type) -> Self {
        Self::new(ExprKind::GetLocal { local }, ty)
    }

    pub fn load(mtype: MemType, address: Expr) -> Self {
        Self::new(
            ExprKind::Load {
                mtype,
                address: Box::new(address),
            },
            mtype.value_type(),
        )
    }

    pub fn store(mtype: MemType, address: Expr, value: Expr) -> Self {
        let etype = value.etype;
        Self::new(
            ExprKind::Store {
                mtype,
                address: Box::new(address),
                value: Box::new(value),
            },
            etype,
        )
    }

    pub fn prefix(op: PrefixOp, expr: Expr, etype: Type) -> Self {
        Self::new(
            ExprKind::PrefixOp {
                op,
                expr: Box::new(expr),
            },
            etype,
        )
    }

    /// Logical not; always yields `i32`
    pub fn not(expr: Expr) -> Self {
        Self::prefix(PrefixOp::Not, expr, Type::I32)
    }

    pub fn binary(op: BinaryOp, optype: Type, etype: Type, left: Expr, right: Expr) -> Self {
        Self::new(
            ExprKind::BinaryOp {
                op,
                optype,
                left: Box::new(left),
                right: Box::new(right),
            },
            etype,
        )
    }

    /// Arithmetic or bitwise operation executing and yielding at `ty`
    pub fn arith(op: BinaryOp, ty: Type, left: Expr, right: Expr) -> Self {
        Self::binary(op, ty, ty, left, right)
    }

    /// Comparison executing at `optype`, yielding `i32`
    pub fn compare(op: BinaryOp, optype: Type, left: Expr, right: Expr) -> Self {
        Self::binary(op, optype, Type::I32, left, right)
    }

    pub fn coerce(mtype: Type, expr: Expr) -> Self {
        Self::new(
            ExprKind::Coerce {
                mtype,
                expr: Box::new(expr),
            },
            mtype,
        )
    }

    pub fn call(func: FuncId, args: Vec<Expr>, ret: Type) -> Self {
        Self::new(ExprKind::CallDirect { func, args }, ret)
    }

    pub fn call_extern(func: ExternId, args: Vec<Expr>, ret: Type) -> Self {
        Self::new(ExprKind::CallExternal { func, args }, ret)
    }

    /// True for `!x`
    pub fn is_logical_not(&self) -> bool {
        matches!(self.kind, ExprKind::PrefixOp { op: PrefixOp::Not, .. })
    }

    /// Children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::ConstI32 { .. }
            | ExprKind::ConstI64 { .. }
            | ExprKind::ConstF32 { .. }
            | ExprKind::ConstF64 { .. }
            | ExprKind::GetLocal { .. } => Vec::new(),
            ExprKind::Load { address, .. } => vec![address],
            ExprKind::Store { address, value, .. } => vec![address, value],
            ExprKind::PrefixOp { expr, .. } | ExprKind::Coerce { expr, .. } => vec![expr],
            ExprKind::BinaryOp { left, right, .. } => vec![left, right],
            ExprKind::CallDirect { args, .. } | ExprKind::CallExternal { args, .. } => {
                args.iter().collect()
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::ConstI32 { value } => write!(f, "{}", value),
            ExprKind::ConstI64 { value } => write!(f, "{}L", value),
            ExprKind::ConstF32 { value } => write!(f, "{:?}f", value),
            ExprKind::ConstF64 { value } => write!(f, "{:?}", value),
            ExprKind::GetLocal { local } => write!(f, "{}", local),
            ExprKind::Load { mtype, address } => write!(f, "load.{}[{}]", mtype, address),
            ExprKind::Store {
                mtype,
                address,
                value,
            } => write!(f, "store.{}[{}] = {}", mtype, address, value),
            ExprKind::PrefixOp { op, expr } => write!(f, "({}:{} {})", op, self.etype, expr),
            ExprKind::BinaryOp {
                op,
                optype,
                left,
                right,
            } => {
                if optype == &self.etype {
                    write!(f, "({} {}:{} {})", left, op, optype, right)
                } else {
                    write!(f, "({} {}:{}->{} {})", left, op, optype, self.etype, right)
                }
            }
            ExprKind::Coerce { mtype, expr } => write!(f, "{}({})", mtype, expr),
            ExprKind::CallDirect { func, args } => {
                write!(f, "call {}(", func)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::CallExternal { func, args } => {
                write!(f, "call_extern {}(", func)?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        otherwise: Option<Vec<Stmt>>,
    },
    /// Pretest loop; removed by desugaring
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// Unconditional loop left only by `Break` or `Return`
    Loop {
        body: Vec<Stmt>,
    },
    SetLocal {
        local: LocalId,
        value: Expr,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Break,
    Expr {
        expr: Expr,
    },
}

impl Stmt {
    pub fn if_then(cond: Expr, then: Vec<Stmt>) -> Self {
        Stmt::If {
            cond,
            then,
            otherwise: None,
        }
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> Self {
        Stmt::If {
            cond,
            then,
            otherwise: Some(otherwise),
        }
    }

    pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Self {
        Stmt::While { cond, body }
    }

    pub fn set_local(local: LocalId, value: Expr) -> Self {
        Stmt::SetLocal { local, value }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::Return { value }
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr { expr }
    }

    pub(crate) fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                writeln!(f, "{}if {} {{", pad, cond)?;
                fmt_block(f, then, depth + 1)?;
                if let Some(otherwise) = otherwise {
                    writeln!(f, "{}}} else {{", pad)?;
                    fmt_block(f, otherwise, depth + 1)?;
                }
                writeln!(f, "{}}}", pad)
            }
            Stmt::While { cond, body } => {
                writeln!(f, "{}while {} {{", pad, cond)?;
                fmt_block(f, body, depth + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::Loop { body } => {
                writeln!(f, "{}loop {{", pad)?;
                fmt_block(f, body, depth + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::SetLocal { local, value } => writeln!(f, "{}{} = {}", pad, local, value),
            Stmt::Return { value: Some(value) } => writeln!(f, "{}return {}", pad, value),
            Stmt::Return { value: None } => writeln!(f, "{}return", pad),
            Stmt::Break => writeln!(f, "{}break", pad),
            Stmt::Expr { expr } => writeln!(f, "{}{}", pad, expr),
        }
    }
}

pub(crate) fn fmt_block(f: &mut fmt::Formatter<'_>, block: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in block {
        stmt.fmt_indented(f, depth)?;
    }
    Ok(())
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_yields_i32() {
        let e = Expr::compare(BinaryOp::Lt, Type::F64, Expr::const_f64(1.0), Expr::const_f64(2.0));
        assert_eq!(e.etype, Type::I32);
        assert!(matches!(e.kind, ExprKind::BinaryOp { optype: Type::F64, .. }));
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::arith(
            BinaryOp::Add,
            Type::I32,
            Expr::get_local(LocalId(0), Type::I32),
            Expr::const_i32(1),
        );
        assert_eq!(e.to_string(), "($0 +:i32 1)");
    }

    #[test]
    fn test_json_shape() {
        let e = Expr::load(MemType::U8, Expr::const_i32(16));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "Load");
        assert_eq!(json["mtype"], "u8");
        assert_eq!(json["etype"], "i32");

        let back: Expr = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_children_order() {
        let e = Expr::store(MemType::I32, Expr::const_i32(0), Expr::const_i32(7));
        let kids = e.children();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[1], &Expr::const_i32(7));
    }
}
