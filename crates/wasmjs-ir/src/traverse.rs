//! Bottom-up tree rewriting
//!
//! [`BottomUp`] walks a module and hands every node to a [`Rewriter`] only
//! after all of the node's children have been rewritten, so a rule may rely
//! on the already-normalized shape and `etype` of its operands.
//!
//! Nodes are moved through the walk: each visit takes ownership of a
//! subtree and returns its replacement, so a rule can wrap, drop or
//! replace a node without aliasing.

use crate::error::IrResult;
use crate::instruction::{Expr, ExprKind, Stmt};
use crate::module::{Extern, Func, Module};

/// Rewrite rules applied by [`BottomUp`]. Every hook defaults to identity.
pub trait Rewriter {
    /// Rewrites an expression whose children are already rewritten.
    fn rewrite_expr(&mut self, expr: Expr) -> IrResult<Expr> {
        Ok(expr)
    }

    /// Rewrites a statement whose children are already rewritten. The
    /// result is pushed onto `out`; a rule may push several statements
    /// or none.
    fn rewrite_stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) -> IrResult<()> {
        out.push(stmt);
        Ok(())
    }

    /// Called once the body of `func` has been rewritten.
    fn rewrite_func(&mut self, _func: &mut Func) -> IrResult<()> {
        Ok(())
    }

    fn rewrite_extern(&mut self, _ext: &mut Extern) -> IrResult<()> {
        Ok(())
    }
}

/// Children-before-parent driver for a [`Rewriter`]
pub struct BottomUp<R> {
    rewriter: R,
}

impl<R: Rewriter> BottomUp<R> {
    pub fn new(rewriter: R) -> Self {
        Self { rewriter }
    }

    pub fn into_inner(self) -> R {
        self.rewriter
    }

    pub fn process_module(&mut self, module: &mut Module) -> IrResult<()> {
        for ext in &mut module.externs {
            self.rewriter.rewrite_extern(ext)?;
        }
        for func in &mut module.funcs {
            self.process_func(func)?;
        }
        Ok(())
    }

    pub fn process_func(&mut self, func: &mut Func) -> IrResult<()> {
        let body = std::mem::take(&mut func.body);
        func.body = self.process_block(body)?;
        self.rewriter.rewrite_func(func)
    }

    pub fn process_block(&mut self, block: Vec<Stmt>) -> IrResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(block.len());
        for stmt in block {
            self.process_stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    pub fn process_stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) -> IrResult<()> {
        let stmt = match stmt {
            Stmt::If {
                cond,
                then,
                otherwise,
            } => Stmt::If {
                cond: self.process_expr(cond)?,
                then: self.process_block(then)?,
                otherwise: otherwise.map(|b| self.process_block(b)).transpose()?,
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.process_expr(cond)?,
                body: self.process_block(body)?,
            },
            Stmt::Loop { body } => Stmt::Loop {
                body: self.process_block(body)?,
            },
            Stmt::SetLocal { local, value } => Stmt::SetLocal {
                local,
                value: self.process_expr(value)?,
            },
            Stmt::Return { value } => Stmt::Return {
                value: value.map(|v| self.process_expr(v)).transpose()?,
            },
            Stmt::Break => Stmt::Break,
            Stmt::Expr { expr } => Stmt::Expr {
                expr: self.process_expr(expr)?,
            },
        };
        self.rewriter.rewrite_stmt(stmt, out)
    }

    pub fn process_expr(&mut self, expr: Expr) -> IrResult<Expr> {
        let Expr { kind, etype } = expr;
        let kind = match kind {
            leaf @ (ExprKind::ConstI32 { .. }
            | ExprKind::ConstI64 { .. }
            | ExprKind::ConstF32 { .. }
            | ExprKind::ConstF64 { .. }
            | ExprKind::GetLocal { .. }) => leaf,
            ExprKind::Load { mtype, address } => ExprKind::Load {
                mtype,
                address: self.process_boxed(address)?,
            },
            ExprKind::Store {
                mtype,
                address,
                value,
            } => ExprKind::Store {
                mtype,
                address: self.process_boxed(address)?,
                value: self.process_boxed(value)?,
            },
            ExprKind::PrefixOp { op, expr } => ExprKind::PrefixOp {
                op,
                expr: self.process_boxed(expr)?,
            },
            ExprKind::BinaryOp {
                op,
                optype,
                left,
                right,
            } => ExprKind::BinaryOp {
                op,
                optype,
                left: self.process_boxed(left)?,
                right: self.process_boxed(right)?,
            },
            ExprKind::Coerce { mtype, expr } => ExprKind::Coerce {
                mtype,
                expr: self.process_boxed(expr)?,
            },
            ExprKind::CallDirect { func, args } => ExprKind::CallDirect {
                func,
                args: self.process_args(args)?,
            },
            ExprKind::CallExternal { func, args } => ExprKind::CallExternal {
                func,
                args: self.process_args(args)?,
            },
        };
        self.rewriter.rewrite_expr(Expr { kind, etype })
    }

    fn process_boxed(&mut self, expr: Box<Expr>) -> IrResult<Box<Expr>> {
        Ok(Box::new(self.process_expr(*expr)?))
    }

    fn process_args(&mut self, args: Vec<Expr>) -> IrResult<Vec<Expr>> {
        args.into_iter().map(|a| self.process_expr(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BinaryOp;
    use crate::types::Type;

    /// Records the order in which constants are visited
    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Rewriter for Recorder {
        fn rewrite_expr(&mut self, expr: Expr) -> IrResult<Expr> {
            self.seen.push(expr.to_string());
            Ok(expr)
        }
    }

    #[test]
    fn test_children_before_parent() {
        let expr = Expr::arith(
            BinaryOp::Sub,
            Type::I32,
            Expr::const_i32(1),
            Expr::const_i32(2),
        );
        let mut walker = BottomUp::new(Recorder::default());
        walker.process_expr(expr).unwrap();

        let seen = walker.into_inner().seen;
        assert_eq!(seen, vec!["1", "2", "(1 -:i32 2)"]);
    }

    #[test]
    fn test_statement_may_expand() {
        struct Duplicate;
        impl Rewriter for Duplicate {
            fn rewrite_stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) -> IrResult<()> {
                out.push(stmt.clone());
                out.push(stmt);
                Ok(())
            }
        }

        let mut walker = BottomUp::new(Duplicate);
        let block = walker.process_block(vec![Stmt::Break]).unwrap();
        assert_eq!(block, vec![Stmt::Break, Stmt::Break]);
    }
}
