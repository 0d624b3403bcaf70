//! Desugaring pass
//!
//! Rewrites a module in place into the reduced form the code generator
//! translates directly:
//!
//! - no `i8`/`i16` anywhere: narrow values are computed on `i32` and
//!   sign-extended with a `<<` / `>>` pair
//! - no `while`: `while (c) { body }` becomes `loop { if (!c) break; body }`
//! - no `!=`: `a != b` becomes `!(a == b)`
//! - logical not only on `i32`: `!x` on `i64`/`f32`/`f64` becomes `x == 0`
//!   at the operand's width, yielding `i32`
//! - double negation of a value that is already 0/1 is dropped
//!
//! Rules run bottom-up (see [`crate::traverse`]), so each rule sees operands
//! that are already in their final shape.

use crate::error::{IrError, IrResult};
use crate::instruction::{BinaryOp, Expr, ExprKind, PrefixOp, Stmt};
use crate::module::{Extern, Func, Module};
use crate::traverse::{BottomUp, Rewriter};
use crate::types::Type;

/// Desugars every function and extern of `module`.
///
/// On error the module is left partially rewritten and must not be passed
/// on to code generation.
pub fn process(module: &mut Module) -> IrResult<()> {
    tracing::debug!(
        "desugaring {} function(s), {} extern(s)",
        module.funcs.len(),
        module.externs.len()
    );
    let mut walker = BottomUp::new(Desugar);
    walker.process_module(module)
}

/// The rewrite rules
#[derive(Debug, Default)]
pub struct Desugar;

/// A value already known to be canonical 0/1.
fn naturally_bool(expr: &Expr) -> bool {
    if expr.etype != Type::I32 {
        return false;
    }
    match &expr.kind {
        ExprKind::ConstI32 { value } => *value == 0 || *value == 1,
        ExprKind::PrefixOp { op: PrefixOp::Not, .. } => true,
        ExprKind::BinaryOp { op, .. } => op.is_compare(),
        _ => false,
    }
}

/// `!!x` → `x` when `x` is naturally boolean; any other node is returned
/// unchanged.
fn peel_bool_not(node: Expr) -> Expr {
    let Expr { kind, etype } = node;
    let operand = match kind {
        ExprKind::PrefixOp {
            op: PrefixOp::Not,
            expr,
        } => *expr,
        kind => return Expr::new(kind, etype),
    };

    let Expr {
        kind: operand_kind,
        etype: operand_etype,
    } = operand;
    match operand_kind {
        ExprKind::PrefixOp {
            op: PrefixOp::Not,
            expr: inner,
        } if naturally_bool(&inner) => *inner,
        operand_kind => Expr::prefix(PrefixOp::Not, Expr::new(operand_kind, operand_etype), etype),
    }
}

/// Logical not of an already-rewritten operand.
fn lower_not(operand: Expr, etype: Type) -> Expr {
    match operand.etype {
        Type::I64 => Expr::compare(BinaryOp::Eq, Type::I64, operand, Expr::const_i64(0)),
        Type::F32 => Expr::compare(BinaryOp::Eq, Type::F32, operand, Expr::const_f32(0.0)),
        Type::F64 => Expr::compare(BinaryOp::Eq, Type::F64, operand, Expr::const_f64(0.0)),
        _ => peel_bool_not(Expr::prefix(PrefixOp::Not, operand, etype)),
    }
}

/// Wraps a narrow-typed node in a sign-extending shift pair and retypes it
/// to `i32`.
fn truncate_narrow(mut expr: Expr) -> Expr {
    let Some(bits) = expr.etype.narrow_bits() else {
        return expr;
    };
    let shift = (32 - bits) as i32;
    expr.etype = Type::I32;

    Expr::arith(
        BinaryOp::Shr,
        Type::I32,
        Expr::arith(BinaryOp::Shl, Type::I32, expr, Expr::const_i32(shift)),
        Expr::const_i32(shift),
    )
}

fn simplify_local_type(ty: Type, what: &str) -> IrResult<Type> {
    if ty == Type::Void {
        return Err(IrError::Malformed(format!("{} declared as void", what)));
    }
    Ok(ty.simplify())
}

impl Desugar {
    /// Builds `!expr` under the same rules as a frontend-written not.
    pub fn not(&self, expr: Expr) -> Expr {
        lower_not(expr, Type::I32)
    }

    fn fold_coerce(&self, mtype: Type, expr: Expr, etype: Type) -> IrResult<Expr> {
        if mtype == Type::Void || expr.etype == Type::Void {
            return Err(IrError::Malformed(format!(
                "coercion of {} value to {}",
                expr.etype, mtype
            )));
        }

        let simplified = mtype.simplify();
        if simplified == expr.etype {
            // Same machine type: the coercion only narrows, which the
            // truncation rule expresses on the operand itself.
            let mut expr = expr;
            expr.etype = mtype;
            Ok(expr)
        } else {
            Ok(Expr::new(
                ExprKind::Coerce {
                    mtype: simplified,
                    expr: Box::new(expr),
                },
                etype,
            ))
        }
    }
}

impl Rewriter for Desugar {
    fn rewrite_expr(&mut self, expr: Expr) -> IrResult<Expr> {
        let Expr { kind, etype } = expr;
        let expr = match kind {
            ExprKind::Coerce { mtype, expr } => self.fold_coerce(mtype, *expr, etype)?,
            ExprKind::PrefixOp {
                op: PrefixOp::Not,
                expr,
            } => lower_not(*expr, etype),
            ExprKind::BinaryOp {
                op: BinaryOp::Ne,
                optype,
                left,
                right,
            } => self.not(Expr::new(
                ExprKind::BinaryOp {
                    op: BinaryOp::Eq,
                    optype: optype.simplify(),
                    left,
                    right,
                },
                etype,
            )),
            ExprKind::BinaryOp {
                op,
                optype,
                left,
                right,
            } => Expr::new(
                ExprKind::BinaryOp {
                    op,
                    optype: optype.simplify(),
                    left,
                    right,
                },
                etype,
            ),
            kind => Expr::new(kind, etype),
        };
        Ok(truncate_narrow(expr))
    }

    fn rewrite_stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) -> IrResult<()> {
        match stmt {
            Stmt::While { cond, body } => {
                let mut lowered = Vec::with_capacity(body.len() + 1);
                lowered.push(Stmt::if_then(self.not(cond), vec![Stmt::Break]));
                lowered.extend(body);
                out.push(Stmt::Loop { body: lowered });
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn rewrite_func(&mut self, func: &mut Func) -> IrResult<()> {
        for param in &mut func.params {
            param.ty = simplify_local_type(param.ty, &format!("parameter `{}`", param.name))?;
        }
        for local in &mut func.locals {
            local.ty = simplify_local_type(local.ty, &format!("local `{}`", local.name))?;
        }
        func.return_type = func.return_type.simplify();
        tracing::debug!("desugared function `{}`", func.name);
        Ok(())
    }

    fn rewrite_extern(&mut self, ext: &mut Extern) -> IrResult<()> {
        for param in &mut ext.ftype.params {
            *param = simplify_local_type(*param, &format!("parameter of extern `{}`", ext.name))?;
        }
        ext.ftype.ret = ext.ftype.ret.simplify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ExternId, FuncType, Local, LocalId};
    use pretty_assertions::assert_eq;

    fn desugar_expr(expr: Expr) -> Expr {
        BottomUp::new(Desugar).process_expr(expr).unwrap()
    }

    /// Folds constant `i32` trees the way a 32-bit machine would
    fn eval_i32(expr: &Expr) -> i32 {
        match &expr.kind {
            ExprKind::ConstI32 { value } => *value,
            ExprKind::BinaryOp {
                op, left, right, ..
            } => {
                let (l, r) = (eval_i32(left), eval_i32(right));
                match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::Eq => (l == r) as i32,
                    other => panic!("no folding for {}", other),
                }
            }
            ExprKind::PrefixOp { op: PrefixOp::Not, expr } => (eval_i32(expr) == 0) as i32,
            other => panic!("no folding for {:?}", other),
        }
    }

    fn local(ty: Type) -> Expr {
        Expr::get_local(LocalId(0), ty)
    }

    fn lt(l: Expr, r: Expr) -> Expr {
        Expr::compare(BinaryOp::Lt, Type::I32, l, r)
    }

    #[test]
    fn test_i8_result_is_sign_extended() {
        let sum = Expr::arith(BinaryOp::Add, Type::I8, Expr::const_i32(100), Expr::const_i32(100));
        let out = desugar_expr(sum);

        assert_eq!(out.etype, Type::I32);
        assert_eq!(out.to_string(), "(((100 +:i32 100) <<:i32 24) >>:i32 24)");
        assert_eq!(eval_i32(&out), -56);
    }

    #[test]
    fn test_i16_result_is_sign_extended() {
        let product = Expr::arith(BinaryOp::Mul, Type::I16, Expr::const_i32(300), Expr::const_i32(300));
        let out = desugar_expr(product);

        assert_eq!(out.etype, Type::I32);
        assert_eq!(eval_i32(&out), (90000_i32 as i16) as i32);
    }

    #[test]
    fn test_double_not_of_compare_is_removed() {
        let cmp = lt(local(Type::I32), Expr::const_i32(3));
        let out = desugar_expr(Expr::not(Expr::not(cmp.clone())));
        assert_eq!(out, cmp);
    }

    #[test]
    fn test_double_not_of_plain_value_is_kept() {
        let out = desugar_expr(Expr::not(Expr::not(local(Type::I32))));
        assert_eq!(out.to_string(), "(!:i32 (!:i32 $0))");
    }

    #[test]
    fn test_double_not_of_bool_constant_is_removed() {
        let out = desugar_expr(Expr::not(Expr::not(Expr::const_i32(1))));
        assert_eq!(out, Expr::const_i32(1));

        let kept = desugar_expr(Expr::not(Expr::not(Expr::const_i32(2))));
        assert!(kept.is_logical_not());
    }

    #[test]
    fn test_not_equal_becomes_negated_eq() {
        let ne = Expr::compare(BinaryOp::Ne, Type::I32, local(Type::I32), Expr::const_i32(4));
        let out = desugar_expr(ne);
        assert_eq!(out.to_string(), "(!:i32 ($0 ==:i32 4))");
    }

    #[test]
    fn test_not_equal_matches_negated_eq() {
        for (a, b) in [(0, 0), (3, 4), (-1, -1), (i32::MIN, i32::MAX)] {
            let ne = desugar_expr(Expr::compare(
                BinaryOp::Ne,
                Type::I32,
                Expr::const_i32(a),
                Expr::const_i32(b),
            ));
            let not_eq = desugar_expr(Expr::not(Expr::compare(
                BinaryOp::Eq,
                Type::I32,
                Expr::const_i32(a),
                Expr::const_i32(b),
            )));
            assert_eq!(eval_i32(&ne), eval_i32(&not_eq));
            assert_eq!(eval_i32(&ne), (a != b) as i32);
        }
    }

    #[test]
    fn test_not_of_not_equal_cancels() {
        let ne = Expr::compare(BinaryOp::Ne, Type::F64, local(Type::F64), Expr::const_f64(1.5));
        let out = desugar_expr(Expr::not(ne));
        assert_eq!(out.to_string(), "($0 ==:f64->i32 1.5)");
    }

    #[test]
    fn test_float_not_becomes_compare_with_zero() {
        let out = desugar_expr(Expr::not(local(Type::F64)));
        assert_eq!(out.etype, Type::I32);
        assert_eq!(out.to_string(), "($0 ==:f64->i32 0.0)");

        let out = desugar_expr(Expr::not(local(Type::F32)));
        assert_eq!(out.to_string(), "($0 ==:f32->i32 0.0f)");
    }

    #[test]
    fn test_i64_not_yields_i32() {
        let out = desugar_expr(Expr::not(local(Type::I64)));
        assert_eq!(out.etype, Type::I32);
        assert!(matches!(
            out.kind,
            ExprKind::BinaryOp { op: BinaryOp::Eq, optype: Type::I64, .. }
        ));
    }

    #[test]
    fn test_coerce_to_narrow_type_folds_into_truncation() {
        let out = desugar_expr(Expr::coerce(Type::I8, Expr::const_i32(200)));
        assert_eq!(out.etype, Type::I32);
        assert_eq!(eval_i32(&out), -56);
    }

    #[test]
    fn test_coerce_between_machine_types_is_kept() {
        let out = desugar_expr(Expr::coerce(Type::F64, local(Type::I32)));
        assert_eq!(out.to_string(), "f64($0)");
    }

    #[test]
    fn test_coerce_to_void_is_fatal() {
        let err = BottomUp::new(Desugar)
            .process_expr(Expr::coerce(Type::Void, Expr::const_i32(1)))
            .unwrap_err();
        assert!(matches!(err, IrError::Malformed(_)));
    }

    #[test]
    fn test_narrow_compare_operand_width_is_simplified() {
        let cmp = Expr::compare(BinaryOp::Lt, Type::I16, local(Type::I32), Expr::const_i32(1));
        let out = desugar_expr(cmp);
        assert!(matches!(out.kind, ExprKind::BinaryOp { optype: Type::I32, .. }));
    }

    #[test]
    fn test_while_becomes_loop_with_break() {
        let cond = lt(local(Type::I32), Expr::const_i32(10));
        let body = vec![Stmt::set_local(
            LocalId(0),
            Expr::arith(BinaryOp::Add, Type::I32, local(Type::I32), Expr::const_i32(1)),
        )];
        let mut walker = BottomUp::new(Desugar);
        let out = walker
            .process_block(vec![Stmt::while_loop(cond.clone(), body.clone())])
            .unwrap();

        let mut expected_body = vec![Stmt::if_then(Expr::not(cond), vec![Stmt::Break])];
        expected_body.extend(body);
        assert_eq!(out, vec![Stmt::Loop { body: expected_body }]);
    }

    #[test]
    fn test_while_on_float_condition_lowers_not() {
        let mut walker = BottomUp::new(Desugar);
        let out = walker
            .process_block(vec![Stmt::while_loop(local(Type::F64), vec![])])
            .unwrap();

        let Stmt::Loop { body } = &out[0] else {
            panic!("expected loop, got {:?}", out[0]);
        };
        let Stmt::If { cond, .. } = &body[0] else {
            panic!("expected if, got {:?}", body[0]);
        };
        assert_eq!(cond.to_string(), "($0 ==:f64->i32 0.0)");
    }

    #[test]
    fn test_nested_while_is_lowered() {
        let inner = Stmt::while_loop(Expr::const_i32(0), vec![]);
        let outer = Stmt::while_loop(Expr::const_i32(1), vec![inner]);
        let out = BottomUp::new(Desugar).process_block(vec![outer]).unwrap();
        let dump = out[0].to_string();
        assert!(!dump.contains("while"));
        assert_eq!(dump.matches("loop").count(), 2);
    }

    #[test]
    fn test_signatures_lose_narrow_types() {
        let mut module = Module::default();
        let mut func = Func::new(
            "f",
            vec![Local::new("a", Type::I8), Local::new("b", Type::F32)],
            Type::I16,
        );
        func.add_local("c", Type::I16);
        module.add_func(func);
        let ext = module.add_extern(Extern::new("g", FuncType::new(vec![Type::I8], Type::I16)));

        process(&mut module).unwrap();

        let func = &module.funcs[0];
        assert_eq!(func.params[0].ty, Type::I32);
        assert_eq!(func.params[1].ty, Type::F32);
        assert_eq!(func.locals[2].ty, Type::I32);
        assert_eq!(func.return_type, Type::I32);
        assert_eq!(module.externs[ext.0].ftype, FuncType::new(vec![Type::I32], Type::I32));
        assert_eq!(ext, ExternId(0));
    }

    #[test]
    fn test_void_local_is_fatal() {
        let mut module = Module::default();
        let mut func = Func::new("f", vec![], Type::Void);
        func.add_local("bad", Type::Void);
        module.add_func(func);

        assert!(process(&mut module).is_err());
    }
}
