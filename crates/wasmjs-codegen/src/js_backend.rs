//! JavaScript backend
//!
//! Translates a desugared module into a factory expression:
//!
//! ```text
//! function(foreign) {
//!   var stdlib = {Math: Math, Uint8Array: Uint8Array, ...};
//!   var buffer = new ArrayBuffer(<memory size>);
//!   var module = function(stdlib, foreign, buffer) {
//!     var U8 = new stdlib.Uint8Array(buffer);     // one per view
//!     var fround = stdlib.Math.fround;
//!     var imul = stdlib.Math.imul;
//!     var <extern> = foreign.<extern>;            // one per import
//!     var <func> = function(...) {...};           // one per function
//!     return {<exports>, _copyOut: function(src, size, dst) {...}};
//!   };
//!   return module(stdlib, foreign, buffer);
//! }
//! ```
//!
//! Host numbers carry no width, so every value whose width matters is
//! forced into shape with a coercion: `x | 0` for `i32`, `fround(x)` for
//! `f32`, `+x` for `f64`. A coercion is only emitted when the shape of the
//! expression does not already imply the type.

use crate::error::{CodegenError, CodegenResult};
use crate::js::{self, BinOp, Implicit, UnaryOp};
use crate::views::{view_for, VIEWS};
use crate::{CodeGen, GeneratedProgram};
use wasmjs_ir::{BinaryOp, Config, Expr, ExprKind, Func, LocalId, MemType, Module, PrefixOp, Stmt, Type};

/// Name of the bounds-checked copy export every instance carries
pub const COPY_OUT: &str = "_copyOut";

/// Globals the wrapper captures into `stdlib`
fn stdlib_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("Math").chain(VIEWS.iter().map(|v| v.constructor))
}

/// Wraps `expr` in the coercion for `ty` unless it already has that type.
pub fn coerce(expr: js::Expr, ty: Type) -> CodegenResult<js::Expr> {
    let implicit = expr.implicit_type();
    match ty {
        Type::I32 if implicit == Implicit::I32 => Ok(expr),
        Type::F32 if implicit == Implicit::F32 => Ok(expr),
        Type::F64 if implicit == Implicit::F64 => Ok(expr),
        Type::I32 => Ok(js::Expr::binary(BinOp::BitOr, expr, js::Expr::num(0.0))),
        Type::F32 => Ok(js::Expr::call_name("fround", vec![expr])),
        Type::F64 => Ok(js::Expr::prefix(UnaryOp::Plus, expr)),
        other => Err(CodegenError::UnsupportedCoercion(other)),
    }
}

/// Zero of `ty`, built through the coercion
fn zero_value(ty: Type) -> CodegenResult<js::Expr> {
    coerce(js::Expr::num(0.0), ty)
}

fn binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Rem => BinOp::Rem,
        BinaryOp::And => BinOp::BitAnd,
        BinaryOp::Or => BinOp::BitOr,
        BinaryOp::Xor => BinOp::BitXor,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Ne => BinOp::Ne,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::Le => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::Ge => BinOp::Ge,
    }
}

fn unary(op: PrefixOp) -> UnaryOp {
    match op {
        PrefixOp::Not => UnaryOp::Not,
        PrefixOp::Neg => UnaryOp::Neg,
        PrefixOp::BitNot => UnaryOp::BitNot,
    }
}

/// `var name = init;`
fn var(name: impl Into<String>, init: js::Expr) -> js::Stmt {
    js::Stmt::Var {
        name: name.into(),
        init,
    }
}

/// `base.a.b...`
fn path(base: &str, attrs: &[&str]) -> js::Expr {
    attrs
        .iter()
        .fold(js::Expr::name(base), |target, attr| js::Expr::attr(target, *attr))
}

/// JavaScript code generation backend
#[derive(Debug, Default)]
pub struct JsBackend;

impl JsBackend {
    pub fn new() -> Self {
        Self
    }

    fn translate_func(&self, module: &Module, func: &Func) -> CodegenResult<js::Stmt> {
        tracing::debug!("generating function `{}`", func.name);

        let mut body = Vec::with_capacity(func.locals.len() + func.body.len());
        let mut params = Vec::with_capacity(func.params.len());

        // Callers, foreign ones included, may pass anything: re-coerce.
        for param in &func.params {
            params.push(param.name.clone());
            body.push(var(&param.name, coerce(js::Expr::name(&param.name), param.ty)?));
        }
        for local in func.locals.iter().skip(func.params.len()) {
            body.push(var(&local.name, zero_value(local.ty)?));
        }

        let translator = FuncTranslator { module, func };
        translator.block(&func.body, &mut body)?;

        Ok(var(&func.name, js::Expr::function(params, body)))
    }

    /// `function(stdlib, foreign, buffer) { ... }`
    fn translate_module(&self, module: &Module) -> CodegenResult<js::Expr> {
        let mut body = Vec::new();

        for view in &VIEWS {
            body.push(var(
                view.binding,
                js::Expr::new_object(path("stdlib", &[view.constructor]), vec![js::Expr::name("buffer")]),
            ));
        }
        body.push(var("fround", path("stdlib", &["Math", "fround"])));
        body.push(var("imul", path("stdlib", &["Math", "imul"])));

        for ext in &module.externs {
            body.push(var(&ext.name, path("foreign", &[ext.name.as_str()])));
        }

        let mut exports = Vec::new();
        for func in &module.funcs {
            body.push(self.translate_func(module, func)?);
            if func.export {
                exports.push((func.name.clone(), js::Expr::name(&func.name)));
            }
        }
        exports.push((COPY_OUT.to_string(), copy_out()));

        body.push(js::Stmt::Return(Some(js::Expr::Object(exports))));

        Ok(js::Expr::function(
            vec!["stdlib".to_string(), "foreign".to_string(), "buffer".to_string()],
            body,
        ))
    }

    /// `function(foreign) { ... }` around the module body
    fn wrap(&self, module_fn: js::Expr, config: &Config) -> js::Expr {
        let stdlib = stdlib_names()
            .map(|name| (name.to_string(), js::Expr::name(name)))
            .collect();

        let body = vec![
            var("stdlib", js::Expr::Object(stdlib)),
            var(
                "buffer",
                js::Expr::new_object(
                    js::Expr::name("ArrayBuffer"),
                    vec![js::Expr::num(config.memory.fixed as f64)],
                ),
            ),
            var("module", module_fn),
            js::Stmt::Return(Some(js::Expr::call_name(
                "module",
                vec![js::Expr::name("stdlib"), js::Expr::name("foreign"), js::Expr::name("buffer")],
            ))),
        ];

        js::Expr::function(vec!["foreign".to_string()], body)
    }
}

/// Unchecked copy of `size` bytes at `src` into the typed array `dst`
fn copy_out() -> js::Expr {
    let range = js::Expr::call(
        path("I8", &["subarray"]),
        vec![
            js::Expr::name("src"),
            js::Expr::binary(BinOp::Add, js::Expr::name("src"), js::Expr::name("size")),
        ],
    );
    js::Expr::function(
        vec!["src".to_string(), "size".to_string(), "dst".to_string()],
        vec![js::Stmt::Expr(js::Expr::call(path("dst", &["set"]), vec![range]))],
    )
}

impl CodeGen for JsBackend {
    type Output = CodegenResult<GeneratedProgram>;

    fn generate(&self, module: &Module) -> Self::Output {
        let module_fn = self.translate_module(module)?;
        let factory = self.wrap(module_fn, &module.config);

        let exports: Vec<String> = module.exports().map(str::to_string).collect();
        tracing::info!(
            "generated module: {} function(s), {} export(s), {} bytes of memory",
            module.funcs.len(),
            exports.len(),
            module.config.memory.fixed
        );

        Ok(GeneratedProgram {
            factory,
            config: module.config,
            exports,
        })
    }
}

/// Translates the body of one function
struct FuncTranslator<'m> {
    module: &'m Module,
    func: &'m Func,
}

impl<'m> FuncTranslator<'m> {
    fn local_name(&self, local: LocalId) -> CodegenResult<&'m str> {
        self.func
            .local(local)
            .map(|l| l.name.as_str())
            .ok_or_else(|| CodegenError::UnknownLocal {
                func: self.func.name.clone(),
                local,
            })
    }

    /// `VIEW[address >> log2(size)]`
    fn view_index(&self, mtype: MemType, address: &Expr) -> CodegenResult<js::Expr> {
        let view = view_for(mtype);
        let index = js::Expr::binary(
            BinOp::Shr,
            self.expr(address)?,
            js::Expr::num(mtype.shift() as f64),
        );
        Ok(js::Expr::index(js::Expr::name(view.binding), index))
    }

    fn args(&self, args: &[Expr]) -> CodegenResult<Vec<js::Expr>> {
        args.iter().map(|a| self.expr(a)).collect()
    }

    fn expr(&self, expr: &Expr) -> CodegenResult<js::Expr> {
        match &expr.kind {
            ExprKind::ConstI32 { value } => Ok(js::Expr::num(*value as f64)),
            ExprKind::ConstF32 { value } => Ok(js::Expr::num(*value as f64)),
            ExprKind::ConstF64 { value } => Ok(js::Expr::num(*value)),
            ExprKind::ConstI64 { value } => Err(CodegenError::Unsupported(format!(
                "i64 constant {} has no host representation",
                value
            ))),
            ExprKind::GetLocal { local } => Ok(js::Expr::name(self.local_name(*local)?)),
            ExprKind::Load { mtype, address } => self.view_index(*mtype, address),
            ExprKind::Store {
                mtype,
                address,
                value,
            } => Ok(js::Expr::assign(self.view_index(*mtype, address)?, self.expr(value)?)),
            ExprKind::PrefixOp { op, expr: operand } => {
                let translated = js::Expr::prefix(unary(*op), self.expr(operand)?);
                coerce(translated, expr.etype)
            }
            ExprKind::Coerce { mtype, expr: inner } => coerce(self.expr(inner)?, *mtype),
            ExprKind::BinaryOp {
                op, left, right, ..
            } => self.binary(*op, left, right, expr.etype),
            ExprKind::CallDirect { func, args } => {
                let callee = self
                    .module
                    .func(*func)
                    .ok_or(CodegenError::UnknownFunction(*func))?;
                Ok(js::Expr::call_name(&callee.name, self.args(args)?))
            }
            ExprKind::CallExternal { func, args } => {
                let callee = self
                    .module
                    .extern_(*func)
                    .ok_or(CodegenError::UnknownExtern(*func))?;
                Ok(js::Expr::call_name(&callee.name, self.args(args)?))
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, etype: Type) -> CodegenResult<js::Expr> {
        let left = self.expr(left)?;
        let right = self.expr(right)?;

        match etype {
            // A double product loses the low bits once it passes 2^53.
            Type::I32 if op == BinaryOp::Mul => Ok(js::Expr::call_name("imul", vec![left, right])),
            Type::I32 | Type::F32 => coerce(js::Expr::binary(binop(op), left, right), etype),
            Type::F64 => Ok(js::Expr::binary(binop(op), left, right)),
            other => Err(CodegenError::Unsupported(format!(
                "`{}` producing {}",
                op, other
            ))),
        }
    }

    fn block(&self, block: &[Stmt], out: &mut Vec<js::Stmt>) -> CodegenResult<()> {
        for stmt in block {
            self.stmt(stmt, out)?;
        }
        Ok(())
    }

    fn nested(&self, block: &[Stmt]) -> CodegenResult<Vec<js::Stmt>> {
        let mut out = Vec::with_capacity(block.len());
        self.block(block, &mut out)?;
        Ok(out)
    }

    fn stmt(&self, stmt: &Stmt, out: &mut Vec<js::Stmt>) -> CodegenResult<()> {
        let translated = match stmt {
            Stmt::If {
                cond,
                then,
                otherwise,
            } => js::Stmt::If {
                cond: self.expr(cond)?,
                then: self.nested(then)?,
                otherwise: otherwise.as_deref().map(|b| self.nested(b)).transpose()?,
            },
            Stmt::Loop { body } => js::Stmt::While {
                cond: js::Expr::name("true"),
                body: self.nested(body)?,
            },
            Stmt::While { .. } => {
                return Err(CodegenError::Unsupported(format!(
                    "`while` in `{}` must be desugared first",
                    self.func.name
                )))
            }
            Stmt::SetLocal { local, value } => js::Stmt::Expr(js::Expr::assign(
                js::Expr::name(self.local_name(*local)?),
                self.expr(value)?,
            )),
            Stmt::Return { value } => js::Stmt::Return(value.as_ref().map(|v| self.expr(v)).transpose()?),
            Stmt::Break => js::Stmt::Break,
            Stmt::Expr { expr } => js::Stmt::Expr(self.expr(expr)?),
        };
        out.push(translated);
        Ok(())
    }
}
