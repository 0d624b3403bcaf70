//! Structural validation of modules
//!
//! Modules that do not come from the text frontend (JSON input, hand-built
//! modules) are checked here before desugaring: every ordinal must resolve,
//! call arity must match, parameters must prefix the locals and `break` must
//! sit inside a loop. Problems are collected, not raised; the caller stops
//! when any error was reported.

use crate::instruction::{Expr, ExprKind, Stmt};
use crate::module::{Func, Module};
use crate::types::Type;
use std::collections::HashSet;
use wasmjs_error::{Diagnostic, Diagnostics, ErrorCode};

/// Checks `module` and returns everything that was found
pub fn check_module(module: &Module) -> Diagnostics {
    let mut checker = Checker {
        module,
        diagnostics: Diagnostics::new(),
    };
    checker.check_config();
    checker.check_names();
    for func in &module.funcs {
        checker.check_func(func);
    }
    checker.diagnostics
}

struct Checker<'m> {
    module: &'m Module,
    diagnostics: Diagnostics,
}

/// Position inside the function being checked
struct Scope<'f> {
    func: &'f Func,
    loop_depth: usize,
}

impl<'f> Scope<'f> {
    fn location(&self) -> String {
        format!("func `{}`", self.func.name)
    }
}

impl<'m> Checker<'m> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn check_config(&mut self) {
        let fixed = self.module.config.memory.fixed;
        if fixed == 0 || fixed % 8 != 0 {
            self.report(
                Diagnostic::error(format!("memory size {} is not a positive multiple of 8", fixed))
                    .with_code(ErrorCode::MEMORY_SIZE)
                    .with_note("every typed view, including the 8-byte one, covers the whole buffer"),
            );
        }
    }

    fn check_names(&mut self) {
        let mut seen = HashSet::new();
        let names = self
            .module
            .funcs
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.module.externs.iter().map(|e| e.name.as_str()));
        let mut duplicates = Vec::new();
        for name in names {
            if !seen.insert(name) {
                duplicates.push(name.to_string());
            }
        }
        for name in duplicates {
            self.report(
                Diagnostic::error(format!("`{}` is defined more than once", name))
                    .with_code(ErrorCode::DUPLICATE_NAME),
            );
        }
    }

    fn check_func(&mut self, func: &Func) {
        let prefix_matches = func.locals.len() >= func.params.len()
            && func.params.iter().zip(&func.locals).all(|(p, l)| p == l);
        if !prefix_matches {
            self.report(
                Diagnostic::error("parameters are not the leading locals")
                    .with_code(ErrorCode::PARAM_LOCAL_MISMATCH)
                    .at(format!("func `{}`", func.name)),
            );
        }

        let mut scope = Scope {
            func,
            loop_depth: 0,
        };
        self.check_block(&func.body, &mut scope);
    }

    fn check_block(&mut self, block: &[Stmt], scope: &mut Scope<'_>) {
        for stmt in block {
            self.check_stmt(stmt, scope);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, scope: &mut Scope<'_>) {
        match stmt {
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.check_value(cond, scope);
                self.check_block(then, scope);
                if let Some(otherwise) = otherwise {
                    self.check_block(otherwise, scope);
                }
            }
            Stmt::While { cond, body } => {
                self.check_value(cond, scope);
                scope.loop_depth += 1;
                self.check_block(body, scope);
                scope.loop_depth -= 1;
            }
            Stmt::Loop { body } => {
                scope.loop_depth += 1;
                self.check_block(body, scope);
                scope.loop_depth -= 1;
            }
            Stmt::SetLocal { local, value } => {
                if scope.func.local(*local).is_none() {
                    self.unknown_local(local.0, scope);
                }
                self.check_value(value, scope);
            }
            Stmt::Return { value } => {
                if let Some(value) = value {
                    self.check_value(value, scope);
                }
            }
            Stmt::Break => {
                if scope.loop_depth == 0 {
                    self.report(Diagnostic::error("`break` outside of a loop").at(scope.location()));
                }
            }
            Stmt::Expr { expr } => self.check_expr(expr, scope),
        }
    }

    fn check_expr(&mut self, expr: &Expr, scope: &Scope<'_>) {
        match &expr.kind {
            ExprKind::GetLocal { local } => {
                if scope.func.local(*local).is_none() {
                    self.unknown_local(local.0, scope);
                }
            }
            ExprKind::CallDirect { func, args } => match self.module.func(*func) {
                Some(callee) => self.check_arity(&callee.name, callee.params.len(), args.len(), scope),
                None => self.report(
                    Diagnostic::error(format!("call to unknown function {}", func))
                        .with_code(ErrorCode::UNKNOWN_FUNCTION)
                        .at(scope.location())
                        .with_help(format!("the module declares {} function(s)", self.module.funcs.len())),
                ),
            },
            ExprKind::CallExternal { func, args } => match self.module.extern_(*func) {
                Some(ext) => self.check_arity(&ext.name, ext.ftype.params.len(), args.len(), scope),
                None => self.report(
                    Diagnostic::error(format!("call to unknown extern {}", func))
                        .with_code(ErrorCode::UNKNOWN_EXTERN)
                        .at(scope.location())
                        .with_help(format!("the module declares {} extern(s)", self.module.externs.len())),
                ),
            },
            _ => {}
        }

        for child in expr.children() {
            self.check_value(child, scope);
        }
    }

    /// Checks an expression whose result is used
    fn check_value(&mut self, expr: &Expr, scope: &Scope<'_>) {
        if expr.etype == Type::Void {
            self.report(
                Diagnostic::error("a `void` expression is used as a value")
                    .with_code(ErrorCode::VOID_VALUE)
                    .at(scope.location()),
            );
        }
        self.check_expr(expr, scope);
    }

    fn check_arity(&mut self, callee: &str, expected: usize, found: usize, scope: &Scope<'_>) {
        if expected != found {
            self.report(
                Diagnostic::error(format!(
                    "`{}` takes {} argument(s) but {} were supplied",
                    callee, expected, found
                ))
                .with_code(ErrorCode::ARITY_MISMATCH)
                .at(scope.location()),
            );
        }
    }

    fn unknown_local(&mut self, index: usize, scope: &Scope<'_>) {
        self.report(
            Diagnostic::error(format!("unknown local ${}", index))
                .with_code(ErrorCode::UNKNOWN_LOCAL)
                .at(scope.location())
                .with_note(format!("`{}` has {} local(s)", scope.func.name, scope.func.locals.len())),
        );
    }
}
