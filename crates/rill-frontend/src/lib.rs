//! Frontend core of the Rill compiler.
//!
//! Rill is a small, statically-typed scripting language with a left-to-right
//! pipeline operator whose stages may produce generators. This crate holds
//! the type system, the expression and statement ASTs, generic deduction and
//! realization, and IR emission against [`rill_ir`]'s builders.
//!
//! The surface parser constructs AST nodes through the factories on
//! [`expr::Expr`], [`stmt::Stmt`], and [`pattern::Pattern`], attaching
//! source spans as it goes; the driver then resolves types and asks the
//! top-level function to compile itself into a module. Both parser and
//! driver live outside this crate.

pub mod error;
pub mod expr;
pub mod func;
pub mod generic;
pub mod magic;
pub mod ops;
pub mod pattern;
pub mod runtime;
pub mod stmt;
pub mod types;

pub use error::{CompileError, Result};
pub use expr::{Expr, ExprKind};
pub use func::{FnCtx, Function, LoopFrame, Unit, Var};
pub use generic::CloneCtx;
pub use pattern::{Pattern, PatternKind};
pub use stmt::{Scope, Stmt, StmtKind};
pub use types::{compat, ParamTy, RefTy, Ty, VTable};
