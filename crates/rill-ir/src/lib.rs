//! SSA intermediate representation for the Rill compiler.
//!
//! The frontend consumes this crate as an opaque builder: it creates a
//! [`ModuleBuilder`], opens one [`FunctionBuilder`] per compiled function,
//! and appends instructions at the builder's current-block cursor. Control
//! flow is forward-declared — branches are emitted against placeholder
//! successors and patched once the real blocks exist.
//!
//! Blocks carry parameters instead of phi nodes; a branch passes per-edge
//! argument lists to its successor's parameters.

pub mod arena;
pub mod builder;
pub mod func;
pub mod inst;
pub mod module;
pub mod printer;
pub mod ty;
pub mod value;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use func::{Block, BlockId, BlockParam, FuncId, Function, Visibility};
pub use inst::{BranchTarget, CmpKind, Inst, InstId, Op, Span};
pub use module::{ExternDecl, Global, Module, StructDef};
pub use ty::{FunctionSig, Type};
pub use value::{Constant, ValueId};
