//! Match patterns.
//!
//! The core only relies on this contract: a pattern can resolve against the
//! matched value's type, emit a boolean test, report whether it is a
//! catch-all, and clone under a generic clone context. Exhaustiveness beyond
//! the required catch-all is not checked here.

use std::rc::Rc;

use rill_ir::{BlockId, CmpKind, Span, ValueId};

use crate::error::{err, Result};
use crate::func::{FnCtx, Unit, Var};
use crate::generic::CloneCtx;
use crate::types::Ty;

#[derive(Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Option<Span>,
}

#[derive(Clone)]
pub enum PatternKind {
    /// `_`: matches anything.
    Wildcard,
    /// A name: matches anything and binds the value.
    Bound(Rc<Var>),
    Int(i64),
    Bool(bool),
    /// Matches if any alternative matches.
    Or(Vec<Pattern>),
}

fn node(kind: PatternKind) -> Pattern {
    Pattern { kind, span: None }
}

impl Pattern {
    pub fn wildcard() -> Pattern {
        node(PatternKind::Wildcard)
    }

    pub fn bound(var: Rc<Var>) -> Pattern {
        node(PatternKind::Bound(var))
    }

    pub fn int(n: i64) -> Pattern {
        node(PatternKind::Int(n))
    }

    pub fn bool_(b: bool) -> Pattern {
        node(PatternKind::Bool(b))
    }

    pub fn or(pats: Vec<Pattern>) -> Pattern {
        node(PatternKind::Or(pats))
    }

    pub fn with_span(mut self, span: Span) -> Pattern {
        self.span = Some(span);
        self
    }

    pub fn resolve_types(&mut self, unit: &Unit, val_ty: &Ty) -> Result<()> {
        let span = self.span.clone();
        self.resolve0(unit, val_ty)
            .map_err(|e| e.annotate(span.as_ref()))
    }

    fn resolve0(&mut self, unit: &Unit, val_ty: &Ty) -> Result<()> {
        match &mut self.kind {
            PatternKind::Wildcard => Ok(()),
            PatternKind::Bound(var) => {
                var.set_ty(val_ty.clone());
                Ok(())
            }
            PatternKind::Int(_) => {
                if !val_ty.is(&Ty::Int) {
                    return Err(err!(
                        "cannot match '{}' against an integer pattern",
                        val_ty.name()
                    ));
                }
                Ok(())
            }
            PatternKind::Bool(_) => {
                if !val_ty.is(&Ty::Bool) {
                    return Err(err!(
                        "cannot match '{}' against a boolean pattern",
                        val_ty.name()
                    ));
                }
                Ok(())
            }
            PatternKind::Or(pats) => {
                for p in pats {
                    p.resolve_types(unit, val_ty)?;
                }
                Ok(())
            }
        }
    }

    pub fn is_catch_all(&self) -> bool {
        match &self.kind {
            PatternKind::Wildcard | PatternKind::Bound(_) => true,
            PatternKind::Int(_) | PatternKind::Bool(_) => false,
            PatternKind::Or(pats) => pats.iter().any(Pattern::is_catch_all),
        }
    }

    /// Emit the match test, producing a boolean value.
    pub fn codegen(
        &mut self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        val_ty: &Ty,
        val: ValueId,
    ) -> Result<ValueId> {
        match &mut self.kind {
            PatternKind::Wildcard => Ok(fx.at(*block).const_bool(true)),
            PatternKind::Bound(var) => {
                var.store(unit, fx, *block, val)?;
                Ok(fx.at(*block).const_bool(true))
            }
            PatternKind::Int(n) => {
                let fb = fx.at(*block);
                let pat = fb.const_int(*n);
                Ok(fb.cmp(CmpKind::Eq, val, pat))
            }
            PatternKind::Bool(b) => {
                let fb = fx.at(*block);
                let pat = fb.const_bool(*b);
                Ok(fb.cmp(CmpKind::Eq, val, pat))
            }
            PatternKind::Or(pats) => {
                let mut acc: Option<ValueId> = None;
                for p in pats {
                    let c = p.codegen(unit, fx, block, val_ty, val)?;
                    acc = Some(match acc {
                        None => c,
                        Some(prev) => fx.at(*block).bit_or(prev, c),
                    });
                }
                acc.ok_or_else(|| err!("empty or-pattern"))
            }
        }
    }

    pub fn clone_under(&self, ctx: &mut CloneCtx) -> Pattern {
        let kind = match &self.kind {
            PatternKind::Wildcard => PatternKind::Wildcard,
            PatternKind::Bound(var) => PatternKind::Bound(var.clone_under(ctx)),
            PatternKind::Int(n) => PatternKind::Int(*n),
            PatternKind::Bool(b) => PatternKind::Bool(*b),
            PatternKind::Or(pats) => {
                PatternKind::Or(pats.iter().map(|p| p.clone_under(ctx)).collect())
            }
        };
        Pattern {
            kind,
            span: self.span.clone(),
        }
    }
}
