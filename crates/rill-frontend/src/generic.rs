//! Type-parameter deduction and identity-preserving cloning.
//!
//! Deduction is structural: every occurrence of a parameter across the
//! argument signature must agree on one concrete type. The speculative
//! variant ([`try_deduce`]) returns `None` instead of erroring, so call
//! sites can retry deduction as more context becomes known.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{err, Result};
use crate::func::{Function, Var};
use crate::types::{ParamTy, RefTy, Ty};

/// Deduce concrete bindings for `params` by matching `formals` against the
/// known `actuals` (holes are `None` and constrain nothing).
///
/// Errors on conflicting occurrences and on parameters left unbound.
pub fn deduce(
    params: &[Rc<ParamTy>],
    formals: &[Ty],
    actuals: &[Option<Ty>],
    subject: &str,
) -> Result<Vec<Ty>> {
    let mut bound: Vec<Option<Ty>> = vec![None; params.len()];
    for (formal, actual) in formals.iter().zip(actuals) {
        if let Some(actual) = actual {
            unify(formal, actual, params, &mut bound)?;
        }
    }
    let mut out = Vec::with_capacity(params.len());
    for (param, binding) in params.iter().zip(bound) {
        match binding {
            Some(ty) => out.push(ty),
            None => {
                return Err(err!(
                    "cannot deduce type parameter '{}' of '{subject}'",
                    param.name.borrow()
                ))
            }
        }
    }
    Ok(out)
}

/// Speculative deduction: `None` on any failure.
pub fn try_deduce(params: &[Rc<ParamTy>], formals: &[Ty], actuals: &[Option<Ty>]) -> Option<Vec<Ty>> {
    deduce(params, formals, actuals, "").ok()
}

fn unify(
    formal: &Ty,
    actual: &Ty,
    params: &[Rc<ParamTy>],
    bound: &mut [Option<Ty>],
) -> Result<()> {
    match (formal, actual) {
        (Ty::Param(p), _) => {
            if let Some(idx) = params.iter().position(|q| Rc::ptr_eq(q, p)) {
                match &bound[idx] {
                    None => bound[idx] = Some(actual.clone()),
                    Some(prev) => {
                        if !prev.is(actual) {
                            return Err(err!(
                                "conflicting deductions for type parameter '{}': '{}' and '{}'",
                                p.name.borrow(),
                                prev.name(),
                                actual.name()
                            ));
                        }
                    }
                }
            }
            Ok(())
        }
        (Ty::Array(f), Ty::Array(a)) => unify(&f.elem, &a.elem, params, bound),
        (Ty::Record(f), Ty::Record(a)) if f.elems.len() == a.elems.len() => {
            for (x, y) in f.elems.iter().zip(&a.elems) {
                unify(x, y, params, bound)?;
            }
            Ok(())
        }
        (Ty::Func(f), Ty::Func(a)) if f.ins.len() == a.ins.len() => {
            for (x, y) in f.ins.iter().zip(&a.ins) {
                unify(x, y, params, bound)?;
            }
            unify(&f.out, &a.out, params, bound)
        }
        (Ty::Method(f), Ty::Method(a)) if f.func.ins.len() == a.func.ins.len() => {
            unify(&f.self_ty, &a.self_ty, params, bound)?;
            for (x, y) in f.func.ins.iter().zip(&a.func.ins) {
                unify(x, y, params, bound)?;
            }
            unify(&f.func.out, &a.func.out, params, bound)
        }
        (Ty::Gen(f), Ty::Gen(a)) => unify(&f.yields, &a.yields, params, bound),
        (Ty::Optional(f), Ty::Optional(a)) => unify(&f.base, &a.base, params, bound),
        (Ty::Partial(f), Ty::Partial(a)) if f.slots.len() == a.slots.len() => {
            unify(&f.callee, &a.callee, params, bound)?;
            for (x, y) in f.slots.iter().zip(&a.slots) {
                if let (Some(x), Some(y)) = (x, y) {
                    unify(x, y, params, bound)?;
                }
            }
            Ok(())
        }
        // Base types constrain nothing here; a mismatch surfaces later as a
        // call-type error.
        _ => Ok(()),
    }
}

/// Clone context: memoizes clones by `Rc` identity so shared nodes clone to
/// one shared clone, and carries the parameter bindings of an in-progress
/// realization.
#[derive(Default)]
pub struct CloneCtx {
    params: HashMap<usize, Ty>,
    vars: HashMap<usize, Rc<Var>>,
    funcs: HashMap<usize, Rc<Function>>,
    refs: HashMap<usize, Ty>,
}

impl CloneCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_param(&mut self, p: &Rc<ParamTy>, ty: Ty) {
        self.params.insert(Rc::as_ptr(p) as usize, ty);
    }

    pub fn param_binding(&self, p: &Rc<ParamTy>) -> Option<Ty> {
        self.params.get(&(Rc::as_ptr(p) as usize)).cloned()
    }

    pub fn seen_var(&self, v: &Rc<Var>) -> Option<Rc<Var>> {
        self.vars.get(&(Rc::as_ptr(v) as usize)).cloned()
    }

    pub fn add_var(&mut self, old: &Rc<Var>, new: Rc<Var>) {
        self.vars.insert(Rc::as_ptr(old) as usize, new);
    }

    pub fn seen_func(&self, f: &Rc<Function>) -> Option<Rc<Function>> {
        self.funcs.get(&(Rc::as_ptr(f) as usize)).cloned()
    }

    pub fn add_func(&mut self, old: &Rc<Function>, new: Rc<Function>) {
        self.funcs.insert(Rc::as_ptr(old) as usize, new);
    }

    pub fn seen_ref(&self, r: &Rc<RefTy>) -> Option<Ty> {
        self.refs.get(&(Rc::as_ptr(r) as usize)).cloned()
    }

    pub fn add_ref(&mut self, old: &Rc<RefTy>, new: Ty) {
        self.refs.insert(Rc::as_ptr(old) as usize, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduce_simple() {
        let t = ParamTy::new("T");
        let params = vec![t.clone()];
        let formals = vec![Ty::Param(t.clone()), Ty::Param(t)];
        let actuals = vec![Some(Ty::Int), Some(Ty::Int)];
        let bindings = deduce(&params, &formals, &actuals, "f").unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings[0].is(&Ty::Int));
    }

    #[test]
    fn deduce_through_composites() {
        let t = ParamTy::new("T");
        let params = vec![t.clone()];
        let formals = vec![Ty::array(Ty::Param(t))];
        let actuals = vec![Some(Ty::array(Ty::Str))];
        let bindings = deduce(&params, &formals, &actuals, "f").unwrap();
        assert!(bindings[0].is(&Ty::Str));
    }

    #[test]
    fn deduce_conflict() {
        let t = ParamTy::new("T");
        let params = vec![t.clone()];
        let formals = vec![Ty::Param(t.clone()), Ty::Param(t)];
        let actuals = vec![Some(Ty::Int), Some(Ty::Float)];
        let e = deduce(&params, &formals, &actuals, "f").unwrap_err();
        assert!(e.message.contains("conflicting deductions"));
        assert!(e.message.contains("Int"));
        assert!(e.message.contains("Float"));
    }

    #[test]
    fn deduce_skips_holes() {
        let t = ParamTy::new("T");
        let params = vec![t.clone()];
        let formals = vec![Ty::Param(t.clone()), Ty::Param(t)];
        let actuals = vec![Some(Ty::Int), None];
        let bindings = deduce(&params, &formals, &actuals, "f").unwrap();
        assert!(bindings[0].is(&Ty::Int));
    }

    #[test]
    fn deduce_underdetermined() {
        let t = ParamTy::new("T");
        let params = vec![t];
        let formals = vec![Ty::Int];
        let actuals = vec![Some(Ty::Int)];
        assert!(deduce(&params, &formals, &actuals, "f").is_err());
        assert!(try_deduce(&params, &formals, &actuals).is_none());
    }
}
