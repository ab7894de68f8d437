//! Expression AST.
//!
//! Every variant implements four contracts: `resolve_types` (prepare
//! children and perform realizations needed before the first type query),
//! `get_type` (the inference rule), `codegen` (the emission strategy), and
//! `clone_under` (deep copy under a generic clone context).
//!
//! `codegen` receives the current block as an in/out reference: emitting a
//! sub-expression can open new blocks, so the caller re-anchors at `*block`
//! after every recursive call. Branching variants forward-declare their
//! successor blocks and patch the edges once the real targets exist.

use std::rc::Rc;

use rill_ir::{BlockId, Constant, FunctionBuilder, FunctionSig, Span, Type, ValueId, Visibility};

use crate::error::{err, Result};
use crate::func::{FnCtx, Function, Unit, Var};
use crate::generic::CloneCtx;
use crate::ops::{bop, uop, BinOp, UnOp};
use crate::pattern::Pattern;
use crate::runtime;
use crate::types::{compat, Ty};

/// An expression node: a variant plus optional source location.
#[derive(Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Option<Span>,
}

#[derive(Clone)]
pub enum ExprKind {
    /// The `_` hole of a partial call; typing or emitting it directly is an
    /// error.
    Blank,
    /// A type in expression position (type arguments); emitting it is an
    /// error.
    TypeRef(Ty),
    /// An already-emitted value with a known type, the glue used by magic
    /// dispatch and pipeline lowering.
    Value { ty: Ty, val: Option<ValueId> },
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A string literal; its module global is created once and cached.
    Str {
        value: String,
        global: Option<String>,
    },
    /// A sequence literal.
    SeqLit(String),
    List {
        elems: Vec<Expr>,
        list_ty: Ty,
    },
    Set {
        elems: Vec<Expr>,
        set_ty: Ty,
    },
    /// Key/value pairs, flattened.
    Dict {
        elems: Vec<Expr>,
        dict_ty: Ty,
    },
    VarRef(Rc<Var>),
    /// A function reference, possibly with explicit type arguments.
    /// `orig` preserves the pre-deduction expression for cloning.
    FuncRef {
        func: Rc<Function>,
        tys: Vec<Ty>,
        orig: Option<Box<Expr>>,
    },
    /// A bound method reference produced by call-site deduction.
    MethodRef {
        expr: Box<Expr>,
        name: String,
        tys: Vec<Ty>,
        orig: Option<Box<Expr>>,
    },
    /// `T[count]`: allocate `count` elements of `T`.
    ArrayNew {
        elem: Ty,
        count: Box<Expr>,
    },
    RecordLit {
        exprs: Vec<Expr>,
        names: Vec<String>,
    },
    UOp {
        op: UnOp,
        expr: Box<Expr>,
    },
    BOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    ArrayLookup {
        arr: Box<Expr>,
        idx: Box<Expr>,
    },
    ArraySlice {
        arr: Box<Expr>,
        from: Option<Box<Expr>>,
        to: Option<Box<Expr>>,
    },
    ArrayContains {
        val: Box<Expr>,
        arr: Box<Expr>,
    },
    GetElem {
        rec: Box<Expr>,
        memb: String,
    },
    GetStaticElem {
        ty: Ty,
        memb: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Explicit partial application; `None` arguments are open holes.
    PartialCall {
        func: Box<Expr>,
        args: Vec<Option<Expr>>,
    },
    Cond {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Match {
        value: Box<Expr>,
        patterns: Vec<Pattern>,
        arms: Vec<Expr>,
    },
    Construct {
        ty: Ty,
        args: Vec<Expr>,
    },
    Opt(Box<Expr>),
    Default(Ty),
    Pipe {
        stages: Vec<Expr>,
    },
}

fn node(kind: ExprKind) -> Expr {
    Expr { kind, span: None }
}

impl Expr {
    // ── factories (the parser-facing constructors) ──────────────────

    pub fn blank() -> Expr {
        node(ExprKind::Blank)
    }

    pub fn type_ref(ty: Ty) -> Expr {
        node(ExprKind::TypeRef(ty))
    }

    pub fn value(ty: Ty, val: Option<ValueId>) -> Expr {
        node(ExprKind::Value { ty, val })
    }

    pub fn int(n: i64) -> Expr {
        node(ExprKind::Int(n))
    }

    pub fn float(f: f64) -> Expr {
        node(ExprKind::Float(f))
    }

    pub fn bool_(b: bool) -> Expr {
        node(ExprKind::Bool(b))
    }

    pub fn str_(s: impl Into<String>) -> Expr {
        node(ExprKind::Str {
            value: s.into(),
            global: None,
        })
    }

    pub fn seq(s: impl Into<String>) -> Expr {
        node(ExprKind::SeqLit(s.into()))
    }

    pub fn list(elems: Vec<Expr>, list_ty: Ty) -> Expr {
        node(ExprKind::List { elems, list_ty })
    }

    pub fn set_(elems: Vec<Expr>, set_ty: Ty) -> Expr {
        node(ExprKind::Set { elems, set_ty })
    }

    pub fn dict(elems: Vec<Expr>, dict_ty: Ty) -> Expr {
        node(ExprKind::Dict { elems, dict_ty })
    }

    pub fn var(var: Rc<Var>) -> Expr {
        node(ExprKind::VarRef(var))
    }

    pub fn func(func: Rc<Function>) -> Expr {
        Expr::func_with_types(func, Vec::new())
    }

    pub fn func_with_types(func: Rc<Function>, tys: Vec<Ty>) -> Expr {
        node(ExprKind::FuncRef {
            func,
            tys,
            orig: None,
        })
    }

    pub fn method(expr: Expr, name: impl Into<String>, tys: Vec<Ty>) -> Expr {
        node(ExprKind::MethodRef {
            expr: Box::new(expr),
            name: name.into(),
            tys,
            orig: None,
        })
    }

    pub fn array(elem: Ty, count: Expr) -> Expr {
        node(ExprKind::ArrayNew {
            elem,
            count: Box::new(count),
        })
    }

    pub fn record(exprs: Vec<Expr>, names: Vec<String>) -> Expr {
        node(ExprKind::RecordLit { exprs, names })
    }

    pub fn unary(symbol: &str, expr: Expr) -> Expr {
        node(ExprKind::UOp {
            op: uop(symbol),
            expr: Box::new(expr),
        })
    }

    pub fn binary(symbol: &str, lhs: Expr, rhs: Expr) -> Expr {
        node(ExprKind::BOp {
            op: bop(symbol),
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn lookup(arr: Expr, idx: Expr) -> Expr {
        node(ExprKind::ArrayLookup {
            arr: Box::new(arr),
            idx: Box::new(idx),
        })
    }

    pub fn slice(arr: Expr, from: Option<Expr>, to: Option<Expr>) -> Expr {
        node(ExprKind::ArraySlice {
            arr: Box::new(arr),
            from: from.map(Box::new),
            to: to.map(Box::new),
        })
    }

    pub fn contains(val: Expr, arr: Expr) -> Expr {
        node(ExprKind::ArrayContains {
            val: Box::new(val),
            arr: Box::new(arr),
        })
    }

    pub fn elem(rec: Expr, memb: impl Into<String>) -> Expr {
        node(ExprKind::GetElem {
            rec: Box::new(rec),
            memb: memb.into(),
        })
    }

    /// Positional record member access; indices are 1-based in the surface
    /// syntax.
    pub fn elem_idx(rec: Expr, idx: i64) -> Expr {
        debug_assert!(idx >= 1);
        Expr::elem(rec, idx.to_string())
    }

    pub fn static_elem(ty: Ty, memb: impl Into<String>) -> Expr {
        node(ExprKind::GetStaticElem {
            ty,
            memb: memb.into(),
        })
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
        node(ExprKind::Call {
            func: Box::new(func),
            args,
        })
    }

    pub fn partial_call(func: Expr, args: Vec<Option<Expr>>) -> Expr {
        node(ExprKind::PartialCall {
            func: Box::new(func),
            args,
        })
    }

    pub fn cond(cond: Expr, if_true: Expr, if_false: Expr) -> Expr {
        node(ExprKind::Cond {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    pub fn match_(value: Expr, patterns: Vec<Pattern>, arms: Vec<Expr>) -> Expr {
        node(ExprKind::Match {
            value: Box::new(value),
            patterns,
            arms,
        })
    }

    pub fn construct(ty: Ty, args: Vec<Expr>) -> Expr {
        node(ExprKind::Construct { ty, args })
    }

    pub fn opt(val: Expr) -> Expr {
        node(ExprKind::Opt(Box::new(val)))
    }

    pub fn default(ty: Ty) -> Expr {
        node(ExprKind::Default(ty))
    }

    pub fn pipe(stages: Vec<Expr>) -> Expr {
        node(ExprKind::Pipe { stages })
    }

    pub fn with_span(mut self, span: Span) -> Expr {
        self.span = Some(span);
        self
    }

    // ── contracts ───────────────────────────────────────────────────

    /// Recursively prepare children and perform realizations needed before
    /// the first type query. Idempotent.
    pub fn resolve_types(&mut self, unit: &Unit) -> Result<()> {
        let span = self.span.clone();
        self.resolve0(unit).map_err(|e| e.annotate(span.as_ref()))
    }

    /// The static type of this expression.
    pub fn get_type(&mut self, unit: &Unit) -> Result<Ty> {
        let span = self.span.clone();
        self.get_type0(unit).map_err(|e| e.annotate(span.as_ref()))
    }

    /// Emit IR into `*block`, which is updated to the successor block when
    /// the node introduces control flow. `None` means the expression is
    /// Void-valued.
    pub fn codegen(
        &mut self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
    ) -> Result<Option<ValueId>> {
        let span = self.span.clone();
        if span.is_some() {
            fx.fb.set_current_span(span.clone());
        }
        self.codegen0(unit, fx, block)
            .map_err(|e| e.annotate(span.as_ref()))
    }

    /// Like [`Self::codegen`] but requires a value.
    pub fn codegen_value(
        &mut self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
    ) -> Result<ValueId> {
        let span = self.span.clone();
        match self.codegen(unit, fx, block)? {
            Some(v) => Ok(v),
            None => Err(err!("void expression used as a value").annotate(span.as_ref())),
        }
    }

    /// Require this expression to have the given type.
    pub fn ensure(&mut self, unit: &Unit, ty: &Ty) -> Result<()> {
        let actual = self.get_type(unit)?;
        if !compat(ty, &actual) {
            return Err(
                err!("expected '{}', got '{}'", ty.name(), actual.name())
                    .annotate(self.span.as_ref()),
            );
        }
        Ok(())
    }

    // ── resolve ─────────────────────────────────────────────────────

    fn resolve0(&mut self, unit: &Unit) -> Result<()> {
        match &mut self.kind {
            ExprKind::Blank
            | ExprKind::TypeRef(_)
            | ExprKind::Value { .. }
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Str { .. }
            | ExprKind::SeqLit(_)
            | ExprKind::VarRef(_)
            | ExprKind::Default(_) => Ok(()),
            ExprKind::List { elems, .. } | ExprKind::Set { elems, .. } | ExprKind::Dict { elems, .. } => {
                for e in elems {
                    e.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::FuncRef { func, tys, orig } => {
                if !tys.is_empty() {
                    let pre = Expr::func_with_types(func.clone(), tys.clone());
                    let realized = func.realize(tys.clone())?;
                    *orig = Some(Box::new(pre));
                    *func = realized;
                    tys.clear();
                }
                func.resolve_types(unit)
            }
            ExprKind::MethodRef { expr, .. } => {
                expr.resolve_types(unit)?;
                expr.get_type(unit)?.resolve_types(unit)
            }
            ExprKind::ArrayNew { count, .. } => count.resolve_types(unit),
            ExprKind::RecordLit { exprs, .. } => {
                for e in exprs {
                    e.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::UOp { expr, .. } => expr.resolve_types(unit),
            ExprKind::BOp { lhs, rhs, .. } => {
                lhs.resolve_types(unit)?;
                rhs.resolve_types(unit)
            }
            ExprKind::ArrayLookup { arr, idx } => {
                arr.resolve_types(unit)?;
                idx.resolve_types(unit)
            }
            ExprKind::ArraySlice { arr, from, to } => {
                arr.resolve_types(unit)?;
                if let Some(from) = from {
                    from.resolve_types(unit)?;
                }
                if let Some(to) = to {
                    to.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::ArrayContains { val, arr } => {
                val.resolve_types(unit)?;
                arr.resolve_types(unit)
            }
            ExprKind::GetElem { rec, .. } => {
                rec.resolve_types(unit)?;
                rec.get_type(unit)?.resolve_types(unit)
            }
            ExprKind::GetStaticElem { ty, .. } => ty.resolve_types(unit),
            ExprKind::Call { func, args } => {
                func.resolve_types(unit)?;
                for a in args {
                    a.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::PartialCall { func, args } => {
                func.resolve_types(unit)?;
                for a in args.iter_mut().flatten() {
                    a.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::Cond {
                cond,
                if_true,
                if_false,
            } => {
                cond.resolve_types(unit)?;
                if_true.resolve_types(unit)?;
                if_false.resolve_types(unit)
            }
            ExprKind::Match {
                value,
                patterns,
                arms,
            } => {
                value.resolve_types(unit)?;
                let val_ty = value.get_type(unit)?;
                for p in patterns {
                    p.resolve_types(unit, &val_ty)?;
                }
                for a in arms {
                    a.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::Construct { args, .. } => {
                for a in args {
                    a.resolve_types(unit)?;
                }
                Ok(())
            }
            ExprKind::Opt(val) => val.resolve_types(unit),
            ExprKind::Pipe { stages } => {
                for s in stages {
                    s.resolve_types(unit)?;
                }
                Ok(())
            }
        }
    }

    // ── type inference ──────────────────────────────────────────────

    fn get_type0(&mut self, unit: &Unit) -> Result<Ty> {
        match &mut self.kind {
            ExprKind::Blank => Err(err!("misplaced '_'")),
            ExprKind::TypeRef(ty) => Ok(ty.clone()),
            ExprKind::Value { ty, .. } => Ok(ty.clone()),
            ExprKind::Int(_) => Ok(Ty::Int),
            ExprKind::Float(_) => Ok(Ty::Float),
            ExprKind::Bool(_) => Ok(Ty::Bool),
            ExprKind::Str { .. } => Ok(Ty::Str),
            ExprKind::SeqLit(_) => Ok(Ty::Seq),
            ExprKind::List { elems, list_ty } => {
                collection_ty(unit, elems, list_ty, "list", 1)
            }
            ExprKind::Set { elems, set_ty } => collection_ty(unit, elems, set_ty, "set", 1),
            ExprKind::Dict { elems, dict_ty } => collection_ty(unit, elems, dict_ty, "dict", 2),
            ExprKind::VarRef(var) => var.ty(),
            ExprKind::FuncRef { func, .. } => Ok(func.func_ty()),
            ExprKind::MethodRef {
                expr, name, tys, ..
            } => {
                let ty = expr.get_type(unit)?;
                let mut func = ty.get_method(unit, name)?;
                if !tys.is_empty() {
                    func = func.realize(tys.clone())?;
                }
                Ok(Ty::method(ty, func.func_ty_rc()))
            }
            ExprKind::ArrayNew { elem, .. } => Ok(Ty::array(elem.clone())),
            ExprKind::RecordLit { exprs, names } => {
                let mut tys = Vec::with_capacity(exprs.len());
                for e in exprs {
                    tys.push(e.get_type(unit)?);
                }
                Ok(Ty::record(tys, names.clone()))
            }
            ExprKind::UOp { op, expr } => {
                let ty = expr.get_type(unit)?;
                if op.symbol == "!" {
                    return Ok(Ty::Bool);
                }
                ty.magic_out(unit, op.magic, &[]).map_err(|_| {
                    err!(
                        "operator '{}' cannot be applied to type '{}'",
                        op.symbol,
                        ty.name()
                    )
                })
            }
            ExprKind::BOp { op, lhs, rhs } => {
                if op.is_short_circuit() {
                    return Ok(Ty::Bool);
                }
                let lhs_ty = lhs.get_type(unit)?;
                let rhs_ty = rhs.get_type(unit)?;
                if let Ok(out) = lhs_ty.magic_out(unit, op.magic, &[rhs_ty.clone()]) {
                    return Ok(out);
                }
                if !op.reflected.is_empty() {
                    if let Ok(out) = rhs_ty.magic_out(unit, op.reflected, &[lhs_ty.clone()]) {
                        return Ok(out);
                    }
                }
                Err(err!(
                    "operator '{}' cannot be applied to types '{}' and '{}'",
                    op.symbol,
                    lhs_ty.name(),
                    rhs_ty.name()
                ))
            }
            ExprKind::ArrayLookup { arr, idx } => {
                let ty = arr.get_type(unit)?;
                if let (Ty::Record(r), ExprKind::Int(n)) = (&ty, &idx.kind) {
                    let i = *n as usize;
                    if i >= r.elems.len() {
                        return Err(err!(
                            "record index {n} out of range for type '{}'",
                            ty.name()
                        ));
                    }
                    return Ok(r.elems[i].clone());
                }
                let idx_ty = idx.get_type(unit)?;
                ty.magic_out(unit, "__getitem__", &[idx_ty])
            }
            ExprKind::ArraySlice { arr, .. } => arr.get_type(unit),
            ExprKind::ArrayContains { .. } => Ok(Ty::Bool),
            ExprKind::GetElem { rec, memb } => {
                let ty = rec.get_type(unit)?;
                ty.memb_type(unit, memb)
            }
            ExprKind::GetStaticElem { ty, memb } => ty.static_memb_type(unit, memb),
            ExprKind::Call { func, args } => call_get_type(unit, func, args),
            ExprKind::PartialCall { func, args } => partial_get_type(unit, func, args),
            ExprKind::Cond {
                if_true, if_false, ..
            } => {
                let true_ty = if_true.get_type(unit)?;
                let false_ty = if_false.get_type(unit)?;
                if !compat(&true_ty, &false_ty) {
                    return Err(err!(
                        "inconsistent types '{}' and '{}' in conditional expression",
                        true_ty.name(),
                        false_ty.name()
                    ));
                }
                Ok(true_ty)
            }
            ExprKind::Match { arms, .. } => {
                if arms.is_empty() {
                    return Err(err!("match expression has no cases"));
                }
                let ty = arms[0].get_type(unit)?;
                for arm in arms.iter_mut() {
                    if !compat(&ty, &arm.get_type(unit)?) {
                        return Err(err!("inconsistent result types in match expression"));
                    }
                }
                Ok(ty)
            }
            ExprKind::Construct { ty, args } => construct_get_type(unit, ty, args),
            ExprKind::Opt(val) => Ok(Ty::optional(val.get_type(unit)?)),
            ExprKind::Default(ty) => Ok(ty.clone()),
            ExprKind::Pipe { stages } => pipe_get_type(unit, stages),
        }
    }

    // ── emission ────────────────────────────────────────────────────

    fn codegen0(
        &mut self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
    ) -> Result<Option<ValueId>> {
        match &mut self.kind {
            ExprKind::Blank => Err(err!("misplaced '_'")),
            ExprKind::TypeRef(_) => Err(err!("misplaced type expression")),
            ExprKind::Value { ty, val } => match val {
                Some(v) => Ok(Some(*v)),
                None if ty.is(&Ty::Void) => Ok(None),
                None => Err(err!("value expression has no value")),
            },
            ExprKind::Int(n) => Ok(Some(fx.at(*block).const_int(*n))),
            ExprKind::Float(f) => Ok(Some(fx.at(*block).const_float(*f))),
            ExprKind::Bool(b) => Ok(Some(fx.at(*block).const_bool(*b))),
            ExprKind::Str { value, global } => {
                // One private global per literal, created on first emission.
                let name = match global {
                    Some(name) => name.clone(),
                    None => {
                        let name =
                            unit.mb
                                .add_global("str_literal", Constant::Str(value.clone()), 1);
                        *global = Some(name.clone());
                        name
                    }
                };
                Ok(Some(literal_pair(fx, &name, value.len())))
            }
            ExprKind::SeqLit(value) => {
                let name = unit
                    .mb
                    .add_global("seq_literal", Constant::Str(value.clone()), 1);
                Ok(Some(literal_pair(fx, &name, value.len())))
            }
            ExprKind::List { elems, list_ty } => {
                let ty = collection_ty(unit, elems, list_ty, "list", 1)?;
                let elem_ty = elems[0].get_type(unit)?;
                collection_fill(unit, fx, block, ty, elems, &elem_ty, "append", "list")
            }
            ExprKind::Set { elems, set_ty } => {
                let ty = collection_ty(unit, elems, set_ty, "set", 1)?;
                let elem_ty = elems[0].get_type(unit)?;
                collection_fill(unit, fx, block, ty, elems, &elem_ty, "add", "set")
            }
            ExprKind::Dict { elems, dict_ty } => {
                let ty = collection_ty(unit, elems, dict_ty, "dict", 2)?;
                let key_ty = elems[0].get_type(unit)?;
                let val_ty = elems[1].get_type(unit)?;
                let mut construct = Expr::construct(ty.clone(), vec![]);
                construct.resolve_types(unit)?;
                let dict = construct.codegen_value(unit, fx, block)?;
                for pair in elems.chunks_mut(2) {
                    let (key, val) = match pair {
                        [k, v] => (k, v),
                        _ => return Err(err!("dict literal has an unpaired key")),
                    };
                    let kt = key.get_type(unit)?;
                    if !compat(&key_ty, &kt) {
                        return Err(err!(
                            "inconsistent dict key types '{}' and '{}'",
                            key_ty.name(),
                            kt.name()
                        ));
                    }
                    let vt = val.get_type(unit)?;
                    if !compat(&val_ty, &vt) {
                        return Err(err!(
                            "inconsistent dict value types '{}' and '{}'",
                            val_ty.name(),
                            vt.name()
                        ));
                    }
                    let k = key.codegen_value(unit, fx, block)?;
                    let v = val.codegen_value(unit, fx, block)?;
                    ty.call_magic(
                        unit,
                        fx,
                        block,
                        "__setitem__",
                        &[key_ty.clone(), val_ty.clone()],
                        Some(dict),
                        &[k, v],
                    )?;
                }
                Ok(Some(dict))
            }
            ExprKind::VarRef(var) => Ok(Some(var.load(fx, *block)?)),
            ExprKind::FuncRef { func, .. } => {
                let symbol = func.codegen(unit)?;
                let sig = crate::types::func_ir_sig(&func.func_ty_rc(), unit)?;
                Ok(Some(fx.at(*block).func_ref(symbol, sig)))
            }
            ExprKind::MethodRef {
                expr, name, tys, ..
            } => {
                let ty = expr.get_type(unit)?;
                let mut func = ty.get_method(unit, name)?;
                if !tys.is_empty() {
                    func = func.realize(tys.clone())?;
                }
                let self_val = expr.codegen_value(unit, fx, block)?;
                let symbol = func.codegen(unit)?;
                let fty = func.func_ty_rc();
                let sig = crate::types::func_ir_sig(&fty, unit)?;
                let method_ir = Ty::method(ty, fty).ir_type(unit)?;
                let fb = fx.at(*block);
                let fval = fb.func_ref(symbol, sig);
                let pair = fb.undef(method_ir);
                let pair = fb.insert_value(pair, 0, self_val);
                Ok(Some(fb.insert_value(pair, 1, fval)))
            }
            ExprKind::ArrayNew { elem, count } => {
                count.ensure(unit, &Ty::Int)?;
                let len = count.codegen_value(unit, fx, block)?;
                let ptr = elem.alloc(unit, fx, block, len)?;
                let arr_ir = Ty::array(elem.clone()).ir_type(unit)?;
                let fb = fx.at(*block);
                let pair = fb.undef(arr_ir);
                let pair = fb.insert_value(pair, 0, ptr);
                Ok(Some(fb.insert_value(pair, 1, len)))
            }
            ExprKind::RecordLit { exprs, names } => {
                let mut tys = Vec::with_capacity(exprs.len());
                for e in exprs.iter_mut() {
                    tys.push(e.get_type(unit)?);
                }
                let rec_ty = Ty::record(tys, names.clone());
                let ir = rec_ty.ir_type(unit)?;
                let mut agg = fx.at(*block).undef(ir);
                for (i, e) in exprs.iter_mut().enumerate() {
                    let v = e.codegen_value(unit, fx, block)?;
                    // Child emission may have moved the block; re-anchor.
                    agg = fx.at(*block).insert_value(agg, i as u32, v);
                }
                Ok(Some(agg))
            }
            ExprKind::UOp { op, expr } => {
                let ty = expr.get_type(unit)?;
                let val = expr.codegen_value(unit, fx, block)?;
                if op.symbol == "!" {
                    let b = ty.bool_value(unit, fx, block, val)?;
                    return Ty::Bool.call_magic(
                        unit,
                        fx,
                        block,
                        "__invert__",
                        &[],
                        Some(b),
                        &[],
                    );
                }
                ty.call_magic(unit, fx, block, op.magic, &[], Some(val), &[])
                    .map_err(|_| {
                        err!(
                            "operator '{}' cannot be applied to type '{}'",
                            op.symbol,
                            ty.name()
                        )
                    })
            }
            ExprKind::BOp { op, lhs, rhs } => {
                if op.is_short_circuit() {
                    return short_circuit(unit, fx, block, op.symbol == "&&", lhs, rhs);
                }
                let lhs_ty = lhs.get_type(unit)?;
                let rhs_ty = rhs.get_type(unit)?;
                let self_val = lhs.codegen_value(unit, fx, block)?;
                let arg = rhs.codegen_value(unit, fx, block)?;
                if lhs_ty
                    .magic_out(unit, op.magic, &[rhs_ty.clone()])
                    .is_ok()
                {
                    return lhs_ty.call_magic(
                        unit,
                        fx,
                        block,
                        op.magic,
                        &[rhs_ty.clone()],
                        Some(self_val),
                        &[arg],
                    );
                }
                if !op.reflected.is_empty()
                    && rhs_ty
                        .magic_out(unit, op.reflected, &[lhs_ty.clone()])
                        .is_ok()
                {
                    return rhs_ty.call_magic(
                        unit,
                        fx,
                        block,
                        op.reflected,
                        &[lhs_ty.clone()],
                        Some(arg),
                        &[self_val],
                    );
                }
                Err(err!(
                    "operator '{}' cannot be applied to types '{}' and '{}'",
                    op.symbol,
                    lhs_ty.name(),
                    rhs_ty.name()
                ))
            }
            ExprKind::ArrayLookup { arr, idx } => {
                let ty = arr.get_type(unit)?;
                if let (Ty::Record(_), ExprKind::Int(n)) = (&ty, &idx.kind) {
                    // Record lookup by literal index lowers to field access.
                    let mut elem = Expr::elem_idx((**arr).clone(), *n + 1);
                    return elem.codegen(unit, fx, block);
                }
                let idx_ty = idx.get_type(unit)?;
                let arr_val = arr.codegen_value(unit, fx, block)?;
                let idx_val = idx.codegen_value(unit, fx, block)?;
                ty.call_magic(
                    unit,
                    fx,
                    block,
                    "__getitem__",
                    &[idx_ty],
                    Some(arr_val),
                    &[idx_val],
                )
            }
            ExprKind::ArraySlice { arr, from, to } => {
                let ty = arr.get_type(unit)?;
                let arr_val = arr.codegen_value(unit, fx, block)?;
                match (from.as_mut(), to.as_mut()) {
                    (None, None) => {
                        ty.call_magic(unit, fx, block, "__copy__", &[], Some(arr_val), &[])
                    }
                    (None, Some(to)) => {
                        let to_ty = to.get_type(unit)?;
                        let to_val = to.codegen_value(unit, fx, block)?;
                        ty.call_magic(
                            unit,
                            fx,
                            block,
                            "__slice_left__",
                            &[to_ty],
                            Some(arr_val),
                            &[to_val],
                        )
                    }
                    (Some(from), None) => {
                        let from_ty = from.get_type(unit)?;
                        let from_val = from.codegen_value(unit, fx, block)?;
                        ty.call_magic(
                            unit,
                            fx,
                            block,
                            "__slice_right__",
                            &[from_ty],
                            Some(arr_val),
                            &[from_val],
                        )
                    }
                    (Some(from), Some(to)) => {
                        let from_ty = from.get_type(unit)?;
                        let to_ty = to.get_type(unit)?;
                        let from_val = from.codegen_value(unit, fx, block)?;
                        let to_val = to.codegen_value(unit, fx, block)?;
                        ty.call_magic(
                            unit,
                            fx,
                            block,
                            "__slice__",
                            &[from_ty, to_ty],
                            Some(arr_val),
                            &[from_val, to_val],
                        )
                    }
                }
            }
            ExprKind::ArrayContains { val, arr } => {
                let val_ty = val.get_type(unit)?;
                let arr_ty = arr.get_type(unit)?;
                if !arr_ty
                    .magic_out(unit, "__contains__", &[val_ty.clone()])?
                    .is(&Ty::Bool)
                {
                    return Err(err!("__contains__ does not return a boolean value"));
                }
                let v = val.codegen_value(unit, fx, block)?;
                let a = arr.codegen_value(unit, fx, block)?;
                arr_ty.call_magic(unit, fx, block, "__contains__", &[val_ty], Some(a), &[v])
            }
            ExprKind::GetElem { rec, memb } => {
                let ty = rec.get_type(unit)?;
                let val = rec.codegen_value(unit, fx, block)?;
                Ok(Some(ty.memb(unit, fx, block, val, memb)?))
            }
            ExprKind::GetStaticElem { ty, memb } => {
                Ok(Some(ty.static_memb(unit, fx, block, memb)?))
            }
            ExprKind::Call { func, args } => {
                let ty = call_get_type(unit, func, args)?; // validates the call
                let fval = func.codegen_value(unit, fx, block)?;
                let mut vals = Vec::with_capacity(args.len());
                for a in args.iter_mut() {
                    vals.push(a.codegen_value(unit, fx, block)?);
                }
                // A call with too few arguments builds a partial value.
                if let Some(f0) = func_of(func) {
                    if f0.ins().len() > vals.len() {
                        let ir = ty.ir_type(unit)?;
                        let mut agg = fx.at(*block).undef(ir);
                        agg = fx.at(*block).insert_value(agg, 0, fval);
                        for (i, v) in vals.iter().enumerate() {
                            agg = fx.at(*block).insert_value(agg, (i + 1) as u32, *v);
                        }
                        return Ok(Some(agg));
                    }
                }
                let callee_ty = func.get_type(unit)?;
                callee_ty.call_value(unit, fx, block, fval, &vals)
            }
            ExprKind::PartialCall { func, args } => {
                let ty = partial_get_type(unit, func, args)?;
                let fval = func.codegen_value(unit, fx, block)?;
                let mut vals = Vec::new();
                for a in args.iter_mut().flatten() {
                    vals.push(a.codegen_value(unit, fx, block)?);
                }
                let ir = ty.ir_type(unit)?;
                let mut agg = fx.at(*block).undef(ir);
                agg = fx.at(*block).insert_value(agg, 0, fval);
                for (i, v) in vals.iter().enumerate() {
                    agg = fx.at(*block).insert_value(agg, (i + 1) as u32, *v);
                }
                Ok(Some(agg))
            }
            ExprKind::Cond {
                cond,
                if_true,
                if_false,
            } => {
                let true_ty = if_true.get_type(unit)?;
                let false_ty = if_false.get_type(unit)?;
                if !compat(&true_ty, &false_ty) {
                    return Err(err!(
                        "inconsistent types '{}' and '{}' in conditional expression",
                        true_ty.name(),
                        false_ty.name()
                    ));
                }
                let cond_ty = cond.get_type(unit)?;
                let cond_val = cond.codegen_value(unit, fx, block)?;
                let cond_val = cond_ty.bool_value(unit, fx, block, cond_val)?;

                let b1 = fx.fb.create_block();
                // False edge patched below once the false block exists.
                let branch0 = fx.at(*block).br_if(cond_val, b1, &[], b1, &[]);

                let mut block1 = b1;
                let true_val = if_true.codegen_value(unit, fx, &mut block1)?;
                let branch1 = fx.at(block1).br(b1, &[]); // patched below

                let b2 = fx.fb.create_block();
                fx.fb.set_successor(branch0, 1, b2);
                let mut block2 = b2;
                let false_val = if_false.codegen_value(unit, fx, &mut block2)?;
                let branch2 = fx.at(block2).br(b2, &[]); // patched below

                let res_ir = true_ty.ir_type(unit)?;
                let (merge, merge_vals) = fx.fb.create_block_with_params(&[res_ir]);
                fx.fb.set_successor(branch1, 0, merge);
                fx.fb.set_branch_args(branch1, 0, &[true_val]);
                fx.fb.set_successor(branch2, 0, merge);
                fx.fb.set_branch_args(branch2, 0, &[false_val]);
                *block = merge;
                Ok(Some(merge_vals[0]))
            }
            ExprKind::Match {
                value,
                patterns,
                arms,
            } => {
                if patterns.is_empty() || patterns.len() != arms.len() {
                    return Err(err!("malformed match expression"));
                }
                let val_ty = value.get_type(unit)?;
                let mut res_ty = arms[0].get_type(unit)?;
                for arm in arms.iter_mut() {
                    let t = arm.get_type(unit)?;
                    if !compat(&res_ty, &t) {
                        return Err(err!("inconsistent result types in match expression"));
                    }
                    res_ty = t;
                }

                let mut seen_catch_all = false;
                for p in patterns.iter_mut() {
                    p.resolve_types(unit, &val_ty)?;
                    if p.is_catch_all() {
                        seen_catch_all = true;
                    }
                }
                if !seen_catch_all {
                    return Err(err!("match expression missing catch-all pattern"));
                }

                let val = value.codegen_value(unit, fx, block)?;
                let mut arm_jumps = Vec::with_capacity(arms.len());

                for (pattern, arm) in patterns.iter_mut().zip(arms.iter_mut()) {
                    let cond = pattern.codegen(unit, fx, block, &val_ty, val)?;
                    let match_block = fx.fb.create_block();
                    // Mismatch edge patched once the next test block exists.
                    let test = fx.at(*block).br_if(cond, match_block, &[], match_block, &[]);

                    let mut arm_block = match_block;
                    let result = arm.codegen_value(unit, fx, &mut arm_block)?;
                    let jump = fx.at(arm_block).br(match_block, &[]); // patched below
                    arm_jumps.push((jump, result));

                    let next = fx.fb.create_block();
                    fx.fb.set_successor(test, 1, next);
                    *block = next;
                }

                // The catch-all guarantees the fall-through is never reached.
                fx.at(*block).unreachable();

                let res_ir = res_ty.ir_type(unit)?;
                let (merge, merge_vals) = fx.fb.create_block_with_params(&[res_ir]);
                for (jump, result) in arm_jumps {
                    fx.fb.set_successor(jump, 0, merge);
                    fx.fb.set_branch_args(jump, 0, &[result]);
                }
                *block = merge;
                Ok(Some(merge_vals[0]))
            }
            ExprKind::Construct { ty, args } => {
                construct_get_type(unit, ty, args)?; // validates and realizes
                let target = ty.clone();

                let mut arg_tys = Vec::with_capacity(args.len());
                for a in args.iter_mut() {
                    arg_tys.push(a.get_type(unit)?);
                }
                let mut vals = Vec::with_capacity(args.len());
                for a in args.iter_mut() {
                    vals.push(a.codegen_value(unit, fx, block)?);
                }

                let self_val = if target.has_method(unit, "__new__") {
                    let self_val = target
                        .call_magic(unit, fx, block, "__new__", &[], None, &[])?
                        .ok_or_else(|| err!("__new__ produced no value"))?;
                    if target.has_method(unit, "__del__") {
                        emit_finalizer(unit, fx, block, &target, self_val)?;
                    }
                    self_val
                } else {
                    // No __new__, so __init__ receives the default value.
                    target.default_value(unit, fx, block)?
                };

                let ret = target.call_magic(
                    unit,
                    fx,
                    block,
                    "__init__",
                    &arg_tys,
                    Some(self_val),
                    &vals,
                )?;
                if target.magic_out(unit, "__init__", &arg_tys)?.is(&Ty::Void) {
                    Ok(Some(self_val))
                } else {
                    Ok(ret)
                }
            }
            ExprKind::Opt(val) => {
                let base_ty = val.get_type(unit)?;
                let v = val.codegen_value(unit, fx, block)?;
                let ir = Ty::optional(base_ty).ir_type(unit)?;
                let fb = fx.at(*block);
                let flag = fb.const_bool(true);
                let agg = fb.undef(ir);
                let agg = fb.insert_value(agg, 0, flag);
                Ok(Some(fb.insert_value(agg, 1, v)))
            }
            ExprKind::Default(ty) => Ok(Some(ty.default_value(unit, fx, block)?)),
            ExprKind::Pipe { stages } => {
                codegen_pipe(unit, fx, block, stages, 0, None, None)
            }
        }
    }

    // ── cloning ─────────────────────────────────────────────────────

    /// Deep copy under a generic clone context; shared children clone once.
    pub fn clone_under(&self, ctx: &mut CloneCtx) -> Expr {
        let kind = match &self.kind {
            ExprKind::Blank => ExprKind::Blank,
            ExprKind::TypeRef(ty) => ExprKind::TypeRef(ty.clone_under(ctx)),
            ExprKind::Value { ty, val } => ExprKind::Value {
                ty: ty.clone_under(ctx),
                val: *val,
            },
            ExprKind::Int(n) => ExprKind::Int(*n),
            ExprKind::Float(f) => ExprKind::Float(*f),
            ExprKind::Bool(b) => ExprKind::Bool(*b),
            ExprKind::Str { value, .. } => ExprKind::Str {
                value: value.clone(),
                global: None,
            },
            ExprKind::SeqLit(s) => ExprKind::SeqLit(s.clone()),
            ExprKind::List { elems, list_ty } => ExprKind::List {
                elems: elems.iter().map(|e| e.clone_under(ctx)).collect(),
                list_ty: list_ty.clone_under(ctx),
            },
            ExprKind::Set { elems, set_ty } => ExprKind::Set {
                elems: elems.iter().map(|e| e.clone_under(ctx)).collect(),
                set_ty: set_ty.clone_under(ctx),
            },
            ExprKind::Dict { elems, dict_ty } => ExprKind::Dict {
                elems: elems.iter().map(|e| e.clone_under(ctx)).collect(),
                dict_ty: dict_ty.clone_under(ctx),
            },
            ExprKind::VarRef(var) => ExprKind::VarRef(var.clone_under(ctx)),
            ExprKind::FuncRef { func, tys, orig } => {
                if let Some(orig) = orig {
                    return orig.clone_under(ctx);
                }
                ExprKind::FuncRef {
                    func: func.clone_under(ctx),
                    tys: tys.iter().map(|t| t.clone_under(ctx)).collect(),
                    orig: None,
                }
            }
            ExprKind::MethodRef {
                expr,
                name,
                tys,
                orig,
            } => {
                if let Some(orig) = orig {
                    return orig.clone_under(ctx);
                }
                ExprKind::MethodRef {
                    expr: Box::new(expr.clone_under(ctx)),
                    name: name.clone(),
                    tys: tys.iter().map(|t| t.clone_under(ctx)).collect(),
                    orig: None,
                }
            }
            ExprKind::ArrayNew { elem, count } => ExprKind::ArrayNew {
                elem: elem.clone_under(ctx),
                count: Box::new(count.clone_under(ctx)),
            },
            ExprKind::RecordLit { exprs, names } => ExprKind::RecordLit {
                exprs: exprs.iter().map(|e| e.clone_under(ctx)).collect(),
                names: names.clone(),
            },
            ExprKind::UOp { op, expr } => ExprKind::UOp {
                op: *op,
                expr: Box::new(expr.clone_under(ctx)),
            },
            ExprKind::BOp { op, lhs, rhs } => ExprKind::BOp {
                op: *op,
                lhs: Box::new(lhs.clone_under(ctx)),
                rhs: Box::new(rhs.clone_under(ctx)),
            },
            ExprKind::ArrayLookup { arr, idx } => ExprKind::ArrayLookup {
                arr: Box::new(arr.clone_under(ctx)),
                idx: Box::new(idx.clone_under(ctx)),
            },
            ExprKind::ArraySlice { arr, from, to } => ExprKind::ArraySlice {
                arr: Box::new(arr.clone_under(ctx)),
                from: from.as_ref().map(|e| Box::new(e.clone_under(ctx))),
                to: to.as_ref().map(|e| Box::new(e.clone_under(ctx))),
            },
            ExprKind::ArrayContains { val, arr } => ExprKind::ArrayContains {
                val: Box::new(val.clone_under(ctx)),
                arr: Box::new(arr.clone_under(ctx)),
            },
            ExprKind::GetElem { rec, memb } => ExprKind::GetElem {
                rec: Box::new(rec.clone_under(ctx)),
                memb: memb.clone(),
            },
            ExprKind::GetStaticElem { ty, memb } => ExprKind::GetStaticElem {
                ty: ty.clone_under(ctx),
                memb: memb.clone(),
            },
            ExprKind::Call { func, args } => ExprKind::Call {
                func: Box::new(func.clone_under(ctx)),
                args: args.iter().map(|a| a.clone_under(ctx)).collect(),
            },
            ExprKind::PartialCall { func, args } => ExprKind::PartialCall {
                func: Box::new(func.clone_under(ctx)),
                args: args
                    .iter()
                    .map(|a| a.as_ref().map(|e| e.clone_under(ctx)))
                    .collect(),
            },
            ExprKind::Cond {
                cond,
                if_true,
                if_false,
            } => ExprKind::Cond {
                cond: Box::new(cond.clone_under(ctx)),
                if_true: Box::new(if_true.clone_under(ctx)),
                if_false: Box::new(if_false.clone_under(ctx)),
            },
            ExprKind::Match {
                value,
                patterns,
                arms,
            } => ExprKind::Match {
                value: Box::new(value.clone_under(ctx)),
                patterns: patterns.iter().map(|p| p.clone_under(ctx)).collect(),
                arms: arms.iter().map(|a| a.clone_under(ctx)).collect(),
            },
            ExprKind::Construct { ty, args } => ExprKind::Construct {
                ty: ty.clone_under(ctx),
                args: args.iter().map(|a| a.clone_under(ctx)).collect(),
            },
            ExprKind::Opt(val) => ExprKind::Opt(Box::new(val.clone_under(ctx))),
            ExprKind::Default(ty) => ExprKind::Default(ty.clone_under(ctx)),
            ExprKind::Pipe { stages } => ExprKind::Pipe {
                stages: stages.iter().map(|s| s.clone_under(ctx)).collect(),
            },
        };
        Expr {
            kind,
            span: self.span.clone(),
        }
    }
}

/// The function behind a plain function-reference expression, if any.
pub fn func_of(expr: &Expr) -> Option<Rc<Function>> {
    match &expr.kind {
        ExprKind::FuncRef { func, .. } => Some(func.clone()),
        _ => None,
    }
}

/// Call-site type-parameter deduction (five cases). The callee expression is
/// rewritten in place on success, with the original preserved via `orig`;
/// every failure here is speculative and swallowed; deduction may succeed
/// later once more context is known.
fn deduce_callee(unit: &Unit, func: &mut Expr, arg_types: &[Option<Ty>]) {
    // Simple call.
    let mut simple: Option<Rc<Function>> = None;
    if let ExprKind::FuncRef { func: f, orig, .. } = &func.kind {
        if orig.is_none() && f.num_generics() > 0 && f.unrealized() {
            if let Ok(bindings) = f.deduce_from_arg_types(arg_types) {
                if let Ok(realized) = f.realize(bindings) {
                    simple = Some(realized);
                }
            }
        }
    }
    if let Some(realized) = simple {
        let old = std::mem::replace(func, Expr::blank());
        let span = old.span.clone();
        *func = Expr {
            kind: ExprKind::FuncRef {
                func: realized,
                tys: Vec::new(),
                orig: Some(Box::new(old)),
            },
            span,
        };
    }

    // Partial call, explicit partial expression.
    if let ExprKind::PartialCall { .. } = &func.kind {
        let par = match func.get_type(unit) {
            Ok(Ty::Partial(p)) => Some(p),
            _ => None,
        };
        if let (Some(par), ExprKind::PartialCall { func: inner, .. }) = (par, &mut func.kind) {
            deduce_partial_inner(inner, &par.slots, arg_types);
        }
    }

    // Partial call, a regular call whose type is a partial function.
    if let ExprKind::Call { .. } = &func.kind {
        let par = match func.get_type(unit) {
            Ok(Ty::Partial(p)) => Some(p),
            _ => None,
        };
        if let (Some(par), ExprKind::Call { func: inner, .. }) = (par, &mut func.kind) {
            deduce_partial_inner(inner, &par.slots, arg_types);
        }
    }

    // Method call: prepend the receiver type as the `self` slot.
    let mut method_sub: Option<(Expr, String, Vec<Ty>)> = None;
    if let ExprKind::GetElem { rec, memb } = &mut func.kind {
        if let Ok(rec_ty) = rec.get_type(unit) {
            if rec_ty.has_method(unit, memb) {
                if let Ok(g) = rec_ty.get_method(unit, memb) {
                    if g.num_generics() > 0 && g.unrealized() {
                        let mut full = vec![Some(rec_ty)];
                        full.extend(arg_types.iter().cloned());
                        if let Ok(bindings) = g.deduce_from_arg_types(&full) {
                            method_sub = Some(((**rec).clone(), memb.clone(), bindings));
                        }
                    }
                }
            }
        }
    }
    if let Some((recv, name, tys)) = method_sub {
        let old = std::mem::replace(func, Expr::blank());
        let span = old.span.clone();
        *func = Expr {
            kind: ExprKind::MethodRef {
                expr: Box::new(recv),
                name,
                tys,
                orig: Some(Box::new(old)),
            },
            span,
        };
    }

    // Static method call.
    let mut static_sub: Option<Rc<Function>> = None;
    if let ExprKind::GetStaticElem { ty, memb } = &func.kind {
        if ty.has_method(unit, memb) {
            if let Ok(g) = ty.get_method(unit, memb) {
                if g.num_generics() > 0 && g.unrealized() {
                    if let Ok(bindings) = g.deduce_from_arg_types(arg_types) {
                        if let Ok(realized) = g.realize(bindings) {
                            static_sub = Some(realized);
                        }
                    }
                }
            }
        }
    }
    if let Some(realized) = static_sub {
        let old = std::mem::replace(func, Expr::blank());
        let span = old.span.clone();
        *func = Expr {
            kind: ExprKind::FuncRef {
                func: realized,
                tys: Vec::new(),
                orig: Some(Box::new(old)),
            },
            span,
        };
    }
}

/// Fold a partial's bound slot types with the incoming argument types and
/// deduce the inner function from the combined vector.
fn deduce_partial_inner(inner: &mut Expr, slots: &[Option<Ty>], arg_types: &[Option<Ty>]) {
    let g = match func_of(inner) {
        Some(g) if g.num_generics() > 0 && g.unrealized() => g,
        _ => return,
    };
    let mut full = Vec::with_capacity(slots.len());
    let mut next = arg_types.iter();
    for slot in slots {
        match slot {
            Some(t) => full.push(Some(t.clone())),
            None => match next.next() {
                Some(a) => full.push(a.clone()),
                None => return,
            },
        }
    }
    if let Ok(bindings) = g.deduce_from_arg_types(&full) {
        if let Ok(realized) = g.realize(bindings) {
            let old = std::mem::replace(inner, Expr::blank());
            let span = old.span.clone();
            *inner = Expr {
                kind: ExprKind::FuncRef {
                    func: realized,
                    tys: Vec::new(),
                    orig: Some(Box::new(old)),
                },
                span,
            };
        }
    }
}

fn call_get_type(unit: &Unit, func: &mut Expr, args: &mut [Expr]) -> Result<Ty> {
    let mut arg_tys = Vec::with_capacity(args.len());
    for a in args.iter_mut() {
        arg_tys.push(a.get_type(unit)?);
    }

    // A call with fewer arguments than the callee expects is a partial
    // application; the missing slots sit at the front.
    if let Some(f0) = func_of(func) {
        if f0.ins().len() > arg_tys.len() {
            let missing = f0.ins().len() - arg_tys.len();
            let mut slots: Vec<Option<Ty>> = arg_tys.iter().cloned().map(Some).collect();
            for _ in 0..missing {
                slots.insert(0, None);
            }
            deduce_callee(unit, func, &slots);
            let callee_ty = func.get_type(unit)?;
            return Ok(Ty::partial(callee_ty, slots));
        }
    }

    let slots: Vec<Option<Ty>> = arg_tys.iter().cloned().map(Some).collect();
    deduce_callee(unit, func, &slots);

    // If the callee is still an unrealized generic, deduction genuinely
    // failed; surface its error (conflicts name the parameter and both
    // bindings) instead of a bare call-type mismatch.
    if let Some(f) = func_of(func) {
        if f.num_generics() > 0 && f.unrealized() {
            let bindings = f.deduce_from_arg_types(&slots)?;
            let realized = f.realize(bindings)?;
            let old = std::mem::replace(func, Expr::blank());
            let span = old.span.clone();
            *func = Expr {
                kind: ExprKind::FuncRef {
                    func: realized,
                    tys: Vec::new(),
                    orig: Some(Box::new(old)),
                },
                span,
            };
        }
    }

    let callee_ty = func.get_type(unit)?;
    callee_ty.get_call_type(unit, &arg_tys)
}

fn partial_get_type(unit: &Unit, func: &mut Expr, args: &mut [Option<Expr>]) -> Result<Ty> {
    let mut slots = Vec::with_capacity(args.len());
    for a in args.iter_mut() {
        slots.push(match a {
            Some(e) => Some(e.get_type(unit)?),
            None => None,
        });
    }
    deduce_callee(unit, func, &slots);
    Ok(Ty::partial(func.get_type(unit)?, slots))
}

fn construct_get_type(unit: &Unit, ty: &mut Ty, args: &mut [Expr]) -> Result<Ty> {
    let mut arg_tys = Vec::with_capacity(args.len());
    for a in args.iter_mut() {
        arg_tys.push(a.get_type(unit)?);
    }

    // Constructing a generic class deduces its parameters from __init__.
    if let Ty::Ref(r) = &*ty {
        if r.num_generics() > 0 && r.unrealized() {
            let slots: Vec<Option<Ty>> = arg_tys.iter().cloned().map(Some).collect();
            let bindings = r.deduce_from_arg_types(&slots)?;
            *ty = r.realize(bindings)?;
        }
    }

    let out = ty.magic_out(unit, "__init__", &arg_tys)?;
    Ok(if out.is(&Ty::Void) { ty.clone() } else { out })
}

fn pipe_get_type(unit: &Unit, stages: &mut Vec<Expr>) -> Result<Ty> {
    let n = stages.len();
    let mut ty: Option<Ty> = None;
    let mut has_driver = false;
    for i in 0..n {
        let t = match ty {
            None => stages[i].get_type(unit)?,
            Some(prev) => {
                // Through a synthesized call, for uniform type-parameter
                // deduction; the possibly-rewritten stage is put back.
                let stage = std::mem::replace(&mut stages[i], Expr::blank());
                let mut call = Expr::call(stage, vec![Expr::value(prev, None)]);
                let res = call.get_type(unit);
                if let ExprKind::Call { func, .. } = call.kind {
                    stages[i] = *func;
                }
                res?
            }
        };
        // A non-terminal generator stage gets a driver loop: downstream
        // stages see the yield type, and the pipe as a whole is Void.
        ty = Some(match &t {
            Ty::Gen(g) if i != n - 1 => {
                has_driver = true;
                g.yields.clone()
            }
            _ => t,
        });
    }
    if has_driver {
        return Ok(Ty::Void);
    }
    ty.ok_or_else(|| err!("empty pipeline"))
}

/// Emit the pipeline from stage `idx` onwards. A non-terminal generator
/// stage inserts a driver loop around everything downstream.
fn codegen_pipe(
    unit: &mut Unit,
    fx: &mut FnCtx,
    block: &mut BlockId,
    stages: &mut Vec<Expr>,
    idx: usize,
    val: Option<ValueId>,
    ty: Option<Ty>,
) -> Result<Option<ValueId>> {
    if idx == stages.len() {
        return Ok(val);
    }

    let (stage_ty, stage_val) = match ty {
        None => {
            let t = stages[idx].get_type(unit)?;
            let v = stages[idx].codegen(unit, fx, block)?;
            (t, v)
        }
        Some(prev) => {
            let stage = std::mem::replace(&mut stages[idx], Expr::blank());
            let mut call = Expr::call(stage, vec![Expr::value(prev, val)]);
            let res_ty = call.get_type(unit);
            let res_val = match &res_ty {
                Ok(_) => call.codegen(unit, fx, block),
                Err(_) => Ok(None),
            };
            if let ExprKind::Call { func, .. } = call.kind {
                stages[idx] = *func;
            }
            (res_ty?, res_val?)
        }
    };

    if let Ty::Gen(gen_ty) = &stage_ty {
        if idx != stages.len() - 1 {
            let gen = stage_val.ok_or_else(|| err!("generator stage produced no value"))?;

            let loop_block = fx.fb.create_block();
            fx.at(*block).br(loop_block, &[]);

            gen_ty.resume(unit, fx, loop_block, gen);
            let done = gen_ty.done(unit, fx, loop_block, gen);
            let body = fx.fb.create_block();
            // Done edge patched to the cleanup block below.
            let branch = fx.at(loop_block).br_if(done, body, &[], body, &[]);

            *block = body;
            let yields = gen_ty.yields.clone();
            let next_val = if yields.is(&Ty::Void) {
                None
            } else {
                Some(gen_ty.promise(unit, fx, body, gen)?)
            };
            codegen_pipe(unit, fx, block, stages, idx + 1, next_val, Some(yields))?;
            fx.at(*block).br(loop_block, &[]);

            let cleanup = fx.fb.create_block();
            fx.fb.set_successor(branch, 0, cleanup);
            gen_ty.destroy(unit, fx, cleanup, gen);

            let exit = fx.fb.create_block();
            fx.at(cleanup).br(exit, &[]);
            *block = exit;
            return Ok(None);
        }
    }

    codegen_pipe(unit, fx, block, stages, idx + 1, stage_val, Some(stage_ty))
}

/// `&&` / `||` with short-circuit evaluation.
fn short_circuit(
    unit: &mut Unit,
    fx: &mut FnCtx,
    block: &mut BlockId,
    is_and: bool,
    lhs: &mut Expr,
    rhs: &mut Expr,
) -> Result<Option<ValueId>> {
    let lhs_ty = lhs.get_type(unit)?;
    let lhs_val = lhs.codegen_value(unit, fx, block)?;
    let lhs_bool = lhs_ty.bool_value(unit, fx, block, lhs_val)?;

    // The value the whole expression takes when the right side is skipped.
    let short_val = fx.at(*block).const_bool(!is_and);

    let rhs_block = fx.fb.create_block();
    // One edge is patched to the merge block below.
    let branch = fx.at(*block).br_if(lhs_bool, rhs_block, &[], rhs_block, &[]);

    let mut b1 = rhs_block;
    let rhs_ty = rhs.get_type(unit)?;
    let rhs_val = rhs.codegen_value(unit, fx, &mut b1)?;
    let rhs_bool = rhs_ty.bool_value(unit, fx, &mut b1, rhs_val)?;
    let rhs_jump = fx.at(b1).br(rhs_block, &[]); // patched below

    let (merge, merge_vals) = fx.fb.create_block_with_params(&[Type::Bool]);
    let skip_edge = if is_and { 1 } else { 0 };
    fx.fb.set_successor(branch, skip_edge, merge);
    fx.fb.set_branch_args(branch, skip_edge, &[short_val]);
    fx.fb.set_successor(rhs_jump, 0, merge);
    fx.fb.set_branch_args(rhs_jump, 0, &[rhs_bool]);

    *block = merge;
    Ok(Some(merge_vals[0]))
}

/// Infer (and realize) the collection type of a list/set/dict literal from
/// its leading element(s).
fn collection_ty(
    unit: &Unit,
    elems: &mut [Expr],
    coll_ty: &Ty,
    what: &str,
    arity: usize,
) -> Result<Ty> {
    if elems.len() < arity {
        return Err(err!("cannot infer type of empty {what}"));
    }
    let mut bindings = Vec::with_capacity(arity);
    for i in 0..arity {
        bindings.push(elems[i].get_type(unit)?);
    }
    match coll_ty {
        Ty::Ref(r) if r.unrealized() => r.realize(bindings),
        _ => Err(err!("type '{}' is not generic", coll_ty.name())),
    }
}

/// Emit a list/set literal: construct, then feed each element through the
/// named insertion method.
#[allow(clippy::too_many_arguments)]
fn collection_fill(
    unit: &mut Unit,
    fx: &mut FnCtx,
    block: &mut BlockId,
    ty: Ty,
    elems: &mut [Expr],
    elem_ty: &Ty,
    insert: &str,
    what: &str,
) -> Result<Option<ValueId>> {
    let mut construct = Expr::construct(ty.clone(), vec![]);
    construct.resolve_types(unit)?;
    let coll = construct.codegen_value(unit, fx, block)?;
    for elem in elems.iter_mut() {
        let ety = elem.get_type(unit)?;
        if !compat(elem_ty, &ety) {
            return Err(err!(
                "inconsistent {what} element types '{}' and '{}'",
                elem_ty.name(),
                ety.name()
            ));
        }
        let x = elem.codegen_value(unit, fx, block)?;
        let mut call = Expr::call(
            Expr::elem(Expr::value(ty.clone(), Some(coll)), insert),
            vec![Expr::value(elem_ty.clone(), Some(x))],
        );
        call.resolve_types(unit)?;
        call.codegen(unit, fx, block)?;
    }
    Ok(Some(coll))
}

/// Build the runtime `(ptr, len)` pair for a literal global, in the
/// preamble block.
fn literal_pair(fx: &mut FnCtx, global: &str, len: usize) -> ValueId {
    let preamble = fx.preamble;
    let fb = fx.at(preamble);
    let raw = fb.global_ref(global, Type::ptr(Type::Bytes(len as u64 + 1)));
    let ptr = fb.ptr_cast(raw, Type::byte_ptr());
    let len_val = fb.const_int(len as i64);
    let pair_ty = Type::Tuple(vec![Type::byte_ptr(), Type::Int(64)]);
    let pair = fb.undef(pair_ty);
    let pair = fb.insert_value(pair, 0, ptr);
    fb.insert_value(pair, 1, len_val)
}

/// Synthesize a finalizer function invoking `__del__` and register it with
/// the runtime for the freshly constructed object.
fn emit_finalizer(
    unit: &mut Unit,
    fx: &mut FnCtx,
    block: &mut BlockId,
    ty: &Ty,
    self_val: ValueId,
) -> Result<()> {
    let fin_name = unit.next_finalizer_name();
    let fin_sig = FunctionSig::new(vec![Type::byte_ptr(), Type::byte_ptr()], Type::Void);

    let fb2 = FunctionBuilder::new(&fin_name, fin_sig.clone(), Visibility::Private);
    let mut fin_fx = FnCtx::new(fb2, Ty::Void);
    let mut fin_block = fin_fx.fb.entry_block();
    let obj_raw = fin_fx.fb.param(0);
    let obj_ir = ty.ir_type(unit)?;
    let obj = fin_fx.at(fin_block).ptr_cast(obj_raw, obj_ir);
    ty.call_magic(unit, &mut fin_fx, &mut fin_block, "__del__", &[], Some(obj), &[])?;
    fin_fx.at(fin_block).ret(None);
    unit.mb.add_function(fin_fx.fb.build());

    unit.mb
        .get_or_insert_extern(runtime::REGISTER_FINALIZER, runtime::register_finalizer_sig());
    let fb = fx.at(*block);
    let obj8 = fb.ptr_cast(self_val, Type::byte_ptr());
    let fin_val = fb.func_ref(&fin_name, fin_sig);
    fb.call(
        runtime::REGISTER_FINALIZER,
        &[obj8, fin_val],
        Type::Void,
    );
    Ok(())
}
