//! The Rill type algebra.
//!
//! Types are referentially shared values: primitive variants carry no
//! storage, composite variants share their node through `Rc`, and the two
//! nominal variants (`Ref` classes and `Param` type parameters) use `Rc`
//! identity. Vtable contents for reference types live on the type itself;
//! user overloads on structural types live in the compilation unit's
//! registry, keyed by the type's canonical name.
//!
//! Built-in magic is computed per variant on demand (see [`crate::magic`]),
//! never stored, so cloned and realized types re-derive their tables and the
//! one-time-init requirement holds trivially.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use rill_ir::{BlockId, StructDef, Type, ValueId};

use crate::error::{err, Result};
use crate::expr::Expr;
use crate::func::{FnCtx, Function, Unit};
use crate::generic::{deduce, CloneCtx};
use crate::magic;
use crate::runtime;

/// A type in the Rill language.
#[derive(Clone)]
pub enum Ty {
    Void,
    Int,
    Float,
    Bool,
    Str,
    Seq,
    Array(Rc<ArrayTy>),
    Record(Rc<RecordTy>),
    Func(Rc<FuncTy>),
    Method(Rc<MethodTy>),
    Gen(Rc<GenTy>),
    Optional(Rc<OptionalTy>),
    Partial(Rc<PartialTy>),
    Ref(Rc<RefTy>),
    Param(Rc<ParamTy>),
}

pub struct ArrayTy {
    pub elem: Ty,
}

/// An anonymous aggregate. `names` is empty for positional records, whose
/// fields answer to `"1"` … `"n"`.
pub struct RecordTy {
    pub elems: Vec<Ty>,
    pub names: Vec<String>,
}

pub struct FuncTy {
    pub ins: Vec<Ty>,
    pub out: Ty,
}

/// A bound method: a function value paired with its receiver.
pub struct MethodTy {
    pub self_ty: Ty,
    pub func: Rc<FuncTy>,
}

/// A generator yielding values of `yields`.
pub struct GenTy {
    pub yields: Ty,
}

pub struct OptionalTy {
    pub base: Ty,
}

/// A partial application: `slots[i]` is the bound type of argument `i`, or
/// `None` for a still-open hole.
pub struct PartialTy {
    pub callee: Ty,
    pub slots: Vec<Option<Ty>>,
}

/// A generic type parameter slot. Identity is `Rc` identity.
pub struct ParamTy {
    pub name: RefCell<String>,
}

impl ParamTy {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: RefCell::new(name.into()),
        })
    }
}

/// User-defined methods and magic overloads attached to a type.
///
/// `overloads` is ordered most-recently-added first: the front of the list
/// wins, so the latest user definition shadows earlier ones.
#[derive(Default, Clone)]
pub struct VTable {
    pub overloads: Vec<(String, Rc<Function>)>,
    pub methods: Vec<(String, Rc<Function>)>,
}

/// Per-unit vtable storage for types that carry none of their own
/// (primitives and other structural types), keyed by canonical type name.
#[derive(Default)]
pub struct TypeReg {
    vtables: HashMap<String, VTable>,
}

impl TypeReg {
    fn get(&self, key: &str) -> Option<&VTable> {
        self.vtables.get(key)
    }

    fn get_mut(&mut self, key: &str) -> &mut VTable {
        self.vtables.entry(key.to_string()).or_default()
    }
}

/// A nominal reference (class) type: named, heap-allocated, with fields,
/// methods, and optionally type parameters.
pub struct RefTy {
    name: RefCell<String>,
    fields: RefCell<Vec<(String, Ty)>>,
    vtable: RefCell<VTable>,
    type_params: RefCell<Vec<Rc<ParamTy>>>,
    realized: RefCell<HashMap<String, Ty>>,
    resolving: Cell<bool>,
}

impl RefTy {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: RefCell::new(name.into()),
            fields: RefCell::new(Vec::new()),
            vtable: RefCell::new(VTable::default()),
            type_params: RefCell::new(Vec::new()),
            realized: RefCell::new(HashMap::new()),
            resolving: Cell::new(false),
        })
    }

    /// A generic class with the given type parameter slots.
    pub fn generic(name: impl Into<String>, params: Vec<Rc<ParamTy>>) -> Rc<Self> {
        let r = Self::new(name);
        *r.type_params.borrow_mut() = params;
        r
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_fields(&self, fields: Vec<(String, Ty)>) {
        *self.fields.borrow_mut() = fields;
    }

    pub fn fields(&self) -> Vec<(String, Ty)> {
        self.fields
            .borrow()
            .iter()
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect()
    }

    pub fn type_params(&self) -> Vec<Rc<ParamTy>> {
        self.type_params.borrow().clone()
    }

    pub fn unrealized(&self) -> bool {
        !self.type_params.borrow().is_empty()
    }

    pub fn num_generics(&self) -> usize {
        self.type_params.borrow().len()
    }

    /// Deduce this class's type parameters from the argument types of a
    /// pending construction, against `__init__`'s formals.
    pub fn deduce_from_arg_types(&self, args: &[Option<Ty>]) -> Result<Vec<Ty>> {
        let name = self.name();
        let init = self
            .vtable
            .borrow()
            .overloads
            .iter()
            .find(|(n, _)| n == "__init__")
            .map(|(_, f)| f.clone())
            .ok_or_else(|| err!("cannot deduce type parameters for '{name}' without __init__"))?;
        let formals: Vec<Ty> = init.ins().iter().skip(1).cloned().collect();
        deduce(&self.type_params.borrow(), &formals, args, &name)
    }

    /// Substitute the type parameters with concrete types, caching by the
    /// binding tuple so repeated realizations share identity.
    pub fn realize(self: &Rc<Self>, bindings: Vec<Ty>) -> Result<Ty> {
        let params = self.type_params();
        if params.len() != bindings.len() {
            return Err(err!(
                "expected {} type parameters for '{}', got {}",
                params.len(),
                self.name(),
                bindings.len()
            ));
        }
        let key = bindings
            .iter()
            .map(Ty::name)
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(done) = self.realized.borrow().get(&key) {
            return Ok(done.clone());
        }
        let mut ctx = CloneCtx::new();
        for (p, b) in params.iter().zip(&bindings) {
            ctx.bind_param(p, b.clone());
        }
        let cloned = Ty::Ref(self.clone()).clone_under(&mut ctx);
        if let Ty::Ref(r) = &cloned {
            *r.name.borrow_mut() = format!("{}[{key}]", self.name());
            r.type_params.borrow_mut().clear();
        }
        self.realized.borrow_mut().insert(key, cloned.clone());
        Ok(cloned)
    }
}

/// Magic-method names start and end with a double underscore.
pub fn is_magic(name: &str) -> bool {
    name.len() >= 4 && name.starts_with("__") && name.ends_with("__")
}

/// Symmetric compatibility: either side structurally equals the other.
pub fn compat(a: &Ty, b: &Ty) -> bool {
    a.is(b) || b.is(a)
}

fn args_to_str(args: &[Ty]) -> String {
    let names: Vec<String> = args.iter().map(Ty::name).collect();
    format!("({})", names.join(", "))
}

impl Ty {
    // ── constructors ────────────────────────────────────────────────

    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Rc::new(ArrayTy { elem }))
    }

    pub fn record(elems: Vec<Ty>, names: Vec<String>) -> Ty {
        Ty::Record(Rc::new(RecordTy { elems, names }))
    }

    pub fn func(ins: Vec<Ty>, out: Ty) -> Ty {
        Ty::Func(Rc::new(FuncTy { ins, out }))
    }

    pub fn method(self_ty: Ty, func: Rc<FuncTy>) -> Ty {
        Ty::Method(Rc::new(MethodTy { self_ty, func }))
    }

    pub fn gen(yields: Ty) -> Ty {
        Ty::Gen(Rc::new(GenTy { yields }))
    }

    pub fn optional(base: Ty) -> Ty {
        Ty::Optional(Rc::new(OptionalTy { base }))
    }

    pub fn partial(callee: Ty, slots: Vec<Option<Ty>>) -> Ty {
        Ty::Partial(Rc::new(PartialTy { callee, slots }))
    }

    // ── identity ────────────────────────────────────────────────────

    /// Human-readable name, also used as the canonical key for vtable and
    /// realization caches.
    pub fn name(&self) -> String {
        match self {
            Ty::Void => "Void".into(),
            Ty::Int => "Int".into(),
            Ty::Float => "Float".into(),
            Ty::Bool => "Bool".into(),
            Ty::Str => "Str".into(),
            Ty::Seq => "Seq".into(),
            Ty::Array(a) => format!("{}[]", a.elem.name()),
            Ty::Record(r) => {
                let parts: Vec<String> = r.elems.iter().map(Ty::name).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Ty::Func(f) => {
                let ins: Vec<String> = f.ins.iter().map(Ty::name).collect();
                format!("({} -> {})", ins.join(", "), f.out.name())
            }
            Ty::Method(m) => {
                let ins: Vec<String> = m.func.ins.iter().map(Ty::name).collect();
                format!(
                    "method[{}, ({} -> {})]",
                    m.self_ty.name(),
                    ins.join(", "),
                    m.func.out.name()
                )
            }
            Ty::Gen(g) => format!("Gen[{}]", g.yields.name()),
            Ty::Optional(o) => format!("Optional[{}]", o.base.name()),
            Ty::Partial(p) => {
                let slots: Vec<String> = p
                    .slots
                    .iter()
                    .map(|s| s.as_ref().map(Ty::name).unwrap_or_else(|| "_".into()))
                    .collect();
                format!("partial[{}, ({})]", p.callee.name(), slots.join(", "))
            }
            Ty::Ref(r) => r.name(),
            Ty::Param(p) => p.name.borrow().clone(),
        }
    }

    /// Structural equality: same variant constructor and same base-type
    /// list. `Ref` classes and `Param` slots compare by identity.
    pub fn is(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Void, Ty::Void)
            | (Ty::Int, Ty::Int)
            | (Ty::Float, Ty::Float)
            | (Ty::Bool, Ty::Bool)
            | (Ty::Str, Ty::Str)
            | (Ty::Seq, Ty::Seq) => true,
            (Ty::Array(a), Ty::Array(b)) => a.elem.is(&b.elem),
            (Ty::Record(a), Ty::Record(b)) => {
                a.elems.len() == b.elems.len()
                    && a.names == b.names
                    && a.elems.iter().zip(&b.elems).all(|(x, y)| x.is(y))
            }
            (Ty::Func(a), Ty::Func(b)) => {
                a.ins.len() == b.ins.len()
                    && a.ins.iter().zip(&b.ins).all(|(x, y)| x.is(y))
                    && a.out.is(&b.out)
            }
            (Ty::Method(a), Ty::Method(b)) => {
                a.self_ty.is(&b.self_ty)
                    && Ty::Func(a.func.clone()).is(&Ty::Func(b.func.clone()))
            }
            (Ty::Gen(a), Ty::Gen(b)) => a.yields.is(&b.yields),
            (Ty::Optional(a), Ty::Optional(b)) => a.base.is(&b.base),
            (Ty::Partial(a), Ty::Partial(b)) => {
                a.callee.is(&b.callee)
                    && a.slots.len() == b.slots.len()
                    && a.slots.iter().zip(&b.slots).all(|(x, y)| match (x, y) {
                        (None, None) => true,
                        (Some(x), Some(y)) => x.is(y),
                        _ => false,
                    })
            }
            (Ty::Ref(a), Ty::Ref(b)) => Rc::ptr_eq(a, b),
            (Ty::Param(a), Ty::Param(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Resolve nested entities that need preparation before type queries:
    /// for reference types, the methods' own signatures and bodies.
    pub fn resolve_types(&self, unit: &Unit) -> Result<()> {
        if let Ty::Ref(r) = self {
            if r.resolving.get() {
                return Ok(());
            }
            r.resolving.set(true);
            let vt = r.vtable.borrow().clone();
            for (_, f) in vt.overloads.iter().chain(vt.methods.iter()) {
                f.resolve_types(unit)?;
            }
        }
        Ok(())
    }

    // ── representation ──────────────────────────────────────────────

    /// Whether values contain no heap pointers the collector must trace.
    pub fn is_atomic(&self) -> bool {
        match self {
            Ty::Void | Ty::Int | Ty::Float | Ty::Bool => true,
            Ty::Str | Ty::Seq | Ty::Array(_) | Ty::Ref(_) | Ty::Gen(_) => false,
            Ty::Record(r) => r.elems.iter().all(Ty::is_atomic),
            Ty::Optional(o) => o.base.is_atomic(),
            Ty::Func(_) | Ty::Method(_) | Ty::Partial(_) => true,
            Ty::Param(_) => false,
        }
    }

    /// Size of a value of this type in bytes, under the fixed layout the
    /// emitted IR assumes.
    pub fn size(&self) -> Result<u64> {
        Ok(match self {
            Ty::Void => 0,
            Ty::Int | Ty::Float => 8,
            Ty::Bool => 1,
            Ty::Str | Ty::Seq => 16,
            Ty::Array(_) => 16,
            Ty::Record(r) => {
                let mut total = 0;
                for elem in &r.elems {
                    total += elem.size()?;
                }
                total
            }
            Ty::Func(_) | Ty::Gen(_) | Ty::Ref(_) => 8,
            Ty::Method(m) => 8 + m.self_ty.size()?,
            Ty::Optional(o) => 1 + o.base.size()?,
            Ty::Partial(p) => {
                let mut total = 8;
                for slot in p.slots.iter().flatten() {
                    total += slot.size()?;
                }
                total
            }
            Ty::Param(p) => {
                return Err(err!(
                    "cannot determine size of generic type '{}'",
                    p.name.borrow()
                ))
            }
        })
    }

    /// Lower to the IR-level representation type, registering struct layouts
    /// with the module as needed.
    pub fn ir_type(&self, unit: &mut Unit) -> Result<Type> {
        Ok(match self {
            Ty::Void => Type::Void,
            Ty::Int => Type::Int(64),
            Ty::Float => Type::Float(64),
            Ty::Bool => Type::Bool,
            Ty::Str | Ty::Seq => Type::Tuple(vec![Type::byte_ptr(), Type::Int(64)]),
            Ty::Array(a) => {
                let elem = a.elem.ir_type(unit)?;
                Type::Tuple(vec![Type::ptr(elem), Type::Int(64)])
            }
            Ty::Record(r) => {
                let mut elems = Vec::with_capacity(r.elems.len());
                for e in &r.elems {
                    elems.push(e.ir_type(unit)?);
                }
                Type::Tuple(elems)
            }
            Ty::Func(f) => Type::Function(Box::new(func_ir_sig(f, unit)?)),
            Ty::Method(m) => {
                let self_ir = m.self_ty.ir_type(unit)?;
                let fn_ir = Type::Function(Box::new(func_ir_sig(&m.func, unit)?));
                Type::Tuple(vec![self_ir, fn_ir])
            }
            Ty::Gen(_) => Type::byte_ptr(),
            Ty::Optional(o) => Type::Tuple(vec![Type::Bool, o.base.ir_type(unit)?]),
            Ty::Partial(p) => {
                let mut elems = vec![p.callee.ir_type(unit)?];
                for slot in p.slots.iter().flatten() {
                    elems.push(slot.ir_type(unit)?);
                }
                Type::Tuple(elems)
            }
            Ty::Ref(r) => {
                let name = r.name();
                if !unit.mb.has_struct(&name) {
                    // Placeholder first: fields may refer back to this class.
                    unit.mb.add_struct(StructDef {
                        name: name.clone(),
                        fields: vec![],
                    });
                    let mut fields = Vec::new();
                    for (fname, fty) in r.fields() {
                        fields.push((fname, fty.ir_type(unit)?));
                    }
                    unit.mb.set_struct_fields(&name, fields);
                }
                Type::ptr(Type::Struct(name))
            }
            Ty::Param(p) => {
                return Err(err!("cannot instantiate generic type '{}'", p.name.borrow()))
            }
        })
    }

    // ── fields and vtables ──────────────────────────────────────────

    /// Field list for aggregate types; positional records answer to
    /// `"1"` … `"n"`.
    pub fn field_list(&self) -> Option<Vec<(String, Ty)>> {
        match self {
            Ty::Record(r) => {
                if r.names.is_empty() {
                    Some(
                        r.elems
                            .iter()
                            .enumerate()
                            .map(|(i, t)| ((i + 1).to_string(), t.clone()))
                            .collect(),
                    )
                } else {
                    Some(
                        r.names
                            .iter()
                            .cloned()
                            .zip(r.elems.iter().cloned())
                            .collect(),
                    )
                }
            }
            Ty::Ref(r) => Some(r.fields()),
            _ => None,
        }
    }

    fn with_vtable<T>(&self, unit: &Unit, f: impl FnOnce(&VTable) -> T) -> T {
        match self {
            Ty::Ref(r) => f(&r.vtable.borrow()),
            _ => match unit.types.get(&self.name()) {
                Some(vt) => f(vt),
                None => f(&VTable::default()),
            },
        }
    }

    /// User magic overloads for `name`, most recent first.
    pub fn find_overloads(&self, unit: &Unit, name: &str) -> Vec<Rc<Function>> {
        self.with_vtable(unit, |vt| {
            vt.overloads
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, f)| f.clone())
                .collect()
        })
    }

    fn find_method(&self, unit: &Unit, name: &str) -> Option<Rc<Function>> {
        self.with_vtable(unit, |vt| {
            vt.methods
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, f)| f.clone())
        })
    }

    /// Whether `name` resolves to an overload, built-in magic, or method.
    pub fn has_method(&self, unit: &Unit, name: &str) -> bool {
        !self.find_overloads(unit, name).is_empty()
            || magic::builtins(self).iter().any(|m| m.name == name)
            || self.find_method(unit, name).is_some()
    }

    /// Look up a (non-magic) method by name.
    pub fn get_method(&self, unit: &Unit, name: &str) -> Result<Rc<Function>> {
        self.find_method(unit, name)
            .ok_or_else(|| err!("type '{}' has no method '{name}'", self.name()))
    }

    /// Attach a method or magic overload.
    ///
    /// Magic names are pushed to the front of the overload list so the
    /// latest definition wins. `__new__` cannot be overridden. Non-magic
    /// names must be unique unless `force` is set, and may not collide with
    /// a field.
    pub fn add_method(
        &self,
        unit: &mut Unit,
        name: &str,
        func: Rc<Function>,
        force: bool,
    ) -> Result<()> {
        if is_magic(name) {
            if name == "__new__" {
                return Err(err!("cannot override __new__"));
            }
            match self {
                Ty::Ref(r) => r
                    .vtable
                    .borrow_mut()
                    .overloads
                    .insert(0, (name.to_string(), func)),
                _ => unit
                    .types
                    .get_mut(&self.name())
                    .overloads
                    .insert(0, (name.to_string(), func)),
            }
            return Ok(());
        }

        if self.has_method(unit, name) {
            if force {
                match self {
                    Ty::Ref(r) => {
                        let mut vt = r.vtable.borrow_mut();
                        if let Some(slot) = vt.methods.iter_mut().find(|(n, _)| n == name) {
                            slot.1 = func;
                        }
                    }
                    _ => {
                        let vt = unit.types.get_mut(&self.name());
                        if let Some(slot) = vt.methods.iter_mut().find(|(n, _)| n == name) {
                            slot.1 = func;
                        }
                    }
                }
                return Ok(());
            }
            return Err(err!("duplicate method '{name}'"));
        }

        if self
            .field_list()
            .map(|fields| fields.iter().any(|(n, _)| n == name))
            .unwrap_or(false)
        {
            return Err(err!("field '{name}' conflicts with method"));
        }

        match self {
            Ty::Ref(r) => r.vtable.borrow_mut().methods.push((name.to_string(), func)),
            _ => unit
                .types
                .get_mut(&self.name())
                .methods
                .push((name.to_string(), func)),
        }
        Ok(())
    }

    // ── member access ───────────────────────────────────────────────

    /// Type of member `name`: overloads, then built-in magic, then methods,
    /// then fields.
    pub fn memb_type(&self, unit: &Unit, name: &str) -> Result<Ty> {
        if let Some(f) = self.find_overloads(unit, name).into_iter().next() {
            return Ok(Ty::method(self.clone(), f.func_ty_rc()));
        }
        for m in magic::builtins(self) {
            if m.name == name {
                let mut ins = vec![self.clone()];
                ins.extend(m.args.iter().cloned());
                return Ok(Ty::method(self.clone(), Rc::new(FuncTy { ins, out: m.out })));
            }
        }
        if let Some(f) = self.find_method(unit, name) {
            return Ok(Ty::method(self.clone(), f.func_ty_rc()));
        }
        if let Some(fields) = self.field_list() {
            if let Some((_, fty)) = fields.iter().find(|(n, _)| n == name) {
                if !fty.is(&Ty::Void) {
                    return Ok(fty.clone());
                }
            }
        }
        Err(err!("type '{}' has no member '{name}'", self.name()))
    }

    /// Emit member access against a value. Method results bind `self`;
    /// fields are extracted by index.
    pub fn memb(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        self_val: ValueId,
        name: &str,
    ) -> Result<ValueId> {
        if let Some(f) = self.find_overloads(unit, name).into_iter().next() {
            return self.bind_method(unit, fx, block, self_val, &f);
        }
        for m in magic::builtins(self) {
            if m.name == name {
                let (symbol, fty) = magic::magic_as_func(unit, self, &m)?;
                return self.bind_named(unit, fx, block, self_val, &symbol, &fty);
            }
        }
        if let Some(f) = self.find_method(unit, name) {
            return self.bind_method(unit, fx, block, self_val, &f);
        }
        if let Some(fields) = self.field_list() {
            if let Some(idx) = fields.iter().position(|(n, _)| n == name) {
                let fty = fields[idx].1.clone();
                let fty_ir = fty.ir_type(unit)?;
                let fb = fx.at(*block);
                return Ok(match self {
                    Ty::Ref(_) => {
                        let ptr = fb.field_ptr(self_val, idx as u32, fty_ir);
                        fb.load(ptr)
                    }
                    _ => fb.extract_value(self_val, idx as u32, fty_ir),
                });
            }
        }
        Err(err!("type '{}' has no member '{name}'", self.name()))
    }

    fn bind_method(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        self_val: ValueId,
        func: &Rc<Function>,
    ) -> Result<ValueId> {
        let symbol = func.codegen(unit)?;
        let fty = func.func_ty_rc();
        self.bind_named(unit, fx, block, self_val, &symbol, &fty)
    }

    fn bind_named(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        self_val: ValueId,
        symbol: &str,
        fty: &Rc<FuncTy>,
    ) -> Result<ValueId> {
        let sig = func_ir_sig(fty, unit)?;
        let method_ir = Ty::method(self.clone(), fty.clone()).ir_type(unit)?;
        let fb = fx.at(*block);
        let fval = fb.func_ref(symbol, sig);
        let pair = fb.undef(method_ir);
        let pair = fb.insert_value(pair, 0, self_val);
        Ok(fb.insert_value(pair, 1, fval))
    }

    /// Type of static member `name`: like `memb_type` but with no `self`
    /// binding and no fields.
    pub fn static_memb_type(&self, unit: &Unit, name: &str) -> Result<Ty> {
        if let Some(f) = self.find_overloads(unit, name).into_iter().next() {
            return Ok(Ty::Func(f.func_ty_rc()));
        }
        for m in magic::builtins(self) {
            if m.name == name {
                let mut ins = vec![self.clone()];
                ins.extend(m.args.iter().cloned());
                return Ok(Ty::Func(Rc::new(FuncTy { ins, out: m.out })));
            }
        }
        if let Some(f) = self.find_method(unit, name) {
            return Ok(Ty::Func(f.func_ty_rc()));
        }
        Err(err!("type '{}' has no static member '{name}'", self.name()))
    }

    /// Emit static member access.
    pub fn static_memb(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        name: &str,
    ) -> Result<ValueId> {
        if let Some(f) = self.find_overloads(unit, name).into_iter().next() {
            let symbol = f.codegen(unit)?;
            let sig = func_ir_sig(&f.func_ty_rc(), unit)?;
            return Ok(fx.at(*block).func_ref(symbol, sig));
        }
        for m in magic::builtins(self) {
            if m.name == name {
                let (symbol, fty) = magic::magic_as_func(unit, self, &m)?;
                let sig = func_ir_sig(&fty, unit)?;
                return Ok(fx.at(*block).func_ref(symbol, sig));
            }
        }
        if let Some(f) = self.find_method(unit, name) {
            let symbol = f.codegen(unit)?;
            let sig = func_ir_sig(&f.func_ty_rc(), unit)?;
            return Ok(fx.at(*block).func_ref(symbol, sig));
        }
        Err(err!("type '{}' has no static member '{name}'", self.name()))
    }

    /// Emit a member update. Only fields are assignable; for records the
    /// result is a new aggregate, for reference types the store goes through
    /// the object pointer and the object value is returned unchanged.
    pub fn set_memb(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        self_val: ValueId,
        name: &str,
        new_val: ValueId,
    ) -> Result<ValueId> {
        if let Some(fields) = self.field_list() {
            if let Some(idx) = fields.iter().position(|(n, _)| n == name) {
                let fty_ir = fields[idx].1.ir_type(unit)?;
                let fb = fx.at(*block);
                return Ok(match self {
                    Ty::Ref(_) => {
                        let ptr = fb.field_ptr(self_val, idx as u32, fty_ir);
                        fb.store(ptr, new_val);
                        self_val
                    }
                    _ => fb.insert_value(self_val, idx as u32, new_val),
                });
            }
        }
        Err(err!(
            "type '{}' has no assignable member '{name}'",
            self.name()
        ))
    }

    // ── magic dispatch ──────────────────────────────────────────────

    /// Resolve the result type of a magic call: user overloads first (most
    /// recent first, checked by speculatively typing a call), then built-in
    /// magic by exact argument-type match.
    pub fn magic_out(&self, unit: &Unit, name: &str, args: &[Ty]) -> Result<Ty> {
        for f in self.find_overloads(unit, name) {
            let mut arg_exprs = vec![Expr::value(self.clone(), None)];
            arg_exprs.extend(args.iter().map(|t| Expr::value(t.clone(), None)));
            let mut call = Expr::call(Expr::func(f), arg_exprs);
            // A later overload may still match these argument types.
            if call.resolve_types(unit).is_err() {
                continue;
            }
            match call.get_type(unit) {
                Ok(out) => return Ok(out),
                Err(_) => continue,
            }
        }
        for m in magic::builtins(self) {
            if m.name == name
                && m.args.len() == args.len()
                && m.args.iter().zip(args).all(|(a, b)| compat(a, b))
            {
                return Ok(m.out);
            }
        }
        Err(err!(
            "cannot find method '{name}' for type '{}' with specified argument types {}",
            self.name(),
            args_to_str(args)
        ))
    }

    /// Emit a magic call. User overloads go through the ordinary call
    /// pipeline; built-in magic emits directly.
    pub fn call_magic(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        name: &str,
        arg_tys: &[Ty],
        self_val: Option<ValueId>,
        args: &[ValueId],
    ) -> Result<Option<ValueId>> {
        for f in self.find_overloads(unit, name) {
            let mut arg_exprs = vec![Expr::value(self.clone(), self_val)];
            arg_exprs.extend(
                arg_tys
                    .iter()
                    .zip(args)
                    .map(|(t, v)| Expr::value(t.clone(), Some(*v))),
            );
            let mut call = Expr::call(Expr::func(f), arg_exprs);
            if call.resolve_types(unit).is_err() {
                continue;
            }
            if call.get_type(unit).is_err() {
                continue;
            }
            return call.codegen(unit, fx, block);
        }
        for m in magic::builtins(self) {
            if m.name == name
                && m.args.len() == arg_tys.len()
                && m.args.iter().zip(arg_tys).all(|(a, b)| compat(a, b))
            {
                return (m.emit)(unit, fx, block, self_val, args);
            }
        }
        Err(err!(
            "cannot find method '{name}' for type '{}' with specified argument types {}",
            self.name(),
            args_to_str(arg_tys)
        ))
    }

    /// Emit `__bool__`, requiring its result type to be Bool.
    pub fn bool_value(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        self_val: ValueId,
    ) -> Result<ValueId> {
        if !self.magic_out(unit, "__bool__", &[])?.is(&Ty::Bool) {
            return Err(err!("the output type of __bool__ is not boolean"));
        }
        let out = self.call_magic(unit, fx, block, "__bool__", &[], Some(self_val), &[])?;
        out.ok_or_else(|| err!("__bool__ produced no value"))
    }

    /// The zero value of this type, or an error if it has none.
    pub fn default_value(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
    ) -> Result<ValueId> {
        match self {
            Ty::Int => Ok(fx.at(*block).const_int(0)),
            Ty::Float => Ok(fx.at(*block).const_float(0.0)),
            Ty::Bool => Ok(fx.at(*block).const_bool(false)),
            Ty::Str | Ty::Seq | Ty::Array(_) => {
                let ir = self.ir_type(unit)?;
                let fb = fx.at(*block);
                let ptr = fb.const_null(match &ir {
                    Type::Tuple(elems) => elems[0].clone(),
                    _ => Type::byte_ptr(),
                });
                let len = fb.const_int(0);
                let pair = fb.undef(ir);
                let pair = fb.insert_value(pair, 0, ptr);
                Ok(fb.insert_value(pair, 1, len))
            }
            Ty::Record(r) => {
                let ir = self.ir_type(unit)?;
                let mut agg = fx.at(*block).undef(ir);
                let elems = r.elems.clone();
                for (i, elem) in elems.iter().enumerate() {
                    let v = elem.default_value(unit, fx, block)?;
                    agg = fx.at(*block).insert_value(agg, i as u32, v);
                }
                Ok(agg)
            }
            Ty::Optional(_) => {
                let ir = self.ir_type(unit)?;
                let fb = fx.at(*block);
                let flag = fb.const_bool(false);
                let agg = fb.undef(ir);
                Ok(fb.insert_value(agg, 0, flag))
            }
            Ty::Ref(_) => {
                let ir = self.ir_type(unit)?;
                Ok(fx.at(*block).const_null(ir))
            }
            _ => Err(err!("type '{}' has no default value", self.name())),
        }
    }

    /// Emit a runtime allocation of `count` values of this type, returning
    /// a pointer-of-self.
    pub fn alloc(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        count: ValueId,
    ) -> Result<ValueId> {
        let size = self.size()?;
        if size == 0 {
            return Err(err!("cannot create array of type '{}'", self.name()));
        }
        unit.mb.get_or_insert_extern(runtime::ALLOC, runtime::alloc_sig());
        let elem_ir = self.ir_type(unit)?;
        let fb = fx.at(*block);
        let elem_size = fb.const_int(size as i64);
        let full_size = fb.mul(count, elem_size);
        let mem = fb.call(runtime::ALLOC, &[full_size], Type::byte_ptr());
        Ok(fb.ptr_cast(mem, Type::ptr(elem_ir)))
    }

    // ── calls ───────────────────────────────────────────────────────

    /// The result type of calling a value of this type with the given
    /// argument types.
    pub fn get_call_type(&self, unit: &Unit, args: &[Ty]) -> Result<Ty> {
        match self {
            Ty::Func(f) => {
                if f.ins.len() != args.len()
                    || !f.ins.iter().zip(args).all(|(a, b)| compat(a, b))
                {
                    return Err(err!(
                        "cannot call '{}' with argument types {}",
                        self.name(),
                        args_to_str(args)
                    ));
                }
                Ok(f.out.clone())
            }
            Ty::Method(m) => {
                let ins = &m.func.ins[1..];
                if ins.len() != args.len() || !ins.iter().zip(args).all(|(a, b)| compat(a, b)) {
                    return Err(err!(
                        "cannot call '{}' with argument types {}",
                        self.name(),
                        args_to_str(args)
                    ));
                }
                Ok(m.func.out.clone())
            }
            Ty::Partial(p) => {
                let holes = p.slots.iter().filter(|s| s.is_none()).count();
                if holes != args.len() {
                    return Err(err!(
                        "cannot call '{}' with argument types {}",
                        self.name(),
                        args_to_str(args)
                    ));
                }
                let mut full = Vec::with_capacity(p.slots.len());
                let mut next = args.iter();
                for slot in &p.slots {
                    match slot {
                        Some(t) => full.push(t.clone()),
                        None => full.push(
                            next.next()
                                .expect("hole count was checked above")
                                .clone(),
                        ),
                    }
                }
                p.callee.get_call_type(unit, &full)
            }
            _ => Err(err!("cannot call type '{}'", self.name())),
        }
    }

    /// Emit a call of `callee` (a value of this type) with `args`.
    /// Returns `None` when the call result is Void.
    pub fn call_value(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: &mut BlockId,
        callee: ValueId,
        args: &[ValueId],
    ) -> Result<Option<ValueId>> {
        match self {
            Ty::Func(f) => {
                let out_ir = f.out.ir_type(unit)?;
                let ret = fx.at(*block).call_indirect(callee, args, out_ir);
                Ok(if f.out.is(&Ty::Void) { None } else { Some(ret) })
            }
            Ty::Method(m) => {
                let self_ir = m.self_ty.ir_type(unit)?;
                let fn_ir = Type::Function(Box::new(func_ir_sig(&m.func, unit)?));
                let out_ir = m.func.out.ir_type(unit)?;
                let fb = fx.at(*block);
                let self_val = fb.extract_value(callee, 0, self_ir);
                let fval = fb.extract_value(callee, 1, fn_ir);
                let mut full = vec![self_val];
                full.extend_from_slice(args);
                let ret = fb.call_indirect(fval, &full, out_ir);
                Ok(if m.func.out.is(&Ty::Void) {
                    None
                } else {
                    Some(ret)
                })
            }
            Ty::Partial(p) => {
                let callee_ir = p.callee.ir_type(unit)?;
                let inner = fx.at(*block).extract_value(callee, 0, callee_ir);
                let mut full = Vec::with_capacity(p.slots.len());
                let mut bound_idx = 1u32;
                let mut next = args.iter();
                for slot in &p.slots {
                    match slot {
                        Some(t) => {
                            let slot_ir = t.ir_type(unit)?;
                            full.push(fx.at(*block).extract_value(callee, bound_idx, slot_ir));
                            bound_idx += 1;
                        }
                        None => match next.next() {
                            Some(v) => full.push(*v),
                            None => {
                                return Err(err!(
                                    "cannot call '{}': too few arguments",
                                    self.name()
                                ))
                            }
                        },
                    }
                }
                p.callee.call_value(unit, fx, block, inner, &full)
            }
            _ => Err(err!("cannot call type '{}'", self.name())),
        }
    }

    // ── cloning ─────────────────────────────────────────────────────

    /// Deep-clone under a generic clone context. Identity for types with no
    /// type-parameter content; parameter slots resolve through the context.
    pub fn clone_under(&self, ctx: &mut CloneCtx) -> Ty {
        match self {
            Ty::Void | Ty::Int | Ty::Float | Ty::Bool | Ty::Str | Ty::Seq => self.clone(),
            Ty::Array(a) => Ty::array(a.elem.clone_under(ctx)),
            Ty::Record(r) => Ty::record(
                r.elems.iter().map(|t| t.clone_under(ctx)).collect(),
                r.names.clone(),
            ),
            Ty::Func(f) => Ty::func(
                f.ins.iter().map(|t| t.clone_under(ctx)).collect(),
                f.out.clone_under(ctx),
            ),
            Ty::Method(m) => {
                let func = Rc::new(FuncTy {
                    ins: m.func.ins.iter().map(|t| t.clone_under(ctx)).collect(),
                    out: m.func.out.clone_under(ctx),
                });
                Ty::method(m.self_ty.clone_under(ctx), func)
            }
            Ty::Gen(g) => Ty::gen(g.yields.clone_under(ctx)),
            Ty::Optional(o) => Ty::optional(o.base.clone_under(ctx)),
            Ty::Partial(p) => Ty::partial(
                p.callee.clone_under(ctx),
                p.slots
                    .iter()
                    .map(|s| s.as_ref().map(|t| t.clone_under(ctx)))
                    .collect(),
            ),
            Ty::Param(p) => ctx.param_binding(p).unwrap_or_else(|| self.clone()),
            Ty::Ref(r) => {
                if let Some(done) = ctx.seen_ref(r) {
                    return done;
                }
                if !r.unrealized() && !self.contains_param() {
                    ctx.add_ref(r, Ty::Ref(r.clone()));
                    return self.clone();
                }
                let fresh = RefTy::new(r.name());
                let out = Ty::Ref(fresh.clone());
                // Memoize before cloning fields: classes may refer to themselves.
                ctx.add_ref(r, out.clone());
                let mut new_params = Vec::new();
                for p in r.type_params() {
                    if ctx.param_binding(&p).is_none() {
                        let np = ParamTy::new(p.name.borrow().clone());
                        ctx.bind_param(&p, Ty::Param(np.clone()));
                        new_params.push(np);
                    }
                }
                *fresh.type_params.borrow_mut() = new_params;
                let fields = r
                    .fields()
                    .iter()
                    .map(|(n, t)| (n.clone(), t.clone_under(ctx)))
                    .collect();
                fresh.set_fields(fields);
                let vt = r.vtable.borrow().clone();
                let mut new_vt = VTable::default();
                for (n, f) in vt.overloads {
                    new_vt.overloads.push((n, f.clone_under(ctx)));
                }
                for (n, f) in vt.methods {
                    new_vt.methods.push((n, f.clone_under(ctx)));
                }
                *fresh.vtable.borrow_mut() = new_vt;
                out
            }
        }
    }

    /// Whether any type parameter occurs inside this type.
    pub fn contains_param(&self) -> bool {
        fn walk(ty: &Ty, seen: &mut HashSet<usize>) -> bool {
            match ty {
                Ty::Param(_) => true,
                Ty::Void | Ty::Int | Ty::Float | Ty::Bool | Ty::Str | Ty::Seq => false,
                Ty::Array(a) => walk(&a.elem, seen),
                Ty::Record(r) => r.elems.iter().any(|t| walk(t, seen)),
                Ty::Func(f) => f.ins.iter().any(|t| walk(t, seen)) || walk(&f.out, seen),
                Ty::Method(m) => {
                    walk(&m.self_ty, seen)
                        || m.func.ins.iter().any(|t| walk(t, seen))
                        || walk(&m.func.out, seen)
                }
                Ty::Gen(g) => walk(&g.yields, seen),
                Ty::Optional(o) => walk(&o.base, seen),
                Ty::Partial(p) => {
                    walk(&p.callee, seen)
                        || p.slots.iter().flatten().any(|t| walk(t, seen))
                }
                Ty::Ref(r) => {
                    let key = Rc::as_ptr(r) as usize;
                    if !seen.insert(key) {
                        return false;
                    }
                    !r.type_params.borrow().is_empty()
                        || r.fields.borrow().iter().any(|(_, t)| walk(t, seen))
                }
            }
        }
        walk(self, &mut HashSet::new())
    }
}

impl GenTy {
    pub fn resume(&self, unit: &mut Unit, fx: &mut FnCtx, block: BlockId, gen: ValueId) {
        unit.mb
            .get_or_insert_extern(runtime::CO_RESUME, runtime::co_resume_sig());
        fx.at(block).call(runtime::CO_RESUME, &[gen], Type::Void);
    }

    pub fn done(&self, unit: &mut Unit, fx: &mut FnCtx, block: BlockId, gen: ValueId) -> ValueId {
        unit.mb
            .get_or_insert_extern(runtime::CO_DONE, runtime::co_done_sig());
        fx.at(block).call(runtime::CO_DONE, &[gen], Type::Bool)
    }

    /// Load the current promise value: the runtime hands back a pointer to
    /// the promise slot, which is cast to the yield type and loaded.
    pub fn promise(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: BlockId,
        gen: ValueId,
    ) -> Result<ValueId> {
        unit.mb
            .get_or_insert_extern(runtime::CO_PROMISE, runtime::co_promise_sig());
        let yield_ir = self.yields.ir_type(unit)?;
        let fb = fx.at(block);
        let raw = fb.call(runtime::CO_PROMISE, &[gen], Type::byte_ptr());
        let slot = fb.ptr_cast(raw, Type::ptr(yield_ir));
        Ok(fb.load(slot))
    }

    pub fn destroy(&self, unit: &mut Unit, fx: &mut FnCtx, block: BlockId, gen: ValueId) {
        unit.mb
            .get_or_insert_extern(runtime::CO_DESTROY, runtime::co_destroy_sig());
        fx.at(block).call(runtime::CO_DESTROY, &[gen], Type::Void);
    }
}

/// Lower a function type to its IR signature.
pub fn func_ir_sig(fty: &FuncTy, unit: &mut Unit) -> Result<rill_ir::FunctionSig> {
    let mut params = Vec::with_capacity(fty.ins.len());
    for t in &fty.ins {
        params.push(t.ir_type(unit)?);
    }
    Ok(rill_ir::FunctionSig::new(params, fty.out.ir_type(unit)?))
}

impl std::fmt::Debug for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        assert!(Ty::Int.is(&Ty::Int));
        assert!(!Ty::Int.is(&Ty::Float));
        assert!(Ty::array(Ty::Int).is(&Ty::array(Ty::Int)));
        assert!(!Ty::array(Ty::Int).is(&Ty::array(Ty::Float)));
        assert!(Ty::record(vec![Ty::Int, Ty::Str], vec![])
            .is(&Ty::record(vec![Ty::Int, Ty::Str], vec![])));
        assert!(!Ty::record(vec![Ty::Int], vec![]).is(&Ty::record(vec![Ty::Int, Ty::Int], vec![])));
        assert!(Ty::func(vec![Ty::Int], Ty::Bool).is(&Ty::func(vec![Ty::Int], Ty::Bool)));
        assert!(!Ty::func(vec![Ty::Int], Ty::Bool).is(&Ty::func(vec![Ty::Int], Ty::Void)));

        // Nominal types compare by identity, not by name.
        let a = RefTy::new("P");
        let b = RefTy::new("P");
        assert!(Ty::Ref(a.clone()).is(&Ty::Ref(a.clone())));
        assert!(!Ty::Ref(a).is(&Ty::Ref(b)));
    }

    #[test]
    fn positional_record_fields() {
        let rec = Ty::record(vec![Ty::Int, Ty::Str], vec![]);
        let fields = rec.field_list().unwrap();
        assert_eq!(fields[0].0, "1");
        assert_eq!(fields[1].0, "2");
        assert!(fields[1].1.is(&Ty::Str));
    }

    #[test]
    fn magic_name_detection() {
        assert!(is_magic("__add__"));
        assert!(is_magic("__new__"));
        assert!(!is_magic("append"));
        assert!(!is_magic("__"));
        assert!(!is_magic("_private_"));
    }

    #[test]
    fn sizes() {
        assert_eq!(Ty::Int.size().unwrap(), 8);
        assert_eq!(Ty::Bool.size().unwrap(), 1);
        assert_eq!(Ty::Str.size().unwrap(), 16);
        assert_eq!(
            Ty::record(vec![Ty::Int, Ty::Bool], vec![]).size().unwrap(),
            9
        );
        assert_eq!(Ty::Void.size().unwrap(), 0);
    }
}
