//! Functions, variables, and the per-function emission context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rill_ir::{BlockId, FunctionBuilder, InstId, Module, ModuleBuilder, ValueId, Visibility};

use crate::error::{err, Result};
use crate::generic::{deduce, CloneCtx};
use crate::stmt::Scope;
use crate::types::{func_ir_sig, FuncTy, ParamTy, Ty, TypeReg};

/// The compilation unit: the module under construction plus the
/// module-scoped counters for synthesized symbols.
pub struct Unit {
    pub mb: ModuleBuilder,
    pub types: TypeReg,
    finalizers: u32,
    magics: u32,
}

impl Unit {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            mb: ModuleBuilder::new(module_name),
            types: TypeReg::default(),
            finalizers: 0,
            magics: 0,
        }
    }

    /// Name for the next synthesized finalizer function.
    pub fn next_finalizer_name(&mut self) -> String {
        self.finalizers += 1;
        format!("rill.finalizer.{}", self.finalizers)
    }

    /// Name for the next materialized built-in magic wrapper.
    pub fn next_magic_name(&mut self, magic: &str) -> String {
        self.magics += 1;
        format!("rill.magic.{magic}.{}", self.magics)
    }

    pub fn build(self) -> Module {
        self.mb.build()
    }
}

/// Break/continue branches recorded while a loop body is emitted, patched
/// exactly once after the body is done.
#[derive(Default)]
pub struct LoopFrame {
    breaks: Vec<InstId>,
    continues: Vec<InstId>,
}

impl LoopFrame {
    pub fn add_break(&mut self, inst: InstId) {
        self.breaks.push(inst);
    }

    pub fn add_continue(&mut self, inst: InstId) {
        self.continues.push(inst);
    }

    pub fn set_breaks(&self, fb: &mut FunctionBuilder, target: BlockId) {
        for inst in &self.breaks {
            fb.set_successor(*inst, 0, target);
        }
    }

    pub fn set_continues(&self, fb: &mut FunctionBuilder, target: BlockId) {
        for inst in &self.continues {
            fb.set_successor(*inst, 0, target);
        }
    }
}

/// Per-function emission state: the builder, the preamble block (allocas and
/// one-shot literal globals), the declared result type, and the stack of
/// enclosing loops.
pub struct FnCtx {
    pub fb: FunctionBuilder,
    pub preamble: BlockId,
    pub out: Ty,
    loops: Vec<LoopFrame>,
}

impl FnCtx {
    pub fn new(fb: FunctionBuilder, out: Ty) -> Self {
        let preamble = fb.entry_block();
        Self {
            fb,
            preamble,
            out,
            loops: Vec::new(),
        }
    }

    /// Anchor the builder at `block` and hand it out.
    pub fn at(&mut self, block: BlockId) -> &mut FunctionBuilder {
        self.fb.switch_to_block(block);
        &mut self.fb
    }

    pub fn push_loop(&mut self) {
        self.loops.push(LoopFrame::default());
    }

    pub fn pop_loop(&mut self) -> LoopFrame {
        self.loops.pop().expect("loop stack underflow")
    }

    /// The innermost enclosing loop, if any.
    pub fn loop_frame_mut(&mut self) -> Option<&mut LoopFrame> {
        self.loops.last_mut()
    }
}

/// A named storage slot. Every variable is an alloca in the function's
/// preamble; uses load through it.
pub struct Var {
    name: String,
    assignable: bool,
    ty: RefCell<Option<Ty>>,
    slot: Cell<Option<ValueId>>,
}

impl Var {
    pub fn new(name: impl Into<String>, assignable: bool) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            assignable,
            ty: RefCell::new(None),
            slot: Cell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_assignable(&self) -> bool {
        self.assignable
    }

    pub fn set_ty(&self, ty: Ty) {
        *self.ty.borrow_mut() = Some(ty);
    }

    pub fn ty(&self) -> Result<Ty> {
        self.ty
            .borrow()
            .clone()
            .ok_or_else(|| err!("variable '{}' used before declaration", self.name))
    }

    /// The variable's stack slot, created in the preamble on first use.
    pub fn ensure_slot(&self, unit: &mut Unit, fx: &mut FnCtx) -> Result<ValueId> {
        if let Some(slot) = self.slot.get() {
            return Ok(slot);
        }
        let ir = self.ty()?.ir_type(unit)?;
        let preamble = fx.preamble;
        let slot = fx.at(preamble).alloc(ir);
        self.slot.set(Some(slot));
        Ok(slot)
    }

    pub fn load(&self, fx: &mut FnCtx, block: BlockId) -> Result<ValueId> {
        let slot = self
            .slot
            .get()
            .ok_or_else(|| err!("variable '{}' used before definition", self.name))?;
        Ok(fx.at(block).load(slot))
    }

    pub fn store(
        &self,
        unit: &mut Unit,
        fx: &mut FnCtx,
        block: BlockId,
        value: ValueId,
    ) -> Result<()> {
        let slot = self.ensure_slot(unit, fx)?;
        fx.at(block).store(slot, value);
        Ok(())
    }

    pub fn clone_under(self: &Rc<Self>, ctx: &mut CloneCtx) -> Rc<Var> {
        if let Some(done) = ctx.seen_var(self) {
            return done;
        }
        let fresh = Rc::new(Var {
            name: self.name.clone(),
            assignable: self.assignable,
            ty: RefCell::new(self.ty.borrow().as_ref().map(|t| t.clone_under(ctx))),
            slot: Cell::new(None),
        });
        ctx.add_var(self, fresh.clone());
        fresh
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResolveState {
    New,
    InProgress,
    Done,
}

/// A Rill function: possibly generic, possibly a bare extern declaration
/// (no body), compiled lazily into the module.
pub struct Function {
    name: RefCell<String>,
    type_params: Vec<Rc<ParamTy>>,
    arg_vars: Vec<Rc<Var>>,
    ins: Vec<Ty>,
    out: Ty,
    body: RefCell<Option<Scope>>,
    realized: RefCell<HashMap<String, Rc<Function>>>,
    resolve_state: Cell<ResolveState>,
    /// The module symbol, assigned on first codegen.
    symbol: RefCell<Option<String>>,
}

impl Function {
    /// A monomorphic function. Argument variables are supplied by the caller
    /// (the body references them) and receive their declared types here.
    pub fn new(
        name: impl Into<String>,
        args: Vec<(Rc<Var>, Ty)>,
        out: Ty,
        body: Scope,
    ) -> Rc<Self> {
        Self::generic(name, Vec::new(), args, out, body)
    }

    pub fn generic(
        name: impl Into<String>,
        type_params: Vec<Rc<ParamTy>>,
        args: Vec<(Rc<Var>, Ty)>,
        out: Ty,
        body: Scope,
    ) -> Rc<Self> {
        let mut arg_vars = Vec::with_capacity(args.len());
        let mut ins = Vec::with_capacity(args.len());
        for (var, arg_ty) in args {
            var.set_ty(arg_ty.clone());
            arg_vars.push(var);
            ins.push(arg_ty);
        }
        Rc::new(Self {
            name: RefCell::new(name.into()),
            type_params,
            arg_vars,
            ins,
            out,
            body: RefCell::new(Some(body)),
            realized: RefCell::new(HashMap::new()),
            resolve_state: Cell::new(ResolveState::New),
            symbol: RefCell::new(None),
        })
    }

    /// A function defined outside the module; calls resolve through the
    /// extern registry.
    pub fn extern_decl(name: impl Into<String>, ins: Vec<Ty>, out: Ty) -> Rc<Self> {
        let arg_vars = ins
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let var = Var::new(format!("arg{i}"), false);
                var.set_ty(ty.clone());
                var
            })
            .collect();
        Rc::new(Self {
            name: RefCell::new(name.into()),
            type_params: Vec::new(),
            arg_vars,
            ins,
            out,
            body: RefCell::new(None),
            realized: RefCell::new(HashMap::new()),
            resolve_state: Cell::new(ResolveState::Done),
            symbol: RefCell::new(None),
        })
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn ins(&self) -> &[Ty] {
        &self.ins
    }

    pub fn out(&self) -> &Ty {
        &self.out
    }

    pub fn arg_vars(&self) -> &[Rc<Var>] {
        &self.arg_vars
    }

    pub fn func_ty_rc(&self) -> Rc<FuncTy> {
        Rc::new(FuncTy {
            ins: self.ins.clone(),
            out: self.out.clone(),
        })
    }

    pub fn func_ty(&self) -> Ty {
        Ty::Func(self.func_ty_rc())
    }

    pub fn num_generics(&self) -> usize {
        self.type_params.len()
    }

    /// A generic template that has not been substituted yet.
    pub fn unrealized(&self) -> bool {
        !self.type_params.is_empty()
    }

    /// Deduce this function's type parameters from actual argument types
    /// (`None` marks an unknown slot).
    pub fn deduce_from_arg_types(&self, actuals: &[Option<Ty>]) -> Result<Vec<Ty>> {
        deduce(&self.type_params, &self.ins, actuals, &self.name())
    }

    /// Substitute the type parameters, producing (and caching) a monomorphic
    /// function. Repeated realizations with the same bindings share identity.
    pub fn realize(self: &Rc<Self>, bindings: Vec<Ty>) -> Result<Rc<Function>> {
        if self.type_params.is_empty() {
            return Err(err!(
                "cannot type-instantiate non-generic function '{}'",
                self.name()
            ));
        }
        if bindings.len() != self.type_params.len() {
            return Err(err!(
                "expected {} type parameters for '{}', got {}",
                self.type_params.len(),
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
        for (p, b) in self.type_params.iter().zip(&bindings) {
            ctx.bind_param(p, b.clone());
        }
        let clone = self.clone_under(&mut ctx);
        *clone.name.borrow_mut() = format!("{}[{key}]", self.name());
        self.realized.borrow_mut().insert(key, clone.clone());
        Ok(clone)
    }

    /// Prepare the body for type queries. Idempotent; reentrancy from
    /// recursive functions is a no-op.
    pub fn resolve_types(&self, unit: &Unit) -> Result<()> {
        if self.resolve_state.get() != ResolveState::New {
            return Ok(());
        }
        self.resolve_state.set(ResolveState::InProgress);
        let result = match &mut *self.body.borrow_mut() {
            Some(scope) => scope.resolve_types(unit),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.resolve_state.set(ResolveState::Done);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Compile into the target module (or register the extern declaration)
    /// and return the symbol name. Idempotent; recursive references return
    /// the symbol immediately.
    pub fn codegen(self: &Rc<Self>, unit: &mut Unit) -> Result<String> {
        if self.unrealized() {
            return Err(err!(
                "cannot generate code for generic function '{}'",
                self.name()
            ));
        }
        if let Some(symbol) = self.symbol.borrow().clone() {
            return Ok(symbol);
        }

        let sig = func_ir_sig(&self.func_ty_rc(), unit)?;
        if self.body.borrow().is_none() {
            // Extern symbols are a stable contract and are never renamed.
            let symbol = self.name();
            unit.mb.get_or_insert_extern(&symbol, sig);
            *self.symbol.borrow_mut() = Some(symbol.clone());
            return Ok(symbol);
        }

        // Distinct function instances may share a source name (methods of
        // different realizations of one class); module symbols stay unique.
        let mut symbol = self.name();
        let mut n = 1;
        while unit.mb.has_function(&symbol) {
            symbol = format!("{}.{n}", self.name());
            n += 1;
        }
        *self.symbol.borrow_mut() = Some(symbol.clone());
        self.resolve_types(unit)?;

        let fb = FunctionBuilder::new(&symbol, sig, Visibility::Public);
        let mut fx = FnCtx::new(fb, self.out.clone());

        // Parameters become preamble allocas like any other variable.
        let preamble = fx.preamble;
        for (i, var) in self.arg_vars.iter().enumerate() {
            let slot = var.ensure_slot(unit, &mut fx)?;
            fx.fb.name_value(slot, var.name().to_string());
            let param = fx.fb.param(i);
            fx.at(preamble).store(slot, param);
        }

        let body_block = fx.fb.create_block();
        let mut block = body_block;
        {
            let mut body = self.body.borrow_mut();
            if let Some(scope) = body.as_mut() {
                scope.codegen(unit, &mut fx, &mut block)?;
            }
        }

        fx.fb.switch_to_block(block);
        if !fx.fb.is_terminated() {
            if self.out.is(&Ty::Void) {
                fx.fb.ret(None);
            } else {
                return Err(err!("missing return in function '{symbol}'"));
            }
        }

        // Seal the preamble last: allocas and literal globals are all in.
        fx.at(preamble).br(body_block, &[]);

        unit.mb.add_function(fx.fb.build());
        Ok(symbol)
    }

    /// Deep clone under a generic clone context. Shared references to one
    /// function clone to one shared clone.
    pub fn clone_under(self: &Rc<Self>, ctx: &mut CloneCtx) -> Rc<Function> {
        if let Some(done) = ctx.seen_func(self) {
            return done;
        }
        let mut new_params = Vec::new();
        for p in &self.type_params {
            if ctx.param_binding(p).is_none() {
                let np = ParamTy::new(p.name.borrow().clone());
                ctx.bind_param(p, Ty::Param(np.clone()));
                new_params.push(np);
            }
        }
        let arg_vars: Vec<Rc<Var>> = self.arg_vars.iter().map(|v| v.clone_under(ctx)).collect();
        let ins: Vec<Ty> = self.ins.iter().map(|t| t.clone_under(ctx)).collect();
        let out = self.out.clone_under(ctx);
        let fresh = Rc::new(Function {
            name: RefCell::new(self.name()),
            type_params: new_params,
            arg_vars,
            ins,
            out,
            body: RefCell::new(None),
            realized: RefCell::new(HashMap::new()),
            resolve_state: Cell::new(ResolveState::New),
            symbol: RefCell::new(None),
        });
        // Memoize before cloning the body: recursive functions refer to
        // themselves.
        ctx.add_func(self, fresh.clone());
        let body = self.body.borrow().as_ref().map(|s| s.clone_under(ctx));
        if body.is_none() {
            fresh.resolve_state.set(ResolveState::Done);
        }
        *fresh.body.borrow_mut() = body;
        fresh
    }
}
