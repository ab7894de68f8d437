use std::collections::HashMap;

use crate::arena::Arena;

use super::func::{Block, BlockId, BlockParam, FuncId, Function, Visibility};
use super::inst::{BranchTarget, CmpKind, Inst, InstId, Op, Span};
use super::module::{ExternDecl, Global, Module, StructDef};
use super::ty::{FunctionSig, Type};
use super::value::{Constant, ValueId};

/// Declare emitter methods for operations whose result type follows the
/// first operand (arithmetic, bitwise, shifts).
macro_rules! value_typed_ops {
    ($($method:ident($($arg:ident),*) => $variant:ident),* $(,)?) => {
        $(
            pub fn $method(&mut self, a: ValueId $(, $arg: ValueId)*) -> ValueId {
                let ty = self.value_type(a);
                self.emit(Op::$variant(a $(, $arg)*), ty)
            }
        )*
    };
}

/// Builder for constructing a single [`Function`].
///
/// Manages value allocation, block creation, and instruction emission.
/// Tracks a "current block" cursor — instructions are appended to it.
///
/// Branches are emitted with whatever successors the caller has at hand
/// (often placeholders) and patched afterwards with [`Self::set_successor`]:
/// frontends forward-declare control flow, emit sub-expressions that may open
/// arbitrarily many new blocks, and only then know the real merge targets.
pub struct FunctionBuilder {
    func: Function,
    current_block: BlockId,
    current_span: Option<Span>,
}

impl FunctionBuilder {
    /// Create a new function builder.
    ///
    /// Creates the entry block and allocates `ValueId`s for each parameter.
    pub fn new(name: impl Into<String>, sig: FunctionSig, visibility: Visibility) -> Self {
        let mut blocks = Arena::new();
        let mut value_types = Arena::new();

        // Entry block params mirror the function signature.
        let mut params = Vec::with_capacity(sig.params.len());
        for ty in &sig.params {
            let value = value_types.push(ty.clone());
            params.push(BlockParam {
                value,
                ty: ty.clone(),
            });
        }
        let entry = blocks.push(Block {
            params,
            insts: Vec::new(),
        });

        let func = Function {
            name: name.into(),
            sig,
            visibility,
            blocks,
            insts: Arena::new(),
            value_types,
            entry,
            value_names: Vec::new(),
        };

        Self {
            func,
            current_block: entry,
            current_span: None,
        }
    }

    /// Create a new block with no parameters. Returns its `BlockId`.
    pub fn create_block(&mut self) -> BlockId {
        self.func.blocks.push(Block {
            params: Vec::new(),
            insts: Vec::new(),
        })
    }

    /// Create a new block with the given parameter types.
    /// Returns the `BlockId` and `ValueId`s for each parameter.
    pub fn create_block_with_params(&mut self, types: &[Type]) -> (BlockId, Vec<ValueId>) {
        let mut params = Vec::with_capacity(types.len());
        let mut values = Vec::with_capacity(types.len());
        for ty in types {
            let value = self.func.value_types.push(ty.clone());
            params.push(BlockParam {
                value,
                ty: ty.clone(),
            });
            values.push(value);
        }
        let block = self.func.blocks.push(Block {
            params,
            insts: Vec::new(),
        });
        (block, values)
    }

    /// Switch the current block cursor to the given block.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// Get the current block.
    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    /// Get the entry block.
    pub fn entry_block(&self) -> BlockId {
        self.func.entry
    }

    /// Get the `ValueId` for a function parameter by index.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn param(&self, index: usize) -> ValueId {
        self.func.blocks[self.func.entry].params[index].value
    }

    /// Attach a debug name to a value (from source-level variable names).
    pub fn name_value(&mut self, v: ValueId, name: String) {
        self.func.value_names.push((v, name));
    }

    /// Set the source span recorded on subsequently emitted instructions.
    pub fn set_current_span(&mut self, span: Option<Span>) {
        self.current_span = span;
    }

    /// Look up the type of a value.
    pub fn value_type(&self, value: ValueId) -> Type {
        self.func.value_types[value].clone()
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.func.blocks[self.current_block]
            .insts
            .last()
            .map(|id| self.func.insts[*id].op.is_terminator())
            .unwrap_or(false)
    }

    /// Consume the builder and return the constructed `Function`.
    pub fn build(self) -> Function {
        self.func
    }

    // -- internal helpers --

    /// Push an instruction with a result value into the current block.
    fn emit(&mut self, op: Op, ty: Type) -> ValueId {
        let value = self.func.value_types.push(ty);
        let inst_id = self.func.insts.push(Inst {
            op,
            result: Some(value),
            span: self.current_span.clone(),
        });
        self.func.blocks[self.current_block].insts.push(inst_id);
        value
    }

    /// Push a void instruction (no result value) into the current block.
    fn emit_void(&mut self, op: Op) -> InstId {
        let inst_id = self.func.insts.push(Inst {
            op,
            result: None,
            span: self.current_span.clone(),
        });
        self.func.blocks[self.current_block].insts.push(inst_id);
        inst_id
    }

    // ========================================================================
    // Constants
    // ========================================================================

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        let c = Constant::Bool(value);
        let ty = c.ty();
        self.emit(Op::Const(c), ty)
    }

    pub fn const_int(&mut self, value: i64) -> ValueId {
        let c = Constant::Int(value);
        let ty = c.ty();
        self.emit(Op::Const(c), ty)
    }

    pub fn const_float(&mut self, value: f64) -> ValueId {
        let c = Constant::Float(value);
        let ty = c.ty();
        self.emit(Op::Const(c), ty)
    }

    /// The null pointer, typed as `ty` (which must be a pointer type).
    pub fn const_null(&mut self, ty: Type) -> ValueId {
        self.emit(Op::Const(Constant::Null), ty)
    }

    /// An undefined value — seed for aggregate construction.
    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.emit(Op::Undef(ty.clone()), ty)
    }

    // ========================================================================
    // Arithmetic and bitwise
    // ========================================================================

    value_typed_ops! {
        add(b) => Add,
        sub(b) => Sub,
        mul(b) => Mul,
        div(b) => Div,
        rem(b) => Rem,
        neg() => Neg,
        bit_and(b) => BitAnd,
        bit_or(b) => BitOr,
        bit_xor(b) => BitXor,
        bit_not() => BitNot,
        shl(b) => Shl,
        shr(b) => Shr,
    }

    // ========================================================================
    // Comparison & logic
    // ========================================================================

    pub fn cmp(&mut self, kind: CmpKind, a: ValueId, b: ValueId) -> ValueId {
        self.emit(Op::Cmp(kind, a, b), Type::Bool)
    }

    pub fn not(&mut self, a: ValueId) -> ValueId {
        self.emit(Op::Not(a), Type::Bool)
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    pub fn br(&mut self, target: BlockId, args: &[ValueId]) -> InstId {
        self.emit_void(Op::Br(BranchTarget {
            block: target,
            args: args.to_vec(),
        }))
    }

    pub fn br_if(
        &mut self,
        cond: ValueId,
        then_target: BlockId,
        then_args: &[ValueId],
        else_target: BlockId,
        else_args: &[ValueId],
    ) -> InstId {
        self.emit_void(Op::BrIf {
            cond,
            then_target: BranchTarget {
                block: then_target,
                args: then_args.to_vec(),
            },
            else_target: BranchTarget {
                block: else_target,
                args: else_args.to_vec(),
            },
        })
    }

    /// Patch a successor of a previously emitted branch.
    ///
    /// For `Br`, `index` must be 0. For `BrIf`, 0 is the then-edge and 1 the
    /// else-edge.
    ///
    /// # Panics
    /// Panics if the instruction is not a branch or `index` is out of range.
    pub fn set_successor(&mut self, inst: InstId, index: usize, block: BlockId) {
        match (&mut self.func.insts[inst].op, index) {
            (Op::Br(target), 0) => target.block = block,
            (Op::BrIf { then_target, .. }, 0) => then_target.block = block,
            (Op::BrIf { else_target, .. }, 1) => else_target.block = block,
            (op, i) => panic!("set_successor({i}) on {op:?}"),
        }
    }

    /// Patch the block arguments of one successor edge of a branch.
    ///
    /// # Panics
    /// Panics if the instruction is not a branch or `index` is out of range.
    pub fn set_branch_args(&mut self, inst: InstId, index: usize, args: &[ValueId]) {
        match (&mut self.func.insts[inst].op, index) {
            (Op::Br(target), 0) => target.args = args.to_vec(),
            (Op::BrIf { then_target, .. }, 0) => then_target.args = args.to_vec(),
            (Op::BrIf { else_target, .. }, 1) => else_target.args = args.to_vec(),
            (op, i) => panic!("set_branch_args({i}) on {op:?}"),
        }
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        self.emit_void(Op::Return(value))
    }

    pub fn unreachable(&mut self) -> InstId {
        self.emit_void(Op::Unreachable)
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// A stack slot holding one value of `ty`. Yields a pointer to it.
    pub fn alloc(&mut self, ty: Type) -> ValueId {
        let ptr_ty = Type::ptr(ty.clone());
        self.emit(Op::Alloc(ty), ptr_ty)
    }

    /// Load through a pointer; the result type is the pointee type.
    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self.value_type(ptr).pointee().clone();
        self.emit(Op::Load(ptr), ty)
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) {
        self.emit_void(Op::Store { ptr, value });
    }

    /// Element address: `ptr + index`, scaled by the element size.
    pub fn gep(&mut self, ptr: ValueId, index: ValueId) -> ValueId {
        let ty = self.value_type(ptr);
        self.emit(Op::Gep { ptr, index }, ty)
    }

    /// Address of field `index` of the pointed-to aggregate.
    pub fn field_ptr(&mut self, ptr: ValueId, index: u32, field_ty: Type) -> ValueId {
        self.emit(Op::FieldPtr { ptr, index }, Type::ptr(field_ty))
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub fn extract_value(&mut self, agg: ValueId, index: u32, ty: Type) -> ValueId {
        self.emit(Op::ExtractValue { agg, index }, ty)
    }

    /// Returns a new aggregate with field `index` replaced.
    pub fn insert_value(&mut self, agg: ValueId, index: u32, value: ValueId) -> ValueId {
        let ty = self.value_type(agg);
        self.emit(Op::InsertValue { agg, index, value }, ty)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub fn call(&mut self, func: impl Into<String>, args: &[ValueId], ret_ty: Type) -> ValueId {
        self.emit(
            Op::Call {
                func: func.into(),
                args: args.to_vec(),
            },
            ret_ty,
        )
    }

    pub fn call_indirect(&mut self, callee: ValueId, args: &[ValueId], ret_ty: Type) -> ValueId {
        self.emit(
            Op::CallIndirect {
                callee,
                args: args.to_vec(),
            },
            ret_ty,
        )
    }

    pub fn func_ref(&mut self, name: impl Into<String>, sig: FunctionSig) -> ValueId {
        self.emit(Op::FuncRef(name.into()), Type::Function(Box::new(sig)))
    }

    pub fn global_ref(&mut self, name: impl Into<String>, ty: Type) -> ValueId {
        self.emit(Op::GlobalRef(name.into()), ty)
    }

    // ========================================================================
    // Casts
    // ========================================================================

    pub fn bit_cast(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.emit(Op::BitCast(value, ty.clone()), ty)
    }

    pub fn ptr_cast(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.emit(Op::PtrCast(value, ty.clone()), ty)
    }

    pub fn int_to_float(&mut self, value: ValueId) -> ValueId {
        self.emit(Op::IntToFloat(value), Type::Float(64))
    }
}

/// Builder for constructing a [`Module`].
pub struct ModuleBuilder {
    module: Module,
    global_names: HashMap<String, u32>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module::new(name.into()),
            global_names: HashMap::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        self.module.functions.push(func)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.module.functions.values().any(|f| f.name == name)
    }

    pub fn add_struct(&mut self, def: StructDef) {
        self.module.structs.push(def);
    }

    pub fn has_struct(&self, name: &str) -> bool {
        self.module.structs.iter().any(|s| s.name == name)
    }

    /// Fill in the field layout of a previously added struct.
    ///
    /// Structs are registered with an empty layout first so recursive
    /// classes can refer to themselves while their fields are lowered.
    pub fn set_struct_fields(&mut self, name: &str, fields: Vec<(String, Type)>) {
        if let Some(def) = self.module.structs.iter_mut().find(|s| s.name == name) {
            def.fields = fields;
        }
    }

    /// Add an immutable private global, uniquifying the name if taken.
    /// Returns the actual name.
    pub fn add_global(&mut self, name_hint: &str, init: Constant, align: u32) -> String {
        let n = self.global_names.entry(name_hint.to_string()).or_insert(0);
        let name = if *n == 0 {
            name_hint.to_string()
        } else {
            format!("{name_hint}.{n}")
        };
        *n += 1;
        self.module.globals.push(Global {
            name: name.clone(),
            ty: init.ty(),
            init,
            align,
            visibility: Visibility::Private,
            mutable: false,
        });
        name
    }

    /// Declare an external function, or return the existing declaration.
    ///
    /// This is the name-and-signature registry the frontend resolves runtime
    /// symbols through; the first declaration of a name wins.
    pub fn get_or_insert_extern(&mut self, name: &str, sig: FunctionSig) -> &ExternDecl {
        self.module
            .externs
            .entry(name.to_string())
            .or_insert_with(|| ExternDecl {
                name: name.to_string(),
                sig,
            })
    }

    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_simple_add_function() {
        // Build: fn add(a: i64, b: i64) -> i64 { return a + b }
        let sig = FunctionSig::new(vec![Type::Int(64), Type::Int(64)], Type::Int(64));
        let mut fb = FunctionBuilder::new("add", sig, Visibility::Public);

        let a = fb.param(0);
        let b = fb.param(1);
        let sum = fb.add(a, b);
        fb.ret(Some(sum));

        let func = fb.build();

        assert_eq!(func.name, "add");
        assert_eq!(func.sig.params.len(), 2);
        assert_eq!(func.sig.return_ty, Type::Int(64));

        // Entry block should have 2 params and 2 instructions (add + return).
        let entry = &func.blocks[func.entry];
        assert_eq!(entry.params.len(), 2);
        assert_eq!(entry.insts.len(), 2);

        // The add instruction should have a result.
        let add_inst = &func.insts[entry.insts[0]];
        assert!(add_inst.result.is_some());
        assert!(matches!(add_inst.op, Op::Add(_, _)));

        // The return instruction should have no result.
        let ret_inst = &func.insts[entry.insts[1]];
        assert!(ret_inst.result.is_none());
        assert!(matches!(ret_inst.op, Op::Return(Some(_))));

        // Value types: 2 params + 1 add result = 3.
        assert_eq!(func.value_types.len(), 3);
    }

    #[test]
    fn patch_forward_declared_branch() {
        // Emit a conditional branch whose else-edge points at a placeholder,
        // then patch it once the real block exists.
        let sig = FunctionSig::new(vec![Type::Bool], Type::Int(64));
        let mut fb = FunctionBuilder::new("choose", sig, Visibility::Public);

        let cond = fb.param(0);
        let then_block = fb.create_block();
        let branch = fb.br_if(cond, then_block, &[], then_block, &[]);

        fb.switch_to_block(then_block);
        let one = fb.const_int(1);
        fb.ret(Some(one));

        let else_block = fb.create_block();
        fb.set_successor(branch, 1, else_block);
        fb.switch_to_block(else_block);
        let two = fb.const_int(2);
        fb.ret(Some(two));

        let func = fb.build();
        match &func.insts[branch].op {
            Op::BrIf {
                then_target,
                else_target,
                ..
            } => {
                assert_eq!(then_target.block, then_block);
                assert_eq!(else_target.block, else_block);
            }
            op => panic!("expected BrIf, got {op:?}"),
        }
    }

    #[test]
    fn merge_through_block_params() {
        // A diamond joining two arms through a merge-block parameter.
        let sig = FunctionSig::new(vec![Type::Bool], Type::Int(64));
        let mut fb = FunctionBuilder::new("select", sig, Visibility::Public);

        let cond = fb.param(0);
        let then_block = fb.create_block();
        let else_block = fb.create_block();
        fb.br_if(cond, then_block, &[], else_block, &[]);

        fb.switch_to_block(then_block);
        let a = fb.const_int(10);
        let jump_a = fb.br(then_block, &[]); // patched below

        fb.switch_to_block(else_block);
        let b = fb.const_int(20);
        let jump_b = fb.br(then_block, &[]); // patched below

        let (merge, merge_vals) = fb.create_block_with_params(&[Type::Int(64)]);
        fb.set_successor(jump_a, 0, merge);
        fb.set_branch_args(jump_a, 0, &[a]);
        fb.set_successor(jump_b, 0, merge);
        fb.set_branch_args(jump_b, 0, &[b]);

        fb.switch_to_block(merge);
        fb.ret(Some(merge_vals[0]));

        let func = fb.build();
        assert_eq!(func.blocks[merge].params.len(), 1);
        match &func.insts[jump_a].op {
            Op::Br(target) => {
                assert_eq!(target.block, merge);
                assert_eq!(target.args, vec![a]);
            }
            op => panic!("expected Br, got {op:?}"),
        }
    }

    #[test]
    fn build_module_with_globals_and_externs() {
        let sig = FunctionSig::new(vec![], Type::Void);
        let mut fb = FunctionBuilder::new("main", sig, Visibility::Public);
        fb.ret(None);
        let func = fb.build();

        let mut mb = ModuleBuilder::new("test_module");
        let fid = mb.add_function(func);
        let g1 = mb.add_global("str_literal", Constant::Str("hi".into()), 1);
        let g2 = mb.add_global("str_literal", Constant::Str("there".into()), 1);
        assert_eq!(g1, "str_literal");
        assert_eq!(g2, "str_literal.1");

        let alloc_sig = FunctionSig::new(vec![Type::Int(64)], Type::byte_ptr());
        mb.get_or_insert_extern("seq_alloc", alloc_sig.clone());
        mb.get_or_insert_extern("seq_alloc", alloc_sig);

        let module = mb.build();
        assert_eq!(module.name, "test_module");
        assert_eq!(module.functions[fid].name, "main");
        assert_eq!(module.globals.len(), 2);
        assert_eq!(module.externs.len(), 1);
        assert_eq!(
            module.globals[0].visibility,
            crate::func::Visibility::Private
        );
        assert!(!module.globals[0].mutable);
    }
}
