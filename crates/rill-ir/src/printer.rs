//! Human-readable dump of IR modules, used by tests and debugging.
//!
//! The format is stable but not parseable back; JSON serialization is the
//! round-trippable form.

use std::fmt;

use crate::arena::Id;

use super::func::{BlockId, Function, Visibility};
use super::inst::{BranchTarget, CmpKind, Op};
use super::module::Module;
use super::ty::Type;
use super::value::{Constant, ValueId};

fn fmt_type(ty: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match ty {
        Type::Void => write!(f, "void"),
        Type::Bool => write!(f, "bool"),
        Type::Int(bits) => write!(f, "i{bits}"),
        Type::Float(bits) => write!(f, "f{bits}"),
        Type::Ptr(inner) => {
            fmt_type(inner, f)?;
            write!(f, "*")
        }
        Type::Bytes(len) => write!(f, "b{len}"),
        Type::Tuple(elems) => {
            write!(f, "(")?;
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_type(elem, f)?;
            }
            write!(f, ")")
        }
        Type::Struct(name) => write!(f, "%{name}"),
        Type::Function(sig) => {
            write!(f, "fn(")?;
            for (i, p) in sig.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_type(p, f)?;
            }
            write!(f, ") -> ")?;
            fmt_type(&sig.return_ty, f)
        }
    }
}

struct TypeDisplay<'a>(&'a Type);

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_type(self.0, f)
    }
}

fn fmt_const(c: &Constant) -> String {
    match c {
        Constant::Null => "null".to_string(),
        Constant::Bool(b) => b.to_string(),
        Constant::Int(n) => n.to_string(),
        Constant::Float(x) => format!("{x:?}"),
        Constant::Str(s) => format!("{s:?}"),
    }
}

fn v(value: ValueId) -> String {
    format!("v{}", value.as_u32())
}

fn b(block: BlockId) -> String {
    format!("b{}", block.as_u32())
}

fn fmt_target(t: &BranchTarget) -> String {
    if t.args.is_empty() {
        b(t.block)
    } else {
        let args: Vec<String> = t.args.iter().map(|a| v(*a)).collect();
        format!("{}({})", b(t.block), args.join(", "))
    }
}

fn cmp_symbol(kind: CmpKind) -> &'static str {
    match kind {
        CmpKind::Eq => "eq",
        CmpKind::Ne => "ne",
        CmpKind::Lt => "lt",
        CmpKind::Le => "le",
        CmpKind::Gt => "gt",
        CmpKind::Ge => "ge",
    }
}

fn fmt_op(op: &Op) -> String {
    let args = |xs: &[ValueId]| -> String {
        xs.iter().map(|a| v(*a)).collect::<Vec<_>>().join(", ")
    };
    match op {
        Op::Const(c) => format!("const {}", fmt_const(c)),
        Op::Undef(ty) => format!("undef {}", TypeDisplay(ty)),
        Op::Add(a, c) => format!("add {}, {}", v(*a), v(*c)),
        Op::Sub(a, c) => format!("sub {}, {}", v(*a), v(*c)),
        Op::Mul(a, c) => format!("mul {}, {}", v(*a), v(*c)),
        Op::Div(a, c) => format!("div {}, {}", v(*a), v(*c)),
        Op::Rem(a, c) => format!("rem {}, {}", v(*a), v(*c)),
        Op::Neg(a) => format!("neg {}", v(*a)),
        Op::BitAnd(a, c) => format!("and {}, {}", v(*a), v(*c)),
        Op::BitOr(a, c) => format!("or {}, {}", v(*a), v(*c)),
        Op::BitXor(a, c) => format!("xor {}, {}", v(*a), v(*c)),
        Op::BitNot(a) => format!("bnot {}", v(*a)),
        Op::Shl(a, c) => format!("shl {}, {}", v(*a), v(*c)),
        Op::Shr(a, c) => format!("shr {}, {}", v(*a), v(*c)),
        Op::Cmp(kind, a, c) => format!("cmp.{} {}, {}", cmp_symbol(*kind), v(*a), v(*c)),
        Op::Not(a) => format!("not {}", v(*a)),
        Op::Br(target) => format!("br {}", fmt_target(target)),
        Op::BrIf {
            cond,
            then_target,
            else_target,
        } => format!(
            "br_if {}, {}, {}",
            v(*cond),
            fmt_target(then_target),
            fmt_target(else_target)
        ),
        Op::Return(None) => "ret".to_string(),
        Op::Return(Some(a)) => format!("ret {}", v(*a)),
        Op::Unreachable => "unreachable".to_string(),
        Op::Alloc(ty) => format!("alloc {}", TypeDisplay(ty)),
        Op::Load(ptr) => format!("load {}", v(*ptr)),
        Op::Store { ptr, value } => format!("store {}, {}", v(*ptr), v(*value)),
        Op::Gep { ptr, index } => format!("gep {}, {}", v(*ptr), v(*index)),
        Op::FieldPtr { ptr, index } => format!("field_ptr {}, {index}", v(*ptr)),
        Op::ExtractValue { agg, index } => format!("extract {}, {index}", v(*agg)),
        Op::InsertValue { agg, index, value } => {
            format!("insert {}, {index}, {}", v(*agg), v(*value))
        }
        Op::Call { func, args: xs } => format!("call @{func}({})", args(xs)),
        Op::CallIndirect { callee, args: xs } => {
            format!("call_indirect {}({})", v(*callee), args(xs))
        }
        Op::FuncRef(name) => format!("func_ref @{name}"),
        Op::GlobalRef(name) => format!("global_ref @{name}"),
        Op::BitCast(a, ty) => format!("bitcast {} to {}", v(*a), TypeDisplay(ty)),
        Op::PtrCast(a, ty) => format!("ptrcast {} to {}", v(*a), TypeDisplay(ty)),
        Op::IntToFloat(a) => format!("int_to_float {}", v(*a)),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vis = match self.visibility {
            Visibility::Public => "pub ",
            Visibility::Private => "",
        };
        write!(f, "{vis}fn @{}(", self.name)?;
        for (i, p) in self.sig.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            fmt_type(p, f)?;
        }
        write!(f, ") -> ")?;
        fmt_type(&self.sig.return_ty, f)?;
        writeln!(f, " {{")?;

        for (block_id, block) in self.blocks.iter() {
            if block.params.is_empty() {
                writeln!(f, "{}:", b(block_id))?;
            } else {
                let params: Vec<String> = block
                    .params
                    .iter()
                    .map(|p| format!("{}: {}", v(p.value), TypeDisplay(&p.ty)))
                    .collect();
                writeln!(f, "{}({}):", b(block_id), params.join(", "))?;
            }
            for inst_id in &block.insts {
                let inst = &self.insts[*inst_id];
                match inst.result {
                    Some(result) => writeln!(f, "    {} = {}", v(result), fmt_op(&inst.op))?,
                    None => writeln!(f, "    {}", fmt_op(&inst.op))?,
                }
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;
        for def in &self.structs {
            let fields: Vec<String> = def
                .fields
                .iter()
                .map(|(name, ty)| format!("{name}: {}", TypeDisplay(ty)))
                .collect();
            writeln!(f, "struct %{} {{ {} }}", def.name, fields.join(", "))?;
        }
        for ext in self.externs.values() {
            write!(f, "extern @{}(", ext.name)?;
            for (i, p) in ext.sig.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_type(p, f)?;
            }
            write!(f, ") -> ")?;
            fmt_type(&ext.sig.return_ty, f)?;
            writeln!(f)?;
        }
        for global in &self.globals {
            writeln!(
                f,
                "global @{}: {} = {} align {}",
                global.name,
                TypeDisplay(&global.ty),
                fmt_const(&global.init),
                global.align
            )?;
        }
        for func in self.functions.values() {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        writeln!(f, "}}")
    }
}
