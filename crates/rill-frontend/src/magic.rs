//! Built-in magic methods.
//!
//! Tables are computed per type variant on demand and never stored, so
//! realized and cloned types re-derive them. Each entry carries the formal
//! argument types, the result type, and an emission closure over the IR
//! builder. Dispatch order relative to user overloads lives in
//! [`crate::types`]: overloads always win.

use std::rc::Rc;

use rill_ir::{
    BlockId, CmpKind, FunctionBuilder, Type, ValueId, Visibility,
};

use crate::error::{err, Result};
use crate::func::{FnCtx, Unit};
use crate::runtime;
use crate::types::{func_ir_sig, FuncTy, Ty};

/// One built-in magic method of a type.
pub struct Magic {
    pub name: &'static str,
    pub args: Vec<Ty>,
    pub out: Ty,
    pub emit: EmitFn,
}

pub type EmitFn = Box<
    dyn Fn(&mut Unit, &mut FnCtx, &mut BlockId, Option<ValueId>, &[ValueId]) -> Result<Option<ValueId>>,
>;

fn need_self(slf: Option<ValueId>) -> Result<ValueId> {
    slf.ok_or_else(|| err!("magic method requires a receiver"))
}

/// A straight-line binary magic: `self ⊕ args[0]`.
fn bin(
    name: &'static str,
    arg: Ty,
    out: Ty,
    f: fn(&mut FunctionBuilder, ValueId, ValueId) -> ValueId,
) -> Magic {
    Magic {
        name,
        args: vec![arg],
        out,
        emit: Box::new(move |_unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            Ok(Some(f(fx.at(*block), slf, args[0])))
        }),
    }
}

/// A straight-line unary magic on `self`.
fn un(name: &'static str, out: Ty, f: fn(&mut FunctionBuilder, ValueId) -> ValueId) -> Magic {
    Magic {
        name,
        args: vec![],
        out,
        emit: Box::new(move |_unit, fx, block, slf, _args| {
            let slf = need_self(slf)?;
            Ok(Some(f(fx.at(*block), slf)))
        }),
    }
}

/// A reflected float operator: the receiver is the Float on the right,
/// `args[0]` the Int on the left, converted before the operation.
fn reflected_float(
    name: &'static str,
    f: fn(&mut FunctionBuilder, ValueId, ValueId) -> ValueId,
) -> Magic {
    Magic {
        name,
        args: vec![Ty::Int],
        out: Ty::Float,
        emit: Box::new(move |_unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let fb = fx.at(*block);
            let lhs = fb.int_to_float(args[0]);
            Ok(Some(f(fb, lhs, slf)))
        }),
    }
}

/// A reflected mixed operator on Int: the receiver is the Int on the right,
/// `args[0]` the Float on the left; the receiver is converted.
fn reflected_int(
    name: &'static str,
    f: fn(&mut FunctionBuilder, ValueId, ValueId) -> ValueId,
) -> Magic {
    Magic {
        name,
        args: vec![Ty::Float],
        out: Ty::Float,
        emit: Box::new(move |_unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let fb = fx.at(*block);
            let rhs = fb.int_to_float(slf);
            Ok(Some(f(fb, args[0], rhs)))
        }),
    }
}

/// The built-in magic table of a type, in declaration order.
pub fn builtins(ty: &Ty) -> Vec<Magic> {
    match ty {
        Ty::Int => int_builtins(),
        Ty::Float => float_builtins(),
        Ty::Bool => bool_builtins(),
        Ty::Str | Ty::Seq => text_builtins(ty.clone()),
        Ty::Array(a) => array_builtins(a.elem.clone()),
        Ty::Optional(_) => vec![un("__bool__", Ty::Bool, |fb, s| {
            fb.extract_value(s, 0, Type::Bool)
        })],
        Ty::Ref(_) => ref_builtins(ty.clone()),
        _ => Vec::new(),
    }
}

fn int_builtins() -> Vec<Magic> {
    vec![
        bin("__add__", Ty::Int, Ty::Int, |fb, a, b| fb.add(a, b)),
        bin("__sub__", Ty::Int, Ty::Int, |fb, a, b| fb.sub(a, b)),
        bin("__mul__", Ty::Int, Ty::Int, |fb, a, b| fb.mul(a, b)),
        bin("__div__", Ty::Int, Ty::Int, |fb, a, b| fb.div(a, b)),
        bin("__mod__", Ty::Int, Ty::Int, |fb, a, b| fb.rem(a, b)),
        bin("__lshift__", Ty::Int, Ty::Int, |fb, a, b| fb.shl(a, b)),
        bin("__rshift__", Ty::Int, Ty::Int, |fb, a, b| fb.shr(a, b)),
        bin("__and__", Ty::Int, Ty::Int, |fb, a, b| fb.bit_and(a, b)),
        bin("__or__", Ty::Int, Ty::Int, |fb, a, b| fb.bit_or(a, b)),
        bin("__xor__", Ty::Int, Ty::Int, |fb, a, b| fb.bit_xor(a, b)),
        reflected_int("__radd__", |fb, a, b| fb.add(a, b)),
        reflected_int("__rsub__", |fb, a, b| fb.sub(a, b)),
        reflected_int("__rmul__", |fb, a, b| fb.mul(a, b)),
        reflected_int("__rdiv__", |fb, a, b| fb.div(a, b)),
        reflected_int("__rmod__", |fb, a, b| fb.rem(a, b)),
        bin("__lt__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Lt, a, b)
        }),
        bin("__gt__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Gt, a, b)
        }),
        bin("__le__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Le, a, b)
        }),
        bin("__ge__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Ge, a, b)
        }),
        bin("__eq__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Eq, a, b)
        }),
        bin("__ne__", Ty::Int, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Ne, a, b)
        }),
        un("__neg__", Ty::Int, |fb, a| fb.neg(a)),
        un("__pos__", Ty::Int, |_fb, a| a),
        un("__invert__", Ty::Int, |fb, a| fb.bit_not(a)),
        un("__bool__", Ty::Bool, |fb, a| {
            let zero = fb.const_int(0);
            fb.cmp(CmpKind::Ne, a, zero)
        }),
    ]
}

fn float_builtins() -> Vec<Magic> {
    vec![
        bin("__add__", Ty::Float, Ty::Float, |fb, a, b| fb.add(a, b)),
        bin("__sub__", Ty::Float, Ty::Float, |fb, a, b| fb.sub(a, b)),
        bin("__mul__", Ty::Float, Ty::Float, |fb, a, b| fb.mul(a, b)),
        bin("__div__", Ty::Float, Ty::Float, |fb, a, b| fb.div(a, b)),
        bin("__mod__", Ty::Float, Ty::Float, |fb, a, b| fb.rem(a, b)),
        reflected_float("__radd__", |fb, a, b| fb.add(a, b)),
        reflected_float("__rsub__", |fb, a, b| fb.sub(a, b)),
        reflected_float("__rmul__", |fb, a, b| fb.mul(a, b)),
        reflected_float("__rdiv__", |fb, a, b| fb.div(a, b)),
        reflected_float("__rmod__", |fb, a, b| fb.rem(a, b)),
        bin("__lt__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Lt, a, b)
        }),
        bin("__gt__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Gt, a, b)
        }),
        bin("__le__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Le, a, b)
        }),
        bin("__ge__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Ge, a, b)
        }),
        bin("__eq__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Eq, a, b)
        }),
        bin("__ne__", Ty::Float, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Ne, a, b)
        }),
        un("__neg__", Ty::Float, |fb, a| fb.neg(a)),
        un("__pos__", Ty::Float, |_fb, a| a),
        un("__bool__", Ty::Bool, |fb, a| {
            let zero = fb.const_float(0.0);
            fb.cmp(CmpKind::Ne, a, zero)
        }),
    ]
}

fn bool_builtins() -> Vec<Magic> {
    vec![
        un("__bool__", Ty::Bool, |_fb, a| a),
        un("__invert__", Ty::Bool, |fb, a| fb.not(a)),
        bin("__eq__", Ty::Bool, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Eq, a, b)
        }),
        bin("__ne__", Ty::Bool, Ty::Bool, |fb, a, b| {
            fb.cmp(CmpKind::Ne, a, b)
        }),
        bin("__and__", Ty::Bool, Ty::Bool, |fb, a, b| fb.bit_and(a, b)),
        bin("__or__", Ty::Bool, Ty::Bool, |fb, a, b| fb.bit_or(a, b)),
        bin("__xor__", Ty::Bool, Ty::Bool, |fb, a, b| fb.bit_xor(a, b)),
    ]
}

/// Str and Seq share their `(ptr, len)` representation.
fn text_builtins(ty: Ty) -> Vec<Magic> {
    let mut magics = vec![
        un("__len__", Ty::Int, |fb, s| {
            fb.extract_value(s, 1, Type::Int(64))
        }),
        un("__bool__", Ty::Bool, |fb, s| {
            let len = fb.extract_value(s, 1, Type::Int(64));
            let zero = fb.const_int(0);
            fb.cmp(CmpKind::Ne, len, zero)
        }),
    ];
    magics.push(Magic {
        name: "__eq__",
        args: vec![ty.clone()],
        out: Ty::Bool,
        emit: Box::new(|unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            unit.mb
                .get_or_insert_extern(runtime::STR_EQ, runtime::str_eq_sig());
            let fb = fx.at(*block);
            let a_ptr = fb.extract_value(slf, 0, Type::byte_ptr());
            let a_len = fb.extract_value(slf, 1, Type::Int(64));
            let b_ptr = fb.extract_value(args[0], 0, Type::byte_ptr());
            let b_len = fb.extract_value(args[0], 1, Type::Int(64));
            Ok(Some(fb.call(
                runtime::STR_EQ,
                &[a_ptr, a_len, b_ptr, b_len],
                Type::Bool,
            )))
        }),
    });
    magics.push(Magic {
        name: "__ne__",
        args: vec![ty],
        out: Ty::Bool,
        emit: Box::new(|unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            unit.mb
                .get_or_insert_extern(runtime::STR_EQ, runtime::str_eq_sig());
            let fb = fx.at(*block);
            let a_ptr = fb.extract_value(slf, 0, Type::byte_ptr());
            let a_len = fb.extract_value(slf, 1, Type::Int(64));
            let b_ptr = fb.extract_value(args[0], 0, Type::byte_ptr());
            let b_len = fb.extract_value(args[0], 1, Type::Int(64));
            let eq = fb.call(
                runtime::STR_EQ,
                &[a_ptr, a_len, b_ptr, b_len],
                Type::Bool,
            );
            Ok(Some(fb.not(eq)))
        }),
    });
    magics
}

fn array_builtins(elem: Ty) -> Vec<Magic> {
    let arr_ty = Ty::array(elem.clone());
    let mut magics = Vec::new();

    let e = elem.clone();
    magics.push(Magic {
        name: "__getitem__",
        args: vec![Ty::Int],
        out: elem.clone(),
        emit: Box::new(move |unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let fb = fx.at(*block);
            let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let at = fb.gep(ptr, args[0]);
            Ok(Some(fb.load(at)))
        }),
    });

    let e = elem.clone();
    magics.push(Magic {
        name: "__setitem__",
        args: vec![Ty::Int, elem.clone()],
        out: Ty::Void,
        emit: Box::new(move |unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let fb = fx.at(*block);
            let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let at = fb.gep(ptr, args[0]);
            fb.store(at, args[1]);
            Ok(None)
        }),
    });

    magics.push(un("__len__", Ty::Int, |fb, s| {
        fb.extract_value(s, 1, Type::Int(64))
    }));
    magics.push(un("__bool__", Ty::Bool, |fb, s| {
        let len = fb.extract_value(s, 1, Type::Int(64));
        let zero = fb.const_int(0);
        fb.cmp(CmpKind::Ne, len, zero)
    }));

    let e = elem.clone();
    let out = arr_ty.clone();
    magics.push(Magic {
        name: "__copy__",
        args: vec![],
        out: arr_ty.clone(),
        emit: Box::new(move |unit, fx, block, slf, _args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let arr_ir = out.ir_type(unit)?;
            let len = fx.at(*block).extract_value(slf, 1, Type::Int(64));
            let dst = e.alloc(unit, fx, block, len)?;
            unit.mb
                .get_or_insert_extern(runtime::MEMCPY, runtime::memcpy_sig());
            let size = e.size()?;
            let fb = fx.at(*block);
            let src = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let src8 = fb.ptr_cast(src, Type::byte_ptr());
            let dst8 = fb.ptr_cast(dst, Type::byte_ptr());
            let elem_size = fb.const_int(size as i64);
            let bytes = fb.mul(len, elem_size);
            fb.call(runtime::MEMCPY, &[dst8, src8, bytes], Type::Void);
            let pair = fb.undef(arr_ir);
            let pair = fb.insert_value(pair, 0, dst);
            Ok(Some(fb.insert_value(pair, 1, len)))
        }),
    });

    let e = elem.clone();
    let out = arr_ty.clone();
    magics.push(Magic {
        name: "__slice__",
        args: vec![Ty::Int, Ty::Int],
        out: arr_ty.clone(),
        emit: Box::new(move |unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let arr_ir = out.ir_type(unit)?;
            let fb = fx.at(*block);
            let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let at = fb.gep(ptr, args[0]);
            let len = fb.sub(args[1], args[0]);
            let pair = fb.undef(arr_ir);
            let pair = fb.insert_value(pair, 0, at);
            Ok(Some(fb.insert_value(pair, 1, len)))
        }),
    });

    let e = elem.clone();
    let out = arr_ty.clone();
    magics.push(Magic {
        name: "__slice_left__",
        args: vec![Ty::Int],
        out: arr_ty.clone(),
        emit: Box::new(move |unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let arr_ir = out.ir_type(unit)?;
            let fb = fx.at(*block);
            let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let pair = fb.undef(arr_ir);
            let pair = fb.insert_value(pair, 0, ptr);
            Ok(Some(fb.insert_value(pair, 1, args[0])))
        }),
    });

    let e = elem.clone();
    let out = arr_ty.clone();
    magics.push(Magic {
        name: "__slice_right__",
        args: vec![Ty::Int],
        out: arr_ty.clone(),
        emit: Box::new(move |unit, fx, block, slf, args| {
            let slf = need_self(slf)?;
            let elem_ir = e.ir_type(unit)?;
            let arr_ir = out.ir_type(unit)?;
            let fb = fx.at(*block);
            let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
            let at = fb.gep(ptr, args[0]);
            let len = fb.extract_value(slf, 1, Type::Int(64));
            let rest = fb.sub(len, args[0]);
            let pair = fb.undef(arr_ir);
            let pair = fb.insert_value(pair, 0, at);
            Ok(Some(fb.insert_value(pair, 1, rest)))
        }),
    });

    // Membership only for directly comparable elements; anything richer
    // needs a user overload.
    if matches!(elem, Ty::Int | Ty::Float | Ty::Bool) {
        let e = elem.clone();
        magics.push(Magic {
            name: "__contains__",
            args: vec![elem],
            out: Ty::Bool,
            emit: Box::new(move |unit, fx, block, slf, args| {
                let slf = need_self(slf)?;
                let elem_ir = e.ir_type(unit)?;
                let needle = args[0];

                let fb = fx.at(*block);
                let ptr = fb.extract_value(slf, 0, Type::ptr(elem_ir));
                let len = fb.extract_value(slf, 1, Type::Int(64));
                let zero = fb.const_int(0);
                let one = fb.const_int(1);
                let yes = fb.const_bool(true);
                let no = fb.const_bool(false);

                let (header, header_vals) = fb.create_block_with_params(&[Type::Int(64)]);
                let (exit, exit_vals) = fb.create_block_with_params(&[Type::Bool]);
                fb.br(header, &[zero]);

                let scan_body = fb.create_block();
                fb.switch_to_block(header);
                let i = header_vals[0];
                let at_end = fb.cmp(CmpKind::Ge, i, len);
                fb.br_if(at_end, exit, &[no], scan_body, &[]);

                fb.switch_to_block(scan_body);
                let at = fb.gep(ptr, i);
                let cur = fb.load(at);
                let hit = fb.cmp(CmpKind::Eq, cur, needle);
                let next = fb.add(i, one);
                fb.br_if(hit, exit, &[yes], header, &[next]);

                *block = exit;
                fb.switch_to_block(exit);
                Ok(Some(exit_vals[0]))
            }),
        });
    }

    magics
}

fn ref_builtins(ty: Ty) -> Vec<Magic> {
    vec![Magic {
        name: "__new__",
        args: vec![],
        out: ty.clone(),
        emit: Box::new(move |unit, fx, block, _slf, _args| {
            // Allocate the object's field storage and return the typed
            // pointer; fields start zeroed by the allocator.
            let r = match &ty {
                Ty::Ref(r) => r,
                _ => return Err(err!("__new__ on non-reference type")),
            };
            let mut size = 0u64;
            for (_, fty) in r.fields() {
                size += fty.size()?;
            }
            let size = size.max(1);
            unit.mb
                .get_or_insert_extern(runtime::ALLOC, runtime::alloc_sig());
            let obj_ir = ty.ir_type(unit)?;
            let fb = fx.at(*block);
            let bytes = fb.const_int(size as i64);
            let mem = fb.call(runtime::ALLOC, &[bytes], Type::byte_ptr());
            Ok(Some(fb.ptr_cast(mem, obj_ir)))
        }),
    }]
}

/// Materialize a built-in magic as a private module function taking `self`
/// first, for use as a bound method or static member value.
pub fn magic_as_func(unit: &mut Unit, ty: &Ty, m: &Magic) -> Result<(String, Rc<FuncTy>)> {
    let name = unit.next_magic_name(m.name);
    let mut ins = vec![ty.clone()];
    ins.extend(m.args.iter().cloned());
    let fty = Rc::new(FuncTy {
        ins,
        out: m.out.clone(),
    });
    let sig = func_ir_sig(&fty, unit)?;

    let fb = FunctionBuilder::new(&name, sig, Visibility::Private);
    let mut fx = FnCtx::new(fb, m.out.clone());
    let mut block = fx.fb.entry_block();
    let slf = fx.fb.param(0);
    let args: Vec<ValueId> = (1..fty.ins.len()).map(|i| fx.fb.param(i)).collect();
    let ret = (m.emit)(unit, &mut fx, &mut block, Some(slf), &args)?;
    fx.at(block).ret(ret);
    unit.mb.add_function(fx.fb.build());
    Ok((name, fty))
}
