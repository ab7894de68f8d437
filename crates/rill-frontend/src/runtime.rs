//! Names and signatures of the runtime symbols the emitted IR references.
//!
//! These names are the stable contract with the runtime library; the frontend
//! only ever emits calls through the module's extern registry.

use rill_ir::{FunctionSig, Type};

/// Allocator: `seq_alloc(size_in_bytes) -> i8*`.
pub const ALLOC: &str = "seq_alloc";

/// Finalizer registration: `seq_register_finalizer(obj: i8*, fn: (i8*, i8*) -> void)`.
pub const REGISTER_FINALIZER: &str = "seq_register_finalizer";

/// String equality: `seq_str_eq(ptr, len, ptr, len) -> bool`.
pub const STR_EQ: &str = "seq_str_eq";

/// Raw byte copy: `seq_memcpy(dst: i8*, src: i8*, bytes) -> void`.
pub const MEMCPY: &str = "seq_memcpy";

/// Generator intrinsics. A generator value is an opaque `i8*` handle;
/// `seq_co_promise` returns a pointer to the promise slot, which the frontend
/// pointer-casts to the yield type and loads.
pub const CO_RESUME: &str = "seq_co_resume";
pub const CO_DONE: &str = "seq_co_done";
pub const CO_PROMISE: &str = "seq_co_promise";
pub const CO_DESTROY: &str = "seq_co_destroy";

pub fn alloc_sig() -> FunctionSig {
    FunctionSig::new(vec![Type::Int(64)], Type::byte_ptr())
}

pub fn register_finalizer_sig() -> FunctionSig {
    let finalizer = FunctionSig::new(vec![Type::byte_ptr(), Type::byte_ptr()], Type::Void);
    FunctionSig::new(
        vec![Type::byte_ptr(), Type::Function(Box::new(finalizer))],
        Type::Void,
    )
}

pub fn str_eq_sig() -> FunctionSig {
    FunctionSig::new(
        vec![
            Type::byte_ptr(),
            Type::Int(64),
            Type::byte_ptr(),
            Type::Int(64),
        ],
        Type::Bool,
    )
}

pub fn memcpy_sig() -> FunctionSig {
    FunctionSig::new(
        vec![Type::byte_ptr(), Type::byte_ptr(), Type::Int(64)],
        Type::Void,
    )
}

pub fn co_resume_sig() -> FunctionSig {
    FunctionSig::new(vec![Type::byte_ptr()], Type::Void)
}

pub fn co_done_sig() -> FunctionSig {
    FunctionSig::new(vec![Type::byte_ptr()], Type::Bool)
}

pub fn co_promise_sig() -> FunctionSig {
    FunctionSig::new(vec![Type::byte_ptr()], Type::byte_ptr())
}

pub fn co_destroy_sig() -> FunctionSig {
    FunctionSig::new(vec![Type::byte_ptr()], Type::Void)
}
