use serde::{Deserialize, Serialize};

/// A low-level type in the IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// Void / unit.
    Void,
    /// Boolean.
    Bool,
    /// Signed integer with bit width.
    Int(u8),
    /// Floating point with bit width (32 or 64).
    Float(u8),
    /// Pointer to a pointee type.
    Ptr(Box<Type>),
    /// Fixed-size byte blob — used for literal data globals.
    Bytes(u64),
    /// Anonymous aggregate.
    Tuple(Vec<Type>),
    /// Reference to a named struct registered with the module.
    Struct(String),
    /// Function type.
    Function(Box<FunctionSig>),
}

impl Type {
    /// Shorthand for `i8*`, the untyped runtime pointer.
    pub fn byte_ptr() -> Type {
        Type::Ptr(Box::new(Type::Int(8)))
    }

    pub fn ptr(pointee: Type) -> Type {
        Type::Ptr(Box::new(pointee))
    }

    /// The pointee of a pointer type.
    ///
    /// # Panics
    /// Panics if `self` is not a pointer.
    pub fn pointee(&self) -> &Type {
        match self {
            Type::Ptr(inner) => inner,
            other => panic!("pointee() on non-pointer type {other:?}"),
        }
    }
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub return_ty: Type,
}

impl FunctionSig {
    pub fn new(params: Vec<Type>, return_ty: Type) -> Self {
        Self { params, return_ty }
    }
}
