use serde::{Deserialize, Serialize};

use crate::define_id;

use super::ty::Type;

define_id!(ValueId);

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// The null pointer. Its pointer type is supplied at the emission site.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Literal byte data. Stored nul-terminated when emitted as a global.
    Str(String),
}

impl Constant {
    /// Infer the type of this constant.
    pub fn ty(&self) -> Type {
        match self {
            Constant::Null => Type::byte_ptr(),
            Constant::Bool(_) => Type::Bool,
            Constant::Int(_) => Type::Int(64),
            Constant::Float(_) => Type::Float(64),
            Constant::Str(s) => Type::Bytes(s.len() as u64 + 1),
        }
    }
}
