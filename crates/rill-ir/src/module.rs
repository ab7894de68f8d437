use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arena::Arena;

use super::func::{FuncId, Function, Visibility};
use super::ty::{FunctionSig, Type};
use super::value::Constant;

/// A named struct layout shared by the module's functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

/// A module-level global with a constant initializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Constant,
    pub align: u32,
    pub visibility: Visibility,
    pub mutable: bool,
}

/// A function declared but defined outside the module (runtime symbols).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub sig: FunctionSig,
}

/// A module — the top-level compilation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Arena<FuncId, Function>,
    pub structs: Vec<StructDef>,
    pub globals: Vec<Global>,
    /// Keyed by symbol name; iteration order is stable for printing.
    pub externs: BTreeMap<String, ExternDecl>,
}

impl Module {
    pub fn new(name: String) -> Self {
        Self {
            name,
            functions: Arena::new(),
            structs: Vec::new(),
            globals: Vec::new(),
            externs: BTreeMap::new(),
        }
    }

    /// Find a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }

    /// Find a struct definition by name.
    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }
}
