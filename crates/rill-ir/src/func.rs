use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::define_id;

use super::inst::{Inst, InstId};
use super::ty::{FunctionSig, Type};
use super::value::ValueId;

define_id!(BlockId);
define_id!(FuncId);

/// A single block parameter and the SSA value it defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockParam {
    pub value: ValueId,
    pub ty: Type,
}

/// A basic block: a parameter list standing in for phi nodes, followed by
/// the instructions executed when control enters. Parameters are fed by the
/// argument lists of incoming branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub params: Vec<BlockParam>,
    pub insts: Vec<InstId>,
}

/// Visibility of a function or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

/// A function in the IR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub sig: FunctionSig,
    pub visibility: Visibility,
    pub blocks: Arena<BlockId, Block>,
    pub insts: Arena<InstId, Inst>,
    pub value_types: Arena<ValueId, Type>,
    /// Entry block — always the first block.
    pub entry: BlockId,
    /// Optional debug names for values (from source-level variable names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_names: Vec<(ValueId, String)>,
}
