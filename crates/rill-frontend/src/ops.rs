//! Operator tables: surface symbol → magic-method names.
//!
//! Binary operators carry a reflected form tried on the right operand when
//! the left operand's magic does not apply. `&&` and `||` have no magic;
//! they are short-circuited at the IR level.

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnOp {
    pub symbol: &'static str,
    pub magic: &'static str,
}

/// A binary operator. `reflected` is empty when no reflected form exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinOp {
    pub symbol: &'static str,
    pub magic: &'static str,
    pub reflected: &'static str,
}

impl BinOp {
    /// `&&` and `||` are lowered directly, not dispatched through magic.
    pub fn is_short_circuit(&self) -> bool {
        self.symbol == "&&" || self.symbol == "||"
    }
}

pub const UN_OPS: &[UnOp] = &[
    UnOp {
        symbol: "~",
        magic: "__invert__",
    },
    // `!` lowers to `__bool__` followed by `__invert__` on Bool.
    UnOp {
        symbol: "!",
        magic: "",
    },
    UnOp {
        symbol: "-",
        magic: "__neg__",
    },
    UnOp {
        symbol: "+",
        magic: "__pos__",
    },
];

pub const BIN_OPS: &[BinOp] = &[
    BinOp {
        symbol: "*",
        magic: "__mul__",
        reflected: "__rmul__",
    },
    BinOp {
        symbol: "/",
        magic: "__div__",
        reflected: "__rdiv__",
    },
    BinOp {
        symbol: "%",
        magic: "__mod__",
        reflected: "__rmod__",
    },
    BinOp {
        symbol: "+",
        magic: "__add__",
        reflected: "__radd__",
    },
    BinOp {
        symbol: "-",
        magic: "__sub__",
        reflected: "__rsub__",
    },
    BinOp {
        symbol: "<<",
        magic: "__lshift__",
        reflected: "",
    },
    BinOp {
        symbol: ">>",
        magic: "__rshift__",
        reflected: "",
    },
    BinOp {
        symbol: "<",
        magic: "__lt__",
        reflected: "__gt__",
    },
    BinOp {
        symbol: ">",
        magic: "__gt__",
        reflected: "__lt__",
    },
    BinOp {
        symbol: "<=",
        magic: "__le__",
        reflected: "__ge__",
    },
    BinOp {
        symbol: ">=",
        magic: "__ge__",
        reflected: "__le__",
    },
    BinOp {
        symbol: "==",
        magic: "__eq__",
        reflected: "__eq__",
    },
    BinOp {
        symbol: "!=",
        magic: "__ne__",
        reflected: "__ne__",
    },
    BinOp {
        symbol: "&",
        magic: "__and__",
        reflected: "__rand__",
    },
    BinOp {
        symbol: "^",
        magic: "__xor__",
        reflected: "__rxor__",
    },
    BinOp {
        symbol: "|",
        magic: "__or__",
        reflected: "__ror__",
    },
    BinOp {
        symbol: "&&",
        magic: "",
        reflected: "",
    },
    BinOp {
        symbol: "||",
        magic: "",
        reflected: "",
    },
];

/// Look up a unary operator by its surface symbol.
///
/// # Panics
/// Panics on an unknown symbol; the parser only constructs known operators.
pub fn uop(symbol: &str) -> UnOp {
    *UN_OPS
        .iter()
        .find(|op| op.symbol == symbol)
        .unwrap_or_else(|| panic!("unknown unary operator '{symbol}'"))
}

/// Look up a binary operator by its surface symbol.
///
/// # Panics
/// Panics on an unknown symbol; the parser only constructs known operators.
pub fn bop(symbol: &str) -> BinOp {
    *BIN_OPS
        .iter()
        .find(|op| op.symbol == symbol)
        .unwrap_or_else(|| panic!("unknown binary operator '{symbol}'"))
}
