//! Input intermediate language (IL): the SSA form this backend consumes.
//!
//! This is a flat, minimal representation — just enough for the x86-64
//! backend to lower from. Producers (source-language frontends) are out of
//! scope; this module only defines the contract they must honour.

/// Static type of an IL value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ILKind {
    /// 64-bit integer.
    I64,
    /// 64-bit (double-precision) float.
    F64,
    /// Single-bit boolean, represented as a byte at rest.
    I1,
    /// Pointer-sized value.
    Ptr,
    /// Symbolic label reference (block or function).
    Label,
    /// String literal reference.
    Str,
}

/// A value used as an IL instruction operand.
///
/// `id >= 0` means a reference to a previously produced SSA value; `id < 0`
/// means the value is an immediate (its payload is carried directly in the
/// relevant field).
#[derive(Debug, Clone, PartialEq)]
pub struct ILValue {
    /// Static type of this value.
    pub kind: ILKind,
    /// SSA identifier, or a negative sentinel for immediates.
    pub id: i32,
    /// Payload used when `kind == I64` or `kind == I1` and `id < 0`.
    pub i64_val: i64,
    /// Payload used when `kind == F64` and `id < 0`.
    pub f64_val: f64,
    /// Payload used when `kind == Label`.
    pub label: String,
    /// Payload used when `kind == Str`: raw byte content of the literal.
    pub bytes: Vec<u8>,
}

impl ILValue {
    /// True when this value is an immediate rather than an SSA reference.
    pub fn is_immediate(&self) -> bool {
        self.id < 0
    }

    /// Build a reference to a previously defined SSA value.
    pub fn value_ref(id: i32, kind: ILKind) -> Self {
        assert!(id >= 0, "value_ref requires a non-negative id");
        ILValue {
            kind,
            id,
            i64_val: 0,
            f64_val: 0.0,
            label: String::new(),
            bytes: Vec::new(),
        }
    }

    /// Build an integer immediate.
    pub fn imm_i64(value: i64) -> Self {
        ILValue {
            kind: ILKind::I64,
            id: -1,
            i64_val: value,
            f64_val: 0.0,
            label: String::new(),
            bytes: Vec::new(),
        }
    }

    /// Build a boolean immediate.
    pub fn imm_i1(value: bool) -> Self {
        ILValue {
            kind: ILKind::I1,
            id: -1,
            i64_val: value as i64,
            f64_val: 0.0,
            label: String::new(),
            bytes: Vec::new(),
        }
    }

    /// Build a float immediate.
    pub fn imm_f64(value: f64) -> Self {
        ILValue {
            kind: ILKind::F64,
            id: -1,
            i64_val: 0,
            f64_val: value,
            label: String::new(),
            bytes: Vec::new(),
        }
    }

    /// Build a symbolic label reference.
    pub fn label_ref(name: impl Into<String>) -> Self {
        ILValue {
            kind: ILKind::Label,
            id: -1,
            i64_val: 0,
            f64_val: 0.0,
            label: name.into(),
            bytes: Vec::new(),
        }
    }

    /// Build a string literal value.
    pub fn string_lit(bytes: impl Into<Vec<u8>>) -> Self {
        ILValue {
            kind: ILKind::Str,
            id: -1,
            i64_val: 0,
            f64_val: 0.0,
            label: String::new(),
            bytes: bytes.into(),
        }
    }
}

/// A single IL instruction: opcode mnemonic, ordered operands, optional
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct ILInstr {
    /// Opcode mnemonic, matched exactly or as a prefix by the lowering rule
    /// table (see `crate::lowering`).
    pub opcode: String,
    /// Ordered operand list.
    pub operands: Vec<ILValue>,
    /// SSA identifier produced by this instruction, if any.
    pub result_id: Option<i32>,
    /// Static type of the produced value, meaningful only when `result_id`
    /// is `Some`.
    pub result_kind: ILKind,
}

impl ILInstr {
    /// Construct an instruction with no result (e.g. `store`, `ret`, `br`).
    pub fn no_result(opcode: impl Into<String>, operands: Vec<ILValue>) -> Self {
        ILInstr {
            opcode: opcode.into(),
            operands,
            result_id: None,
            result_kind: ILKind::I64,
        }
    }

    /// Construct an instruction that produces an SSA value.
    pub fn with_result(
        opcode: impl Into<String>,
        operands: Vec<ILValue>,
        result_id: i32,
        result_kind: ILKind,
    ) -> Self {
        ILInstr {
            opcode: opcode.into(),
            operands,
            result_id: Some(result_id),
            result_kind,
        }
    }
}

/// An outgoing terminator edge: a successor label plus the SSA ids feeding
/// that successor's block parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ILEdge {
    /// Destination block label.
    pub to: String,
    /// SSA ids mapped onto the destination block's parameters, in order.
    pub args: Vec<i32>,
}

/// A basic block: label, body, block parameters, and outgoing edges.
#[derive(Debug, Clone, PartialEq)]
pub struct ILBlock {
    /// Block label, unique within the owning function.
    pub label: String,
    /// Instruction body, in program order. The last entry is expected to be
    /// a terminator (`ret`, `br`, `cbr`).
    pub instrs: Vec<ILInstr>,
    /// SSA ids bound to this block's parameters.
    pub param_ids: Vec<i32>,
    /// Kinds of this block's parameters, parallel to `param_ids`.
    pub param_kinds: Vec<ILKind>,
    /// Outgoing edges, one per successor, carrying block-parameter
    /// arguments for SSA hand-off.
    pub edges: Vec<ILEdge>,
}

impl ILBlock {
    /// Construct an empty block with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        ILBlock {
            label: label.into(),
            instrs: Vec::new(),
            param_ids: Vec::new(),
            param_kinds: Vec::new(),
            edges: Vec::new(),
        }
    }
}

/// A function: symbol name plus an ordered list of blocks. The first block
/// is always the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ILFunction {
    /// Exported symbol name.
    pub name: String,
    /// Ordered blocks; `blocks[0]` is the entry.
    pub blocks: Vec<ILBlock>,
    /// True when the function accepts a variable argument tail (relevant
    /// only to call sites targeting it, not to its own prologue in Phase A).
    pub is_vararg: bool,
}

impl ILFunction {
    /// Construct a function with a single empty entry block.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ILFunction {
            blocks: vec![ILBlock::new(name.clone())],
            name,
            is_vararg: false,
        }
    }

    /// The entry block (always `blocks[0]`).
    pub fn entry(&self) -> &ILBlock {
        &self.blocks[0]
    }
}

/// A named string global declared at module scope (constant data, distinct
/// from string literals interned through the `RoDataPool`).
#[derive(Debug, Clone, PartialEq)]
pub struct ILGlobal {
    /// Symbol name of the global.
    pub name: String,
    /// Raw byte content.
    pub bytes: Vec<u8>,
}

/// A module: an ordered list of functions plus named string globals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ILModule {
    /// Functions, emitted in declaration order.
    pub functions: Vec<ILFunction>,
    /// Module-level string globals.
    pub globals: Vec<ILGlobal>,
}

impl ILModule {
    /// Construct an empty module.
    pub fn new() -> Self {
        Self::default()
    }
}
