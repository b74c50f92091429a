//! Machine IR: the backend's working representation, closer to hardware
//! instructions than the input IL.
//!
//! Mirrors the entity-reference discipline `cranelift-codegen::ir::entities`
//! uses for `Value`/`Inst`: virtual registers are a dense, densely-numbered
//! index type rather than a boxed/ref-counted handle.

use cranelift_entity::entity_impl;
use std::fmt;

/// A dense virtual-register identifier, unique within a function.
///
/// Once register allocation assigns a physical register to a `VReg`, every
/// operand referencing it is rewritten in place; no `VReg` survives past
/// allocation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32);
entity_impl!(VReg, "v");

/// Register class: which half of the physical register file a value lives
/// in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// General-purpose (integer/pointer) registers.
    GPR,
    /// Scalar floating-point (XMM) registers.
    XMM,
}

/// The hardware register file recognized by the SysV/Win64 ABIs this
/// backend targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PhysReg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    Xmm0 = 16,
    Xmm1 = 17,
    Xmm2 = 18,
    Xmm3 = 19,
    Xmm4 = 20,
    Xmm5 = 21,
    Xmm6 = 22,
    Xmm7 = 23,
    Xmm8 = 24,
    Xmm9 = 25,
    Xmm10 = 26,
    Xmm11 = 27,
    Xmm12 = 28,
    Xmm13 = 29,
    Xmm14 = 30,
    Xmm15 = 31,
}

/// All 32 physical registers, in encoding order. Used to walk the register
/// file without repeating the enum by hand.
pub const ALL_PHYS_REGS: [PhysReg; 32] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rbx,
    PhysReg::Rsp,
    PhysReg::Rbp,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::R10,
    PhysReg::R11,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
    PhysReg::Xmm0,
    PhysReg::Xmm1,
    PhysReg::Xmm2,
    PhysReg::Xmm3,
    PhysReg::Xmm4,
    PhysReg::Xmm5,
    PhysReg::Xmm6,
    PhysReg::Xmm7,
    PhysReg::Xmm8,
    PhysReg::Xmm9,
    PhysReg::Xmm10,
    PhysReg::Xmm11,
    PhysReg::Xmm12,
    PhysReg::Xmm13,
    PhysReg::Xmm14,
    PhysReg::Xmm15,
];

impl PhysReg {
    /// Recover a `PhysReg` from its encoding index (0..=31).
    pub fn from_index(idx: u8) -> Self {
        ALL_PHYS_REGS[idx as usize]
    }

    /// Encoding index of this register (0..=31), stable across the crate.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Register class this physical register belongs to.
    pub fn class(self) -> RegClass {
        if self.index() < 16 {
            RegClass::GPR
        } else {
            RegClass::XMM
        }
    }

    /// 64-bit AT&T register name (`%rax`, `%xmm0`, ...).
    pub fn att_name(self) -> &'static str {
        GPR64_NAMES
            .get(self.index() as usize)
            .copied()
            .or_else(|| XMM_NAMES.get(self.index() as usize - 16).copied())
            .unwrap_or("%?")
    }

    /// 32-bit AT&T sub-register name (`%eax`, `%r8d`, ...). Only meaningful
    /// for GPR-class registers.
    pub fn att_name32(self) -> &'static str {
        debug_assert_eq!(self.class(), RegClass::GPR);
        GPR32_NAMES[self.index() as usize]
    }

    /// 8-bit low-byte AT&T sub-register name (`%al`, `%r8b`, ...). Only
    /// meaningful for GPR-class registers.
    pub fn att_name8(self) -> &'static str {
        debug_assert_eq!(self.class(), RegClass::GPR);
        GPR8_NAMES[self.index() as usize]
    }
}

static GPR64_NAMES: [&str; 16] = [
    "%rax", "%rcx", "%rdx", "%rbx", "%rsp", "%rbp", "%rsi", "%rdi", "%r8", "%r9", "%r10", "%r11",
    "%r12", "%r13", "%r14", "%r15",
];
static GPR32_NAMES: [&str; 16] = [
    "%eax", "%ecx", "%edx", "%ebx", "%esp", "%ebp", "%esi", "%edi", "%r8d", "%r9d", "%r10d",
    "%r11d", "%r12d", "%r13d", "%r14d", "%r15d",
];
static GPR8_NAMES: [&str; 16] = [
    "%al", "%cl", "%dl", "%bl", "%spl", "%bpl", "%sil", "%dil", "%r8b", "%r9b", "%r10b", "%r11b",
    "%r12b", "%r13b", "%r14b", "%r15b",
];
static XMM_NAMES: [&str; 16] = [
    "%xmm0", "%xmm1", "%xmm2", "%xmm3", "%xmm4", "%xmm5", "%xmm6", "%xmm7", "%xmm8", "%xmm9",
    "%xmm10", "%xmm11", "%xmm12", "%xmm13", "%xmm14", "%xmm15",
];

/// Integer/float condition codes produced by `icmp_*`/`fcmp_*` lowering.
///
/// Values 0-11 are stable and referenced directly by the emitter's
/// `conditionSuffix`-style lookup (see `crate::emit::condition_suffix`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum CondCode {
    Eq = 0,
    Ne = 1,
    Slt = 2,
    Sle = 3,
    Sgt = 4,
    Sge = 5,
    Ugt = 6,
    Uge = 7,
    Ult = 8,
    Ule = 9,
    /// Unordered (used by `fcmp_ne`, parity set).
    Unordered = 10,
    /// Ordered (used by `fcmp_eq`, parity clear).
    Ordered = 11,
}

/// A register operand: either a physical or virtual register in a known
/// class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegOperand {
    /// Whether `id` should be read as a `PhysReg` index rather than a
    /// `VReg`.
    pub is_physical: bool,
    /// Register class this operand belongs to.
    pub class: RegClass,
    /// `PhysReg::index()` when `is_physical`, else a `VReg` index.
    pub id: u32,
}

impl RegOperand {
    /// Wrap a virtual register.
    pub fn vreg(class: RegClass, vreg: VReg) -> Self {
        RegOperand {
            is_physical: false,
            class,
            id: vreg.index() as u32,
        }
    }

    /// Wrap a physical register.
    pub fn phys(reg: PhysReg) -> Self {
        RegOperand {
            is_physical: true,
            class: reg.class(),
            id: reg.index() as u32,
        }
    }

    /// View this operand as a `VReg`. Panics if it refers to a physical
    /// register; callers are expected to have checked `is_physical` first.
    pub fn as_vreg(self) -> VReg {
        assert!(!self.is_physical, "operand is a physical register");
        VReg::from_u32(self.id)
    }

    /// View this operand as a `PhysReg`. Panics if it refers to a virtual
    /// register.
    pub fn as_phys(self) -> PhysReg {
        assert!(self.is_physical, "operand is a virtual register");
        PhysReg::from_index(self.id as u8)
    }
}

/// Memory operand: `disp(base, index, scale)` in AT&T terms, i.e.
/// `base + index*scale + disp`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemOperand {
    /// Base register. Always GPR-class.
    pub base: RegOperand,
    /// Optional index register, also always GPR-class.
    pub index: Option<RegOperand>,
    /// Scale applied to `index`: 1, 2, 4, or 8.
    pub scale: u8,
    /// Signed byte displacement.
    pub disp: i32,
}

impl MemOperand {
    /// Build a base+displacement memory operand with no index.
    pub fn base_disp(base: RegOperand, disp: i32) -> Self {
        MemOperand {
            base,
            index: None,
            scale: 1,
            disp,
        }
    }

    /// Build a fully scaled-index memory operand.
    pub fn with_index(base: RegOperand, index: RegOperand, scale: u8, disp: i32) -> Self {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        MemOperand {
            base,
            index: Some(index),
            scale,
            disp,
        }
    }
}

/// A single Machine IR operand.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Operand {
    /// Register (physical or virtual).
    Reg(RegOperand),
    /// Integer immediate.
    Imm(i64),
    /// Memory reference.
    Mem(MemOperand),
    /// Symbolic label (branch/call target, or in-block label marker).
    Label(LabelRef),
    /// RIP-relative memory reference (literal pool access).
    RipLabel(LabelRef),
}

/// A small, `Copy`-able handle to a label name, avoiding a `String` in every
/// operand. Interning is owned by `MFunction`/emission, which hold the
/// backing strings; this crate keeps labels as plain owned strings on the
/// instruction rather than interned indices for emission-time simplicity,
/// so `LabelRef` just wraps a `Box<str>`-free `std::rc::Rc<str>` to stay
/// `Copy`-free but cheap to clone across passes.
pub type LabelRef = std::rc::Rc<str>;

impl Operand {
    /// Construct a `Label` operand from any string-like value.
    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(LabelRef::from(name.into()))
    }

    /// Construct a `RipLabel` operand from any string-like value.
    pub fn rip_label(name: impl Into<String>) -> Self {
        Operand::RipLabel(LabelRef::from(name.into()))
    }

    /// True if this operand references the given virtual register (as a
    /// use, a def, or the base/index of a memory operand).
    pub fn mentions_vreg(&self, v: VReg) -> bool {
        match self {
            Operand::Reg(r) if !r.is_physical => r.as_vreg() == v,
            Operand::Mem(m) => {
                (!m.base.is_physical && m.base.as_vreg() == v)
                    || m.index.map_or(false, |i| !i.is_physical && i.as_vreg() == v)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "Reg({:?})", r),
            Operand::Imm(i) => write!(f, "Imm({})", i),
            Operand::Mem(m) => write!(f, "Mem({:?})", m),
            Operand::Label(l) => write!(f, "Label({})", l),
            Operand::RipLabel(l) => write!(f, "RipLabel({})", l),
        }
    }
}

/// Opcode set for the Machine IR. Covers `spec.md` §3's closed set plus one
/// immediate-operand counterpart (`AddOvfRI`) that instruction selection
/// produces when it canonicalizes a checked add or sub's immediate
/// right-hand side — the checked pseudos otherwise had no `RI` form to
/// canonicalize into, unlike their unchecked counterparts. A checked
/// subtract's immediate is folded into `AddOvfRI` with the sign flipped,
/// the same way an unchecked `SUBrr` folds into `ADDri`, so there is no
/// separate `SubOvfRI`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MOpcode {
    MovRR,
    MovRM,
    MovMR,
    MovRI,
    CmovNeRR,
    Lea,
    AddRR,
    AddRI,
    AndRR,
    AndRI,
    OrRR,
    OrRI,
    XorRR,
    XorRI,
    Xor32RR,
    SubRR,
    ShlRI,
    ShlRC,
    ShrRI,
    ShrRC,
    SarRI,
    SarRC,
    ImulRR,
    DivS64RR,
    RemS64RR,
    DivU64RR,
    RemU64RR,
    Cqo,
    IDivRM,
    DivRM,
    CmpRR,
    CmpRI,
    TestRR,
    SetCC,
    MovzxRR32,
    Jmp,
    Jcc,
    /// Jump-if-overflow: the one conditional branch guarded expansion needs
    /// that isn't one of the twelve `CondCode` suffixes (it tests `OF`
    /// directly rather than a combination `SETcc` can also produce).
    Jo,
    Label,
    Call,
    Ud2,
    Ret,
    PxCopy,
    FAdd,
    FSub,
    FMul,
    FDiv,
    Ucomis,
    CvtSi2Sd,
    CvtTSd2Si,
    MovQrx,
    MovSdRR,
    MovSdRM,
    MovSdMR,
    MovUpsRM,
    MovUpsMR,
    AddOvfRR,
    AddOvfRI,
    SubOvfRR,
    ImulOvfRR,
}

/// A single machine instruction: opcode plus ordered operands.
#[derive(Debug, Clone, PartialEq)]
pub struct MInstr {
    /// Opcode identifying the operation.
    pub opcode: MOpcode,
    /// Ordered operands. By convention the destination (if any) is
    /// `operands[0]`.
    pub operands: smallvec::SmallVec<[Operand; 3]>,
}

impl MInstr {
    /// Build an instruction from an owned operand vector.
    pub fn new(opcode: MOpcode, operands: Vec<Operand>) -> Self {
        MInstr {
            opcode,
            operands: smallvec::SmallVec::from_vec(operands),
        }
    }

    /// Build a zero-operand instruction (`RET`, `CQO`, `UD2`, ...).
    pub fn nullary(opcode: MOpcode) -> Self {
        MInstr {
            opcode,
            operands: smallvec::SmallVec::new(),
        }
    }
}

/// A labelled sequence of machine instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct MBasicBlock {
    /// Symbolic label for this block.
    pub label: String,
    /// Ordered instruction list.
    pub instrs: Vec<MInstr>,
}

impl MBasicBlock {
    /// Construct an empty block.
    pub fn new(label: impl Into<String>) -> Self {
        MBasicBlock {
            label: label.into(),
            instrs: Vec::new(),
        }
    }
}

/// Placeholder displacement ranges used before frame lowering runs.
///
/// A `Mem` operand with a physical `RBP` base and one of these encoded
/// displacements is not yet a real stack offset — it names a logical slot
/// (`GPR` spill, `XMM` spill, or `alloca`) that `crate::frame` resolves to a
/// concrete negative-from-`RBP` byte offset once every slot in the function
/// is known. The three ranges are spaced far enough apart that a function
/// would need millions of spills or allocas to collide, which is also why
/// collision is treated as an implementation-limit error rather than
/// guarded against on every insert.
pub mod slot {
    /// Base of the GPR spill-slot placeholder range.
    pub const GPR_SPILL_BASE: i32 = 1;
    /// Base of the XMM spill-slot placeholder range.
    pub const XMM_SPILL_BASE: i32 = 1_000_000;
    /// Base of the alloca placeholder range.
    pub const ALLOCA_BASE: i32 = 2_000_000;

    /// Encode a GPR spill slot index as a placeholder displacement.
    pub fn gpr_spill_disp(index: u32) -> i32 {
        -(GPR_SPILL_BASE + index as i32)
    }

    /// Encode an XMM spill slot index as a placeholder displacement.
    pub fn xmm_spill_disp(index: u32) -> i32 {
        -(XMM_SPILL_BASE + index as i32)
    }

    /// Encode an alloca slot index as a placeholder displacement.
    pub fn alloca_disp(index: u32) -> i32 {
        -(ALLOCA_BASE + index as i32)
    }

    /// Classify a placeholder displacement, if it is one.
    pub enum SlotKind {
        GprSpill(u32),
        XmmSpill(u32),
        Alloca(u32),
    }

    /// Decode a displacement produced by one of the `*_disp` functions
    /// above. Returns `None` for an already-resolved (or never-placeholder)
    /// displacement.
    pub fn decode(disp: i32) -> Option<SlotKind> {
        if disp >= 0 {
            return None;
        }
        let magnitude = -disp;
        if magnitude >= ALLOCA_BASE {
            Some(SlotKind::Alloca((magnitude - ALLOCA_BASE) as u32))
        } else if magnitude >= XMM_SPILL_BASE {
            Some(SlotKind::XmmSpill((magnitude - XMM_SPILL_BASE) as u32))
        } else if magnitude >= GPR_SPILL_BASE {
            Some(SlotKind::GprSpill((magnitude - GPR_SPILL_BASE) as u32))
        } else {
            None
        }
    }
}

/// Metadata about a machine function relevant to lowering passes downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MFunctionMeta {
    /// True when the function accepts variable arguments.
    pub is_vararg: bool,
}

/// A machine function: name, ordered blocks, metadata, and a unique-label
/// counter used by passes that need to mint fresh block labels (trap
/// blocks, division continuations, cycle-broken copy scratch blocks).
#[derive(Debug, Clone, PartialEq)]
pub struct MFunction {
    /// Symbolic function name.
    pub name: String,
    /// Ordered basic blocks. `blocks[0]` is the entry.
    pub blocks: Vec<MBasicBlock>,
    /// Ancillary metadata.
    pub meta: MFunctionMeta,
    /// Counter used by `make_local_label` to mint unique labels.
    local_label_counter: u32,
    /// Dense count of virtual registers minted so far, by class. Used by
    /// register allocation to size per-vreg dense maps.
    vreg_classes: Vec<RegClass>,
    /// Byte size requested by each `alloca`, indexed by slot number (see
    /// `mir::slot`). Consumed by frame lowering to size the alloca area.
    pub alloca_sizes: Vec<i32>,
}

impl MFunction {
    /// Construct a function with no blocks yet.
    pub fn new(name: impl Into<String>) -> Self {
        MFunction {
            name: name.into(),
            blocks: Vec::new(),
            meta: MFunctionMeta::default(),
            local_label_counter: 0,
            vreg_classes: Vec::new(),
            alloca_sizes: Vec::new(),
        }
    }

    /// Reserve a fresh alloca slot of `size_bytes` and return its index.
    pub fn new_alloca_slot(&mut self, size_bytes: i32) -> u32 {
        let idx = self.alloca_sizes.len() as u32;
        self.alloca_sizes.push(size_bytes);
        idx
    }

    /// Mint a fresh function-local label using the given short prefix.
    pub fn make_local_label(&mut self, prefix: &str) -> String {
        let n = self.local_label_counter;
        self.local_label_counter += 1;
        format!(".L{}_{}_{}", prefix, self.name, n)
    }

    /// Allocate a fresh virtual register in the given class.
    pub fn new_vreg(&mut self, class: RegClass) -> VReg {
        let v = VReg::from_u32(self.vreg_classes.len() as u32);
        self.vreg_classes.push(class);
        v
    }

    /// Register class a previously-minted virtual register was allocated
    /// in.
    pub fn vreg_class(&self, v: VReg) -> RegClass {
        self.vreg_classes[v.index()]
    }

    /// Total number of distinct virtual registers minted in this function.
    pub fn vreg_count(&self) -> usize {
        self.vreg_classes.len()
    }

    /// Append a new block and return its index.
    pub fn add_block(&mut self, block: MBasicBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Find a block's index by label.
    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }
}
