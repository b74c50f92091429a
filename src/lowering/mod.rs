//! IL→MIR lowering: a rule-table-driven pass that turns each IL instruction
//! into one or more Machine IR instructions.
//!
//! Grounded on `original_source/src/codegen/x86_64/LowerILToMIR.{hpp,cpp}`
//! and `LoweringRuleTable.{hpp,cpp}`: dispatch probes an exact-match table
//! first, then falls back to a linear prefix-rule scan (used for the
//! `icmp_*`/`fcmp_*` opcode families). The table is built once, as a `const`
//! array of function pointers, and never mutated — the `cranelift-codegen`
//! style of "static encoding tables, no dynamic dispatch" applies just as
//! well to a lowering rule table as it does to the emitter's encoding table.

mod rules;

use crate::call;
use crate::il::{ILBlock, ILEdge, ILFunction, ILInstr, ILKind, ILValue};
use crate::mir::{MBasicBlock, MFunction, MInstr, MOpcode, Operand, PhysReg, RegClass, RegOperand, VReg};
use crate::rodata::RoDataPool;
use std::collections::HashMap;

/// Coarse operand-kind constraint used by the rule table to validate an IL
/// instruction's shape before dispatching to its emit callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandKind {
    /// Accepts any operand shape.
    Any,
    /// Must be a value reference or immediate of a scalar kind.
    Value,
    /// Must be a label reference.
    Label,
    /// Must be an immediate.
    Immediate,
}

/// Sentinel for "no upper bound on operand count" (variadic rules, e.g.
/// `call`).
pub const VARIADIC: u8 = 0xFF;

/// One entry in the lowering rule table.
pub struct Rule {
    /// Opcode mnemonic this rule matches.
    pub opcode: &'static str,
    /// When true, `opcode` is matched as a prefix rather than exactly
    /// (used for `icmp_*`/`fcmp_*` families).
    pub prefix: bool,
    /// Minimum operand count.
    pub min_arity: u8,
    /// Maximum operand count, or `VARIADIC`.
    pub max_arity: u8,
    /// Per-position operand-kind constraints. Checked up to `min_arity`
    /// positions; `Any` is used where position-specific shape doesn't
    /// matter.
    pub operand_kinds: &'static [OperandKind],
    /// Emit callback: consumes the IL instruction and lowers it into the
    /// current block via the builder.
    pub emit: fn(&mut LowerCtx, &ILInstr),
}

/// The exact-match rule table, probed first.
pub static EXACT_RULES: &[Rule] = rules::EXACT_RULES;

/// The prefix rule table, probed on an exact-match miss.
pub static PREFIX_RULES: &[Rule] = rules::PREFIX_RULES;

/// Find the rule matching `opcode`, probing the exact table first and the
/// prefix table second. Panics (a contract violation, per spec.md §7) if no
/// rule matches — an opcode outside the fixed alphabet in spec.md §6 is a
/// frontend bug, not a recoverable condition.
fn find_rule(opcode: &str) -> &'static Rule {
    if let Some(r) = EXACT_RULES.iter().find(|r| r.opcode == opcode) {
        return r;
    }
    if let Some(r) = PREFIX_RULES.iter().find(|r| opcode.starts_with(r.opcode)) {
        return r;
    }
    panic!("no lowering rule for opcode `{}`", opcode);
}

/// Per-block parameter bindings and the function-local vreg the block's
/// first instruction can expect them in.
struct BlockInfo {
    index: usize,
    param_vregs: Vec<VReg>,
}

/// Mutable state threaded through lowering of a single function: the
/// in-progress `MFunction`, the SSA-id → vreg map, block metadata, and a
/// running total of outgoing call-argument stack bytes (consumed by frame
/// lowering once the whole function has been lowered).
pub struct LowerCtx<'a> {
    pub target: &'a crate::isa::TargetDescription,
    pub rodata: &'a mut RoDataPool,
    mir: MFunction,
    cur_block: usize,
    value_to_vreg: HashMap<i32, (VReg, ILKind)>,
    blocks: HashMap<String, BlockInfo>,
    pub max_outgoing_arg_bytes: i32,
    /// Mirrors `CodegenOptions::call_alignment_checks`; read by
    /// `crate::call` when materializing each call site.
    pub call_alignment_checks: bool,
}

impl<'a> LowerCtx<'a> {
    fn new(
        name: &str,
        target: &'a crate::isa::TargetDescription,
        rodata: &'a mut RoDataPool,
        call_alignment_checks: bool,
    ) -> Self {
        LowerCtx {
            target,
            rodata,
            mir: MFunction::new(name),
            cur_block: 0,
            value_to_vreg: HashMap::new(),
            blocks: HashMap::new(),
            max_outgoing_arg_bytes: 0,
            call_alignment_checks,
        }
    }

    /// Mint a fresh function-local label (delegates to the in-progress
    /// `MFunction`).
    pub fn make_local_label(&mut self, prefix: &str) -> String {
        self.mir.make_local_label(prefix)
    }

    /// True when `id`'s vreg was most recently defined by a `SETcc` in the
    /// block currently being lowered, scanning backwards from the
    /// instruction emitted so far. Used to decide whether a boolean call
    /// argument needs `MOVZX` widening.
    pub fn was_defined_by_setcc(&self, id: i32) -> bool {
        let Some(&(vreg, _)) = self.value_to_vreg.get(&id) else {
            return false;
        };
        let target_reg = RegOperand::vreg(RegClass::GPR, vreg);
        for instr in self.mir.blocks[self.cur_block].instrs.iter().rev() {
            if let Some(Operand::Reg(dst)) = instr.operands.first() {
                if *dst == target_reg {
                    return instr.opcode == MOpcode::SetCC;
                }
            }
        }
        false
    }

    /// Register class an IL value kind is lowered into.
    pub fn class_for(kind: ILKind) -> RegClass {
        match kind {
            ILKind::F64 => RegClass::XMM,
            _ => RegClass::GPR,
        }
    }

    /// Append an instruction to the block currently being lowered.
    pub fn emit(&mut self, instr: MInstr) {
        self.mir.blocks[self.cur_block].instrs.push(instr);
    }

    /// Mint a fresh, unbound temporary virtual register.
    pub fn new_temp(&mut self, class: RegClass) -> VReg {
        self.mir.new_vreg(class)
    }

    /// The first time an SSA id is referenced, mint a fresh vreg in the
    /// class dictated by `kind`; later references reuse it. Panics if the
    /// same id is later referenced with a different kind — a contract
    /// violation (spec.md §7).
    pub fn ensure_vreg(&mut self, id: i32, kind: ILKind) -> VReg {
        if let Some(&(v, seen_kind)) = self.value_to_vreg.get(&id) {
            assert_eq!(
                seen_kind, kind,
                "SSA id {} used with inconsistent kinds ({:?} vs {:?})",
                id, seen_kind, kind
            );
            return v;
        }
        let class = Self::class_for(kind);
        let v = self.mir.new_vreg(class);
        self.value_to_vreg.insert(id, (v, kind));
        v
    }

    /// Materialize an `ILValue` into an `Operand`, minting a temp or
    /// looking up a bound vreg as appropriate.
    pub fn operand_for_value(&mut self, value: &ILValue) -> Operand {
        if value.is_immediate() {
            match value.kind {
                ILKind::I64 | ILKind::Ptr => Operand::Imm(value.i64_val),
                ILKind::I1 => Operand::Imm(value.i64_val),
                ILKind::F64 => {
                    let idx = self.rodata.add_f64(value.f64_val);
                    Operand::RipLabel(self.rodata.f64_label(idx).into())
                }
                ILKind::Label => Operand::label(value.label.clone()),
                ILKind::Str => {
                    let idx = self.rodata.add_string(value.bytes.clone());
                    Operand::RipLabel(self.rodata.string_label(idx).into())
                }
            }
        } else {
            let v = self.ensure_vreg(value.id, value.kind);
            Operand::Reg(crate::mir::RegOperand::vreg(Self::class_for(value.kind), v))
        }
    }

    /// Materialize an operand into a fresh temporary register when the
    /// instruction form requires a register (e.g. the LHS of a binary op
    /// must already live in a register before the op can clobber it in
    /// place).
    pub fn materialize_to_temp(&mut self, value: &ILValue) -> VReg {
        let class = Self::class_for(value.kind);
        let temp = self.new_temp(class);
        let src = self.operand_for_value(value);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, temp));
        match class {
            RegClass::GPR => self.emit(MInstr::new(MOpcode::MovRR, vec![dst, src])),
            RegClass::XMM => self.emit(MInstr::new(MOpcode::MovSdRR, vec![dst, src])),
        }
        temp
    }

    /// Emit a canonical binary op: move LHS into a fresh destination, then
    /// apply `rr_opcode` with RHS.
    pub fn emit_binary(&mut self, rr_opcode: MOpcode, dst_id: i32, lhs: &ILValue, rhs: &ILValue) {
        let class = Self::class_for(lhs.kind);
        let dst_vreg = self.ensure_vreg(dst_id, lhs.kind);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, dst_vreg));
        let lhs_op = self.operand_for_value(lhs);
        let rhs_op = self.operand_for_value(rhs);
        let mov_opcode = if class == RegClass::GPR {
            MOpcode::MovRR
        } else {
            MOpcode::MovSdRR
        };
        self.emit(MInstr::new(mov_opcode, vec![dst.clone(), lhs_op]));
        self.emit(MInstr::new(rr_opcode, vec![dst, rhs_op]));
    }

    /// Emit a shift, choosing between immediate-form and CL-based variable
    /// form depending on whether the shift amount is an immediate.
    pub fn emit_shift(
        &mut self,
        imm_opcode: MOpcode,
        cl_opcode: MOpcode,
        dst_id: i32,
        lhs: &ILValue,
        amount: &ILValue,
    ) {
        let class = Self::class_for(lhs.kind);
        let dst_vreg = self.ensure_vreg(dst_id, lhs.kind);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, dst_vreg));
        let lhs_op = self.operand_for_value(lhs);
        self.emit(MInstr::new(MOpcode::MovRR, vec![dst.clone(), lhs_op]));
        if amount.is_immediate() {
            self.emit(MInstr::new(imm_opcode, vec![dst, Operand::Imm(amount.i64_val)]));
        } else {
            let amount_vreg = self.ensure_vreg(amount.id, amount.kind);
            let cl = Operand::Reg(crate::mir::RegOperand::phys(PhysReg::Rcx));
            self.emit(MInstr::new(
                MOpcode::MovRR,
                vec![cl.clone(), Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, amount_vreg))],
            ));
            self.emit(MInstr::new(cl_opcode, vec![dst, cl]));
        }
    }

    /// Emit a compare. When `result_id` is `Some`, the comparison also
    /// materializes a 0/1 integer via `SETcc` into a dense vreg; otherwise
    /// only the flags-producing compare is emitted (used by `cbr`).
    pub fn emit_compare(
        &mut self,
        cond: crate::mir::CondCode,
        lhs: &ILValue,
        rhs: &ILValue,
        result_id: Option<i32>,
    ) {
        let class = Self::class_for(lhs.kind);
        let lhs_op = self.operand_for_value(lhs);
        let rhs_op = self.operand_for_value(rhs);
        match class {
            RegClass::GPR => self.emit(MInstr::new(MOpcode::CmpRR, vec![lhs_op, rhs_op])),
            RegClass::XMM => self.emit(MInstr::new(MOpcode::Ucomis, vec![lhs_op, rhs_op])),
        }
        if let Some(id) = result_id {
            let dst_vreg = self.ensure_vreg(id, ILKind::I1);
            let byte_dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
            self.emit(MInstr::new(MOpcode::SetCC, vec![byte_dst.clone(), Operand::Imm(cond as i64)]));
            self.emit(MInstr::new(MOpcode::MovzxRR32, vec![byte_dst.clone(), byte_dst]));
        }
    }

    /// Emit a select as `MOV` false-path, `TEST` cond, `CMOVNE` true-path.
    /// `CMOVNE` requires a register or memory source, so an immediate
    /// true-path operand is first materialized into a temporary.
    ///
    /// XMM destinations have no direct `CMOV`: the bit pattern is ferried
    /// through a GPR temp via `MOVQ` (`MOpcode::MovQrx`, used in both
    /// directions) so the same `CMOVNE` core applies to floats too.
    pub fn emit_select(&mut self, dst_id: i32, cond: &ILValue, if_true: &ILValue, if_false: &ILValue) {
        let class = Self::class_for(if_true.kind);
        let dst_vreg = self.ensure_vreg(dst_id, if_true.kind);
        let cond_op = self.operand_for_value(cond);
        self.emit(MInstr::new(MOpcode::TestRR, vec![cond_op.clone(), cond_op]));

        match class {
            RegClass::GPR => {
                let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, dst_vreg));
                let false_op = self.operand_for_value(if_false);
                self.emit(MInstr::new(MOpcode::MovRR, vec![dst.clone(), false_op]));
                let true_op = if if_true.is_immediate() {
                    let t = self.materialize_to_temp(if_true);
                    Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, t))
                } else {
                    self.operand_for_value(if_true)
                };
                self.emit(MInstr::new(MOpcode::CmovNeRR, vec![dst, true_op]));
            }
            RegClass::XMM => {
                let false_bits = self.new_temp(RegClass::GPR);
                let false_bits_op = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, false_bits));
                let false_src = self.operand_for_value(if_false);
                self.emit(MInstr::new(MOpcode::MovQrx, vec![false_bits_op.clone(), false_src]));

                let true_bits = self.new_temp(RegClass::GPR);
                let true_bits_op = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, true_bits));
                let true_src = self.operand_for_value(if_true);
                self.emit(MInstr::new(MOpcode::MovQrx, vec![true_bits_op.clone(), true_src]));

                self.emit(MInstr::new(MOpcode::CmovNeRR, vec![false_bits_op.clone(), true_bits_op]));
                let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, dst_vreg));
                self.emit(MInstr::new(MOpcode::MovQrx, vec![dst, false_bits_op]));
            }
        }
    }

    /// Emit an unconditional branch target the IL terminator points at,
    /// preceded by the `PX_COPY` pseudo carrying block-parameter hand-off.
    pub fn emit_branch_edge(&mut self, edge: &ILEdge) {
        self.emit_edge_copy(edge);
        self.emit(MInstr::new(MOpcode::Jmp, vec![Operand::label(edge.to.clone())]));
    }

    /// Emit a conditional branch: `cond` selects between `then_edge` (taken)
    /// and `else_edge` (fallthrough/explicit jump).
    pub fn emit_cond_branch(&mut self, cond: &ILValue, then_edge: &ILEdge, else_edge: &ILEdge) {
        let cond_op = self.operand_for_value(cond);
        self.emit(MInstr::new(MOpcode::TestRR, vec![cond_op.clone(), cond_op]));
        // Parallel copies for both successors must happen before the
        // branch that picks between them, so each is delimited by its own
        // jump: copy-for-then, jcc, copy-for-else, jmp-else.
        let then_label = then_edge.to.clone();
        self.emit_edge_copy(then_edge);
        self.emit(MInstr::new(
            MOpcode::Jcc,
            vec![Operand::Imm(crate::mir::CondCode::Ne as i64), Operand::label(then_label)],
        ));
        self.emit_edge_copy(else_edge);
        self.emit(MInstr::new(MOpcode::Jmp, vec![Operand::label(else_edge.to.clone())]));
    }

    fn emit_edge_copy(&mut self, edge: &ILEdge) {
        if edge.args.is_empty() {
            return;
        }
        let Some(info) = self.blocks.get(&edge.to) else {
            // Forward reference to a not-yet-visited block: parameters are
            // bound lazily on first visit in `lower_function`, which always
            // runs before terminators referencing them are processed in our
            // single-pass block order. This branch only triggers for
            // malformed IL (edge to an undeclared block).
            panic!("branch to undeclared block `{}`", edge.to);
        };
        let dests: Vec<VReg> = info.param_vregs.clone();
        let mut operands = Vec::with_capacity(dests.len() * 2);
        for (dest, arg_id) in dests.iter().zip(edge.args.iter()) {
            let class = self.mir.vreg_class(*dest);
            let src_vreg = *self
                .value_to_vreg
                .get(arg_id)
                .map(|(v, _)| v)
                .expect("edge argument references an unbound SSA id");
            operands.push(Operand::Reg(crate::mir::RegOperand::vreg(class, *dest)));
            operands.push(Operand::Reg(crate::mir::RegOperand::vreg(class, src_vreg)));
        }
        self.emit(MInstr::new(MOpcode::PxCopy, operands));
    }

    /// Emit a return: move the value into the ABI return register,
    /// widening booleans via `MOVZX` first.
    pub fn emit_return(&mut self, value: Option<&ILValue>) {
        if let Some(value) = value {
            let class = Self::class_for(value.kind);
            let op = self.operand_for_value(value);
            match class {
                RegClass::GPR => {
                    let ret = Operand::Reg(crate::mir::RegOperand::phys(self.target.int_return_reg));
                    self.emit(MInstr::new(MOpcode::MovRR, vec![ret.clone(), op]));
                    if value.kind == ILKind::I1 {
                        self.emit(MInstr::new(MOpcode::MovzxRR32, vec![ret.clone(), ret]));
                    }
                }
                RegClass::XMM => {
                    let ret = Operand::Reg(crate::mir::RegOperand::phys(self.target.float_return_reg));
                    self.emit(MInstr::new(MOpcode::MovSdRR, vec![ret, op]));
                }
            }
        }
        self.emit(MInstr::nullary(MOpcode::Ret));
    }

    /// Emit a memory load.
    pub fn emit_load(&mut self, dst_id: i32, kind: ILKind, addr: &ILValue) {
        let class = Self::class_for(kind);
        let dst_vreg = self.ensure_vreg(dst_id, kind);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(class, dst_vreg));
        let base = self.materialize_to_temp(addr);
        let mem = Operand::Mem(crate::mir::MemOperand::base_disp(
            crate::mir::RegOperand::vreg(RegClass::GPR, base),
            0,
        ));
        let opcode = if class == RegClass::GPR { MOpcode::MovRM } else { MOpcode::MovSdRM };
        self.emit(MInstr::new(opcode, vec![dst, mem]));
    }

    /// Emit a memory store.
    pub fn emit_store(&mut self, addr: &ILValue, value: &ILValue) {
        let class = Self::class_for(value.kind);
        let base = self.materialize_to_temp(addr);
        let mem = Operand::Mem(crate::mir::MemOperand::base_disp(
            crate::mir::RegOperand::vreg(RegClass::GPR, base),
            0,
        ));
        let src = self.operand_for_value(value);
        let opcode = if class == RegClass::GPR { MOpcode::MovMR } else { MOpcode::MovSdMR };
        self.emit(MInstr::new(opcode, vec![mem, src]));
    }

    /// Emit a cast between integer widths or between integer and float.
    pub fn emit_cast(&mut self, opcode: &str, dst_id: i32, dst_kind: ILKind, src: &ILValue) {
        let dst_vreg = self.ensure_vreg(dst_id, dst_kind);
        let dst_class = Self::class_for(dst_kind);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(dst_class, dst_vreg));
        let src_op = self.operand_for_value(src);
        match opcode {
            "zext" => self.emit(MInstr::new(MOpcode::MovzxRR32, vec![dst, src_op])),
            "sext" | "trunc" => self.emit(MInstr::new(MOpcode::MovRR, vec![dst, src_op])),
            "sitofp" => self.emit(MInstr::new(MOpcode::CvtSi2Sd, vec![dst, src_op])),
            "fptosi" => self.emit(MInstr::new(MOpcode::CvtTSd2Si, vec![dst, src_op])),
            _ => unreachable!("emit_cast called with non-cast opcode `{}`", opcode),
        }
    }

    /// Emit a division/remainder pseudo, routed to the appropriate
    /// `{Div,Rem}{S,U}64RR` opcode. These pseudos are expanded into real
    /// `CQO`/`IDIV`/`DIV` sequences by `crate::guards` before register
    /// allocation.
    pub fn emit_div_rem(&mut self, opcode: MOpcode, dst_id: i32, lhs: &ILValue, rhs: &ILValue) {
        let dst_vreg = self.ensure_vreg(dst_id, ILKind::I64);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
        let lhs_op = self.operand_for_value(lhs);
        let rhs_op = self.operand_for_value(rhs);
        self.emit(MInstr::new(opcode, vec![dst, lhs_op, rhs_op]));
    }

    /// Emit an overflow-checked arithmetic pseudo, expanded by
    /// `crate::guards` into the non-checked op plus a `JCC(OF)` trap.
    ///
    /// Built the same way `emit_binary` builds an ordinary binary op (move
    /// LHS into the destination, then apply a two-operand use-and-def
    /// opcode with RHS), so instruction selection's arithmetic
    /// canonicalization and guarded expansion's in-place opcode rewrite
    /// both see the same two-operand shape they already assume for every
    /// other `UseDef`-style opcode. `ImulOvfRR` has no immediate-RHS form
    /// (unlike the add/sub pseudos, which canonicalize into one), so an
    /// immediate RHS is materialized into a register up front.
    pub fn emit_checked_arith(&mut self, opcode: MOpcode, dst_id: i32, lhs: &ILValue, rhs: &ILValue) {
        let dst_vreg = self.ensure_vreg(dst_id, ILKind::I64);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
        let lhs_op = self.operand_for_value(lhs);
        self.emit(MInstr::new(MOpcode::MovRR, vec![dst.clone(), lhs_op]));
        let rhs_op = if opcode == MOpcode::ImulOvfRR && rhs.is_immediate() {
            let t = self.materialize_to_temp(rhs);
            Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, t))
        } else {
            self.operand_for_value(rhs)
        };
        self.emit(MInstr::new(opcode, vec![dst, rhs_op]));
    }

    /// Lower `alloca`: reserve a stack slot sized `size.i64_val` bytes and
    /// produce its address via a placeholder-displacement `LEA`, resolved
    /// to a real `%rbp` offset by `crate::frame`.
    pub fn emit_alloca(&mut self, dst_id: i32, size: &ILValue) {
        let dst_vreg = self.ensure_vreg(dst_id, ILKind::Ptr);
        let slot = self.mir.new_alloca_slot(size.i64_val as i32);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
        let mem = Operand::Mem(crate::mir::MemOperand::base_disp(
            crate::mir::RegOperand::phys(PhysReg::Rbp),
            crate::mir::slot::alloca_disp(slot),
        ));
        self.emit(MInstr::new(MOpcode::Lea, vec![dst, mem]));
    }

    /// Lower `gep base, index, elem_size`: a constant index folds into the
    /// displacement; a variable index becomes a scaled SIB index when the
    /// element size is 1/2/4/8, else the byte offset is computed via a
    /// multiply into a scratch register first.
    pub fn emit_gep(&mut self, dst_id: i32, base: &ILValue, index: &ILValue, elem_size: i64) {
        let dst_vreg = self.ensure_vreg(dst_id, ILKind::Ptr);
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
        let base_reg = self.materialize_to_temp(base);
        let base_op = crate::mir::RegOperand::vreg(RegClass::GPR, base_reg);

        if index.is_immediate() {
            let disp = (index.i64_val * elem_size) as i32;
            let mem = Operand::Mem(crate::mir::MemOperand::base_disp(base_op, disp));
            self.emit(MInstr::new(MOpcode::Lea, vec![dst, mem]));
            return;
        }

        if matches!(elem_size, 1 | 2 | 4 | 8) {
            let index_vreg = self.ensure_vreg(index.id, index.kind);
            let index_op = crate::mir::RegOperand::vreg(RegClass::GPR, index_vreg);
            let mem = Operand::Mem(crate::mir::MemOperand::with_index(base_op, index_op, elem_size as u8, 0));
            self.emit(MInstr::new(MOpcode::Lea, vec![dst, mem]));
        } else {
            let offset_reg = self.materialize_to_temp(index);
            let offset_op = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, offset_reg));
            self.emit(MInstr::new(MOpcode::ImulRR, vec![offset_op.clone(), Operand::Imm(elem_size)]));
            let mem = Operand::Mem(crate::mir::MemOperand::with_index(
                base_op,
                crate::mir::RegOperand::vreg(RegClass::GPR, offset_reg),
                1,
                0,
            ));
            self.emit(MInstr::new(MOpcode::Lea, vec![dst, mem]));
        }
    }

    /// Lower `const_str`: intern the literal and materialize its address
    /// via a RIP-relative `LEA`.
    pub fn emit_const_str(&mut self, dst_id: i32, bytes: &[u8]) {
        let dst_vreg = self.ensure_vreg(dst_id, ILKind::Ptr);
        let idx = self.rodata.add_string(bytes.to_vec());
        let dst = Operand::Reg(crate::mir::RegOperand::vreg(RegClass::GPR, dst_vreg));
        let label = self.rodata.string_label(idx);
        self.emit(MInstr::new(MOpcode::Lea, vec![dst, Operand::rip_label(label)]));
    }

    /// Lower the generic `cmp lhs, rhs, cond_code_imm` form, used when the
    /// condition code is carried as a trailing immediate operand rather
    /// than encoded in the opcode string.
    pub fn emit_cmp_generic(&mut self, dst_id: i32, lhs: &ILValue, rhs: &ILValue, cond_code: i64) {
        let cond = cond_from_i64(cond_code);
        self.emit_compare(cond, lhs, rhs, Some(dst_id));
    }

    /// Lower `trap`: unconditionally transfer to the runtime trap handler.
    pub fn emit_trap(&mut self) {
        self.emit(MInstr::new(MOpcode::Call, vec![Operand::label("rt_trap")]));
    }

    /// `eh.push`/`eh.pop`/`eh.entry` carry no stack-unwind metadata at this
    /// stage (spec Non-goals): they lower to nothing.
    pub fn emit_eh_noop(&mut self) {}

    /// Lower a call/call.indirect instruction via `crate::call`.
    pub fn emit_call(&mut self, instr: &ILInstr) {
        let plan = call::build_plan(self, instr);
        let bytes = call::lower_call_into(self, &plan);
        self.max_outgoing_arg_bytes = self.max_outgoing_arg_bytes.max(bytes);
    }
}

/// Lower an entire IL function into Machine IR.
///
/// Returns the lowered function and the maximum outgoing-argument stack
/// area any call site in it required; frame lowering folds that into the
/// function's final `FrameInfo`.
pub fn lower_function(
    func: &ILFunction,
    target: &'static crate::isa::TargetDescription,
    rodata: &mut RoDataPool,
    options: &crate::options::CodegenOptions,
) -> (MFunction, i32) {
    let mut ctx = LowerCtx::new(&func.name, target, rodata, options.call_alignment_checks);
    ctx.mir.meta.is_vararg = func.is_vararg;

    // First pass: create every block (so forward branches can resolve) and
    // bind block parameters to fresh vregs.
    for block in &func.blocks {
        let idx = ctx.mir.add_block(MBasicBlock::new(block.label.clone()));
        let mut param_vregs = Vec::with_capacity(block.param_ids.len());
        for (&id, &kind) in block.param_ids.iter().zip(block.param_kinds.iter()) {
            let v = ctx.ensure_vreg(id, kind);
            param_vregs.push(v);
        }
        ctx.blocks.insert(block.label.clone(), BlockInfo { index: idx, param_vregs });
    }

    // The entry block's parameters are the function's formal arguments, not
    // a `PX_COPY` hand-off target like every other block's — bind each one
    // to its incoming ABI location before any of the entry block's own
    // instructions are lowered.
    bind_entry_params(&mut ctx, &func.blocks[0]);

    for block in &func.blocks {
        ctx.cur_block = ctx.blocks[&block.label].index;
        lower_block(&mut ctx, block);
    }

    (ctx.mir, ctx.max_outgoing_arg_bytes)
}

/// Bind the entry block's parameters to their incoming ABI locations: the
/// first `int_arg_order`/`float_arg_order` registers, then an incoming
/// stack slot for the rest. Mirrors the classification `call::build_plan`
/// performs for outgoing arguments, just read instead of written.
fn bind_entry_params(ctx: &mut LowerCtx, entry: &ILBlock) {
    ctx.cur_block = 0;
    let mut gpr_used = 0usize;
    let mut xmm_used = 0usize;
    let mut stack_slot = 0i32;

    for (&id, &kind) in entry.param_ids.iter().zip(entry.param_kinds.iter()) {
        let vreg = ctx.ensure_vreg(id, kind);
        let class = LowerCtx::class_for(kind);
        let dst = Operand::Reg(RegOperand::vreg(class, vreg));
        match class {
            RegClass::GPR if gpr_used < ctx.target.int_arg_order.len() => {
                let src = Operand::Reg(RegOperand::phys(ctx.target.int_arg_order[gpr_used]));
                gpr_used += 1;
                ctx.emit(MInstr::new(MOpcode::MovRR, vec![dst, src]));
            }
            RegClass::XMM if xmm_used < ctx.target.float_arg_order.len() => {
                let src = Operand::Reg(RegOperand::phys(ctx.target.float_arg_order[xmm_used]));
                xmm_used += 1;
                ctx.emit(MInstr::new(MOpcode::MovSdRR, vec![dst, src]));
            }
            RegClass::GPR => {
                let src = incoming_stack_arg(stack_slot);
                stack_slot += 1;
                ctx.emit(MInstr::new(MOpcode::MovRM, vec![dst, src]));
            }
            RegClass::XMM => {
                let src = incoming_stack_arg(stack_slot);
                stack_slot += 1;
                ctx.emit(MInstr::new(MOpcode::MovSdRM, vec![dst, src]));
            }
        }
    }
}

/// The `n`th incoming stack-passed argument, relative to the callee's
/// established `%rbp`: 8 bytes clears the saved `%rbp` itself, another 8
/// clears the return address `CALL` pushed, then 8 bytes per slot — the
/// same uniform stack-slot width `call::build_plan` reserves for outgoing
/// stack arguments on the caller side.
fn incoming_stack_arg(stack_slot: i32) -> Operand {
    let disp = 16 + stack_slot * 8;
    Operand::Mem(crate::mir::MemOperand::base_disp(RegOperand::phys(PhysReg::Rbp), disp))
}

/// Recover a `CondCode` from its stable integer encoding. Panics on an
/// out-of-range value, a contract violation the producer is responsible
/// for avoiding.
fn cond_from_i64(value: i64) -> crate::mir::CondCode {
    use crate::mir::CondCode::*;
    match value {
        0 => Eq,
        1 => Ne,
        2 => Slt,
        3 => Sle,
        4 => Sgt,
        5 => Sge,
        6 => Ugt,
        7 => Uge,
        8 => Ult,
        9 => Ule,
        10 => Unordered,
        11 => Ordered,
        other => panic!("invalid condition code encoding {}", other),
    }
}

fn lower_block(ctx: &mut LowerCtx, block: &ILBlock) {
    for instr in &block.instrs {
        if instr.opcode == "br" {
            let edge = &block.edges[0];
            ctx.emit_branch_edge(edge);
            continue;
        }
        if instr.opcode == "cbr" {
            ctx.emit_cond_branch(&instr.operands[0], &block.edges[0], &block.edges[1]);
            continue;
        }
        let rule = find_rule(&instr.opcode);
        debug_assert!(
            instr.operands.len() >= rule.min_arity as usize
                && (rule.max_arity == VARIADIC || instr.operands.len() <= rule.max_arity as usize),
            "opcode `{}` arity {} out of range [{}, {}]",
            instr.opcode,
            instr.operands.len(),
            rule.min_arity,
            rule.max_arity
        );
        (rule.emit)(ctx, instr);
    }
}
