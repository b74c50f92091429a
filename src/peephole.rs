//! Peephole rewrites applied after frame lowering, immediately before
//! assembly emission: small, flags-safe substitutions that shrink encoded
//! size without changing observable behavior.
//!
//! Grounded on `original_source/src/codegen/x86_64/Peephole.{hpp,cpp}`.
//! Each rewrite here is local and conservative — like `isel::run`, anything
//! not recognized is left alone, and running the pass twice in a row is a
//! no-op.

use crate::mir::{CondCode, MFunction, MInstr, MOpcode, Operand};
use log::trace;

/// Run every rewrite over `func`, returning the number of instructions
/// changed (same return-type convention as `isel::run`).
pub fn run(func: &mut MFunction) -> usize {
    let mut count = 0;
    count += zero_mov_to_xor(func);
    count += zero_cmp_to_test(func);
    count
}

/// `MOVri dst, 0` becomes `XOR32 dst, dst`: two bytes shorter encoded, and
/// breaks a false dependency on `dst`'s previous value on modern cores.
/// Flags are clobbered either way (`MOVri` doesn't touch them, `XOR32`
/// does), so this only fires where nothing between the `MOVri` and the
/// next flag-setting instruction reads flags set by it — which is
/// trivially true here since `MOVri` never sets flags, so nothing could
/// have been relying on flags surviving past it.
fn zero_mov_to_xor(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            if instr.opcode == MOpcode::MovRI && matches!(instr.operands.get(1), Some(Operand::Imm(0))) {
                trace!("peephole: MovRI dst, 0 -> Xor32RR dst, dst");
                let dst = instr.operands[0];
                instr.opcode = MOpcode::Xor32RR;
                instr.operands.clear();
                instr.operands.push(dst);
                instr.operands.push(dst);
                count += 1;
            }
        }
    }
    count
}

/// `CMPri reg, 0` becomes `TESTrr reg, reg`, one byte shorter and avoiding
/// an immediate encoding. Only applied when every consumer of the flags
/// this instruction sets, up to the next flag-clobbering instruction in
/// the block, is a `Jcc`/`SETcc`/`CMOVcc` using `Eq` or `Ne` — the only
/// conditions guaranteed identical between a subtract-based and an
/// AND-based zero test (`CMP x,0` and `TEST x,x` agree on ZF/SF but a
/// consumer reading `CF` for an unsigned comparison would not be safe
/// here, so those are left alone).
fn zero_cmp_to_test(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        let len = block.instrs.len();
        let mut i = 0;
        while i < len {
            let is_candidate = block.instrs[i].opcode == MOpcode::CmpRI
                && matches!(block.instrs[i].operands.get(1), Some(Operand::Imm(0)));
            if is_candidate && flags_consumers_are_eq_ne_safe(&block.instrs, i + 1) {
                trace!("peephole: CmpRI reg, 0 -> TestRR reg, reg");
                let reg = block.instrs[i].operands[0];
                let instr = &mut block.instrs[i];
                instr.opcode = MOpcode::TestRR;
                instr.operands.clear();
                instr.operands.push(reg);
                instr.operands.push(reg);
                count += 1;
            }
            i += 1;
        }
    }
    count
}

fn sets_flags(opcode: MOpcode) -> bool {
    matches!(
        opcode,
        MOpcode::AddRR
            | MOpcode::AddRI
            | MOpcode::AndRR
            | MOpcode::AndRI
            | MOpcode::OrRR
            | MOpcode::OrRI
            | MOpcode::XorRR
            | MOpcode::XorRI
            | MOpcode::Xor32RR
            | MOpcode::SubRR
            | MOpcode::CmpRR
            | MOpcode::CmpRI
            | MOpcode::TestRR
            | MOpcode::ShlRI
            | MOpcode::ShlRC
            | MOpcode::ShrRI
            | MOpcode::ShrRC
            | MOpcode::SarRI
            | MOpcode::SarRC
            | MOpcode::ImulRR
            | MOpcode::AddOvfRR
            | MOpcode::AddOvfRI
            | MOpcode::SubOvfRR
            | MOpcode::ImulOvfRR
            | MOpcode::Ucomis
    )
}

fn reads_cond_code(instr: &MInstr) -> Option<CondCode> {
    match instr.opcode {
        MOpcode::Jcc | MOpcode::SetCC | MOpcode::CmovNeRR => match instr.operands.first() {
            Some(Operand::Imm(v)) => Some(decode_cond(*v)),
            _ => None,
        },
        _ => None,
    }
}

fn decode_cond(v: i64) -> CondCode {
    match v {
        0 => CondCode::Eq,
        1 => CondCode::Ne,
        2 => CondCode::Slt,
        3 => CondCode::Sle,
        4 => CondCode::Sgt,
        5 => CondCode::Sge,
        6 => CondCode::Ugt,
        7 => CondCode::Uge,
        8 => CondCode::Ult,
        9 => CondCode::Ule,
        10 => CondCode::Unordered,
        _ => CondCode::Ordered,
    }
}

/// Scans forward from `start` until the next flag-clobbering instruction,
/// requiring every condition-code consumer seen along the way to read only
/// `Eq`/`Ne`.
fn flags_consumers_are_eq_ne_safe(instrs: &[MInstr], start: usize) -> bool {
    for instr in &instrs[start..] {
        if let Some(cond) = reads_cond_code(instr) {
            if !matches!(cond, CondCode::Eq | CondCode::Ne) {
                return false;
            }
        }
        if sets_flags(instr.opcode) {
            break;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{MBasicBlock, RegOperand, VReg};

    fn vreg_op(id: u32) -> Operand {
        Operand::Reg(RegOperand::vreg(crate::mir::RegClass::GPR, VReg::from_u32(id)))
    }

    #[test]
    fn zero_mov_becomes_xor() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::new(MOpcode::MovRI, vec![vreg_op(0), Operand::Imm(0)]));
        f.add_block(b);
        assert_eq!(run(&mut f), 1);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::Xor32RR);
    }

    #[test]
    fn nonzero_mov_is_untouched() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::new(MOpcode::MovRI, vec![vreg_op(0), Operand::Imm(7)]));
        f.add_block(b);
        assert_eq!(run(&mut f), 0);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::MovRI);
    }

    #[test]
    fn zero_cmp_before_eq_branch_becomes_test() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::new(MOpcode::CmpRI, vec![vreg_op(0), Operand::Imm(0)]));
        b.instrs.push(MInstr::new(
            MOpcode::Jcc,
            vec![Operand::Imm(CondCode::Eq as i64), Operand::label("target")],
        ));
        f.add_block(b);
        assert_eq!(run(&mut f), 1);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::TestRR);
    }

    #[test]
    fn zero_cmp_before_unsigned_branch_is_left_alone() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::new(MOpcode::CmpRI, vec![vreg_op(0), Operand::Imm(0)]));
        b.instrs.push(MInstr::new(
            MOpcode::Jcc,
            vec![Operand::Imm(CondCode::Ult as i64), Operand::label("target")],
        ));
        f.add_block(b);
        assert_eq!(run(&mut f), 0);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::CmpRI);
    }
}
