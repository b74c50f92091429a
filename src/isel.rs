//! Instruction selection: canonicalize Machine IR operand forms into a
//! small, legal alphabet before guarded expansion and register allocation
//! see them.
//!
//! Grounded on `original_source/src/codegen/x86_64/ISel.{hpp,cpp}`.
//! The pass is conservative: anything it doesn't recognize is left alone
//! for a later pass. Runs to a single fixed point per call — calling it
//! twice in a row is a no-op, matching the idempotence property this
//! backend's test suite checks for.

use crate::mir::{MFunction, MInstr, MOpcode, Operand, RegClass};
use log::trace;
use std::collections::HashMap;

/// Run every canonicalization in sequence over `func`, returning the total
/// number of rewrites applied (per the header's documented return type,
/// not the implementation file's drifted `void` — see `DESIGN.md`).
pub fn run(func: &mut MFunction) -> usize {
    let mut count = 0;
    count += canonicalize_arith(func);
    count += canonicalize_compare(func);
    count += ensure_setcc_movzx(func);
    count += strength_reduce_imul(func);
    count
}

/// `ADDrr`/checked-`ADDrr` with an immediate RHS becomes the `RI` form.
/// `SUBrr`/checked-`SUBrr` with an immediate RHS becomes `ADDri` with the
/// negated immediate, unless the immediate is `i64::MIN` (negating it
/// would overflow, so the instruction is left as-is).
fn canonicalize_arith(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            let rewritten = match (instr.opcode, instr.operands.get(1).copied()) {
                (MOpcode::AddRR, Some(Operand::Imm(_))) => Some(MOpcode::AddRI),
                (MOpcode::AddOvfRR, Some(Operand::Imm(_))) => Some(MOpcode::AddOvfRI),
                (MOpcode::SubRR, Some(Operand::Imm(v))) if v != i64::MIN => {
                    instr.operands[1] = Operand::Imm(-v);
                    Some(MOpcode::AddRI)
                }
                (MOpcode::SubOvfRR, Some(Operand::Imm(v))) if v != i64::MIN => {
                    instr.operands[1] = Operand::Imm(-v);
                    Some(MOpcode::AddOvfRI)
                }
                _ => None,
            };
            if let Some(new_opcode) = rewritten {
                trace!("isel: {:?} -> {:?}", instr.opcode, new_opcode);
                instr.opcode = new_opcode;
                count += 1;
            }
        }
    }
    count
}

/// `CMPrr` with an immediate RHS becomes `CMPri`; a `TESTrr` carrying an
/// immediate operand (rather than the usual register-against-itself form)
/// becomes `CMPri reg, 0`.
fn canonicalize_compare(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            match instr.opcode {
                MOpcode::CmpRR => {
                    if matches!(instr.operands.get(1), Some(Operand::Imm(_))) {
                        trace!("isel: CmpRR -> CmpRI");
                        instr.opcode = MOpcode::CmpRI;
                        count += 1;
                    }
                }
                MOpcode::TestRR => {
                    if matches!(instr.operands.get(1), Some(Operand::Imm(_))) {
                        trace!("isel: TestRR (malformed immediate form) -> CmpRI reg, 0");
                        let reg = instr.operands[0];
                        instr.opcode = MOpcode::CmpRI;
                        instr.operands = smallvec::smallvec![reg, Operand::Imm(0)];
                        count += 1;
                    }
                }
                _ => {}
            }
        }
    }
    count
}

/// Every `SETcc` must be immediately followed by a `MOVZX` widening its
/// 8-bit result into the full register. Inserts the missing widening
/// unless the next instruction already is one, on the same register.
fn ensure_setcc_movzx(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        let mut i = 0;
        while i < block.instrs.len() {
            let is_setcc = block.instrs[i].opcode == MOpcode::SetCC;
            if is_setcc {
                let dst = block.instrs[i].operands[0];
                let already_widened = block
                    .instrs
                    .get(i + 1)
                    .map(|next| next.opcode == MOpcode::MovzxRR32 && next.operands.get(1) == Some(&dst))
                    .unwrap_or(false);
                if !already_widened {
                    trace!("isel: inserting missing MOVZX after SETcc");
                    let widen = MInstr::new(MOpcode::MovzxRR32, vec![dst, dst]);
                    block.instrs.insert(i + 1, widen);
                    count += 1;
                    i += 1;
                }
            }
            i += 1;
        }
    }
    count
}

/// An unchecked `IMULrr` whose other operand is a single-use vreg holding
/// the constant 3, 5, or 9 is rewritten to `LEA dst, [dst + dst*2|4|8]`,
/// and the constant's `MOVri` is erased. Overflow-checked multiplies
/// (`ImulOvfRR`) are never touched, matching spec behavior — and, in this
/// backend, checked multiplies are the only kind `crate::lowering`
/// produces, so this rewrite is dormant until a future unchecked-multiply
/// opcode is lowered to.
fn strength_reduce_imul(func: &mut MFunction) -> usize {
    let mut count = 0;
    for block in &mut func.blocks {
        let mention_counts = count_vreg_mentions(&block.instrs);
        let mut const_defs: HashMap<u32, (usize, i64)> = HashMap::new();
        let mut to_erase = Vec::new();
        let mut rewrites = Vec::new();

        for (idx, instr) in block.instrs.iter().enumerate() {
            if instr.opcode == MOpcode::MovRI {
                if let (Operand::Reg(r), Operand::Imm(v)) = (instr.operands[0], instr.operands[1]) {
                    if !r.is_physical && r.class == RegClass::GPR {
                        const_defs.insert(r.id, (idx, v));
                    }
                }
            }
            if instr.opcode == MOpcode::ImulRR {
                if let Operand::Reg(rhs) = instr.operands[1] {
                    if !rhs.is_physical {
                        if let Some(&(def_idx, value)) = const_defs.get(&rhs.id) {
                            let single_use = mention_counts.get(&rhs.id).copied().unwrap_or(0) == 1;
                            if single_use && matches!(value, 3 | 5 | 9) {
                                rewrites.push((idx, instr.operands[0], value));
                                to_erase.push(def_idx);
                            }
                        }
                    }
                }
            }
        }

        for (idx, dst, value) in rewrites {
            let scale = (value - 1) as u8;
            let mem = crate::mir::MemOperand::with_index(
                match dst {
                    Operand::Reg(r) => r,
                    _ => unreachable!(),
                },
                match dst {
                    Operand::Reg(r) => r,
                    _ => unreachable!(),
                },
                scale,
                0,
            );
            trace!("isel: strength-reducing IMUL by {} into LEA", value);
            block.instrs[idx] = MInstr::new(MOpcode::Lea, vec![dst, Operand::Mem(mem)]);
            count += 1;
        }
        to_erase.sort_unstable();
        to_erase.dedup();
        for idx in to_erase.into_iter().rev() {
            block.instrs.remove(idx);
        }
    }
    count
}

fn count_vreg_mentions(instrs: &[MInstr]) -> HashMap<u32, u32> {
    let mut counts = HashMap::new();
    for instr in instrs {
        for operand in &instr.operands {
            if let Operand::Reg(r) = operand {
                if !r.is_physical {
                    *counts.entry(r.id).or_insert(0) += 1;
                }
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{MBasicBlock, RegOperand, VReg};

    fn vreg_operand(n: u32) -> Operand {
        Operand::Reg(RegOperand::vreg(RegClass::GPR, VReg::from_u32(n)))
    }

    #[test]
    fn add_with_immediate_rhs_becomes_addri() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("f");
        b.instrs.push(MInstr::new(MOpcode::AddOvfRR, vec![vreg_operand(0), Operand::Imm(4)]));
        f.add_block(b);
        let n = run(&mut f);
        assert_eq!(n, 1);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::AddOvfRI);
    }

    #[test]
    fn sub_with_int_min_is_left_alone() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("f");
        b.instrs.push(MInstr::new(MOpcode::SubOvfRR, vec![vreg_operand(0), Operand::Imm(i64::MIN)]));
        f.add_block(b);
        run(&mut f);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::SubOvfRR);
        assert_eq!(f.blocks[0].instrs[0].operands[1], Operand::Imm(i64::MIN));
    }

    #[test]
    fn missing_movzx_after_setcc_is_inserted() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("f");
        b.instrs.push(MInstr::new(MOpcode::SetCC, vec![vreg_operand(0), Operand::Imm(0)]));
        b.instrs.push(MInstr::new(MOpcode::Ret, vec![]));
        f.add_block(b);
        let n = run(&mut f);
        assert_eq!(n, 1);
        assert_eq!(f.blocks[0].instrs[1].opcode, MOpcode::MovzxRR32);
    }

    #[test]
    fn running_twice_is_idempotent() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("f");
        b.instrs.push(MInstr::new(MOpcode::AddOvfRR, vec![vreg_operand(0), Operand::Imm(4)]));
        b.instrs.push(MInstr::new(MOpcode::SetCC, vec![vreg_operand(1), Operand::Imm(0)]));
        f.add_block(b);
        run(&mut f);
        let second_pass_count = run(&mut f);
        assert_eq!(second_pass_count, 0);
    }
}
