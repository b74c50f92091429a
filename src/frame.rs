//! Frame lowering: resolves the placeholder `%rbp` displacements register
//! allocation and `alloca` lowering left behind, then prepends a prologue
//! and inserts an epilogue before every `RET`.
//!
//! Grounded on `original_source/src/codegen/x86_64/FrameLowering.{hpp,cpp}`.

use crate::isa::TargetDescription;
use crate::mir::{slot, MBasicBlock, MFunction, MInstr, MOpcode, MemOperand, Operand, PhysReg, RegClass, RegOperand};
use crate::regalloc::SpillCounts;

/// One page, the stride stack probing walks when a frame is large enough to
/// skip a guard page.
const PAGE_SIZE: i32 = 4096;

/// Per-function frame layout, computed once spill counts and alloca sizes
/// are known.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Total stack space reserved below the saved `%rbp`, rounded to 16
    /// bytes. Zero for a leaf function with no spills, allocas, or
    /// callee-saved registers.
    pub frame_size: i32,
    pub gpr_spill_bytes: i32,
    pub xmm_spill_bytes: i32,
    pub alloca_bytes: i32,
    /// Largest outgoing-argument stack area any call site in this function
    /// required. Recorded for data-model fidelity; call lowering reserves
    /// this space dynamically around each call site rather than as a
    /// static slot here (see `DESIGN.md`), so it does not contribute to
    /// `frame_size`.
    pub max_outgoing_arg_bytes: i32,
    /// Callee-saved registers actually referenced, in first-touched order —
    /// also the order they're saved in the prologue and restored (reversed)
    /// in the epilogue.
    pub callee_saved: Vec<PhysReg>,
    /// True when the prologue/epilogue were elided entirely (zero frame, no
    /// calls, no callee-saved registers touched).
    pub is_leaf: bool,
}

fn round_up_16(n: i32) -> i32 {
    (n + 15) & !15
}

fn collect_callee_saved(func: &MFunction, target: &TargetDescription) -> Vec<PhysReg> {
    let mut seen = Vec::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in &instr.operands {
                visit_phys_regs(operand, |r| {
                    if (target.callee_saved_gpr.contains(&r) || target.callee_saved_xmm.contains(&r)) && !seen.contains(&r) {
                        seen.push(r);
                    }
                });
            }
        }
    }
    seen
}

fn visit_phys_regs(operand: &Operand, mut f: impl FnMut(PhysReg)) {
    match operand {
        Operand::Reg(r) if r.is_physical => f(r.as_phys()),
        Operand::Mem(m) => {
            if m.base.is_physical {
                f(m.base.as_phys());
            }
            if let Some(idx) = m.index {
                if idx.is_physical {
                    f(idx.as_phys());
                }
            }
        }
        _ => {}
    }
}

fn references_call(func: &MFunction) -> bool {
    func.blocks.iter().any(|b| b.instrs.iter().any(|i| i.opcode == MOpcode::Call))
}

/// True when `func` reads an incoming stack-passed argument (a positive
/// `%rbp` displacement past the saved return address and caller `%rbp`,
/// emitted by `lowering::bind_entry_params` for parameters beyond the
/// register-argument capacity). A function like this can never be treated
/// as leaf even with a zero frame: without the prologue, `%rbp` still holds
/// the caller's frame pointer and the displacement would address the wrong
/// stack.
fn references_incoming_stack_arg(func: &MFunction) -> bool {
    func.blocks.iter().any(|b| {
        b.instrs.iter().any(|i| {
            i.operands.iter().any(|op| match op {
                Operand::Mem(m) => m.base.is_physical && m.base.as_phys() == PhysReg::Rbp && m.disp > 0,
                _ => false,
            })
        })
    })
}

fn resolve_disp(disp: i32, gpr_base: i32, xmm_base: i32, alloca_base: i32, alloca_ends: &[i32]) -> i32 {
    match slot::decode(disp) {
        None => disp,
        Some(slot::SlotKind::GprSpill(idx)) => -(gpr_base + 8 * (idx as i32 + 1)),
        Some(slot::SlotKind::XmmSpill(idx)) => -(xmm_base + 8 * (idx as i32 + 1)),
        Some(slot::SlotKind::Alloca(idx)) => -(alloca_base + alloca_ends[idx as usize]),
    }
}

/// Resolve every placeholder spill/alloca displacement in `func` and splice
/// in the prologue/epilogue. `spills` comes from register allocation;
/// `max_outgoing_arg_bytes` from lowering (see `lowering::lower_function`).
pub fn run(func: &mut MFunction, target: &TargetDescription, spills: SpillCounts, max_outgoing_arg_bytes: i32) -> FrameInfo {
    let callee_saved = collect_callee_saved(func, target);
    let callee_bytes = callee_saved.len() as i32 * 8;
    let gpr_bytes = spills.gpr as i32 * 8;
    let xmm_bytes = spills.xmm as i32 * 8;

    let mut alloca_ends = Vec::with_capacity(func.alloca_sizes.len());
    let mut cursor = 0i32;
    for &size in &func.alloca_sizes {
        cursor += (size.max(0) + 7) & !7;
        alloca_ends.push(cursor);
    }
    let alloca_bytes = cursor;

    let gpr_base = callee_bytes;
    let xmm_base = callee_bytes + gpr_bytes;
    let alloca_base = callee_bytes + gpr_bytes + xmm_bytes;
    let frame_size = round_up_16(callee_bytes + gpr_bytes + xmm_bytes + alloca_bytes);

    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for operand in &mut instr.operands {
                if let Operand::Mem(m) = operand {
                    m.disp = resolve_disp(m.disp, gpr_base, xmm_base, alloca_base, &alloca_ends);
                }
            }
        }
    }

    let is_leaf =
        frame_size == 0 && callee_saved.is_empty() && !references_call(func) && !references_incoming_stack_arg(func);

    if !is_leaf {
        emit_prologue(func, frame_size, &callee_saved);
        emit_epilogues(func, frame_size, &callee_saved);
    }

    FrameInfo {
        frame_size,
        gpr_spill_bytes: gpr_bytes,
        xmm_spill_bytes: xmm_bytes,
        alloca_bytes,
        max_outgoing_arg_bytes,
        callee_saved,
        is_leaf,
    }
}

fn rbp_mem(disp: i32) -> Operand {
    Operand::Mem(MemOperand::base_disp(RegOperand::phys(PhysReg::Rbp), disp))
}

fn rsp_mem(disp: i32) -> Operand {
    Operand::Mem(MemOperand::base_disp(RegOperand::phys(PhysReg::Rsp), disp))
}

fn reg(r: PhysReg) -> Operand {
    Operand::Reg(RegOperand::phys(r))
}

fn callee_save_disp(index: usize) -> i32 {
    -8 * (index as i32 + 1)
}

fn emit_prologue(func: &mut MFunction, frame_size: i32, callee_saved: &[PhysReg]) {
    let mut prologue = Vec::new();
    prologue.push(MInstr::new(MOpcode::AddRI, vec![reg(PhysReg::Rsp), Operand::Imm(-8)]));
    prologue.push(MInstr::new(MOpcode::MovMR, vec![rsp_mem(0), reg(PhysReg::Rbp)]));
    prologue.push(MInstr::new(MOpcode::MovRR, vec![reg(PhysReg::Rbp), reg(PhysReg::Rsp)]));

    if frame_size > 0 {
        if frame_size > PAGE_SIZE {
            let mut remaining = frame_size;
            while remaining >= PAGE_SIZE {
                prologue.push(MInstr::new(MOpcode::AddRI, vec![reg(PhysReg::Rsp), Operand::Imm(-(PAGE_SIZE as i64))]));
                prologue.push(MInstr::new(MOpcode::MovRM, vec![reg(PhysReg::Rax), rsp_mem(0)]));
                remaining -= PAGE_SIZE;
            }
            if remaining > 0 {
                prologue.push(MInstr::new(MOpcode::AddRI, vec![reg(PhysReg::Rsp), Operand::Imm(-(remaining as i64))]));
            }
        } else {
            prologue.push(MInstr::new(MOpcode::AddRI, vec![reg(PhysReg::Rsp), Operand::Imm(-(frame_size as i64))]));
        }
    }

    for (i, &saved) in callee_saved.iter().enumerate() {
        prologue.push(MInstr::new(MOpcode::MovMR, vec![rbp_mem(callee_save_disp(i)), reg(saved)]));
    }

    let entry = &mut func.blocks[0];
    let rest = std::mem::take(&mut entry.instrs);
    entry.instrs = prologue;
    entry.instrs.extend(rest);
}

fn emit_epilogues(func: &mut MFunction, frame_size: i32, callee_saved: &[PhysReg]) {
    for block_idx in 0..func.blocks.len() {
        let mut i = 0;
        while i < func.blocks[block_idx].instrs.len() {
            if func.blocks[block_idx].instrs[i].opcode == MOpcode::Ret {
                let mut epilogue = Vec::new();
                for (k, &saved) in callee_saved.iter().enumerate().rev() {
                    epilogue.push(MInstr::new(MOpcode::MovRM, vec![reg(saved), rbp_mem(callee_save_disp(k))]));
                }
                epilogue.push(MInstr::new(MOpcode::MovRR, vec![reg(PhysReg::Rsp), reg(PhysReg::Rbp)]));
                epilogue.push(MInstr::new(MOpcode::MovRM, vec![reg(PhysReg::Rbp), rsp_mem(0)]));
                epilogue.push(MInstr::new(MOpcode::AddRI, vec![reg(PhysReg::Rsp), Operand::Imm(8)]));

                let block = &mut func.blocks[block_idx];
                let n = epilogue.len();
                for (offset, instr) in epilogue.into_iter().enumerate() {
                    block.instrs.insert(i + offset, instr);
                }
                i += n + 1;
                let _ = frame_size;
                continue;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::sysv_target;
    use crate::mir::RegClass;

    #[test]
    fn leaf_function_gets_no_prologue() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::nullary(MOpcode::Ret));
        f.add_block(b);

        let info = run(&mut f, sysv_target(), SpillCounts::default(), 0);
        assert!(info.is_leaf);
        assert_eq!(f.blocks[0].instrs.len(), 1);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::Ret);
    }

    #[test]
    fn spills_get_a_prologue_and_matching_epilogue() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("entry");
        b.instrs.push(MInstr::new(
            MOpcode::MovMR,
            vec![
                Operand::Mem(MemOperand::base_disp(RegOperand::phys(PhysReg::Rbp), slot::gpr_spill_disp(0))),
                Operand::Reg(RegOperand::phys(PhysReg::Rax)),
            ],
        ));
        b.instrs.push(MInstr::nullary(MOpcode::Ret));
        f.add_block(b);

        let mut spills = SpillCounts::default();
        spills.gpr = 1;
        let info = run(&mut f, sysv_target(), spills, 0);

        assert_eq!(info.frame_size, 16);
        assert!(!info.is_leaf);
        assert_eq!(f.blocks[0].instrs[0].opcode, MOpcode::AddRI);
        assert_eq!(f.blocks[0].instrs.last().unwrap().opcode, MOpcode::AddRI);

        for instr in &f.blocks[0].instrs {
            for operand in &instr.operands {
                if let Operand::Mem(m) = operand {
                    assert!(slot::decode(m.disp).is_none(), "placeholder displacement survived frame lowering");
                }
            }
        }
        let _ = RegClass::GPR;
    }
}
