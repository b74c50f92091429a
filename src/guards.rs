//! Guarded expansion: turns the division/remainder and overflow-checked
//! arithmetic pseudo-opcodes lowering produced into real hardware
//! instruction sequences plus a trap on the failure path.
//!
//! Grounded on `original_source/src/codegen/x86_64/LowerDiv.cpp` (division
//! and remainder) and `LowerOvf.cpp` (overflow-checked arithmetic). Runs
//! after instruction selection and before register allocation, so the
//! allocator only ever sees real `CQO`/`IDIV`/`DIV`/`JCC` sequences, never
//! the pseudo-opcodes — `RAX`/`RDX` are reserved out of the allocator's GPR
//! pool (`regalloc::is_reserved_gpr`) precisely because this pass addresses
//! them as bare physical operands that the allocator never sees as vregs.

use crate::mir::{CondCode, MBasicBlock, MFunction, MInstr, MOpcode, Operand, PhysReg, RegOperand};

/// Expand every division/remainder and overflow-checked pseudo in `func`.
/// Both trap blocks (`.Ltrap_div0`, `.Ltrap_ovf_<fn>`) are created on
/// demand, at most once each, and appended once expansion finishes.
pub fn run(func: &mut MFunction) {
    let mut div0_trap: Option<String> = None;
    let mut ovf_trap: Option<String> = None;

    let mut block_idx = 0;
    while block_idx < func.blocks.len() {
        let mut instr_idx = 0;
        let mut split = false;
        while instr_idx < func.blocks[block_idx].instrs.len() {
            let opcode = func.blocks[block_idx].instrs[instr_idx].opcode;
            match opcode {
                MOpcode::DivS64RR | MOpcode::RemS64RR | MOpcode::DivU64RR | MOpcode::RemU64RR => {
                    let label = div0_trap.get_or_insert_with(|| func.make_local_label("trap_div0")).clone();
                    expand_division(func, block_idx, instr_idx, opcode, &label);
                    split = true;
                    break;
                }
                MOpcode::AddOvfRR | MOpcode::AddOvfRI | MOpcode::SubOvfRR | MOpcode::ImulOvfRR => {
                    let label = ovf_trap.get_or_insert_with(|| func.make_local_label("trap_ovf")).clone();
                    expand_overflow(func, block_idx, instr_idx, opcode, &label);
                    instr_idx += 2;
                }
                _ => instr_idx += 1,
            }
        }
        if !split {
            block_idx += 1;
        }
        // When a division was expanded, the continuation block was
        // appended at block_idx + 1 (see expand_division); resume
        // scanning from there rather than re-walking the truncated block.
        if split {
            block_idx += 1;
        }
    }

    if let Some(label) = div0_trap {
        let mut block = MBasicBlock::new(label);
        block.instrs.push(MInstr::new(MOpcode::Call, vec![Operand::label("rt_trap_div0")]));
        func.add_block(block);
    }
    if let Some(label) = ovf_trap {
        let mut block = MBasicBlock::new(label);
        block.instrs.push(MInstr::new(MOpcode::Call, vec![Operand::label("rt_trap")]));
        func.add_block(block);
    }
}

fn expand_division(func: &mut MFunction, block_idx: usize, instr_idx: usize, opcode: MOpcode, trap_label: &str) {
    let signed = matches!(opcode, MOpcode::DivS64RR | MOpcode::RemS64RR);
    let is_rem = matches!(opcode, MOpcode::RemS64RR | MOpcode::RemU64RR);

    let pseudo = func.blocks[block_idx].instrs[instr_idx].clone();
    let dst = pseudo.operands[0];
    let dividend = pseudo.operands[1];
    let divisor = pseudo.operands[2];

    let rax = Operand::Reg(RegOperand::phys(PhysReg::Rax));
    let rdx = Operand::Reg(RegOperand::phys(PhysReg::Rdx));
    let continuation = func.make_local_label("after");

    let mut expansion = Vec::with_capacity(8);
    // IDIV/DIV (and the TEST that guards them) only accept a register or
    // memory operand; a constant divisor has to be materialized first.
    let divisor = if let Operand::Imm(_) = divisor {
        let scratch = func.new_vreg(crate::mir::RegClass::GPR);
        let scratch_op = Operand::Reg(RegOperand::vreg(crate::mir::RegClass::GPR, scratch));
        expansion.push(MInstr::new(MOpcode::MovRI, vec![scratch_op.clone(), divisor]));
        scratch_op
    } else {
        divisor
    };
    expansion.push(MInstr::new(MOpcode::TestRR, vec![divisor, divisor]));
    expansion.push(MInstr::new(
        MOpcode::Jcc,
        vec![Operand::Imm(CondCode::Eq as i64), Operand::label(trap_label.to_string())],
    ));
    let mov_dividend_opcode = if matches!(dividend, Operand::Imm(_)) { MOpcode::MovRI } else { MOpcode::MovRR };
    expansion.push(MInstr::new(mov_dividend_opcode, vec![rax.clone(), dividend]));
    if signed {
        expansion.push(MInstr::nullary(MOpcode::Cqo));
        expansion.push(MInstr::new(MOpcode::IDivRM, vec![divisor]));
    } else {
        expansion.push(MInstr::new(MOpcode::XorRR, vec![rdx.clone(), rdx.clone()]));
        expansion.push(MInstr::new(MOpcode::DivRM, vec![divisor]));
    }
    let result_reg = if is_rem { rdx } else { rax };
    expansion.push(MInstr::new(MOpcode::MovRR, vec![dst, result_reg]));
    expansion.push(MInstr::new(MOpcode::Jmp, vec![Operand::label(continuation.clone())]));

    let remainder: Vec<MInstr> = func.blocks[block_idx].instrs.split_off(instr_idx + 1);
    func.blocks[block_idx].instrs.truncate(instr_idx);
    func.blocks[block_idx].instrs.extend(expansion);

    let mut cont_block = MBasicBlock::new(continuation);
    cont_block.instrs = remainder;
    func.blocks.insert(block_idx + 1, cont_block);
}

fn expand_overflow(func: &mut MFunction, block_idx: usize, instr_idx: usize, opcode: MOpcode, trap_label: &str) {
    let real_opcode = match opcode {
        MOpcode::AddOvfRR => MOpcode::AddRR,
        MOpcode::AddOvfRI => MOpcode::AddRI,
        MOpcode::SubOvfRR => MOpcode::SubRR,
        MOpcode::ImulOvfRR => MOpcode::ImulRR,
        other => unreachable!("expand_overflow called with non-overflow opcode {:?}", other),
    };
    let operands = func.blocks[block_idx].instrs[instr_idx].operands.clone();
    func.blocks[block_idx].instrs[instr_idx] = MInstr::new(real_opcode, operands.into_vec());
    let jo = MInstr::new(MOpcode::Jo, vec![Operand::label(trap_label.to_string())]);
    func.blocks[block_idx].instrs.insert(instr_idx + 1, jo);
}
