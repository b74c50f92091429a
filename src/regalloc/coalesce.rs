//! Resolves `PX_COPY` pseudo-instructions left behind by [`super::run`] into
//! real move sequences.
//!
//! Grounded on `original_source/src/codegen/x86_64/ra/Coalescer.{hpp,cpp}`.
//! A `PX_COPY` is a parallel (simultaneous) assignment of block-parameter
//! vregs from the predecessor's values; `run` here sequentializes it into
//! an ordered list of real moves, breaking cycles with a scratch register
//! and routing memory-to-memory transfers through one since no x86 opcode
//! moves stack slot to stack slot directly.

use crate::isa::TargetDescription;
use crate::mir::{slot, MFunction, MInstr, MOpcode, MemOperand, Operand, PhysReg, RegClass, RegOperand};
use crate::regalloc::{Assignment, Location};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Loc {
    Reg(PhysReg),
    Mem(i32),
}

fn loc_of(op: &Operand) -> Loc {
    match op {
        Operand::Reg(r) => Loc::Reg(r.as_phys()),
        Operand::Mem(m) => Loc::Mem(m.disp),
        other => panic!("PX_COPY operand must be a resolved register or memory location, got {:?}", other),
    }
}

fn location_operand(class: RegClass, loc: Location) -> Operand {
    match loc {
        Location::Reg(p) => Operand::Reg(RegOperand::phys(p)),
        Location::Spill(idx) => {
            let disp = match class {
                RegClass::GPR => slot::gpr_spill_disp(idx),
                RegClass::XMM => slot::xmm_spill_disp(idx),
            };
            Operand::Mem(MemOperand::base_disp(RegOperand::phys(PhysReg::Rbp), disp))
        }
    }
}

/// Emit one location-to-location move. Memory-to-memory transfers are
/// staged through `scratch` since no x86 opcode moves stack slot to stack
/// slot directly.
fn emit_move(out: &mut Vec<MInstr>, class: RegClass, dst: Operand, src: Operand, scratch: PhysReg) {
    if dst == src {
        return;
    }
    let (load_op, store_op, rr_op) = match class {
        RegClass::GPR => (MOpcode::MovRM, MOpcode::MovMR, MOpcode::MovRR),
        RegClass::XMM => (MOpcode::MovSdRM, MOpcode::MovSdMR, MOpcode::MovSdRR),
    };
    match (&dst, &src) {
        (Operand::Mem(_), Operand::Mem(_)) => {
            let scratch_op = Operand::Reg(RegOperand::phys(scratch));
            out.push(MInstr::new(load_op, vec![scratch_op.clone(), src]));
            out.push(MInstr::new(store_op, vec![dst, scratch_op]));
        }
        (Operand::Reg(_), Operand::Reg(_)) => out.push(MInstr::new(rr_op, vec![dst, src])),
        (Operand::Reg(_), Operand::Mem(_)) => out.push(MInstr::new(load_op, vec![dst, src])),
        (Operand::Mem(_), Operand::Reg(_)) => out.push(MInstr::new(store_op, vec![dst, src])),
        _ => unreachable!("PX_COPY location operand must be a register or memory reference"),
    }
}

/// Pick a physical register of `class` not appearing as any pending move's
/// source or destination in this copy set. Safe to clobber: by the time a
/// `PX_COPY` runs, every live value the successor block needs is named as
/// one of these operands, so anything else is dead.
fn pick_scratch(target: &TargetDescription, class: RegClass, used: &[Loc]) -> PhysReg {
    let pool: &[PhysReg] = match class {
        RegClass::GPR => &target.caller_saved_gpr,
        RegClass::XMM => &target.caller_saved_xmm,
    };
    pool.iter()
        .copied()
        .find(|r| !used.contains(&Loc::Reg(*r)))
        .expect("copy set exhausted every caller-saved register of its class")
}

/// Sequentialize one `PX_COPY`'s pairs into real moves, appending them to
/// `out`.
fn resolve_one(target: &TargetDescription, class: RegClass, mut pending: Vec<(Operand, Operand)>, out: &mut Vec<MInstr>) {
    pending.retain(|(d, s)| d != s);
    if pending.is_empty() {
        return;
    }

    let used_locs: Vec<Loc> = pending.iter().flat_map(|(d, s)| [loc_of(d), loc_of(s)]).collect();

    while !pending.is_empty() {
        let ready_idx = pending.iter().position(|(d, _)| {
            let d_loc = loc_of(d);
            !pending.iter().any(|(other_d, other_s)| loc_of(other_s) == d_loc && loc_of(other_d) != d_loc)
        });

        if let Some(idx) = ready_idx {
            let (d, s) = pending.remove(idx);
            emit_move(out, class, d, s, pick_scratch(target, class, &used_locs));
            continue;
        }

        // Every remaining pair is part of a cycle. Break it by saving the
        // first pair's destination into a scratch register, then
        // redirecting anyone reading that location to the scratch copy.
        let (d0, _) = pending[0].clone();
        let d0_loc = loc_of(&d0);
        let scratch = pick_scratch(target, class, &used_locs);
        let scratch_op = Operand::Reg(RegOperand::phys(scratch));
        emit_move(out, class, scratch_op.clone(), d0.clone(), scratch);
        for (_, s) in pending.iter_mut() {
            if loc_of(s) == d0_loc {
                *s = scratch_op.clone();
            }
        }
    }
}

/// Resolve every `PX_COPY` in `func` into real moves, using `assignment`
/// (filled in by [`super::run`] across every block) to look up each
/// destination vreg's final location.
pub fn run(func: &mut MFunction, target: &TargetDescription, assignment: &Assignment) {
    for block in &mut func.blocks {
        let original = std::mem::take(&mut block.instrs);
        let mut rewritten = Vec::with_capacity(original.len());

        for instr in original {
            if instr.opcode != MOpcode::PxCopy {
                rewritten.push(instr);
                continue;
            }

            let mut by_class: std::collections::HashMap<RegClass, Vec<(Operand, Operand)>> = std::collections::HashMap::new();
            for pair in instr.operands.chunks_exact(2) {
                let (dst_raw, src) = (pair[0], pair[1]);
                let Operand::Reg(dst_reg) = dst_raw else {
                    panic!("PX_COPY destination must be a register operand");
                };
                let class = dst_reg.class;
                let vreg = dst_reg.as_vreg();
                let loc = *assignment
                    .get(&vreg)
                    .expect("PX_COPY destination vreg was never assigned a location");
                let dst = location_operand(class, loc);
                by_class.entry(class).or_default().push((dst, src));
            }

            for (class, pending) in by_class {
                resolve_one(target, class, pending, &mut rewritten);
            }
        }

        block.instrs = rewritten;
    }
}
