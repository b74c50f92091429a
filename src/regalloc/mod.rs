//! Linear-scan register allocation: single-function, block-local, with
//! on-demand spilling.
//!
//! Grounded on `original_source/src/codegen/x86_64/RegAllocLinear.{hpp,cpp}`
//! and `ra/Allocator.{hpp,cpp}`. The allocator's objective is correctness
//! and predictability, not optimality — register pools and spill-victim
//! selection are reset at every block boundary rather than tracked across
//! the whole function, which is sound here because every value this
//! backend's lowering produces is block-local: the only mechanism for a
//! value to cross a block boundary is a `PX_COPY` naming the *destination*
//! block's parameter vreg, which belongs to that block's own scope and is
//! resolved separately by [`coalesce`].
//!
//! `RAX`/`RDX` never enter the free pool at all, the same way
//! `ra/Allocator.cpp`'s `isReservedGPR` (used by `buildPools()` to strip
//! `RSP`/`RBP`) keeps fixed-register pseudos out of it: guarded division
//! (`crate::guards::expand_division`) addresses both directly, before this
//! pass ever runs, and a vreg resident in either would be silently
//! clobbered by `CQO`/`IDIV`/`DIV`'s implicit reads and writes.

pub mod coalesce;

use crate::isa::TargetDescription;
use crate::mir::{slot, MFunction, MInstr, MOpcode, Operand, PhysReg, RegClass, RegOperand, VReg};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Where a virtual register ended up once allocation finished with it:
/// pinned to a physical register for its whole (block-local) lifetime, or
/// evicted to a spill slot, identified by a class-relative index that
/// `crate::mir::slot` turns into a placeholder `%rbp` displacement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Location {
    Reg(PhysReg),
    Spill(u32),
}

/// Every virtual register's final location, kept around so
/// [`coalesce::run`] can resolve a `PX_COPY` pair that names a successor
/// block's parameter vreg before that block itself has been visited by the
/// main per-block sweep below.
pub type Assignment = HashMap<VReg, Location>;

/// Spill-slot counts per class, consumed by frame lowering to size the GPR
/// and XMM spill areas.
#[derive(Debug, Default, Copy, Clone)]
pub struct SpillCounts {
    pub gpr: u32,
    pub xmm: u32,
}

/// How an operand position participates in an instruction's data flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Role {
    Use,
    Def,
    UseDef,
}

/// Monotonic, whole-function instruction numbering plus the half-open
/// `[start, end)` interval each virtual register's occurrences span.
/// Consulted only for the sanity checks in this module's tests: the
/// block-local driver below doesn't need interval math to decide eviction
/// order (see the module doc comment), but the live ranges are still worth
/// computing plainly rather than threading ad hoc liveness through the
/// allocator, and `spec.md`'s testable properties describe this analysis
/// as a distinct step.
pub fn compute_live_intervals(func: &MFunction) -> HashMap<VReg, (u32, u32)> {
    let mut intervals: HashMap<VReg, (u32, u32)> = HashMap::new();
    let mut index: u32 = 0;
    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in &instr.operands {
                visit_operand_vregs(operand, |v| {
                    intervals
                        .entry(v)
                        .and_modify(|(_, end)| *end = index + 1)
                        .or_insert((index, index + 1));
                });
            }
            index += 1;
        }
    }
    intervals
}

fn visit_operand_vregs(operand: &Operand, mut f: impl FnMut(VReg)) {
    match operand {
        Operand::Reg(r) if !r.is_physical => f(r.as_vreg()),
        Operand::Mem(m) => {
            if !m.base.is_physical {
                f(m.base.as_vreg());
            }
            if let Some(idx) = m.index {
                if !idx.is_physical {
                    f(idx.as_vreg());
                }
            }
        }
        _ => {}
    }
}

/// Per-position use/def roles for every opcode that can still carry a
/// virtual-register operand when this pass runs. Guarded expansion always
/// rewrites the division and overflow-checked pseudos before allocation
/// sees them; their entries here are defensive rather than exercised.
fn classify_roles(opcode: MOpcode) -> &'static [Role] {
    use MOpcode::*;
    use Role::*;
    match opcode {
        MovRR | MovRM | Lea | MovzxRR32 | CvtSi2Sd | CvtTSd2Si | MovQrx | MovSdRR | MovSdRM | MovUpsRM => {
            &[Def, Use]
        }
        MovMR | MovSdMR | MovUpsMR | CmpRR | TestRR | Ucomis => &[Use, Use],
        MovRI => &[Def],
        CmovNeRR => &[UseDef, Use],
        AddRR | AndRR | OrRR | XorRR | SubRR | ImulRR | FAdd | FSub | FMul | FDiv => &[UseDef, Use],
        AddRI | AndRI | OrRI | XorRI | ShlRI | ShrRI | SarRI => &[UseDef],
        Xor32RR => &[Def, Use],
        ShlRC | ShrRC | SarRC => &[UseDef, Use],
        IDivRM | DivRM | CmpRI => &[Use],
        SetCC => &[Def],
        Call => &[Use],
        // Pseudo-opcodes guarded expansion removes before this pass runs.
        DivS64RR | RemS64RR | DivU64RR | RemU64RR => &[Def, Use, Use],
        AddOvfRR | SubOvfRR | ImulOvfRR => &[UseDef, Use],
        AddOvfRI => &[UseDef],
        // Nullary, label-only, or carries no register operand.
        Cqo | Jmp | Jcc | Jo | Label | Ud2 | Ret => &[],
        PxCopy => &[],
    }
}

/// `RAX`/`RDX` are reserved from the GPR pool everywhere, not just around
/// division: `guards::expand_division` addresses them as bare physical
/// operands, invisible to this allocator's vreg-only bookkeeping, so a vreg
/// handed either one could be clobbered the moment a guarded division runs
/// anywhere later in the same block. `RSP`/`RBP` never appear in
/// `caller_saved_gpr`/`callee_saved_gpr` to begin with, so they need no
/// equivalent filter here.
fn is_reserved_gpr(reg: PhysReg) -> bool {
    matches!(reg, PhysReg::Rax | PhysReg::Rdx)
}

fn build_free_pool(target: &TargetDescription, class: RegClass) -> VecDeque<PhysReg> {
    let (caller, callee) = match class {
        RegClass::GPR => (&target.caller_saved_gpr, &target.callee_saved_gpr),
        RegClass::XMM => (&target.caller_saved_xmm, &target.callee_saved_xmm),
    };
    caller.iter().chain(callee.iter()).copied().filter(|r| !is_reserved_gpr(*r)).collect()
}

/// Per-class allocation state, reset at the start of every block.
struct ClassState {
    free: VecDeque<PhysReg>,
    active: VecDeque<VReg>,
    current: HashMap<VReg, PhysReg>,
}

impl ClassState {
    fn new(target: &TargetDescription, class: RegClass) -> Self {
        ClassState {
            free: build_free_pool(target, class),
            active: VecDeque::new(),
            current: HashMap::new(),
        }
    }
}

struct Allocator<'a> {
    target: &'a TargetDescription,
    assignment: Assignment,
    spilled: HashMap<VReg, u32>,
    spills: SpillCounts,
}

impl<'a> Allocator<'a> {
    fn new(target: &'a TargetDescription) -> Self {
        Allocator {
            target,
            assignment: Assignment::new(),
            spilled: HashMap::new(),
            spills: SpillCounts::default(),
        }
    }

    fn state_for<'s>(&self, gpr: &'s mut ClassState, xmm: &'s mut ClassState, class: RegClass) -> &'s mut ClassState {
        match class {
            RegClass::GPR => gpr,
            RegClass::XMM => xmm,
        }
    }

    /// Reload-mem for a spilled vreg of `class`.
    fn spill_mem(&self, class: RegClass, slot_idx: u32) -> crate::mir::MemOperand {
        let disp = match class {
            RegClass::GPR => slot::gpr_spill_disp(slot_idx),
            RegClass::XMM => slot::xmm_spill_disp(slot_idx),
        };
        crate::mir::MemOperand::base_disp(RegOperand::phys(PhysReg::Rbp), disp)
    }

    fn reload_opcode(class: RegClass) -> MOpcode {
        match class {
            RegClass::GPR => MOpcode::MovRM,
            RegClass::XMM => MOpcode::MovSdRM,
        }
    }

    fn store_opcode(class: RegClass) -> MOpcode {
        match class {
            RegClass::GPR => MOpcode::MovMR,
            RegClass::XMM => MOpcode::MovSdMR,
        }
    }

    /// Evict the front of `state.active` (the earliest-added still-live
    /// vreg), spilling it on first eviction, and return the physical
    /// register that freed up.
    fn evict_victim(&mut self, state: &mut ClassState, class: RegClass, out: &mut Vec<MInstr>) -> PhysReg {
        let victim = state.active.pop_front().expect("spill requested with nothing active");
        let victim_reg = state.current.remove(&victim).expect("active vreg missing its register");
        let slot_idx = *self.spilled.entry(victim).or_insert_with(|| {
            let idx = match class {
                RegClass::GPR => {
                    let i = self.spills.gpr;
                    self.spills.gpr += 1;
                    i
                }
                RegClass::XMM => {
                    let i = self.spills.xmm;
                    self.spills.xmm += 1;
                    i
                }
            };
            idx
        });
        debug!("regalloc: spilling {} ({:?}) to slot {}", victim, class, slot_idx);
        self.assignment.insert(victim, Location::Spill(slot_idx));
        let mem = Operand::Mem(self.spill_mem(class, slot_idx));
        out.push(MInstr::new(Self::store_opcode(class), vec![mem, Operand::Reg(RegOperand::phys(victim_reg))]));
        victim_reg
    }

    /// Acquire a free physical register of `class`, spilling the front of
    /// the active list if the pool is empty.
    fn acquire(&mut self, state: &mut ClassState, class: RegClass, out: &mut Vec<MInstr>) -> PhysReg {
        if let Some(reg) = state.free.pop_front() {
            return reg;
        }
        self.evict_victim(state, class, out)
    }

    /// Resolve a vreg operand used as `role`, rewriting it in place and
    /// emitting any reload/store this occurrence requires. `out` is the
    /// buffer the (possibly reload-preceded) current instruction is being
    /// assembled into.
    fn resolve_operand(
        &mut self,
        gpr: &mut ClassState,
        xmm: &mut ClassState,
        role: Role,
        reg: RegOperand,
        out: &mut Vec<MInstr>,
        deferred_stores: &mut Vec<(RegClass, VReg, PhysReg)>,
    ) -> RegOperand {
        let v = reg.as_vreg();
        let class = reg.class;

        if let Some(&slot_idx) = self.spilled.get(&v) {
            let state = self.state_for(gpr, xmm, class);
            let scratch = self.acquire(state, class, out);
            if role != Role::Def {
                let mem = Operand::Mem(self.spill_mem(class, slot_idx));
                out.push(MInstr::new(Self::reload_opcode(class), vec![Operand::Reg(RegOperand::phys(scratch)), mem]));
            }
            if role != Role::Use {
                deferred_stores.push((class, v, scratch));
            }
            return RegOperand::phys(scratch);
        }

        let state = self.state_for(gpr, xmm, class);
        if let Some(&phys) = state.current.get(&v) {
            return RegOperand::phys(phys);
        }

        let phys = self.acquire(state, class, out);
        state.current.insert(v, phys);
        state.active.push_back(v);
        self.assignment.insert(v, Location::Reg(phys));
        RegOperand::phys(phys)
    }

    /// Resolve a `PX_COPY` source: unlike every other operand, this one may
    /// legitimately become a memory operand — the coalescer is the pass
    /// responsible for materializing a spilled source through a scratch
    /// register, not this one.
    fn resolve_copy_source(&mut self, gpr: &mut ClassState, xmm: &mut ClassState, reg: RegOperand) -> Operand {
        let v = reg.as_vreg();
        let class = reg.class;
        if let Some(&slot_idx) = self.spilled.get(&v) {
            return Operand::Mem(self.spill_mem(class, slot_idx));
        }
        let state = self.state_for(gpr, xmm, class);
        if let Some(&phys) = state.current.get(&v) {
            return Operand::Reg(RegOperand::phys(phys));
        }
        let mut scratch_out = Vec::new();
        let phys = self.acquire(state, class, &mut scratch_out);
        debug_assert!(scratch_out.is_empty(), "acquiring for an unassigned PX_COPY source never spills");
        state.current.insert(v, phys);
        state.active.push_back(v);
        self.assignment.insert(v, Location::Reg(phys));
        Operand::Reg(RegOperand::phys(phys))
    }
}

/// Run linear-scan allocation over every block of `func`, rewriting every
/// virtual-register operand to a physical one (or a spill-slot placeholder
/// memory operand). `PX_COPY` destinations are left as raw vreg operands
/// for [`coalesce::run`], which resolves them once every block's
/// assignments are final.
pub fn run(func: &mut MFunction, target: &TargetDescription) -> (SpillCounts, Assignment) {
    let mut alloc = Allocator::new(target);

    for block in &mut func.blocks {
        let mut gpr = ClassState::new(target, RegClass::GPR);
        let mut xmm = ClassState::new(target, RegClass::XMM);

        let original = std::mem::take(&mut block.instrs);
        let mut rewritten = Vec::with_capacity(original.len());

        for mut instr in original {
            if instr.opcode == MOpcode::PxCopy {
                let mut new_operands = Vec::with_capacity(instr.operands.len());
                for pair in instr.operands.chunks_exact(2) {
                    let (dst, src) = (pair[0], pair[1]);
                    new_operands.push(dst);
                    let resolved = match src {
                        Operand::Reg(r) if !r.is_physical => alloc.resolve_copy_source(&mut gpr, &mut xmm, r),
                        other => other,
                    };
                    new_operands.push(resolved);
                }
                instr.operands = smallvec::SmallVec::from_vec(new_operands);
                rewritten.push(instr);
                continue;
            }

            let roles = classify_roles(instr.opcode);
            let mut deferred_stores: Vec<(RegClass, VReg, PhysReg)> = Vec::new();

            for (i, operand) in instr.operands.iter_mut().enumerate() {
                let role = roles.get(i).copied().unwrap_or(Role::Use);
                match operand {
                    Operand::Reg(r) if !r.is_physical => {
                        let resolved = alloc.resolve_operand(&mut gpr, &mut xmm, role, *r, &mut rewritten, &mut deferred_stores);
                        *r = resolved;
                    }
                    Operand::Mem(m) => {
                        if !m.base.is_physical {
                            let resolved = alloc.resolve_operand(
                                &mut gpr,
                                &mut xmm,
                                Role::Use,
                                m.base,
                                &mut rewritten,
                                &mut deferred_stores,
                            );
                            m.base = resolved;
                        }
                        if let Some(idx) = m.index {
                            if !idx.is_physical {
                                let resolved = alloc.resolve_operand(
                                    &mut gpr,
                                    &mut xmm,
                                    Role::Use,
                                    idx,
                                    &mut rewritten,
                                    &mut deferred_stores,
                                );
                                m.index = Some(resolved);
                            }
                        }
                    }
                    _ => {}
                }
            }

            rewritten.push(instr);

            for (class, v, scratch) in deferred_stores {
                let slot_idx = alloc.spilled[&v];
                let mem = Operand::Mem(alloc.spill_mem(class, slot_idx));
                rewritten.push(MInstr::new(
                    Allocator::store_opcode(class),
                    vec![mem, Operand::Reg(RegOperand::phys(scratch))],
                ));
            }
        }

        block.instrs = rewritten;
        // Every active register reverts to its pool at block end simply by
        // letting `gpr`/`xmm` drop; the next block starts with a fresh
        // pool, per the module doc comment.
    }

    // A block parameter that a `PX_COPY` hands off but whose body never
    // reads is never visited by `resolve_operand` above, so it would
    // otherwise have no entry for `coalesce::run` to look up. Give it a
    // throwaway spill slot; the copy still executes, nothing ever reads it.
    for i in 0..func.vreg_count() {
        let v = VReg::from_u32(i as u32);
        if let std::collections::hash_map::Entry::Vacant(e) = alloc.assignment.entry(v) {
            let idx = match func.vreg_class(v) {
                RegClass::GPR => {
                    let n = alloc.spills.gpr;
                    alloc.spills.gpr += 1;
                    n
                }
                RegClass::XMM => {
                    let n = alloc.spills.xmm;
                    alloc.spills.xmm += 1;
                    n
                }
            };
            e.insert(Location::Spill(idx));
        }
    }

    (alloc.spills, alloc.assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::sysv_target;
    use crate::mir::{MBasicBlock, RegOperand as RO};

    fn vreg_reg(class: RegClass, n: u32) -> Operand {
        Operand::Reg(RO::vreg(class, VReg::from_u32(n)))
    }

    #[test]
    fn simple_block_assigns_distinct_registers() {
        let mut f = MFunction::new("f");
        let v0 = f.new_vreg(RegClass::GPR);
        let v1 = f.new_vreg(RegClass::GPR);
        let mut b = MBasicBlock::new("f");
        b.instrs.push(MInstr::new(MOpcode::MovRI, vec![vreg_reg(RegClass::GPR, v0.index() as u32), Operand::Imm(1)]));
        b.instrs.push(MInstr::new(MOpcode::MovRI, vec![vreg_reg(RegClass::GPR, v1.index() as u32), Operand::Imm(2)]));
        b.instrs.push(MInstr::new(
            MOpcode::AddRR,
            vec![vreg_reg(RegClass::GPR, v0.index() as u32), vreg_reg(RegClass::GPR, v1.index() as u32)],
        ));
        f.add_block(b);

        run(&mut f, sysv_target());

        for instr in &f.blocks[0].instrs {
            for operand in &instr.operands {
                if let Operand::Reg(r) = operand {
                    assert!(r.is_physical, "operand still references a vreg after allocation");
                }
            }
        }
    }

    #[test]
    fn exhausting_the_pool_forces_a_spill() {
        let mut f = MFunction::new("f");
        let mut b = MBasicBlock::new("f");
        // SysV has 9 caller-saved and 5 callee-saved GPRs, minus RAX/RDX
        // reserved for guarded division; mint more live-at-once vregs than
        // that 12-register pool to force an eviction.
        let mut vregs = Vec::new();
        for i in 0..14 {
            let v = f.new_vreg(RegClass::GPR);
            vregs.push(v);
            b.instrs.push(MInstr::new(MOpcode::MovRI, vec![vreg_reg(RegClass::GPR, v.index() as u32), Operand::Imm(i)]));
        }
        // Keep every one of them alive with a use at the very end.
        for &v in &vregs {
            b.instrs.push(MInstr::new(MOpcode::TestRR, vec![vreg_reg(RegClass::GPR, v.index() as u32), vreg_reg(RegClass::GPR, v.index() as u32)]));
        }
        f.add_block(b);

        let (spills, _assignment) = run(&mut f, sysv_target());
        assert!(spills.gpr > 0, "expected at least one spill with 12 concurrently live vregs");

        for instr in &f.blocks[0].instrs {
            for operand in &instr.operands {
                if let Operand::Reg(r) = operand {
                    assert!(r.is_physical);
                }
                if let Operand::Mem(m) = operand {
                    assert!(m.base.is_physical);
                }
            }
        }
    }
}
