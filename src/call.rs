//! Call lowering: ABI-compliant argument marshalling for `call` and
//! `call.indirect` IL instructions.
//!
//! Grounded on `original_source/src/codegen/x86_64/CallLowering.{hpp,cpp}`.
//! Unlike the header's split "plan now, materialize later" phrasing, this
//! implementation plans and emits a call's move/store/CALL/restore sequence
//! in one step, directly into the block being lowered — the plan object
//! never outlives a single `lower_call_into` invocation. Stack-passed
//! arguments and the alignment pad are realized as a dynamic `%rsp`
//! reservation around the `CALL`, not as a static frame slot; see
//! `DESIGN.md` for why the two phrasings in the source material don't fully
//! agree and which one this backend follows.

use crate::il::{ILInstr, ILKind, ILValue};
use crate::lowering::LowerCtx;
use crate::mir::{MInstr, MOpcode, Operand, PhysReg, RegClass, RegOperand, VReg};

/// Runtime entry points that accept a variable argument tail. Only these
/// calls carry the SysV `%rax = XMM-register-argument count` convention.
const VARARG_RUNTIME_SYMBOLS: &[&str] = &["rt_snprintf", "rt_sb_printf"];

/// One argument's classified placement.
enum ArgSlot {
    Reg(PhysReg),
    Stack(i32),
}

struct ClassifiedArg {
    value: ILValue,
    slot: ArgSlot,
}

/// A fully-resolved call lowering plan: where every argument goes, how many
/// XMM registers are used, and where (if anywhere) the result lands.
pub struct CallLoweringPlan {
    callee: CalleeOperand,
    args: Vec<ClassifiedArg>,
    xmm_reg_count: i64,
    is_vararg_callee: bool,
    stack_args_bytes: i32,
    dst: Option<(VReg, ILKind)>,
}

enum CalleeOperand {
    Direct(String),
    Indirect(ILValue),
}

/// Classify and place every argument of a `call`/`call.indirect` instruction
/// according to the target's argument-order table.
pub fn build_plan(ctx: &mut LowerCtx, instr: &ILInstr) -> CallLoweringPlan {
    let (callee, arg_values) = match instr.opcode.as_str() {
        "call" => {
            let callee_name = instr.operands[0].label.clone();
            (CalleeOperand::Direct(callee_name), &instr.operands[1..])
        }
        "call.indirect" => (CalleeOperand::Indirect(instr.operands[0].clone()), &instr.operands[1..]),
        other => unreachable!("build_plan called with non-call opcode `{}`", other),
    };

    let mut gpr_used = 0usize;
    let mut xmm_used = 0usize;
    let mut stack_slot = 0i32;
    let mut args = Vec::with_capacity(arg_values.len());

    for value in arg_values {
        let class = LowerCtx::class_for(value.kind);
        let slot = match class {
            RegClass::GPR if gpr_used < ctx.target.int_arg_order.len() => {
                let reg = ctx.target.int_arg_order[gpr_used];
                gpr_used += 1;
                ArgSlot::Reg(reg)
            }
            RegClass::XMM if xmm_used < ctx.target.float_arg_order.len() => {
                let reg = ctx.target.float_arg_order[xmm_used];
                xmm_used += 1;
                ArgSlot::Reg(reg)
            }
            _ => {
                let disp = stack_slot * 8;
                stack_slot += 1;
                ArgSlot::Stack(disp)
            }
        };
        args.push(ClassifiedArg { value: value.clone(), slot });
    }

    let is_vararg_callee = match &callee {
        CalleeOperand::Direct(name) => VARARG_RUNTIME_SYMBOLS.contains(&name.as_str()),
        CalleeOperand::Indirect(_) => false,
    };

    let dst = instr.result_id.map(|id| (ctx.ensure_vreg(id, instr.result_kind), instr.result_kind));

    CallLoweringPlan {
        callee,
        args,
        xmm_reg_count: xmm_used as i64,
        is_vararg_callee,
        stack_args_bytes: stack_slot * 8,
        dst,
    }
}

/// Materialize a call plan into the current block: alignment padding,
/// argument placement, the `CALL` itself, and result capture. Returns the
/// total bytes reserved below `%rsp` for the call (padding + stack
/// arguments), reported back so frame lowering can record it on
/// `FrameInfo` for data-model fidelity.
pub fn lower_call_into(ctx: &mut LowerCtx, plan: &CallLoweringPlan) -> i32 {
    let pad = alignment_padding(ctx.target.shadow_space_bytes, plan.stack_args_bytes);
    let reserve = pad + ctx.target.shadow_space_bytes + plan.stack_args_bytes;

    if reserve > 0 {
        ctx.emit(MInstr::new(
            MOpcode::AddRI,
            vec![Operand::Reg(RegOperand::phys(PhysReg::Rsp)), Operand::Imm(-(reserve as i64))],
        ));
    }

    // Stack-passed arguments are written closest to the new %rsp; shadow
    // space and padding occupy the (unwritten) bytes above them.
    for arg in &plan.args {
        if let ArgSlot::Stack(disp) = arg.slot {
            let mem = Operand::Mem(crate::mir::MemOperand::base_disp(RegOperand::phys(PhysReg::Rsp), disp));
            emit_arg_move(ctx, mem, &arg.value);
        }
    }
    for arg in &plan.args {
        if let ArgSlot::Reg(reg) = arg.slot {
            let dst = Operand::Reg(RegOperand::phys(reg));
            emit_arg_move(ctx, dst, &arg.value);
        }
    }

    if plan.is_vararg_callee {
        ctx.emit(MInstr::new(
            MOpcode::MovRI,
            vec![Operand::Reg(RegOperand::phys(PhysReg::Rax)), Operand::Imm(plan.xmm_reg_count)],
        ));
    }

    if ctx.call_alignment_checks {
        emit_alignment_self_check(ctx);
    }

    let callee_operand = match &plan.callee {
        CalleeOperand::Direct(name) => Operand::label(name.clone()),
        CalleeOperand::Indirect(value) => ctx.operand_for_value(value),
    };
    ctx.emit(MInstr::new(MOpcode::Call, vec![callee_operand]));

    if let Some((dst_vreg, kind)) = plan.dst {
        let class = LowerCtx::class_for(kind);
        let dst = Operand::Reg(RegOperand::vreg(class, dst_vreg));
        match class {
            RegClass::GPR => {
                let ret = Operand::Reg(RegOperand::phys(ctx.target.int_return_reg));
                ctx.emit(MInstr::new(MOpcode::MovRR, vec![dst, ret]));
            }
            RegClass::XMM => {
                let ret = Operand::Reg(RegOperand::phys(ctx.target.float_return_reg));
                ctx.emit(MInstr::new(MOpcode::MovSdRR, vec![dst, ret]));
            }
        }
    }

    if reserve > 0 {
        ctx.emit(MInstr::new(
            MOpcode::AddRI,
            vec![Operand::Reg(RegOperand::phys(PhysReg::Rsp)), Operand::Imm(reserve as i64)],
        ));
    }

    reserve
}

/// A `SETcc`-defined boolean argument is widened with `MOVZX` rather than a
/// plain `MOV`, per spec. Detected by scanning backwards through the
/// current block for a `SETcc` whose destination is this argument's vreg.
///
/// `dst` is either a physical argument register or a stack-argument memory
/// operand; `MOVZX` can only target a register, so a memory destination
/// gets the widened value staged through a scratch register first.
fn emit_arg_move(ctx: &mut LowerCtx, dst: Operand, value: &ILValue) {
    let class = LowerCtx::class_for(value.kind);
    let widen = value.kind == ILKind::I1 && !value.is_immediate() && ctx.was_defined_by_setcc(value.id);

    if widen {
        let src = ctx.operand_for_value(value);
        match dst {
            Operand::Reg(_) => ctx.emit(MInstr::new(MOpcode::MovzxRR32, vec![dst, src])),
            _ => {
                let scratch = ctx.new_temp(RegClass::GPR);
                let scratch_op = Operand::Reg(RegOperand::vreg(RegClass::GPR, scratch));
                ctx.emit(MInstr::new(MOpcode::MovzxRR32, vec![scratch_op, src]));
                ctx.emit(MInstr::new(MOpcode::MovMR, vec![dst, scratch_op]));
            }
        }
        return;
    }

    let src = ctx.operand_for_value(value);
    match (class, dst) {
        (RegClass::GPR, Operand::Reg(_)) => {
            let opcode = if matches!(src, Operand::Imm(_)) { MOpcode::MovRI } else { MOpcode::MovRR };
            ctx.emit(MInstr::new(opcode, vec![dst, src]));
        }
        (RegClass::GPR, _) => ctx.emit(MInstr::new(MOpcode::MovMR, vec![dst, src])),
        (RegClass::XMM, Operand::Reg(_)) => ctx.emit(MInstr::new(MOpcode::MovSdRR, vec![dst, src])),
        (RegClass::XMM, _) => ctx.emit(MInstr::new(MOpcode::MovSdMR, vec![dst, src])),
    }
}

/// Compute the 0-15 byte pad needed so that, at the `CALL` instruction,
/// `(stack_args_bytes + shadow_space + pad + 8) mod 16 == 0` — the `+8`
/// accounts for the return address `CALL` itself pushes.
fn alignment_padding(shadow_space_bytes: i32, stack_args_bytes: i32) -> i32 {
    let committed = shadow_space_bytes + stack_args_bytes + 8;
    let remainder = committed.rem_euclid(16);
    if remainder == 0 {
        0
    } else {
        16 - remainder
    }
}

fn emit_alignment_self_check(ctx: &mut LowerCtx) {
    let label = ctx.make_local_label("call_ok");
    let rax = Operand::Reg(RegOperand::phys(PhysReg::Rax));
    ctx.emit(MInstr::new(MOpcode::MovRR, vec![rax.clone(), Operand::Reg(RegOperand::phys(PhysReg::Rsp))]));
    ctx.emit(MInstr::new(MOpcode::AndRI, vec![rax.clone(), Operand::Imm(15)]));
    ctx.emit(MInstr::new(MOpcode::TestRR, vec![rax.clone(), rax]));
    ctx.emit(MInstr::new(
        MOpcode::Jcc,
        vec![Operand::Imm(crate::mir::CondCode::Eq as i64), Operand::label(label.clone())],
    ));
    ctx.emit(MInstr::nullary(MOpcode::Ud2));
    ctx.emit(MInstr::new(MOpcode::Label, vec![Operand::label(label)]));
}
