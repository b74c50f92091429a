//! The lowering rule table itself: one entry per IL opcode (or opcode
//! family), each paired with a small emit function over `LowerCtx`.
//!
//! Grounded on `original_source/src/codegen/x86_64/LoweringRuleTable.{hpp,cpp}`:
//! a flat table of rows, each naming an opcode, an arity range, and a
//! callback. This module supplies that table as two `const` slices so
//! dispatch (`super::find_rule`) never allocates or mutates.

use super::{LowerCtx, OperandKind, Rule, VARIADIC};
use crate::il::ILInstr;
use crate::mir::{CondCode, MOpcode};

fn binop(ctx: &mut LowerCtx, instr: &ILInstr, opcode: MOpcode) {
    let dst = instr.result_id.expect("arithmetic op must produce a result");
    ctx.emit_binary(opcode, dst, &instr.operands[0], &instr.operands[1]);
}

// Integer `add`/`sub`/`mul` always lower to the overflow-checked pseudos:
// this language checks integer arithmetic by default, and guarded
// expansion (crate::guards) rewrites each one into the non-checked op plus
// a trap before register allocation ever sees them.
fn checked_binop(ctx: &mut LowerCtx, instr: &ILInstr, opcode: MOpcode) {
    let dst = instr.result_id.expect("arithmetic op must produce a result");
    ctx.emit_checked_arith(opcode, dst, &instr.operands[0], &instr.operands[1]);
}

fn emit_add(ctx: &mut LowerCtx, instr: &ILInstr) {
    if instr.result_kind == crate::il::ILKind::F64 {
        binop(ctx, instr, MOpcode::FAdd)
    } else {
        checked_binop(ctx, instr, MOpcode::AddOvfRR)
    }
}
fn emit_sub(ctx: &mut LowerCtx, instr: &ILInstr) {
    if instr.result_kind == crate::il::ILKind::F64 {
        binop(ctx, instr, MOpcode::FSub)
    } else {
        checked_binop(ctx, instr, MOpcode::SubOvfRR)
    }
}
fn emit_mul(ctx: &mut LowerCtx, instr: &ILInstr) {
    if instr.result_kind == crate::il::ILKind::F64 {
        binop(ctx, instr, MOpcode::FMul)
    } else {
        checked_binop(ctx, instr, MOpcode::ImulOvfRR)
    }
}
fn emit_fdiv(ctx: &mut LowerCtx, instr: &ILInstr) {
    binop(ctx, instr, MOpcode::FDiv);
}
fn emit_and(ctx: &mut LowerCtx, instr: &ILInstr) {
    binop(ctx, instr, MOpcode::AndRR);
}
fn emit_or(ctx: &mut LowerCtx, instr: &ILInstr) {
    binop(ctx, instr, MOpcode::OrRR);
}
fn emit_xor(ctx: &mut LowerCtx, instr: &ILInstr) {
    binop(ctx, instr, MOpcode::XorRR);
}

fn emit_shl(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("shl must produce a result");
    ctx.emit_shift(MOpcode::ShlRI, MOpcode::ShlRC, dst, &instr.operands[0], &instr.operands[1]);
}
fn emit_lshr(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("lshr must produce a result");
    ctx.emit_shift(MOpcode::ShrRI, MOpcode::ShrRC, dst, &instr.operands[0], &instr.operands[1]);
}
fn emit_ashr(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("ashr must produce a result");
    ctx.emit_shift(MOpcode::SarRI, MOpcode::SarRC, dst, &instr.operands[0], &instr.operands[1]);
}

fn emit_sdiv(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("sdiv must produce a result");
    ctx.emit_div_rem(MOpcode::DivS64RR, dst, &instr.operands[0], &instr.operands[1]);
}
fn emit_div(ctx: &mut LowerCtx, instr: &ILInstr) {
    emit_sdiv(ctx, instr);
}
fn emit_srem(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("srem must produce a result");
    ctx.emit_div_rem(MOpcode::RemS64RR, dst, &instr.operands[0], &instr.operands[1]);
}
fn emit_rem(ctx: &mut LowerCtx, instr: &ILInstr) {
    emit_srem(ctx, instr);
}
fn emit_udiv(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("udiv must produce a result");
    ctx.emit_div_rem(MOpcode::DivU64RR, dst, &instr.operands[0], &instr.operands[1]);
}
fn emit_urem(ctx: &mut LowerCtx, instr: &ILInstr) {
    let dst = instr.result_id.expect("urem must produce a result");
    ctx.emit_div_rem(MOpcode::RemU64RR, dst, &instr.operands[0], &instr.operands[1]);
}

fn icmp_rule(cond: CondCode) -> fn(&mut LowerCtx, &ILInstr) {
    match cond {
        CondCode::Eq => |ctx, i| ctx.emit_compare(CondCode::Eq, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Ne => |ctx, i| ctx.emit_compare(CondCode::Ne, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Slt => |ctx, i| ctx.emit_compare(CondCode::Slt, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Sle => |ctx, i| ctx.emit_compare(CondCode::Sle, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Sgt => |ctx, i| ctx.emit_compare(CondCode::Sgt, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Sge => |ctx, i| ctx.emit_compare(CondCode::Sge, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Ugt => |ctx, i| ctx.emit_compare(CondCode::Ugt, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Uge => |ctx, i| ctx.emit_compare(CondCode::Uge, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Ult => |ctx, i| ctx.emit_compare(CondCode::Ult, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Ule => |ctx, i| ctx.emit_compare(CondCode::Ule, &i.operands[0], &i.operands[1], i.result_id),
        CondCode::Unordered => {
            |ctx, i| ctx.emit_compare(CondCode::Unordered, &i.operands[0], &i.operands[1], i.result_id)
        }
        CondCode::Ordered => {
            |ctx, i| ctx.emit_compare(CondCode::Ordered, &i.operands[0], &i.operands[1], i.result_id)
        }
    }
}

fn emit_icmp_eq(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Eq)(ctx, i)
}
fn emit_icmp_ne(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ne)(ctx, i)
}
fn emit_icmp_slt(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Slt)(ctx, i)
}
fn emit_icmp_sle(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Sle)(ctx, i)
}
fn emit_icmp_sgt(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Sgt)(ctx, i)
}
fn emit_icmp_sge(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Sge)(ctx, i)
}
fn emit_icmp_ugt(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ugt)(ctx, i)
}
fn emit_icmp_uge(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Uge)(ctx, i)
}
fn emit_icmp_ult(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ult)(ctx, i)
}
fn emit_icmp_ule(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ule)(ctx, i)
}

// Float comparisons reuse the unsigned mnemonics for lt/le/gt/ge, matching
// the flags UCOMISD actually produces (CF/ZF/PF, the same flags an
// unsigned integer compare sets) rather than the signed l/le/g/ge family.
fn emit_fcmp_eq(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Eq)(ctx, i)
}
fn emit_fcmp_ne(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ne)(ctx, i)
}
fn emit_fcmp_lt(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ult)(ctx, i)
}
fn emit_fcmp_le(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ule)(ctx, i)
}
fn emit_fcmp_gt(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Ugt)(ctx, i)
}
fn emit_fcmp_ge(ctx: &mut LowerCtx, i: &ILInstr) {
    icmp_rule(CondCode::Uge)(ctx, i)
}

fn emit_cmp_generic(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("cmp must produce a result");
    let cond_code = i.operands[2].i64_val;
    ctx.emit_cmp_generic(dst, &i.operands[0], &i.operands[1], cond_code);
}

fn emit_select(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("select must produce a result");
    ctx.emit_select(dst, &i.operands[0], &i.operands[1], &i.operands[2]);
}

fn emit_ret(ctx: &mut LowerCtx, i: &ILInstr) {
    ctx.emit_return(i.operands.first());
}

fn emit_call(ctx: &mut LowerCtx, i: &ILInstr) {
    ctx.emit_call(i);
}

fn emit_load(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("load must produce a result");
    ctx.emit_load(dst, i.result_kind, &i.operands[0]);
}
fn emit_store(ctx: &mut LowerCtx, i: &ILInstr) {
    ctx.emit_store(&i.operands[0], &i.operands[1]);
}

fn emit_zext(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("zext must produce a result");
    ctx.emit_cast("zext", dst, i.result_kind, &i.operands[0]);
}
fn emit_sext(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("sext must produce a result");
    ctx.emit_cast("sext", dst, i.result_kind, &i.operands[0]);
}
fn emit_trunc(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("trunc must produce a result");
    ctx.emit_cast("trunc", dst, i.result_kind, &i.operands[0]);
}
fn emit_sitofp(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("sitofp must produce a result");
    ctx.emit_cast("sitofp", dst, i.result_kind, &i.operands[0]);
}
fn emit_fptosi(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("fptosi must produce a result");
    ctx.emit_cast("fptosi", dst, i.result_kind, &i.operands[0]);
}

fn emit_eh(ctx: &mut LowerCtx, _i: &ILInstr) {
    ctx.emit_eh_noop();
}

fn emit_trap(ctx: &mut LowerCtx, _i: &ILInstr) {
    ctx.emit_trap();
}

fn emit_const_str(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("const_str must produce a result");
    ctx.emit_const_str(dst, &i.operands[0].bytes);
}

fn emit_alloca(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("alloca must produce a result");
    ctx.emit_alloca(dst, &i.operands[0]);
}

fn emit_gep(ctx: &mut LowerCtx, i: &ILInstr) {
    let dst = i.result_id.expect("gep must produce a result");
    let elem_size = i.operands[2].i64_val;
    ctx.emit_gep(dst, &i.operands[0], &i.operands[1], elem_size);
}

const NONE: &[OperandKind] = &[];

/// Exact-match rule table, probed first by `super::find_rule`.
pub static EXACT_RULES: &[Rule] = &[
    Rule { opcode: "add", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_add },
    Rule { opcode: "sub", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_sub },
    Rule { opcode: "mul", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_mul },
    Rule { opcode: "fdiv", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fdiv },
    Rule { opcode: "and", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_and },
    Rule { opcode: "or", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_or },
    Rule { opcode: "xor", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_xor },
    Rule { opcode: "shl", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_shl },
    Rule { opcode: "lshr", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_lshr },
    Rule { opcode: "ashr", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_ashr },
    Rule { opcode: "sdiv", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_sdiv },
    Rule { opcode: "div", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_div },
    Rule { opcode: "udiv", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_udiv },
    Rule { opcode: "srem", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_srem },
    Rule { opcode: "rem", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_rem },
    Rule { opcode: "urem", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_urem },
    Rule { opcode: "cmp", prefix: false, min_arity: 3, max_arity: 3, operand_kinds: NONE, emit: emit_cmp_generic },
    Rule { opcode: "select", prefix: false, min_arity: 3, max_arity: 3, operand_kinds: NONE, emit: emit_select },
    Rule { opcode: "ret", prefix: false, min_arity: 0, max_arity: 1, operand_kinds: NONE, emit: emit_ret },
    Rule { opcode: "call", prefix: false, min_arity: 1, max_arity: VARIADIC, operand_kinds: NONE, emit: emit_call },
    Rule {
        opcode: "call.indirect",
        prefix: false,
        min_arity: 1,
        max_arity: VARIADIC,
        operand_kinds: NONE,
        emit: emit_call,
    },
    Rule { opcode: "load", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_load },
    Rule { opcode: "store", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_store },
    Rule { opcode: "zext", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_zext },
    Rule { opcode: "sext", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_sext },
    Rule { opcode: "trunc", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_trunc },
    Rule { opcode: "sitofp", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_sitofp },
    Rule { opcode: "fptosi", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_fptosi },
    Rule { opcode: "eh.push", prefix: false, min_arity: 0, max_arity: VARIADIC, operand_kinds: NONE, emit: emit_eh },
    Rule { opcode: "eh.pop", prefix: false, min_arity: 0, max_arity: VARIADIC, operand_kinds: NONE, emit: emit_eh },
    Rule {
        opcode: "eh.entry",
        prefix: false,
        min_arity: 0,
        max_arity: VARIADIC,
        operand_kinds: NONE,
        emit: emit_eh,
    },
    Rule { opcode: "trap", prefix: false, min_arity: 0, max_arity: 0, operand_kinds: NONE, emit: emit_trap },
    Rule {
        opcode: "const_str",
        prefix: false,
        min_arity: 1,
        max_arity: 1,
        operand_kinds: NONE,
        emit: emit_const_str,
    },
    Rule { opcode: "alloca", prefix: false, min_arity: 1, max_arity: 1, operand_kinds: NONE, emit: emit_alloca },
    Rule { opcode: "gep", prefix: false, min_arity: 3, max_arity: 3, operand_kinds: NONE, emit: emit_gep },
    Rule { opcode: "icmp_eq", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_eq },
    Rule { opcode: "icmp_ne", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_ne },
    Rule { opcode: "icmp_slt", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_slt },
    Rule { opcode: "icmp_sle", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_sle },
    Rule { opcode: "icmp_sgt", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_sgt },
    Rule { opcode: "icmp_sge", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_sge },
    Rule { opcode: "icmp_ugt", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_ugt },
    Rule { opcode: "icmp_uge", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_uge },
    Rule { opcode: "icmp_ult", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_ult },
    Rule { opcode: "icmp_ule", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_icmp_ule },
    Rule { opcode: "fcmp_eq", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_eq },
    Rule { opcode: "fcmp_ne", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_ne },
    Rule { opcode: "fcmp_lt", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_lt },
    Rule { opcode: "fcmp_le", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_le },
    Rule { opcode: "fcmp_gt", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_gt },
    Rule { opcode: "fcmp_ge", prefix: false, min_arity: 2, max_arity: 2, operand_kinds: NONE, emit: emit_fcmp_ge },
];

/// Prefix rule table, probed only after an exact-match miss. Empty: every
/// opcode this backend recognizes has a dedicated exact entry above, but
/// the table exists (and is probed) to match the two-table dispatch shape
/// described for `icmp_*`/`fcmp_*` families, and as the extension point for
/// any opcode family added later without growing the exact table.
pub static PREFIX_RULES: &[Rule] = &[];
