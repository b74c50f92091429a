//! End-to-end tests: each builds a small IL function and checks the emitted
//! AT&T assembly contains the fragments that prove the lowering, guard, and
//! register-allocation pipeline produced a correct instruction sequence —
//! not just that it produced *some* output.

use viper_codegen_x64::il::{ILFunction, ILInstr, ILKind, ILModule, ILValue};
use viper_codegen_x64::options::CodegenOptions;
use viper_codegen_x64::{emit_function, emit_module};

fn index_of(haystack: &str, needle: &str) -> usize {
    haystack.find(needle).unwrap_or_else(|| panic!("expected to find {:?} in:\n{}", needle, haystack))
}

#[test]
fn add_two_integers_and_return() {
    let mut func = ILFunction::new("add");
    func.blocks[0].param_ids = vec![0, 1];
    func.blocks[0].param_kinds = vec![ILKind::I64, ILKind::I64];
    func.blocks[0].instrs.push(ILInstr::with_result(
        "add",
        vec![ILValue::value_ref(0, ILKind::I64), ILValue::value_ref(1, ILKind::I64)],
        2,
        ILKind::I64,
    ));
    func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::value_ref(2, ILKind::I64)]));

    let out = emit_function(&func, &CodegenOptions::default());
    assert!(out.diagnostics.is_empty());
    assert!(out.assembly_text.contains(".globl add"));
    assert!(out.assembly_text.contains("addq"));
    assert!(out.assembly_text.trim_end().ends_with("ret"));
}

#[test]
fn string_literal_is_interned_and_addressed_via_lea() {
    let mut func = ILFunction::new("greet");
    func.blocks[0].instrs.push(ILInstr::with_result(
        "const_str",
        vec![ILValue::string_lit(b"Hello, world!".to_vec())],
        0,
        ILKind::Ptr,
    ));
    func.blocks[0].instrs.push(ILInstr::with_result(
        "call",
        vec![
            ILValue::label_ref("rt_str_from_lit"),
            ILValue::value_ref(0, ILKind::Ptr),
            ILValue::imm_i64(13),
        ],
        1,
        ILKind::Ptr,
    ));
    func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::value_ref(1, ILKind::Ptr)]));

    let out = emit_function(&func, &CodegenOptions::default());
    let text = &out.assembly_text;
    assert!(text.contains("leaq .LC_str_0(%rip)"));
    assert!(text.contains("$13"));
    assert!(text.contains("callq rt_str_from_lit"));
    assert!(text.contains(".LC_str_0:"));
    assert!(text.contains("\"Hello, world!\""));
}

#[test]
fn vararg_runtime_call_sets_xmm_count_and_plain_call_does_not() {
    let mut vararg_func = ILFunction::new("uses_snprintf");
    vararg_func.blocks[0].instrs.push(ILInstr::no_result(
        "call",
        vec![
            ILValue::label_ref("rt_snprintf"),
            ILValue::value_ref(0, ILKind::Ptr),
            ILValue::value_ref(1, ILKind::I64),
            ILValue::imm_f64(1.0),
            ILValue::imm_f64(2.0),
        ],
    ));
    vararg_func.blocks[0].param_ids = vec![0, 1];
    vararg_func.blocks[0].param_kinds = vec![ILKind::Ptr, ILKind::I64];
    vararg_func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![]));

    let vararg_out = emit_function(&vararg_func, &CodegenOptions::default());
    let vararg_text = &vararg_out.assembly_text;
    assert!(vararg_text.contains("callq rt_snprintf"));
    let rax_set_pos = index_of(vararg_text, "movq $2, %rax");
    let call_pos = index_of(vararg_text, "callq rt_snprintf");
    assert!(rax_set_pos < call_pos, "%rax must carry the XMM argument count before the vararg call:\n{vararg_text}");

    let mut plain_func = ILFunction::new("uses_print_f64");
    plain_func.blocks[0].instrs.push(ILInstr::no_result(
        "call",
        vec![ILValue::label_ref("rt_print_f64"), ILValue::imm_f64(3.5)],
    ));
    plain_func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![]));

    let plain_out = emit_function(&plain_func, &CodegenOptions::default());
    assert!(plain_out.assembly_text.contains("callq rt_print_f64"));
    assert!(!plain_out.assembly_text.contains("%rax"), "non-vararg call site must not set %rax");
}

#[test]
fn signed_division_is_guarded_by_a_zero_check_before_cqto_idiv() {
    let mut func = ILFunction::new("safe_div");
    func.blocks[0].param_ids = vec![0, 1];
    func.blocks[0].param_kinds = vec![ILKind::I64, ILKind::I64];
    func.blocks[0].instrs.push(ILInstr::with_result(
        "sdiv",
        vec![ILValue::value_ref(0, ILKind::I64), ILValue::value_ref(1, ILKind::I64)],
        2,
        ILKind::I64,
    ));
    func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::value_ref(2, ILKind::I64)]));

    let out = emit_function(&func, &CodegenOptions::default());
    let text = &out.assembly_text;

    let test_pos = index_of(text, "testq");
    let je_pos = index_of(text, "je ");
    let cqto_pos = index_of(text, "cqto");
    let idiv_pos = index_of(text, "idivq");
    assert!(test_pos < je_pos && je_pos < cqto_pos && cqto_pos < idiv_pos, "guard sequence out of order:\n{text}");

    assert!(text.contains("callq rt_trap_div0"), "missing division trap call:\n{text}");
}

#[test]
fn select_on_integers_lowers_to_test_mov_cmovne() {
    let mut func = ILFunction::new("pick");
    func.blocks[0].param_ids = vec![0];
    func.blocks[0].param_kinds = vec![ILKind::I1];
    func.blocks[0].instrs.push(ILInstr::with_result(
        "select",
        vec![ILValue::value_ref(0, ILKind::I1), ILValue::imm_i64(42), ILValue::imm_i64(7)],
        1,
        ILKind::I64,
    ));
    func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::value_ref(1, ILKind::I64)]));

    let out = emit_function(&func, &CodegenOptions::default());
    let text = &out.assembly_text;

    let test_pos = index_of(text, "testq");
    let mov_false_pos = index_of(text, "$7");
    let cmovne_pos = index_of(text, "cmovne");
    assert!(test_pos < mov_false_pos, "false value must be moved in after the flags test:\n{text}");
    assert!(mov_false_pos < cmovne_pos, "cmovne must follow the unconditional false-value move:\n{text}");
}

#[test]
fn large_alloca_forces_an_unrolled_stack_probe() {
    let mut func = ILFunction::new("big_frame");
    func.blocks[0].instrs.push(ILInstr::with_result(
        "alloca",
        vec![ILValue::imm_i64(8192)],
        0,
        ILKind::Ptr,
    ));
    func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![]));

    let out = emit_function(&func, &CodegenOptions::default());
    let text = &out.assembly_text;

    let probe_touches = text.matches("(%rsp), %rax").count();
    assert!(probe_touches >= 2, "expected at least two page-stride probe touches, got {probe_touches}:\n{text}");
    assert!(text.contains("$-4096"), "expected a full-page probe stride:\n{text}");
}

#[test]
fn module_emission_joins_functions_and_trailing_rodata() {
    let mut module = ILModule::new();

    let mut first = ILFunction::new("first");
    first.blocks[0].instrs.push(ILInstr::with_result(
        "const_str",
        vec![ILValue::string_lit(b"hi".to_vec())],
        0,
        ILKind::Ptr,
    ));
    first.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::value_ref(0, ILKind::Ptr)]));

    let mut second = ILFunction::new("second");
    second.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::imm_i64(0)]));

    module.functions.push(first);
    module.functions.push(second);

    let out = emit_module(&module, &CodegenOptions::default());
    assert!(out.assembly_text.contains(".globl first"));
    assert!(out.assembly_text.contains(".globl second"));
    assert!(out.assembly_text.contains(".section .rodata"));

    let first_pos = index_of(&out.assembly_text, ".globl first");
    let second_pos = index_of(&out.assembly_text, ".globl second");
    let rodata_pos = index_of(&out.assembly_text, ".section .rodata");
    assert!(first_pos < second_pos && second_pos < rodata_pos);
}
