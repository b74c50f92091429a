//! An x86-64 code generation backend: lowers a small SSA intermediate
//! language into AT&T-syntax assembly text.
//!
//! Grounded on `original_source/src/codegen/x86_64/` as a whole; see
//! `DESIGN.md` for the per-module mapping. The pipeline mirrors §2 of the
//! design document this crate implements: lowering, instruction selection,
//! guarded expansion, register allocation, coalescing, frame lowering,
//! optional peepholes, then emission — run once per function, in that
//! fixed order, on the caller's thread.

pub mod call;
pub mod emit;
pub mod error;
pub mod frame;
pub mod guards;
pub mod il;
pub mod isa;
pub mod isel;
pub mod lowering;
pub mod mir;
pub mod options;
pub mod peephole;
pub mod regalloc;
pub mod rodata;

use il::{ILFunction, ILModule};
use log::{debug, warn};
use options::{CodegenOptions, OptimizeLevel};
use rodata::RoDataPool;

/// Result of a single `emit_module`/`emit_function` call. `diagnostics` is
/// empty on success; a non-empty value is informational (e.g. the
/// non-AT&T-syntax warning), never a sign emission was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitOutput {
    pub assembly_text: String,
    pub diagnostics: String,
}

/// Run one function through the full pipeline against a shared, mutably
/// borrowed read-only data pool, appending any diagnostics produced.
fn compile_function(func: &ILFunction, options: &CodegenOptions, rodata: &mut RoDataPool) -> String {
    debug!(target: "pipeline", "lowering {}", func.name);
    let (mut mfunc, max_outgoing_arg_bytes) = lowering::lower_function(func, options.target, rodata, options);

    debug!(target: "pipeline", "isel {}", func.name);
    isel::run(&mut mfunc);

    debug!(target: "pipeline", "guards {}", func.name);
    guards::run(&mut mfunc);

    debug!(target: "pipeline", "regalloc {}", func.name);
    let (spills, assignment) = regalloc::run(&mut mfunc, options.target);
    debug!(target: "pipeline", "coalesce {}", func.name);
    regalloc::coalesce::run(&mut mfunc, options.target, &assignment);

    debug!(target: "pipeline", "frame {}", func.name);
    frame::run(&mut mfunc, options.target, spills, max_outgoing_arg_bytes);

    if options.optimize_level != OptimizeLevel::O0 {
        debug!(target: "pipeline", "peephole {}", func.name);
        peephole::run(&mut mfunc);
    }

    debug!(target: "pipeline", "emit {}", func.name);
    emit::emit_function(&mfunc)
}

fn syntax_diagnostic(options: &CodegenOptions) -> String {
    if options.att_syntax {
        String::new()
    } else {
        warn!("non-AT&T syntax was requested but is not supported; emitting AT&T syntax");
        "warning: non-AT&T syntax was requested but is not supported; emitting AT&T syntax\n".to_string()
    }
}

/// Translate every function in `module` to assembly, in declaration order,
/// separated by a blank line, followed by the module's interned read-only
/// data.
pub fn emit_module(module: &ILModule, options: &CodegenOptions) -> EmitOutput {
    let mut rodata = RoDataPool::new();
    let mut diagnostics = syntax_diagnostic(options);

    let mut bodies = Vec::with_capacity(module.functions.len());
    for func in &module.functions {
        bodies.push(compile_function(func, options, &mut rodata));
    }

    let mut assembly_text = bodies.join("\n");
    let rodata_text = rodata.emit();
    if !rodata_text.is_empty() {
        if !assembly_text.is_empty() {
            assembly_text.push('\n');
        }
        assembly_text.push_str(&rodata_text);
    }

    if !module.globals.is_empty() {
        diagnostics.push_str(&format!(
            "note: {} module-level string global(s) are not yet materialized by this backend\n",
            module.globals.len()
        ));
    }

    EmitOutput { assembly_text, diagnostics }
}

/// Convenience wrapper around [`emit_module`] for a single function.
pub fn emit_function(function: &ILFunction, options: &CodegenOptions) -> EmitOutput {
    let mut rodata = RoDataPool::new();
    let diagnostics = syntax_diagnostic(options);
    let mut assembly_text = compile_function(function, options, &mut rodata);
    let rodata_text = rodata.emit();
    if !rodata_text.is_empty() {
        assembly_text.push('\n');
        assembly_text.push_str(&rodata_text);
    }
    EmitOutput { assembly_text, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use il::{ILInstr, ILKind, ILValue};

    /// End-to-end scenario 1 from the design document: `add(%0, %1) -> i64;
    /// ret`.
    #[test]
    fn add_return_emits_expected_fragments() {
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

        let options = CodegenOptions::default();
        let out = emit_function(&func, &options);
        assert!(out.diagnostics.is_empty());
        assert!(out.assembly_text.contains(".globl add"));
        assert!(out.assembly_text.contains("addq"));
        assert!(out.assembly_text.contains("ret"));
    }

    #[test]
    fn non_att_syntax_request_produces_a_warning_but_still_emits() {
        let mut func = ILFunction::new("f");
        func.blocks[0].instrs.push(ILInstr::no_result("ret", vec![ILValue::imm_i64(0)]));
        let mut options = CodegenOptions::default();
        options.att_syntax = false;
        let out = emit_function(&func, &options);
        assert!(out.diagnostics.contains("AT&T"));
        assert!(out.assembly_text.contains("ret"));
    }
}
