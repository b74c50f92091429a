//! Target description: per-ABI static records consumed by call lowering,
//! frame lowering, and register allocation.
//!
//! Grounded on `cranelift-codegen::isa::call_conv` (the `CallConv` enum and
//! `triple_default` dispatch on `target_lexicon::Triple`) and on the design
//! note in `spec.md` §9 recommending free functions over singletons:
//! `sysv_target()` / `win64_target()` / `host_target()` return references to
//! immutable, lazily-built statics rather than a process-wide mutable
//! singleton.

use crate::mir::PhysReg;
use std::sync::OnceLock;
use target_lexicon::{OperatingSystem, Triple};

/// Which ABI a target description describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// System V AMD64 ABI (Linux, macOS, *BSD).
    SystemV,
    /// Windows x64 ("fastcall") ABI.
    WindowsFastcall,
}

/// A static description of an ABI's register usage and call-boundary
/// contract.
#[derive(Debug, Clone)]
pub struct TargetDescription {
    /// Which calling convention this description implements.
    pub call_conv: CallConv,
    /// Caller-saved GPRs, in the order the allocator should prefer handing
    /// them out (least likely to need restoring first).
    pub caller_saved_gpr: Vec<PhysReg>,
    /// Callee-saved GPRs.
    pub callee_saved_gpr: Vec<PhysReg>,
    /// Caller-saved XMMs.
    pub caller_saved_xmm: Vec<PhysReg>,
    /// Callee-saved XMMs (empty for SysV and Win64: all XMMs are
    /// caller-saved under both ABIs covered here).
    pub callee_saved_xmm: Vec<PhysReg>,
    /// Order in which integer/pointer arguments are assigned to registers.
    pub int_arg_order: Vec<PhysReg>,
    /// Order in which float arguments are assigned to registers.
    pub float_arg_order: Vec<PhysReg>,
    /// Register used to return an integer/pointer value.
    pub int_return_reg: PhysReg,
    /// Register used to return a float value.
    pub float_return_reg: PhysReg,
    /// Required stack alignment (bytes) at a `CALL` instruction.
    pub stack_alignment: i32,
    /// Whether the ABI guarantees a red zone below `%rsp`. Not relied upon
    /// by this backend (spec.md §4.5 always reserves space explicitly), but
    /// recorded for completeness.
    pub has_red_zone: bool,
    /// Maximum register-passed arguments per class.
    pub max_reg_args_per_class: usize,
    /// Bytes of shadow space the caller must reserve below the return
    /// address before register-passed arguments (32 for Win64, 0 for
    /// SysV).
    pub shadow_space_bytes: i32,
}

fn sysv() -> TargetDescription {
    use PhysReg::*;
    TargetDescription {
        call_conv: CallConv::SystemV,
        // Order chosen so volatile scratch regs are handed out before the
        // allocator needs to start spilling across calls.
        caller_saved_gpr: vec![Rax, Rcx, Rdx, Rsi, Rdi, R8, R9, R10, R11],
        callee_saved_gpr: vec![Rbx, R12, R13, R14, R15],
        caller_saved_xmm: vec![
            Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7, Xmm8, Xmm9, Xmm10, Xmm11, Xmm12,
            Xmm13, Xmm14, Xmm15,
        ],
        callee_saved_xmm: vec![],
        int_arg_order: vec![Rdi, Rsi, Rdx, Rcx, R8, R9],
        float_arg_order: vec![Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7],
        int_return_reg: Rax,
        float_return_reg: Xmm0,
        stack_alignment: 16,
        has_red_zone: true,
        max_reg_args_per_class: 6,
        shadow_space_bytes: 0,
    }
}

fn win64() -> TargetDescription {
    use PhysReg::*;
    TargetDescription {
        call_conv: CallConv::WindowsFastcall,
        caller_saved_gpr: vec![Rax, Rcx, Rdx, R8, R9, R10, R11],
        callee_saved_gpr: vec![Rbx, Rsi, Rdi, R12, R13, R14, R15],
        caller_saved_xmm: vec![Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5],
        callee_saved_xmm: vec![Xmm6, Xmm7, Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15],
        int_arg_order: vec![Rcx, Rdx, R8, R9],
        float_arg_order: vec![Xmm0, Xmm1, Xmm2, Xmm3],
        int_return_reg: Rax,
        float_return_reg: Xmm0,
        stack_alignment: 16,
        has_red_zone: false,
        max_reg_args_per_class: 4,
        shadow_space_bytes: 32,
    }
}

static SYSV: OnceLock<TargetDescription> = OnceLock::new();
static WIN64: OnceLock<TargetDescription> = OnceLock::new();

/// The SysV AMD64 ABI target description.
pub fn sysv_target() -> &'static TargetDescription {
    SYSV.get_or_init(sysv)
}

/// The Windows x64 ABI target description.
pub fn win64_target() -> &'static TargetDescription {
    WIN64.get_or_init(win64)
}

/// The target description for the host this backend is compiled for.
/// Falls back to SysV for any host whose default calling convention isn't
/// Windows Fastcall, matching
/// `cranelift-codegen::isa::call_conv::CallConv::triple_default`'s "default
/// to System V for unknown targets" rule.
pub fn host_target() -> &'static TargetDescription {
    let triple = Triple::host();
    match triple.operating_system {
        OperatingSystem::Windows => win64_target(),
        _ => sysv_target(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysv_has_six_int_arg_regs() {
        assert_eq!(sysv_target().int_arg_order.len(), 6);
        assert_eq!(sysv_target().float_arg_order.len(), 8);
        assert_eq!(sysv_target().shadow_space_bytes, 0);
    }

    #[test]
    fn win64_has_shadow_space() {
        assert_eq!(win64_target().int_arg_order.len(), 4);
        assert_eq!(win64_target().shadow_space_bytes, 32);
    }

    #[test]
    fn targets_are_stable_singletons() {
        let a = sysv_target() as *const TargetDescription;
        let b = sysv_target() as *const TargetDescription;
        assert_eq!(a, b);
    }
}
