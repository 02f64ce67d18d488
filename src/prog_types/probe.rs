//! kprobe/kretprobe/uprobe/uretprobe context access: both program types are
//! handed the architecture's raw `struct pt_regs` as their context, so
//! argument/return-value access is entirely arch-dependent — this is where
//! [`crate::arch::PT_REGS`] gets used.

use crate::arch::PT_REGS;
use crate::dsl::Assembler;
use crate::insn::Width;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProbeKind {
    Kprobe,
    Kretprobe,
    Uprobe,
    Uretprobe,
}

/// `pt_regs`-backed context, shared by all four probe kinds: a kretprobe or
/// uretprobe only differs from its entry counterpart in *which* helper
/// attaches it (`perf_event_open` with `kretprobe`/`retprobe` set), not in
/// context layout.
pub struct ProbeContext;

impl ProbeContext {
    /// Load the `n`th (0-indexed, up to 6) calling-convention argument
    /// register into `dst`.
    pub fn load_arg(asm: &mut Assembler, ctx_reg: u8, dst: u8, n: usize) -> &mut Assembler {
        let off = PT_REGS.arg_offsets[n] as i16;
        asm.load(Width::Dw, dst, ctx_reg, off)
    }

    /// Load the return value register (valid only in a kretprobe/uretprobe
    /// context) into `dst`.
    pub fn load_ret(asm: &mut Assembler, ctx_reg: u8, dst: u8) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, PT_REGS.ret_offset as i16)
    }

    pub fn load_ip(asm: &mut Assembler, ctx_reg: u8, dst: u8) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, PT_REGS.ip_offset as i16)
    }

    pub fn load_sp(asm: &mut Assembler, ctx_reg: u8, dst: u8) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, PT_REGS.sp_offset as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Assembler;

    #[test]
    fn loading_six_args_does_not_panic() {
        let mut asm = Assembler::new();
        for n in 0..6 {
            ProbeContext::load_arg(&mut asm, 1, 2, n);
        }
        asm.exit();
        assert!(asm.assemble().is_ok());
    }
}
