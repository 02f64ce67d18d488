//! Tracepoint and raw-tracepoint context access.
//!
//! A regular (`BPF_PROG_TYPE_TRACEPOINT`) program receives a pointer into
//! the kernel's per-tracepoint format buffer — field offsets come from
//! `/sys/kernel/debug/tracing/events/<cat>/<name>/format` and are therefore
//! not a fixed table (spec §9 explicitly drops the static tracepoint-format
//! catalog as a Non-goal); callers supply their own offsets.
//!
//! A raw tracepoint (`BPF_PROG_TYPE_RAW_TRACEPOINT`) instead receives
//! `struct bpf_raw_tracepoint_args { __u64 args[]; }` — the tracepoint's
//! original typed arguments, unconverted, which *is* a fixed, arch-
//! independent layout.

use crate::dsl::Assembler;
use crate::insn::Width;

pub struct TracepointContext;

impl TracepointContext {
    /// Read a field at a caller-supplied `(offset, width)` — there is no
    /// fixed table here, see module docs.
    pub fn load_field(asm: &mut Assembler, ctx_reg: u8, dst: u8, offset: i16, width: Width) -> &mut Assembler {
        asm.load(width, dst, ctx_reg, offset)
    }
}

pub struct RawTracepointContext;

impl RawTracepointContext {
    pub fn load_arg(asm: &mut Assembler, ctx_reg: u8, dst: u8, n: u16) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, (n as i16) * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tracepoint_args_are_eight_bytes_apart() {
        let mut asm = Assembler::new();
        RawTracepointContext::load_arg(&mut asm, 1, 2, 0);
        RawTracepointContext::load_arg(&mut asm, 1, 3, 1);
        asm.exit();
        let assembled = asm.assemble().unwrap();
        assert_eq!(assembled.insn_count, 3);
    }
}
