//! The remaining program-type families, grouped together since each one's
//! context handling is a single context-register read rather than a rich
//! struct layout: `PERF_EVENT`, `SOCKET_FILTER`, `SK_LOOKUP`,
//! `FLOW_DISSECTOR`, `TRACE_ITER`, `TRACING` (fentry/fexit/fmod_ret),
//! `STRUCT_OPS`, `SK_SKB`, `SK_MSG`.

use crate::dsl::Assembler;
use crate::insn::Width;

/// `bpf_perf_event_data`: `{ struct pt_regs regs; __u64 sample_period; __u64 addr; }`.
/// Only `sample_period`'s offset is architecture-independent (it sits right
/// after the embedded `pt_regs`); callers needing register fields use
/// [`super::probe::ProbeContext`] against the same context pointer, offset
/// by zero (the struct embeds `pt_regs` at offset 0).
pub struct PerfEventContext;

impl PerfEventContext {
    pub fn load_sample_period(asm: &mut Assembler, ctx_reg: u8, dst: u8) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, crate::arch::PT_REGS.size as i16)
    }
}

/// Classic `struct sk_buff`-backed socket filter context: same `data`/
/// `data_end` shape as TC's `__sk_buff` (socket filters are handed the
/// legacy raw packet view, not `__sk_buff`, but this crate exposes only the
/// two offsets callers need for bounds-checked reads).
pub struct SocketFilterContext;

impl SocketFilterContext {
    pub const LEN: i16 = 0;
}

/// `struct bpf_sk_lookup` — used by `BPF_PROG_TYPE_SK_LOOKUP` to redirect
/// inbound connections to a chosen socket.
pub struct SkLookupContext;

impl SkLookupContext {
    pub const FAMILY: i16 = 0;
    pub const PROTOCOL: i16 = 4;
    pub const REMOTE_IP4: i16 = 8;
    pub const LOCAL_IP4: i16 = 24;
    pub const REMOTE_PORT: i16 = 40;
    pub const LOCAL_PORT: i16 = 44;
}

/// `struct __sk_buff`-backed flow dissector context: fields used for custom
/// flow key extraction (`FLOW_DISSECTOR` programs write a `bpf_flow_keys`
/// result rather than returning a verdict).
pub struct FlowDissectorContext;

impl FlowDissectorContext {
    pub const DATA: i16 = 76;
    pub const DATA_END: i16 = 80;
    pub const FLOW_KEYS: i16 = 112;
}

/// fentry/fexit/fmod_ret (`BPF_PROG_TYPE_TRACING`) receive the traced
/// function's arguments directly as `u64[]`, same layout as a raw
/// tracepoint's `args[]`; fexit additionally appends the return value as
/// one more `u64` slot.
pub struct TracingContext;

impl TracingContext {
    pub fn load_arg(asm: &mut Assembler, ctx_reg: u8, dst: u8, n: u16) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, (n as i16) * 8)
    }

    pub fn load_retval(asm: &mut Assembler, ctx_reg: u8, dst: u8, argc: u16) -> &mut Assembler {
        asm.load(Width::Dw, dst, ctx_reg, (argc as i16) * 8)
    }
}

/// `SK_SKB`/`SK_MSG` share `__sk_buff`'s layout for the fields sockmap
/// programs actually touch.
pub struct SkSkbContext;
impl SkSkbContext {
    pub const LEN: i16 = 0;
    pub const DATA: i16 = 76;
    pub const DATA_END: i16 = 80;
}

pub struct SkMsgContext;
impl SkMsgContext {
    pub const DATA: i16 = 0;
    pub const DATA_END: i16 = 8;
    pub const FAMILY: i16 = 16;
}

/// `STRUCT_OPS` and `TRACE_ITER` programs don't have a fixed context
/// struct at all — `struct_ops` receives whatever the implemented kernel
/// struct's member function signature declares, and an iterator program
/// receives `struct bpf_iter__<target>` generated per target type. Neither
/// has a crate-wide fixed layout; both are represented purely by their
/// `ProgType`/`AttachType` pairing, loaded and attached like any other
/// program once the caller supplies the right raw context offsets.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sk_lookup_ports_are_four_bytes() {
        assert_eq!(SkLookupContext::LOCAL_PORT - SkLookupContext::REMOTE_PORT, 4);
    }
}
