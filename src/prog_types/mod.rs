//! Program-type DSL modules: one submodule per attach-context family, each
//! describing the context struct layout the kernel hands that program type,
//! a prologue/epilogue builder that reads it into general-purpose
//! registers, and the section-name/return-code conventions libbpf-style
//! loaders expect. Kernel structs are described by hand rather than bound
//! from a header, same approach as the rest of this crate's ABI layer.

pub mod other;
pub mod probe;
pub mod tc;
pub mod tracepoint;
pub mod xdp;

pub use other::{
    FlowDissectorContext, PerfEventContext, SkLookupContext, SkMsgContext, SkSkbContext,
    SocketFilterContext, TracingContext,
};
pub use probe::{ProbeContext, ProbeKind};
pub use tc::TcContext;
pub use tracepoint::{RawTracepointContext, TracepointContext};
pub use xdp::XdpContext;

use crate::consts::ProgType;

/// Canonical return-code convention each program type's epilogue assumes is
/// already in `r0` before `exit` — used by DSL builders that auto-append a
/// default epilogue (e.g. "accept" for socket filters, `XDP_PASS` for XDP).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DefaultVerdict {
    Constant(i64),
    /// Program type has no canonical default; caller must set r0 itself.
    None,
}

pub fn default_verdict(prog_type: ProgType) -> DefaultVerdict {
    use crate::consts::{TcAction, XdpAction};
    match prog_type {
        ProgType::Xdp => DefaultVerdict::Constant(XdpAction::Pass as i64),
        ProgType::SchedCls | ProgType::SchedAct => DefaultVerdict::Constant(TcAction::Ok as i64),
        ProgType::SocketFilter => DefaultVerdict::Constant(u32::MAX as i64), // accept whole packet
        ProgType::Kprobe | ProgType::Tracepoint | ProgType::RawTracepoint | ProgType::PerfEvent => {
            DefaultVerdict::Constant(0)
        }
        _ => DefaultVerdict::None,
    }
}
