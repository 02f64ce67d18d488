//! The BPF helper-function catalog: stable numeric IDs (`BPF_FUNC_*` in
//! `linux/bpf.h`) callers use to build `Insn::Call` instructions, paired
//! with the kernel version each helper first became available in. This is
//! deliberately a short, commonly-used subset rather than the full few
//! hundred helpers the kernel defines — spec's Non-goals exclude a
//! generated/exhaustive helper table, but a hand-curated one of the helpers
//! every program type in this crate actually needs is in scope.

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Helper {
    pub id: i32,
    pub name: &'static str,
    /// `(major, minor)` of the kernel release that introduced this helper.
    pub since: (u8, u8),
}

macro_rules! helper {
    ($id:expr, $name:ident, $since:expr) => {
        pub const $name: Helper = Helper { id: $id, name: stringify!($name), since: $since };
    };
}

helper!(1, BPF_MAP_LOOKUP_ELEM, (3, 18));
helper!(2, BPF_MAP_UPDATE_ELEM, (3, 19));
helper!(3, BPF_MAP_DELETE_ELEM, (3, 19));
helper!(4, BPF_PROBE_READ, (4, 1));
helper!(5, BPF_KTIME_GET_NS, (4, 1));
helper!(6, BPF_TRACE_PRINTK, (4, 1));
helper!(8, BPF_GET_CURRENT_PID_TGID, (4, 2));
helper!(9, BPF_GET_CURRENT_UID_GID, (4, 2));
helper!(10, BPF_GET_CURRENT_COMM, (4, 2));
helper!(14, BPF_GET_SMP_PROCESSOR_ID, (4, 1));
helper!(18, BPF_PERF_EVENT_OUTPUT, (4, 4));
helper!(23, BPF_GET_CURRENT_TASK, (4, 8));
helper!(25, BPF_PERF_EVENT_READ_VALUE, (4, 15));
helper!(26, BPF_PERF_PROG_READ_VALUE, (4, 15));
helper!(28, BPF_GET_STACKID, (4, 6));
helper!(36, BPF_REDIRECT, (4, 4));
helper!(44, BPF_XDP_ADJUST_HEAD, (4, 10));
helper!(65, BPF_XDP_ADJUST_TAIL, (4, 18));
helper!(67, BPF_SKB_CHANGE_TAIL, (4, 8));
helper!(90, BPF_RINGBUF_OUTPUT, (5, 8));
helper!(91, BPF_RINGBUF_RESERVE, (5, 8));
helper!(92, BPF_RINGBUF_SUBMIT, (5, 8));
helper!(93, BPF_RINGBUF_DISCARD, (5, 8));
helper!(125, BPF_PROBE_READ_USER, (5, 10));
helper!(126, BPF_PROBE_READ_KERNEL, (5, 10));
helper!(127, BPF_PROBE_READ_USER_STR, (5, 10));
helper!(128, BPF_PROBE_READ_KERNEL_STR, (5, 10));

pub fn is_available(helper: Helper, kernel_version: (u8, u8)) -> bool {
    kernel_version >= helper.since
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ringbuf_helpers_require_5_8() {
        assert!(!is_available(BPF_RINGBUF_OUTPUT, (5, 7)));
        assert!(is_available(BPF_RINGBUF_OUTPUT, (5, 8)));
    }

    #[test]
    fn ids_match_documented_bpf_func_numbers() {
        assert_eq!(BPF_MAP_LOOKUP_ELEM.id, 1);
        assert_eq!(BPF_PERF_EVENT_OUTPUT.id, 18);
    }
}
