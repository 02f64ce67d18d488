//! Program loader: takes assembled instructions plus a program-type
//! descriptor and turns them into a loaded, fd-backed `bpf_prog`, folding
//! verifier log capture/classification into the returned error the way
//! `fd.rs`'s `OpenError` folds every `perf_event_open` errno into a
//! specific, documented variant.

use std::os::unix::io::{AsRawFd, RawFd};

use log::info;

use crate::attach::TcDirection;
use crate::consts::ProgType;
use crate::error::Result;
use crate::sys;

#[derive(Debug, Clone)]
pub struct ProgramSpec {
    pub prog_type: ProgType,
    pub expected_attach_type: u32,
    pub name: String,
    pub license: String,
    /// 0 lets the kernel skip the version check on kernels that don't
    /// require it (5.x+); only `ProgType::Kprobe`-style attaches on very
    /// old kernels need a real `LINUX_VERSION_CODE` here.
    pub kern_version: u32,
}

impl Default for ProgramSpec {
    fn default() -> Self {
        ProgramSpec {
            prog_type: ProgType::SocketFilter,
            expected_attach_type: 0,
            name: String::new(),
            license: "GPL".to_string(),
            kern_version: 0,
        }
    }
}

pub struct LoadedProgram {
    fd: RawFd,
    pub spec: ProgramSpec,
    pub verifier_log: String,
}

impl LoadedProgram {
    pub fn load(spec: ProgramSpec, insns: &[u8]) -> Result<Self> {
        let outcome = sys::prog_load(
            spec.prog_type as u32,
            spec.expected_attach_type,
            insns,
            &spec.license,
            &spec.name,
            spec.kern_version,
        )?;
        info!(
            "loaded program {:?} (type={:?}, fd={})",
            spec.name, spec.prog_type, outcome.prog_fd
        );
        Ok(LoadedProgram { fd: outcome.prog_fd, spec, verifier_log: outcome.verifier_log })
    }

    pub fn pin(&self, path: &str) -> Result<()> {
        sys::obj_pin(self.fd, path)
    }
}

impl AsRawFd for LoadedProgram {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for LoadedProgram {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Canonical section-name prefix a program's ELF-style section name would
/// carry under libbpf convention, used only for human-facing naming (this
/// crate emits instructions directly, it never parses or produces ELF);
/// kept so a bare `ProgramSpec::name` reads the way a libbpf user expects
/// even without an attach-point suffix.
pub fn section_name_prefix(prog_type: ProgType) -> &'static str {
    match prog_type {
        ProgType::Xdp => "xdp",
        ProgType::SchedCls => "tc",
        ProgType::SchedAct => "action",
        ProgType::Kprobe => "kprobe",
        ProgType::Tracepoint => "tracepoint",
        ProgType::RawTracepoint => "raw_tracepoint",
        ProgType::PerfEvent => "perf_event",
        ProgType::SocketFilter => "socket",
        ProgType::SkLookup => "sk_lookup",
        ProgType::FlowDissector => "flow_dissector",
        ProgType::Tracing => "fentry",
        ProgType::StructOps => "struct_ops",
        ProgType::SkSkb => "sk_skb",
        ProgType::SkMsg => "sk_msg",
        _ => "prog",
    }
}

/// Full libbpf-convention section name for a TC classifier/action,
/// e.g. `tc/ingress/eth0`.
pub fn section_name_tc(direction: TcDirection, iface: &str) -> String {
    let dir = match direction {
        TcDirection::Ingress => "ingress",
        TcDirection::Egress => "egress",
    };
    format!("tc/{dir}/{iface}")
}

/// `kprobe/<symbol>` (or `kretprobe/<symbol>` for a return probe).
pub fn section_name_kprobe(symbol: &str, is_return: bool) -> String {
    if is_return {
        format!("kretprobe/{symbol}")
    } else {
        format!("kprobe/{symbol}")
    }
}

/// `uprobe/<lib>:<symbol>` (or `uretprobe/<lib>:<symbol>`).
pub fn section_name_uprobe(lib: &str, symbol: &str, is_return: bool) -> String {
    if is_return {
        format!("uretprobe/{lib}:{symbol}")
    } else {
        format!("uprobe/{lib}:{symbol}")
    }
}

/// `tracepoint/<category>/<name>`.
pub fn section_name_tracepoint(category: &str, name: &str) -> String {
    format!("tracepoint/{category}/{name}")
}

/// `raw_tracepoint/<name>`.
pub fn section_name_raw_tracepoint(name: &str) -> String {
    format!("raw_tracepoint/{name}")
}

/// `iter/<btf-type>`, the section name a `BPF_PROG_TYPE_TRACING` iterator
/// program attaches under (e.g. `iter/task`, `iter/bpf_map`).
pub fn section_name_iter(btf_type: &str) -> String {
    format!("iter/{btf_type}")
}

/// `struct_ops/<struct>/<member>`.
pub fn section_name_struct_ops(struct_name: &str, member: &str) -> String {
    format!("struct_ops/{struct_name}/{member}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_prefix_matches_libbpf_convention_for_xdp() {
        assert_eq!(section_name_prefix(ProgType::Xdp), "xdp");
    }

    #[test]
    fn default_spec_uses_gpl_license() {
        assert_eq!(ProgramSpec::default().license, "GPL");
    }

    #[test]
    fn formats_tc_section_name() {
        assert_eq!(section_name_tc(TcDirection::Ingress, "eth0"), "tc/ingress/eth0");
        assert_eq!(section_name_tc(TcDirection::Egress, "eth0"), "tc/egress/eth0");
    }

    #[test]
    fn formats_kprobe_and_uprobe_section_names() {
        assert_eq!(section_name_kprobe("sys_execve", false), "kprobe/sys_execve");
        assert_eq!(section_name_kprobe("sys_execve", true), "kretprobe/sys_execve");
        assert_eq!(section_name_uprobe("libc.so.6", "malloc", false), "uprobe/libc.so.6:malloc");
        assert_eq!(section_name_uprobe("libc.so.6", "malloc", true), "uretprobe/libc.so.6:malloc");
    }

    #[test]
    fn formats_tracepoint_and_struct_ops_section_names() {
        assert_eq!(section_name_tracepoint("sched", "sched_switch"), "tracepoint/sched/sched_switch");
        assert_eq!(section_name_iter("task"), "iter/task");
        assert_eq!(section_name_struct_ops("tcp_congestion_ops", "ssthresh"), "struct_ops/tcp_congestion_ops/ssthresh");
    }
}
