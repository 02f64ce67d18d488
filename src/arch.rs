//! Per-architecture facts the rest of the crate needs: the `bpf()` syscall
//! number and the `pt_regs` field offsets kprobe/uprobe context readers use
//! to pull arguments and the return value off a trapped register snapshot.
//!
//! Selected at compile time with `#[cfg(target_arch = "...")]` rather than a
//! `build.rs` probe — there is exactly one fixed table per architecture, no
//! host inspection is needed to pick it.

/// Offsets (in bytes) into the kernel's `struct pt_regs` for the registers
/// the BPF context helpers care about: the syscall/function argument
/// registers in calling-convention order, the stack pointer, and the
/// instruction pointer used to compute `PT_REGS_IP`.
#[derive(Debug, Clone, Copy)]
pub struct PtRegsLayout {
    pub arg_offsets: [usize; 6],
    pub ret_offset: usize,
    pub sp_offset: usize,
    pub ip_offset: usize,
    pub size: usize,
}

#[cfg(target_arch = "x86_64")]
pub const PT_REGS: PtRegsLayout = PtRegsLayout {
    // struct pt_regs { r15,r14,r13,r12,bp,bx,r11,r10,r9,r8,ax,cx,dx,si,di,
    //                  orig_ax,ip,cs,flags,sp,ss }
    arg_offsets: [112, 104, 96, 88, 72, 64], // di, si, dx, cx, r8, r9
    ret_offset: 80,                          // ax
    sp_offset: 152,
    ip_offset: 128,
    size: 168,
};

#[cfg(target_arch = "aarch64")]
pub const PT_REGS: PtRegsLayout = PtRegsLayout {
    // struct user_pt_regs { u64 regs[31]; u64 sp; u64 pc; u64 pstate; }
    arg_offsets: [0, 8, 16, 24, 32, 40], // x0..x5
    ret_offset: 0,                       // x0
    sp_offset: 248,
    ip_offset: 256,
    size: 272,
};

#[cfg(target_arch = "s390x")]
pub const PT_REGS: PtRegsLayout = PtRegsLayout {
    // struct user_pt_regs { psw_mask, psw_addr, gprs[16], acrs[16], orig_gpr2 }
    arg_offsets: [32, 40, 48, 56, 64, 72], // gprs[2..8)
    ret_offset: 32,                       // gprs[2]
    sp_offset: 136,                       // gprs[15]
    ip_offset: 8,                         // psw_addr
    size: 208,
};

#[cfg(target_arch = "powerpc64")]
pub const PT_REGS: PtRegsLayout = PtRegsLayout {
    // struct pt_regs { gpr[32]; nip; msr; ... } little-endian (ppc64le)
    arg_offsets: [24, 32, 40, 48, 56, 64], // gpr[3..9)
    ret_offset: 24,                       // gpr[3]
    sp_offset: 8,                         // gpr[1]
    ip_offset: 256,                       // nip
    size: 376,
};

#[cfg(target_arch = "riscv64")]
pub const PT_REGS: PtRegsLayout = PtRegsLayout {
    // struct user_regs_struct { pc, ra, sp, gp, tp, t0-2, s0-1, a0-7, ... }
    arg_offsets: [80, 88, 96, 104, 112, 120], // a0..a5
    ret_offset: 80,                           // a0
    sp_offset: 16,
    ip_offset: 0,
    size: 256,
};

/// The `__NR_bpf` syscall number for the target architecture, used directly
/// by `sys::bpf()` rather than looked up at runtime.
#[cfg(target_arch = "x86_64")]
pub const SYS_BPF: i64 = 321;
#[cfg(target_arch = "aarch64")]
pub const SYS_BPF: i64 = 280;
#[cfg(target_arch = "s390x")]
pub const SYS_BPF: i64 = 351;
#[cfg(target_arch = "powerpc64")]
pub const SYS_BPF: i64 = 361;
#[cfg(target_arch = "riscv64")]
pub const SYS_BPF: i64 = 280;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "s390x",
    target_arch = "powerpc64",
    target_arch = "riscv64"
)))]
compile_error!("bpf-toolkit has no pt_regs/syscall table for this architecture");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_internally_consistent() {
        assert!(PT_REGS.ret_offset < PT_REGS.size);
        assert!(PT_REGS.sp_offset < PT_REGS.size);
        assert!(PT_REGS.ip_offset < PT_REGS.size);
        for off in PT_REGS.arg_offsets {
            assert!(off < PT_REGS.size);
        }
    }
}
