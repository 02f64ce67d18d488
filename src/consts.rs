//! Kernel UAPI constants: `bpf()` commands, map/program/attach types, and
//! the small action enums (`XDP_*`, `TC_ACT_*`). Hand-written against
//! `linux/bpf.h` rather than bindgen'd, matching the pattern other members
//! of the retrieval pack use for `ProgramType`/`ProgramAttachType`
//! (`libbpf-rs`'s `program.rs`): `#[repr(u32)]` enums with `TryFromPrimitive`
//! so an unrecognized value from a newer kernel fails softly instead of
//! panicking.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum BpfCmd {
    MapCreate = 0,
    MapLookupElem = 1,
    MapUpdateElem = 2,
    MapDeleteElem = 3,
    MapGetNextKey = 4,
    ProgLoad = 5,
    ObjPin = 6,
    ObjGet = 7,
    ProgAttach = 8,
    ProgDetach = 9,
    MapLookupAndDeleteElem = 21,
    MapLookupBatch = 17,
    MapLookupAndDeleteBatch = 18,
    MapUpdateBatch = 19,
    MapDeleteBatch = 20,
    LinkCreate = 28,
    LinkUpdate = 29,
    IterCreate = 33,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum MapType {
    Unspec = 0,
    Hash = 1,
    Array = 2,
    ProgArray = 3,
    PerfEventArray = 4,
    PerCpuHash = 5,
    PerCpuArray = 6,
    StackTrace = 7,
    CgroupArray = 8,
    LruHash = 9,
    LruPerCpuHash = 10,
    LpmTrie = 11,
    ArrayOfMaps = 12,
    HashOfMaps = 13,
    DevMap = 14,
    SockMap = 15,
    CpuMap = 16,
    XskMap = 17,
    SockHash = 18,
    Queue = 22,
    Stack = 23,
    RingBuf = 27,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum ProgType {
    Unspec = 0,
    SocketFilter = 1,
    Kprobe = 2,
    SchedCls = 3,
    SchedAct = 4,
    Tracepoint = 5,
    Xdp = 6,
    PerfEvent = 7,
    CgroupSkb = 8,
    CgroupSock = 9,
    LwtIn = 10,
    LwtOut = 11,
    LwtXmit = 12,
    SockOps = 13,
    SkSkb = 14,
    CgroupDevice = 15,
    SkMsg = 16,
    RawTracepoint = 17,
    CgroupSockAddr = 18,
    LwtSeg6Local = 19,
    LircMode2 = 20,
    SkReuseport = 21,
    FlowDissector = 22,
    CgroupSysctl = 23,
    RawTracepointWritable = 24,
    CgroupSockopt = 25,
    Tracing = 26,
    StructOps = 27,
    Ext = 28,
    Lsm = 29,
    SkLookup = 30,
    Syscall = 31,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum AttachType {
    CgroupInetIngress = 0,
    CgroupInetEgress = 1,
    CgroupInetSockCreate = 2,
    CgroupSockOps = 3,
    SkSkbStreamParser = 4,
    SkSkbStreamVerdict = 5,
    CgroupDevice = 6,
    SkMsgVerdict = 7,
    CgroupInet4Bind = 8,
    CgroupInet6Bind = 9,
    CgroupInet4Connect = 10,
    CgroupInet6Connect = 11,
    CgroupInet4PostBind = 12,
    CgroupInet6PostBind = 13,
    CgroupUdp4Sendmsg = 14,
    CgroupUdp6Sendmsg = 15,
    LircMode2 = 16,
    FlowDissector = 17,
    TraceRawTp = 18,
    TraceFentry = 19,
    TraceFexit = 20,
    ModifyReturn = 21,
    LsmMac = 22,
    TraceIter = 23,
    CgroupUdp4Recvmsg = 24,
    CgroupUdp6Recvmsg = 25,
    XdpInvalid = 26,
    SkLookup = 27,
    Xdp = 28,
    SkSkbVerdict = 29,
    SkReuseportSelect = 30,
    SkReuseportSelectOrMigrate = 31,
    PerfEvent = 41,
}

bitflags::bitflags! {
    /// Flags for `BPF_PROG_LOAD` (`bpf_attr.prog_flags`).
    pub struct ProgFlags: u32 {
        const STRICT_ALIGNMENT   = 1 << 0;
        const ANY_ALIGNMENT      = 1 << 1;
        const TEST_RND_HI32      = 1 << 2;
        const TEST_STATE_FREQ    = 1 << 3;
        const SLEEPABLE          = 1 << 4;
        const XDP_HAS_FRAGS      = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Flags for `BPF_MAP_CREATE` (`bpf_attr.map_flags`).
    pub struct MapFlags: u32 {
        const NO_PREALLOC     = 1 << 0;
        const NO_COMMON_LRU   = 1 << 1;
        const NUMA_NODE       = 1 << 2;
        const RDONLY          = 1 << 3;
        const WRONLY          = 1 << 4;
        const MMAPABLE        = 1 << 10;
        const RDONLY_PROG     = 1 << 11;
        const WRONLY_PROG     = 1 << 12;
    }
}

bitflags::bitflags! {
    /// `IFLA_XDP_FLAGS` passed through netlink when attaching XDP.
    pub struct XdpFlags: u32 {
        const UPDATE_IF_NOEXIST = 1 << 0;
        const SKB_MODE          = 1 << 1;
        const DRV_MODE          = 1 << 2;
        const HW_MODE           = 1 << 3;
        const REPLACE           = 1 << 4;
    }
}

/// Return codes an XDP program may produce (`enum xdp_action`).
#[repr(i64)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum XdpAction {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
}

/// Return codes a classic `SCHED_CLS`/`SCHED_ACT` program may produce.
#[repr(i64)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Display)]
pub enum TcAction {
    Unspec = -1,
    Ok = 0,
    Reclassify = 1,
    Shot = 2,
    Pipe = 3,
    Stolen = 4,
    Queued = 5,
    Repeat = 6,
    Redirect = 7,
    Trap = 8,
}

/// Kernel-wide `IFLA_XDP` nested attribute numbers used by the netlink
/// attach path — lives here rather than in `attach::netlink` since it is a
/// plain UAPI constant like the rest of this module.
pub mod ifla_xdp {
    pub const IFLA_XDP: u16 = 43;
    pub const IFLA_XDP_FD: u16 = 1;
    pub const IFLA_XDP_ATTACHED: u16 = 2;
    pub const IFLA_XDP_FLAGS: u16 = 3;
    pub const IFLA_XDP_PROG_ID: u16 = 4;
    /// Set on any `IFLA_XDP` attribute per RFC 3549 nested-attribute
    /// convention — required for the kernel to descend into it at all.
    pub const NLA_F_NESTED: u16 = 0x8000;
}

pub const BPF_TAG_SIZE: usize = 8;
/// Default verifier log buffer size requested on `BPF_PROG_LOAD`.
pub const DEFAULT_LOG_BUF_SIZE: usize = 16 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn roundtrips_through_primitive() {
        let x = ProgType::Xdp;
        let raw: u32 = x.into();
        assert_eq!(raw, 6);
        assert_eq!(ProgType::try_from(raw).unwrap(), ProgType::Xdp);
    }

    #[test]
    fn unknown_prog_type_fails_softly() {
        assert!(ProgType::try_from(9999u32).is_err());
    }

    #[test]
    fn xdp_nested_bit_is_set_in_constant() {
        assert_eq!(ifla_xdp::NLA_F_NESTED, 0x8000);
    }
}
