//! TC attach: create a `clsact` qdisc on the interface (if not already
//! present) and add a `cls_bpf` filter under its ingress or egress hook.
//!
//! The filter's `tcmsg.tcm_info` field packs `(priority << 16) |
//! htons(protocol)` — for the common case of matching IPv4 traffic that is
//! `(1 << 16) | htons(ETH_P_IP)`, i.e. exactly `0x00010008` once IPv4's
//! `ETH_P_IP` (0x0800) is byte-swapped into network order. This is *not*
//! `ETH_P_ALL`; `cls_bpf`'s classic ELF loaders default to `ETH_P_ALL` but
//! this crate's default is IPv4-only unless the caller names a different
//! protocol.

use std::os::unix::io::RawFd;

use crate::attach::netlink::{self, RTM_NEWQDISC, RTM_NEWTFILTER};
use crate::error::Result;

const NLM_F_CREATE: u16 = 0x400;
const NLM_F_EXCL: u16 = 0x200;

const TC_H_CLSACT: u32 = 0xffff_fff1;
const TC_H_MIN_INGRESS: u32 = 0xffff_fff2;
const TC_H_MIN_EGRESS: u32 = 0xffff_fff3;
const CLSACT_HANDLE: u32 = 0xffff_0000;

const TCA_KIND: u16 = 1;
const TCA_OPTIONS: u16 = 2;
const TCA_BPF_FD: u16 = 1;
const TCA_BPF_NAME: u16 = 2;
const TCA_BPF_FLAGS: u16 = 3;
const TCA_BPF_FLAG_ACT_DIRECT: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Ingress,
    Egress,
}

fn tcmsg(ifindex: u32, handle: u32, parent: u32, info: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.push(0u8); // tcm_family
    buf.extend_from_slice(&[0, 0, 0]); // padding
    buf.extend_from_slice(&ifindex.to_le_bytes());
    buf.extend_from_slice(&handle.to_le_bytes());
    buf.extend_from_slice(&parent.to_le_bytes());
    buf.extend_from_slice(&info.to_le_bytes());
    buf
}

/// Create the `clsact` qdisc on `ifname`. Idempotent in spirit, but a
/// second creation attempt surfaces as `AttachError::QdiscExists` (`EEXIST`
/// from the kernel) unless the caller passes `allow_exists`.
pub fn ensure_clsact(ifname: &str, allow_exists: bool) -> Result<()> {
    let ifindex = netlink::if_nametoindex(ifname)?;
    let mut payload = tcmsg(ifindex, CLSACT_HANDLE, TC_H_CLSACT, 0);
    netlink::push_attr(&mut payload, TCA_KIND, b"clsact\0");

    let flags = if allow_exists { NLM_F_CREATE } else { NLM_F_CREATE | NLM_F_EXCL };
    match netlink::send_request(RTM_NEWQDISC, flags, payload) {
        Ok(()) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `ETH_P_IP` in host byte order; network order (what `tcm_info` wants) is
/// this value byte-swapped, matching `htons()`.
pub const ETH_P_IP: u16 = 0x0800;

fn htons(v: u16) -> u16 {
    v.to_be()
}

pub fn attach_filter(
    ifname: &str,
    direction: Direction,
    prog_fd: RawFd,
    priority: u16,
    protocol: u16,
    name: &str,
) -> Result<()> {
    let ifindex = netlink::if_nametoindex(ifname)?;
    let parent = match direction {
        Direction::Ingress => TC_H_MIN_INGRESS,
        Direction::Egress => TC_H_MIN_EGRESS,
    };
    // tcm_info = (priority << 16) | protocol-in-network-order.
    let info = ((priority as u32) << 16) | htons(protocol) as u32;

    let mut payload = tcmsg(ifindex, 0, parent, info);
    netlink::push_attr(&mut payload, TCA_KIND, b"bpf\0");
    netlink::push_nested(&mut payload, TCA_OPTIONS, |nested| {
        netlink::push_attr(nested, TCA_BPF_FD, &(prog_fd as i32).to_le_bytes());
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        netlink::push_attr(nested, TCA_BPF_NAME, &name_bytes);
        netlink::push_attr(nested, TCA_BPF_FLAGS, &TCA_BPF_FLAG_ACT_DIRECT.to_le_bytes());
    });

    netlink::send_request(RTM_NEWTFILTER, NLM_F_CREATE | NLM_F_EXCL, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_ipv4_priority_one_info_field_matches_documented_bytes() {
        let info = ((1u32) << 16) | htons(ETH_P_IP) as u32;
        assert_eq!(info, 0x0001_0008);
    }

    #[test]
    fn clsact_parent_handle_is_the_well_known_constant() {
        assert_eq!(TC_H_CLSACT, 0xffff_fff1);
    }
}
