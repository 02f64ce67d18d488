//! XDP attach: `RTM_SETLINK` carrying a nested `IFLA_XDP` attribute with
//! `IFLA_XDP_FD` (and `IFLA_XDP_FLAGS` for mode selection). The nested
//! attribute's type field must carry `NLA_F_NESTED` (0x8000) or the kernel
//! rejects the request outright.

use std::os::unix::io::RawFd;

use crate::attach::netlink::{self, RTM_SETLINK};
use crate::consts::{ifla_xdp, XdpFlags};
use crate::error::Result;

const IFLA_IFNAME: u16 = 3;

pub fn attach(ifname: &str, prog_fd: RawFd, flags: XdpFlags) -> Result<()> {
    let ifindex = netlink::if_nametoindex(ifname)?;

    // ifinfomsg: family(1) + pad(1) + type(2) + index(4) + flags(4) + change(4)
    let mut payload = Vec::with_capacity(16);
    payload.push(0u8); // AF_UNSPEC
    payload.push(0u8); // pad
    payload.extend_from_slice(&0u16.to_le_bytes()); // ifi_type
    payload.extend_from_slice(&ifindex.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // ifi_flags
    payload.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // ifi_change: all bits

    netlink::push_attr(&mut payload, IFLA_IFNAME, ifname.as_bytes());

    netlink::push_nested(&mut payload, ifla_xdp::IFLA_XDP | ifla_xdp::NLA_F_NESTED, |nested| {
        netlink::push_attr(nested, ifla_xdp::IFLA_XDP_FD, &(prog_fd as i32).to_le_bytes());
        if !flags.is_empty() {
            netlink::push_attr(nested, ifla_xdp::IFLA_XDP_FLAGS, &flags.bits().to_le_bytes());
        }
    });

    netlink::send_request(RTM_SETLINK, 0, payload)
}

pub fn detach(ifname: &str) -> Result<()> {
    let ifindex = netlink::if_nametoindex(ifname)?;
    let mut payload = Vec::with_capacity(16);
    payload.push(0u8);
    payload.push(0u8);
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&ifindex.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&0xffff_ffffu32.to_le_bytes());

    netlink::push_nested(&mut payload, ifla_xdp::IFLA_XDP | ifla_xdp::NLA_F_NESTED, |nested| {
        // fd = -1 detaches any currently-attached program.
        netlink::push_attr(nested, ifla_xdp::IFLA_XDP_FD, &(-1i32).to_le_bytes());
    });

    netlink::send_request(RTM_SETLINK, 0, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdp_fd_attribute_carries_nested_bit_in_container() {
        let mut payload = Vec::new();
        netlink::push_nested(&mut payload, ifla_xdp::IFLA_XDP | ifla_xdp::NLA_F_NESTED, |nested| {
            netlink::push_attr(nested, ifla_xdp::IFLA_XDP_FD, &3i32.to_le_bytes());
        });
        let ty = u16::from_le_bytes([payload[2], payload[3]]);
        assert_eq!(ty & ifla_xdp::NLA_F_NESTED, ifla_xdp::NLA_F_NESTED);
    }
}
