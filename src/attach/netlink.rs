//! Minimal `NETLINK_ROUTE` request encoding: just enough `nlmsghdr`/
//! `ifinfomsg`/`rtattr` framing to drive `RTM_SETLINK` (XDP attach) and
//! `RTM_NEWQDISC`/`RTM_NEWTFILTER` (TC attach). Hand-encoded the same way
//! `attr.rs`/`btf.rs` hand-encode their kernel ABI structs rather than
//! through a netlink builder crate, using [`netlink_sys::Socket`] only for
//! the transport.
//!
//! Every attribute is padded to a 4-byte boundary per `NLA_ALIGNTO`, and
//! nested attributes (e.g. the `IFLA_XDP` container) carry
//! `NLA_F_NESTED` (0x8000) in their type field, per RFC 3549 §2.2.

use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use crate::error::{AttachError, Result};

const NLM_F_REQUEST: u16 = 0x01;
const NLM_F_ACK: u16 = 0x04;
const NLM_F_CREATE: u16 = 0x400;
const NLM_F_EXCL: u16 = 0x200;

pub const RTM_SETLINK: u16 = 19;
pub const RTM_NEWQDISC: u16 = 36;
pub const RTM_NEWTFILTER: u16 = 44;

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Append one `rtattr { len, type }` + payload, left-padded to 4 bytes.
pub fn push_attr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
    let len = 4 + payload.len();
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&attr_type.to_le_bytes());
    buf.extend_from_slice(payload);
    let padded = align4(len);
    buf.resize(buf.len() + (padded - len), 0);
}

/// Append a nested attribute container: `len` covers everything written by
/// `build_nested`, and `attr_type` must already carry `NLA_F_NESTED` if the
/// caller wants the nested bit set (XDP's does; TC's options attribute
/// does not need it in the same way since `cls_bpf`'s options aren't a
/// generic nest).
pub fn push_nested(buf: &mut Vec<u8>, attr_type: u16, build_nested: impl FnOnce(&mut Vec<u8>)) {
    let len_pos = buf.len();
    buf.extend_from_slice(&[0, 0]); // length placeholder
    buf.extend_from_slice(&attr_type.to_le_bytes());
    let body_start = buf.len();
    build_nested(buf);
    let total_len = buf.len() - len_pos;
    buf[len_pos..len_pos + 2].copy_from_slice(&(total_len as u16).to_le_bytes());
    let padded = align4(total_len);
    buf.resize(len_pos + padded, 0);
    let _ = body_start;
}

/// Build an `nlmsghdr` + payload and send it over a fresh `NETLINK_ROUTE`
/// socket, reading back exactly one ack/error message (requests here never
/// need `NLM_F_DUMP` multipart replies).
pub fn send_request(msg_type: u16, mut flags: u16, payload: Vec<u8>) -> Result<()> {
    flags |= NLM_F_REQUEST | NLM_F_ACK;
    let mut buf = Vec::with_capacity(16 + payload.len());
    let total_len = (16 + payload.len()) as u32;
    buf.extend_from_slice(&total_len.to_le_bytes());
    buf.extend_from_slice(&msg_type.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes()); // sequence number
    buf.extend_from_slice(&0u32.to_le_bytes()); // port id, kernel assigns
    buf.extend_from_slice(&payload);

    let io_err = |e: std::io::Error| -> crate::error::Error {
        let errno = e
            .raw_os_error()
            .map(nix::errno::Errno::from_i32)
            .unwrap_or(nix::errno::Errno::EIO);
        AttachError::Netlink(errno).into()
    };

    let mut sock = Socket::new(NETLINK_ROUTE).map_err(io_err)?;
    sock.connect(&SocketAddr::new(0, 0)).map_err(io_err)?;
    sock.send(&buf, 0).map_err(io_err)?;

    let mut reply = vec![0u8; 4096];
    let n = sock.recv(&mut &mut reply[..], 0).map_err(io_err)?;
    parse_ack(&reply[..n])
}

fn parse_ack(data: &[u8]) -> Result<()> {
    if data.len() < 16 {
        return Err(AttachError::Netlink(nix::errno::Errno::EIO).into());
    }
    let msg_type = u16::from_le_bytes([data[4], data[5]]);
    if msg_type == NLMSG_ERROR {
        let errno = i32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        if errno == 0 {
            return Ok(());
        }
        let errno = nix::errno::Errno::from_i32(-errno);
        return Err(AttachError::Netlink(errno).into());
    }
    if msg_type == NLMSG_DONE || msg_type == 0 {
        return Ok(());
    }
    Ok(())
}

pub fn qdisc_exists_error() -> crate::error::Error {
    AttachError::QdiscExists.into()
}

/// `libc::if_nametoindex`, wrapped so attach callers get a typed error
/// instead of a bare errno.
pub fn if_nametoindex(name: &str) -> Result<u32> {
    let c = std::ffi::CString::new(name).map_err(|_| AttachError::InterfaceNotFound(name.to_string()))?;
    let idx = unsafe { libc::if_nametoindex(c.as_ptr()) };
    if idx == 0 {
        Err(AttachError::InterfaceNotFound(name.to_string()).into())
    } else {
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_attr_pads_to_four_bytes() {
        let mut buf = Vec::new();
        push_attr(&mut buf, 1, &[0xaa]); // len = 4+1 = 5, padded to 8
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn push_nested_records_total_length_including_children() {
        let mut buf = Vec::new();
        push_nested(&mut buf, 0x8000 | 43, |b| {
            push_attr(b, 1, &7u32.to_le_bytes());
        });
        let len = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(len as usize, 4 + 8); // header + one padded child attr
    }

    #[test]
    fn nested_type_carries_nla_f_nested_bit() {
        let mut buf = Vec::new();
        push_nested(&mut buf, 0x8000 | 43, |_| {});
        let ty = u16::from_le_bytes([buf[2], buf[3]]);
        assert_eq!(ty & 0x8000, 0x8000);
    }
}
