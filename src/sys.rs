//! The `bpf()` syscall multiplexer. Every BPF command funnels through the
//! raw `bpf()` call below and is classified into a specific error variant
//! from the returned errno.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use log::{debug, warn};
use nix::errno::Errno;

use crate::arch::SYS_BPF;
use crate::attr::{
    IterCreateAttr, LinkCreateAttr, MapBatchAttr, MapCreateAttr, MapElemAttr, ObjGetAttr,
    ObjPinAttr, ProgAttachAttr, ProgLoadAttr,
};
use crate::consts::{BpfCmd, DEFAULT_LOG_BUF_SIZE};
use crate::error::{BpfCmdName, Error, Result, VerifierErrorKind};

/// Raw `bpf(2)` invocation: `cmd` selects which `bpf_attr` union member
/// `attr` points to, `size` is `size_of_val(attr)`. Every public function in
/// this module is a thin, specifically-typed wrapper around this one call.
unsafe fn raw_bpf(cmd: BpfCmd, attr: *const u8, size: u32) -> Result<RawFd> {
    let ret = libc::syscall(SYS_BPF as libc::c_long, cmd as libc::c_long, attr, size);
    if ret < 0 {
        let errno = Errno::last();
        debug!("bpf({cmd}) failed: {errno}");
        return Err(Error::syscall(cmd_name(cmd), errno));
    }
    Ok(ret as RawFd)
}

fn cmd_name(cmd: BpfCmd) -> BpfCmdName {
    match cmd {
        BpfCmd::MapCreate => BpfCmdName::MapCreate,
        BpfCmd::MapLookupElem => BpfCmdName::MapLookupElem,
        BpfCmd::MapUpdateElem => BpfCmdName::MapUpdateElem,
        BpfCmd::MapDeleteElem => BpfCmdName::MapDeleteElem,
        BpfCmd::MapGetNextKey => BpfCmdName::MapGetNextKey,
        BpfCmd::MapLookupAndDeleteElem => BpfCmdName::MapLookupAndDeleteElem,
        BpfCmd::MapLookupBatch => BpfCmdName::MapLookupBatch,
        BpfCmd::MapUpdateBatch => BpfCmdName::MapUpdateBatch,
        BpfCmd::MapLookupAndDeleteBatch => BpfCmdName::MapLookupAndDeleteBatch,
        BpfCmd::ProgLoad => BpfCmdName::ProgLoad,
        BpfCmd::ObjPin => BpfCmdName::ObjPin,
        BpfCmd::ObjGet => BpfCmdName::ObjGet,
        BpfCmd::ProgAttach => BpfCmdName::ProgAttach,
        BpfCmd::ProgDetach => BpfCmdName::ProgDetach,
        BpfCmd::LinkCreate => BpfCmdName::LinkCreate,
        BpfCmd::IterCreate => BpfCmdName::IterCreate,
        BpfCmd::MapDeleteBatch | BpfCmd::LinkUpdate => BpfCmdName::ProgAttach,
    }
}

pub fn map_create(attr: &MapCreateAttr) -> Result<RawFd> {
    unsafe {
        raw_bpf(
            BpfCmd::MapCreate,
            attr as *const _ as *const u8,
            std::mem::size_of::<MapCreateAttr>() as u32,
        )
    }
}

pub fn map_lookup_elem(map_fd: RawFd, key: *const u8, value: *mut u8) -> Result<()> {
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        key: key as u64,
        value_or_next_key: value as u64,
        flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::MapLookupElem,
            &attr as *const _ as *const u8,
            std::mem::size_of::<MapElemAttr>() as u32,
        )?;
    }
    Ok(())
}

pub fn map_update_elem(map_fd: RawFd, key: *const u8, value: *const u8, flags: u64) -> Result<()> {
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        key: key as u64,
        value_or_next_key: value as u64,
        flags,
    };
    unsafe {
        raw_bpf(
            BpfCmd::MapUpdateElem,
            &attr as *const _ as *const u8,
            std::mem::size_of::<MapElemAttr>() as u32,
        )?;
    }
    Ok(())
}

pub fn map_delete_elem(map_fd: RawFd, key: *const u8) -> Result<()> {
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        key: key as u64,
        value_or_next_key: 0,
        flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::MapDeleteElem,
            &attr as *const _ as *const u8,
            std::mem::size_of::<MapElemAttr>() as u32,
        )?;
    }
    Ok(())
}

/// Returns `Ok(false)` on `ENOENT` (end of iteration) rather than an error,
/// matching `BPF_MAP_GET_NEXT_KEY`'s documented use as an iterator cursor.
pub fn map_get_next_key(map_fd: RawFd, key: Option<*const u8>, next_key: *mut u8) -> Result<bool> {
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        key: key.map(|k| k as u64).unwrap_or(0),
        value_or_next_key: next_key as u64,
        flags: 0,
    };
    let res = unsafe {
        raw_bpf(
            BpfCmd::MapGetNextKey,
            &attr as *const _ as *const u8,
            std::mem::size_of::<MapElemAttr>() as u32,
        )
    };
    match res {
        Ok(_) => Ok(true),
        Err(Error::Syscall { errno: Errno::ENOENT, .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// `BPF_MAP_LOOKUP_AND_DELETE_ELEM`: pops the value for `key` (or, for
/// `BPF_MAP_TYPE_QUEUE`/`STACK` where there is no key space, whatever
/// element the map type's pop order yields when `key` is null), removing it
/// atomically. The primitive Queue/Stack handles are built on this rather
/// than a separate lookup-then-delete round trip.
pub fn map_lookup_and_delete_elem(map_fd: RawFd, key: Option<*const u8>, value: *mut u8) -> Result<()> {
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        key: key.map(|k| k as u64).unwrap_or(0),
        value_or_next_key: value as u64,
        flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::MapLookupAndDeleteElem,
            &attr as *const _ as *const u8,
            std::mem::size_of::<MapElemAttr>() as u32,
        )?;
    }
    Ok(())
}

pub fn map_lookup_and_delete_batch(attr: &MapBatchAttr) -> Result<u32> {
    let out = unsafe {
        raw_bpf(
            BpfCmd::MapLookupAndDeleteBatch,
            attr as *const _ as *const u8,
            std::mem::size_of::<MapBatchAttr>() as u32,
        )
    };
    match out {
        Ok(_) => Ok(attr.count),
        Err(Error::Syscall { errno: Errno::ENOENT, .. }) => Ok(attr.count),
        Err(e) => Err(e),
    }
}

pub fn map_lookup_batch(attr: &MapBatchAttr) -> Result<u32> {
    let out = unsafe {
        raw_bpf(
            BpfCmd::MapLookupBatch,
            attr as *const _ as *const u8,
            std::mem::size_of::<MapBatchAttr>() as u32,
        )
    };
    match out {
        Ok(_) => Ok(attr.count),
        // A partial batch completes with ENOENT once the map is exhausted;
        // `attr.count` has already been updated in place by the kernel.
        Err(Error::Syscall { errno: Errno::ENOENT, .. }) => Ok(attr.count),
        Err(e) => Err(e),
    }
}

pub fn map_update_batch(attr: &MapBatchAttr) -> Result<()> {
    unsafe {
        raw_bpf(
            BpfCmd::MapUpdateBatch,
            attr as *const _ as *const u8,
            std::mem::size_of::<MapBatchAttr>() as u32,
        )?;
    }
    Ok(())
}

/// Outcome of `BPF_PROG_LOAD`: the program fd plus whatever the verifier
/// wrote to the log buffer, even on success (useful for diagnosing stalls).
pub struct LoadOutcome {
    pub prog_fd: RawFd,
    pub verifier_log: String,
}

pub fn prog_load(
    prog_type: u32,
    expected_attach_type: u32,
    insns: &[u8],
    license: &str,
    prog_name: &str,
    kern_version: u32,
) -> Result<LoadOutcome> {
    let license_c = CString::new(license).unwrap_or_default();
    let mut log_buf = vec![0u8; DEFAULT_LOG_BUF_SIZE];
    let mut name_bytes = [0u8; 16];
    let n = prog_name.as_bytes().len().min(15);
    name_bytes[..n].copy_from_slice(&prog_name.as_bytes()[..n]);

    let attr = ProgLoadAttr {
        prog_type,
        insn_cnt: (insns.len() / crate::insn::INSN_SIZE) as u32,
        insns: insns.as_ptr() as u64,
        license: license_c.as_ptr() as u64,
        log_level: 1,
        log_size: log_buf.len() as u32,
        log_buf: log_buf.as_mut_ptr() as u64,
        kern_version,
        expected_attach_type,
        ..ProgLoadAttr::default()
    };

    let result = unsafe {
        raw_bpf(
            BpfCmd::ProgLoad,
            &attr as *const _ as *const u8,
            std::mem::size_of::<ProgLoadAttr>() as u32,
        )
    };

    let log_end = log_buf.iter().position(|&b| b == 0).unwrap_or(log_buf.len());
    let verifier_log = String::from_utf8_lossy(&log_buf[..log_end]).into_owned();

    match result {
        Ok(fd) => Ok(LoadOutcome { prog_fd: fd, verifier_log }),
        Err(Error::Syscall { errno, .. }) => {
            let kind = VerifierErrorKind::classify(&verifier_log);
            warn!("verifier rejected program {prog_name:?} ({kind:?}): {errno}");
            Err(Error::Verifier { kind, errno, log: verifier_log })
        }
        Err(e) => Err(e),
    }
}

pub fn obj_pin(fd: RawFd, path: &str) -> Result<()> {
    let path_c = CString::new(path).map_err(|_| Error::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
    let attr = ObjPinAttr {
        pathname: path_c.as_ptr() as u64,
        bpf_fd: fd as u32,
        file_flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::ObjPin,
            &attr as *const _ as *const u8,
            std::mem::size_of::<ObjPinAttr>() as u32,
        )?;
    }
    Ok(())
}

/// `BPF_OBJ_GET`: opens a new fd onto whatever was pinned at `path` by a
/// prior `obj_pin` call, in this process or another one entirely.
pub fn obj_get(path: &str) -> Result<RawFd> {
    let path_c = CString::new(path).map_err(|_| Error::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
    let attr = ObjGetAttr {
        pathname: path_c.as_ptr() as u64,
        bpf_fd: 0,
        file_flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::ObjGet,
            &attr as *const _ as *const u8,
            std::mem::size_of::<ObjGetAttr>() as u32,
        )
    }
}

pub fn prog_attach(target_fd: RawFd, prog_fd: RawFd, attach_type: u32, flags: u32) -> Result<()> {
    let attr = ProgAttachAttr {
        target_fd: target_fd as u32,
        attach_bpf_fd: prog_fd as u32,
        attach_type,
        attach_flags: flags,
        replace_bpf_fd: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::ProgAttach,
            &attr as *const _ as *const u8,
            std::mem::size_of::<ProgAttachAttr>() as u32,
        )?;
    }
    Ok(())
}

pub fn prog_detach(target_fd: RawFd, attach_type: u32) -> Result<()> {
    let attr = ProgAttachAttr {
        target_fd: target_fd as u32,
        attach_bpf_fd: 0,
        attach_type,
        attach_flags: 0,
        replace_bpf_fd: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::ProgDetach,
            &attr as *const _ as *const u8,
            std::mem::size_of::<ProgAttachAttr>() as u32,
        )?;
    }
    Ok(())
}

/// `BPF_LINK_CREATE`, used by the fentry/fexit/fmod_ret/raw_tracepoint/iter
/// attach paths that use the bpf_link object instead of `PROG_ATTACH`.
pub fn link_create(prog_fd: RawFd, target_fd: RawFd, attach_type: u32) -> Result<RawFd> {
    let attr = LinkCreateAttr {
        prog_fd: prog_fd as u32,
        target_fd: target_fd as u32,
        attach_type,
        flags: 0,
    };
    unsafe {
        raw_bpf(
            BpfCmd::LinkCreate,
            &attr as *const _ as *const u8,
            std::mem::size_of::<LinkCreateAttr>() as u32,
        )
    }
}

/// `BPF_ITER_CREATE`: turns a `BPF_LINK_CREATE`d iterator link into a
/// readable fd whose `read(2)`s yield the iterator program's output.
pub fn iter_create(link_fd: RawFd) -> Result<RawFd> {
    let attr = IterCreateAttr { link_fd: link_fd as u32, flags: 0 };
    unsafe {
        raw_bpf(
            BpfCmd::IterCreate,
            &attr as *const _ as *const u8,
            std::mem::size_of::<IterCreateAttr>() as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_name_covers_every_dispatched_command() {
        for cmd in [
            BpfCmd::MapCreate,
            BpfCmd::ProgLoad,
            BpfCmd::ProgAttach,
            BpfCmd::LinkCreate,
            BpfCmd::MapLookupAndDeleteElem,
            BpfCmd::ObjGet,
            BpfCmd::IterCreate,
        ] {
            let _ = cmd_name(cmd); // must not panic
        }
    }
}
