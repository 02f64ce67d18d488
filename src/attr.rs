//! Hand-written kernel ABI structs for the `bpf()` syscall's tagged-union
//! `union bpf_attr`, and the `perf_event_open()` attribute struct, written
//! out by hand since this crate has no `build.rs`/bindgen step.
//!
//! Each `bpf_attr` variant is its own plain `#[repr(C)]` struct; `sys::bpf()`
//! picks the right one per command and reads back only the fields that
//! command can have mutated, the same "one struct per command" shape raw
//! `libbpf_sys` callers use directly against `bpf_attr.__bindgen_anon_N`.

#![allow(non_camel_case_types)]

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MapCreateAttr {
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub map_flags: u32,
    pub inner_map_fd: u32,
    pub numa_node: u32,
    pub map_name: [u8; 16],
    pub map_ifindex: u32,
    pub btf_fd: u32,
    pub btf_key_type_id: u32,
    pub btf_value_type_id: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MapElemAttr {
    pub map_fd: u32,
    pub key: u64,
    pub value_or_next_key: u64,
    pub flags: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MapBatchAttr {
    pub in_batch: u64,
    pub out_batch: u64,
    pub keys: u64,
    pub values: u64,
    pub count: u32,
    pub map_fd: u32,
    pub elem_flags: u64,
    pub flags: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProgLoadAttr {
    pub prog_type: u32,
    pub insn_cnt: u32,
    pub insns: u64,
    pub license: u64,
    pub log_level: u32,
    pub log_size: u32,
    pub log_buf: u64,
    pub kern_version: u32,
    pub prog_flags: u32,
    pub prog_name: [u8; 16],
    pub prog_ifindex: u32,
    pub expected_attach_type: u32,
    pub prog_btf_fd: u32,
    pub func_info_rec_size: u32,
    pub func_info: u64,
    pub func_info_cnt: u32,
    pub line_info_rec_size: u32,
    pub line_info: u64,
    pub line_info_cnt: u32,
    pub attach_btf_id: u32,
    pub attach_prog_fd: u32,
}

impl Default for ProgLoadAttr {
    fn default() -> Self {
        // SAFETY: every field of this struct is a plain integer/handle with
        // an all-zero valid representation.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjPinAttr {
    pub pathname: u64,
    pub bpf_fd: u32,
    pub file_flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjGetAttr {
    pub pathname: u64,
    pub bpf_fd: u32,
    pub file_flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct IterCreateAttr {
    pub link_fd: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgAttachAttr {
    pub target_fd: u32,
    pub attach_bpf_fd: u32,
    pub attach_type: u32,
    pub attach_flags: u32,
    pub replace_bpf_fd: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkCreateAttr {
    pub prog_fd: u32,
    pub target_fd: u32,
    pub attach_type: u32,
    pub flags: u32,
}

/// `perf_event_open(2)`'s attribute struct, trimmed to the fields this
/// crate actually sets (sampling is out of scope). Field order and sizes
/// follow `linux/perf_event.h`'s `perf_event_attr` exactly up through
/// `bp_type` (`type_`, `size`, `config`, ...).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
}

bitflags::bitflags! {
    /// `perf_event_attr.flags` bitfield (disabled/inherit/exclude_*).
    pub struct PerfFlags: u64 {
        const DISABLED       = 1 << 0;
        const INHERIT        = 1 << 1;
        const PINNED         = 1 << 2;
        const EXCLUSIVE      = 1 << 3;
        const EXCLUDE_USER   = 1 << 4;
        const EXCLUDE_KERNEL = 1 << 5;
        const EXCLUDE_HV     = 1 << 6;
        const EXCLUDE_IDLE   = 1 << 7;
        const MMAP           = 1 << 8;
        const COMM           = 1 << 9;
        const WATERMARK      = 1 << 18;
    }
}

pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prog_load_attr_is_eight_byte_aligned() {
        // `bpf_attr` variants are passed to the kernel by raw pointer;
        // misalignment here would silently corrupt every `u64` field.
        assert_eq!(std::mem::align_of::<ProgLoadAttr>(), 8);
        assert_eq!(std::mem::size_of::<ProgLoadAttr>() % 8, 0);
    }

    #[test]
    fn map_create_attr_name_field_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of_val(&MapCreateAttr::default().map_name), 16);
    }
}
