//! Userspace library for authoring, loading, and operating Linux eBPF
//! programs without a precompiled native helper: an in-process instruction
//! assembler, the raw `bpf()`/`perf_event_open()` syscall plumbing, map and
//! BTF/CO-RE support, netlink- and perf-based attach, and mmap ring
//! consumers — the whole path from "a sequence of BPF instructions" to
//! "events flowing out of the kernel", with no dependency on libbpf, clang,
//! or an ELF object file.
//!
//! Start at [`dsl::Assembler`] to build a program, [`loader::LoadedProgram`]
//! to load it, one of the [`attach`] submodules to wire it to a kernel hook,
//! and [`ringbuf`]/[`perfbuf`] to read back what it produces.

pub mod arch;
pub mod attach;
pub mod attr;
pub mod btf;
pub mod consts;
pub mod dsl;
pub mod error;
pub mod handle;
pub mod helpers;
pub mod insn;
pub mod loader;
pub mod map;
pub mod perfbuf;
pub mod prog_types;
pub mod ringbuf;
pub mod sys;

pub use error::{Error, Result};
