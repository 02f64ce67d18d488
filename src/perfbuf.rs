//! `BPF_MAP_TYPE_PERF_EVENT_ARRAY` consumer: one `perf_event_open` + mmap
//! ring per CPU, each read with `PERF_RECORD_SAMPLE`/`PERF_RECORD_LOST`
//! framing, specialized to `bpf_perf_event_output()` submissions rather
//! than raw counting/sampling events.

use std::sync::atomic::{fence, Ordering};

use log::debug;

use crate::error::{MapError, Result};

const PERF_RECORD_SAMPLE: u32 = 9;
const PERF_RECORD_LOST: u32 = 2;

#[repr(C)]
struct PerfEventMmapPage {
    version: u32,
    compat_version: u32,
    lock: u32,
    index: u32,
    offset: i64,
    time_enabled: u64,
    time_running: u64,
    _capabilities: u64,
    _pad: [u64; 9],
    data_head: u64,
    data_tail: u64,
    data_offset: u64,
    data_size: u64,
    aux_head: u64,
    aux_tail: u64,
    aux_offset: u64,
    aux_size: u64,
}

pub struct PerfBuffer {
    base: *mut libc::c_void,
    map_len: usize,
    data_size: u64,
    fd: std::os::unix::io::RawFd,
}

unsafe impl Send for PerfBuffer {}

/// One parsed event out of the ring: a raw BPF sample payload, or a report
/// of how many samples were dropped due to buffer pressure.
pub enum PerfEvent {
    Sample(Vec<u8>),
    Lost { count: u64 },
}

impl PerfBuffer {
    pub fn open(fd: std::os::unix::io::RawFd, page_count: usize) -> Result<Self> {
        assert!(page_count.is_power_of_two(), "perf buffer page count must be a power of two");
        let page_size = page_size::get();
        let map_len = page_size * (1 + page_count);

        let base = unsafe {
            libc::mmap(std::ptr::null_mut(), map_len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
        };
        if base == libc::MAP_FAILED {
            return Err(MapError::Other(nix::errno::Errno::last()).into());
        }
        let metadata = unsafe { &*(base as *const PerfEventMmapPage) };
        Ok(PerfBuffer { base, map_len, data_size: metadata.data_size, fd })
    }

    fn metadata(&self) -> &PerfEventMmapPage {
        unsafe { &*(self.base as *const PerfEventMmapPage) }
    }

    fn data(&self) -> *const u8 {
        unsafe { (self.base as *const u8).add(self.metadata().data_offset as usize) }
    }

    fn head(&self) -> u64 {
        fence(Ordering::Acquire);
        self.metadata().data_head
    }

    fn set_tail(&self, tail: u64) {
        fence(Ordering::Release);
        unsafe {
            (*(self.base as *mut PerfEventMmapPage)).data_tail = tail;
        }
    }

    pub fn consume(&self, mut f: impl FnMut(PerfEvent)) -> usize {
        let head = self.head();
        let mut tail = self.metadata().data_tail;
        let mut n = 0usize;

        while tail < head {
            let offset = (tail % self.data_size) as usize;
            let header = unsafe {
                let p = self.data().add(offset) as *const u64;
                std::ptr::read_volatile(p)
            };
            let record_type = (header & 0xffff_ffff) as u32;
            let size = ((header >> 32) & 0xffff) as u64;
            if size == 0 {
                break; // malformed/empty record, avoid an infinite loop
            }

            match record_type {
                PERF_RECORD_SAMPLE => {
                    // struct { perf_event_header hdr; u32 size; char data[]; }
                    let payload_off = offset + 12;
                    let payload_len_bytes = unsafe {
                        let p = self.data().add(offset + 8) as *const u32;
                        std::ptr::read_volatile(p) as usize
                    };
                    let slice = unsafe { std::slice::from_raw_parts(self.data().add(payload_off), payload_len_bytes) };
                    f(PerfEvent::Sample(slice.to_vec()));
                }
                PERF_RECORD_LOST => {
                    let count = unsafe {
                        let p = self.data().add(offset + 16) as *const u64;
                        std::ptr::read_volatile(p)
                    };
                    debug!("perf buffer lost {count} samples");
                    f(PerfEvent::Lost { count });
                }
                _ => {}
            }

            tail += size;
            n += 1;
        }

        if n > 0 {
            self.set_tail(tail);
        }
        n
    }
}

impl Drop for PerfBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.map_len);
        }
        let _ = self.fd;
    }
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "power of two")]
    fn open_rejects_non_power_of_two_page_count() {
        let _ = super::PerfBuffer::open(-1, 3);
    }
}
