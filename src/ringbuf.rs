//! `BPF_MAP_TYPE_RING_BUF` consumer: a single-producer/single-consumer mmap
//! ring shared with the kernel, read with plain `fence(Ordering::Acquire/
//! Release)` pairs around the raw `libc::mmap`/`libc::munmap`'d region
//! rather than a `Stream` impl — this crate polls on a plain thread, see
//! [`crate::handle`].
//!
//! The data region is mapped twice back to back at consecutive virtual
//! addresses (`page_count * page_size` each), so a record that wraps past
//! the end of the first mapping is still readable as one contiguous slice
//! starting into the second mapping.

use std::sync::atomic::{fence, Ordering};

use log::debug;

use crate::error::{MapError, Result};

const BPF_RINGBUF_BUSY_BIT: u32 = 1 << 31;
const BPF_RINGBUF_DISCARD_BIT: u32 = 1 << 30;
const HDR_LEN_MASK: u32 = !(BPF_RINGBUF_BUSY_BIT | BPF_RINGBUF_DISCARD_BIT);

/// Kernel's `struct bpf_ringbuf` consumer-page layout: `consumer_pos` alone
/// occupies the first page, `producer_pos` plus the data region occupy the
/// pages that follow.
#[repr(C)]
struct ConsumerPage {
    consumer_pos: u64,
}

#[repr(C)]
struct ProducerPage {
    producer_pos: u64,
}

pub struct RingBuffer {
    consumer_map: *mut libc::c_void,
    producer_map: *mut libc::c_void,
    consumer_map_len: usize,
    producer_map_len: usize,
    data_mask: u64,
    fd: std::os::unix::io::RawFd,
}

unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// `data_pages` must be a power of two (asserted, matching the kernel's
    /// own requirement that a ring buffer map's `max_entries` be a
    /// power-of-two number of pages).
    pub fn open(fd: std::os::unix::io::RawFd, data_pages: usize) -> Result<Self> {
        assert!(data_pages.is_power_of_two(), "ring buffer byte size must be a power of two number of pages");
        let page_size = page_size::get();

        let consumer_map_len = page_size;
        let producer_map_len = page_size + data_pages * page_size;

        let consumer_map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                consumer_map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if consumer_map == libc::MAP_FAILED {
            return Err(MapError::Other(nix::errno::Errno::last()).into());
        }

        // The producer page + data region is mapped twice consecutively so
        // a wrapping record reads as one contiguous slice; see module docs.
        let double_len = producer_map_len * 2 - page_size;
        let producer_map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                double_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                page_size as libc::off_t,
            )
        };
        if producer_map == libc::MAP_FAILED {
            unsafe {
                libc::munmap(consumer_map, consumer_map_len);
            }
            return Err(MapError::Other(nix::errno::Errno::last()).into());
        }

        Ok(RingBuffer {
            consumer_map,
            producer_map,
            consumer_map_len,
            producer_map_len: double_len,
            data_mask: (data_pages * page_size) as u64 - 1,
            fd,
        })
    }

    fn consumer_pos(&self) -> u64 {
        unsafe { (*(self.consumer_map as *const ConsumerPage)).consumer_pos }
    }

    fn set_consumer_pos(&self, pos: u64) {
        unsafe {
            (*(self.consumer_map as *mut ConsumerPage)).consumer_pos = pos;
        }
        fence(Ordering::Release);
    }

    fn producer_pos(&self) -> u64 {
        fence(Ordering::Acquire);
        unsafe { (*(self.producer_map as *const ProducerPage)).producer_pos }
    }

    fn data_ptr(&self) -> *const u8 {
        unsafe { (self.producer_map as *const u8).add(page_size::get()) }
    }

    /// Drain every currently-available record, invoking `f` for each
    /// non-discarded one. Returns the number of records consumed
    /// (including discarded ones, which are skipped but still advance the
    /// cursor) so callers can maintain a poll-loop statistics counter.
    pub fn consume(&self, mut f: impl FnMut(&[u8])) -> usize {
        let mut consumer_pos = self.consumer_pos();
        let producer_pos = self.producer_pos();
        let mut consumed = 0usize;

        while consumer_pos < producer_pos {
            let offset = (consumer_pos & self.data_mask) as usize;
            let header = unsafe {
                let ptr = self.data_ptr().add(offset) as *const u32;
                std::ptr::read_volatile(ptr)
            };
            if header & BPF_RINGBUF_BUSY_BIT != 0 {
                // Producer is still writing this record; stop here rather
                // than reading torn data.
                break;
            }
            let len = (header & HDR_LEN_MASK) as u64;
            let record_start = offset + 8;
            if header & BPF_RINGBUF_DISCARD_BIT == 0 {
                let slice = unsafe { std::slice::from_raw_parts(self.data_ptr().add(record_start), len as usize) };
                f(slice);
            } else {
                debug!("ring buffer discarded a {len}-byte record");
            }
            // Records are rounded up to 8-byte alignment, plus the 8-byte
            // header itself.
            let aligned = (len + 7) & !7;
            consumer_pos += 8 + aligned;
            consumed += 1;
        }

        if consumed > 0 {
            self.set_consumer_pos(consumer_pos);
        }
        consumed
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.consumer_map, self.consumer_map_len);
            libc::munmap(self.producer_map, self.producer_map_len);
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn header_masks_do_not_overlap() {
        use super::{BPF_RINGBUF_BUSY_BIT, BPF_RINGBUF_DISCARD_BIT, HDR_LEN_MASK};
        assert_eq!(BPF_RINGBUF_BUSY_BIT & BPF_RINGBUF_DISCARD_BIT, 0);
        assert_eq!(BPF_RINGBUF_BUSY_BIT & HDR_LEN_MASK, 0);
        assert_eq!(BPF_RINGBUF_DISCARD_BIT & HDR_LEN_MASK, 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn open_rejects_non_power_of_two_size() {
        let _ = super::RingBuffer::open(-1, 3);
    }
}
