//! The map abstraction: typed create/lookup/update/delete/iterate plus the
//! per-CPU and LRU variants and filesystem pinning. A raw fd is wrapped in
//! a small `Deref`/`AsRawFd`-style struct rather than exposed directly,
//! closed on drop.

use std::fs;
use std::marker::PhantomData;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use log::{debug, info};

use crate::attr::{MapBatchAttr, MapCreateAttr};
use crate::consts::{MapFlags, MapType};
use crate::error::{MapError, Result};
use crate::sys;

/// Configuration for `Map::create`: a plain struct with named fields and a
/// `Default` impl, rather than an open string-keyed option map.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub map_type: MapType,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub flags: MapFlags,
    pub name: String,
    pub numa_node: Option<u32>,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            map_type: MapType::Hash,
            key_size: 4,
            value_size: 4,
            max_entries: 1024,
            flags: MapFlags::empty(),
            name: String::new(),
            numa_node: None,
        }
    }
}

/// The number of possible CPUs, used to size per-CPU map values — one value
/// slot per CPU, laid out back to back as the kernel expects.
pub fn num_possible_cpus() -> usize {
    fs::read_to_string("/sys/devices/system/cpu/possible")
        .ok()
        .and_then(|s| parse_cpu_range(s.trim()))
        .unwrap_or(1)
}

fn parse_cpu_range(s: &str) -> Option<usize> {
    // Format is a comma list of ranges like "0-7" or "0-3,8-11".
    let last = s.split(',').last()?;
    let hi: usize = last.split('-').last()?.parse().ok()?;
    Some(hi + 1)
}

/// A typed handle over a kernel BPF map. `K`/`V` are plain-old-data structs
/// whose `size_of` must equal the `key_size`/`value_size` the map was
/// created with; this is asserted at construction, not enforced by the
/// type system — the kernel's layout is the source of truth, not Rust's.
pub struct Map<K, V> {
    fd: RawFd,
    pub config: MapConfig,
    per_cpu: bool,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Map<K, V> {
    /// Builds a `Map` around a caller-supplied fd with no syscall, for tests
    /// in other modules that need a handle whose closed-flag checks short
    /// circuit before any real `bpf()` call is made.
    #[cfg(test)]
    pub(crate) fn for_test_with_fd(fd: RawFd) -> Self {
        Map { fd, config: MapConfig::default(), per_cpu: false, _marker: PhantomData }
    }

    pub fn create(config: MapConfig) -> Result<Self> {
        if std::mem::size_of::<K>() != config.key_size as usize {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }
        let per_cpu = matches!(
            config.map_type,
            MapType::PerCpuHash | MapType::PerCpuArray | MapType::LruPerCpuHash
        );
        // Per-CPU maps still store one `value_size`-sized record per CPU
        // from the kernel's perspective; the per-CPU fan-out only affects
        // the userspace-side buffer a caller allocates for a raw lookup.
        if std::mem::size_of::<V>() != config.value_size as usize {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }

        let mut name_bytes = [0u8; 16];
        let n = config.name.as_bytes().len().min(15);
        name_bytes[..n].copy_from_slice(&config.name.as_bytes()[..n]);

        let attr = MapCreateAttr {
            map_type: config.map_type as u32,
            key_size: config.key_size,
            value_size: config.value_size,
            max_entries: config.max_entries,
            map_flags: config.flags.bits(),
            numa_node: config.numa_node.unwrap_or(0),
            map_name: name_bytes,
            ..Default::default()
        };

        let fd = sys::map_create(&attr)?;
        info!("created map {:?} (type={:?}, fd={fd})", config.name, config.map_type);
        Ok(Map { fd, config, per_cpu, _marker: PhantomData })
    }

    pub fn lookup(&self, key: &K) -> Result<Option<V>> {
        let mut value = std::mem::MaybeUninit::<V>::uninit();
        let res = sys::map_lookup_elem(
            self.fd,
            key as *const K as *const u8,
            value.as_mut_ptr() as *mut u8,
        );
        match res {
            Ok(()) => Ok(Some(unsafe { value.assume_init() })),
            Err(crate::error::Error::Map(MapError::KeyNotFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn update(&self, key: &K, value: &V, flags: u64) -> Result<()> {
        sys::map_update_elem(
            self.fd,
            key as *const K as *const u8,
            value as *const V as *const u8,
            flags,
        )
    }

    pub fn delete(&self, key: &K) -> Result<()> {
        sys::map_delete_elem(self.fd, key as *const K as *const u8)
    }

    /// Iterate over every key currently present. Uses `BPF_MAP_GET_NEXT_KEY`
    /// repeatedly, matching the kernel's documented iteration contract: a
    /// `None` cursor means "start of map", `ENOENT` means "iteration done".
    pub fn keys(&self) -> MapKeyIter<'_, K, V>
    where
        K: Copy,
    {
        MapKeyIter { map: self, cursor: None, done: false }
    }

    pub fn pin(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let s = path.to_str().ok_or(MapError::InvalidFd)?;
        sys::obj_pin(self.fd, s)?;
        debug!("pinned map fd={} to {path:?}", self.fd);
        Ok(())
    }

    /// Recover a map fd from an existing pin without re-creating the map.
    /// `config` describes what the caller expects to find there (this crate
    /// has no `BPF_OBJ_GET_INFO_BY_FD` support to read it back from the
    /// kernel); a mismatch only surfaces later as a failing lookup/update.
    pub fn from_pinned(path: impl AsRef<Path>, config: MapConfig) -> Result<Self> {
        let path = path.as_ref();
        let s = path.to_str().ok_or(MapError::InvalidFd)?;
        let fd = sys::obj_get(s)?;
        let per_cpu = matches!(
            config.map_type,
            MapType::PerCpuHash | MapType::PerCpuArray | MapType::LruPerCpuHash
        );
        debug!("recovered map fd={fd} from pin {path:?}");
        Ok(Map { fd, config, per_cpu, _marker: PhantomData })
    }

    /// `BPF_MAP_LOOKUP_AND_DELETE_ELEM` for a single key: primarily the
    /// building block `BPF_MAP_TYPE_QUEUE`/`STACK` pop on (with no key, so
    /// callers there pass `None`), but also valid against a hash-like map
    /// that wants atomic take-and-remove semantics for one key.
    pub fn lookup_and_delete(&self, key: Option<&K>) -> Result<Option<V>> {
        let mut value = std::mem::MaybeUninit::<V>::uninit();
        let res = sys::map_lookup_and_delete_elem(
            self.fd,
            key.map(|k| k as *const K as *const u8),
            value.as_mut_ptr() as *mut u8,
        );
        match res {
            Ok(()) => Ok(Some(unsafe { value.assume_init() })),
            Err(crate::error::Error::Map(MapError::KeyNotFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Result of one `BPF_MAP_*_BATCH` call: the entries it returned, the cursor
/// to resume from on the next call, and whether the map is now exhausted.
pub struct BatchResult<K, V> {
    pub entries: Vec<(K, V)>,
    pub next_batch: Vec<u8>,
    pub done: bool,
}

impl<K: Copy, V: Copy> Map<K, V> {
    fn run_batch(&self, cmd: BatchCmd, in_batch: Option<&[u8]>, count: u32) -> Result<BatchResult<K, V>> {
        let key_size = self.config.key_size as usize;
        let mut keys = vec![0u8; key_size * count as usize];
        let mut values = vec![0u8; std::mem::size_of::<V>() * count as usize];
        let mut out_batch = vec![0u8; key_size.max(1)];
        let in_batch_buf = in_batch.map(|b| b.to_vec());

        let attr = MapBatchAttr {
            in_batch: in_batch_buf.as_ref().map(|b| b.as_ptr() as u64).unwrap_or(0),
            out_batch: out_batch.as_mut_ptr() as u64,
            keys: keys.as_mut_ptr() as u64,
            values: values.as_mut_ptr() as u64,
            count,
            map_fd: self.fd as u32,
            elem_flags: 0,
            flags: 0,
        };

        let returned = match cmd {
            BatchCmd::Lookup => sys::map_lookup_batch(&attr)?,
            BatchCmd::LookupAndDelete => sys::map_lookup_and_delete_batch(&attr)?,
        };

        let mut entries = Vec::with_capacity(returned as usize);
        for i in 0..returned as usize {
            let k = unsafe { std::ptr::read_unaligned(keys.as_ptr().add(i * key_size) as *const K) };
            let v = unsafe {
                std::ptr::read_unaligned(values.as_ptr().add(i * std::mem::size_of::<V>()) as *const V)
            };
            entries.push((k, v));
        }
        Ok(BatchResult { entries, next_batch: out_batch, done: returned < count })
    }

    /// `BPF_MAP_LOOKUP_BATCH`: fetch up to `count` entries starting after
    /// `in_batch` (`None` starts from the beginning). Chain calls with the
    /// previous result's `next_batch` to page through the whole map.
    pub fn lookup_batch(&self, in_batch: Option<&[u8]>, count: u32) -> Result<BatchResult<K, V>> {
        self.run_batch(BatchCmd::Lookup, in_batch, count)
    }

    /// `BPF_MAP_LOOKUP_AND_DELETE_BATCH`: same paging contract as
    /// `lookup_batch`, but each returned entry is removed from the map.
    pub fn lookup_and_delete_batch(&self, in_batch: Option<&[u8]>, count: u32) -> Result<BatchResult<K, V>> {
        self.run_batch(BatchCmd::LookupAndDelete, in_batch, count)
    }

    /// `BPF_MAP_UPDATE_BATCH`: `keys` and `values` must be the same length.
    pub fn update_batch(&self, keys: &[K], values: &[V], flags: u64) -> Result<()> {
        if keys.len() != values.len() {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }
        let attr = MapBatchAttr {
            in_batch: 0,
            out_batch: 0,
            keys: keys.as_ptr() as u64,
            values: values.as_ptr() as u64,
            count: keys.len() as u32,
            map_fd: self.fd as u32,
            elem_flags: flags,
            flags: 0,
        };
        sys::map_update_batch(&attr)
    }
}

enum BatchCmd {
    Lookup,
    LookupAndDelete,
}

/// Numeric value types a per-CPU fan-out buffer can be aggregated into;
/// blanket-implemented for the integer types BPF per-CPU counters are
/// actually declared with.
pub trait PerCpuNumeric: Copy {
    fn as_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;
}

macro_rules! impl_percpu_numeric {
    ($($t:ty),*) => {
        $(impl PerCpuNumeric for $t {
            fn as_i64(self) -> i64 { self as i64 }
            fn from_i64(v: i64) -> Self { v as $t }
        })*
    };
}
impl_percpu_numeric!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize);

impl<K, V: Copy> Map<K, V> {
    /// Kernel per-CPU buffers round each value slot up to an 8-byte
    /// boundary regardless of `value_size`, so a raw fan-out buffer is
    /// `round_up(value_size, 8) * num_possible_cpus()` bytes, not a tight
    /// `value_size * num_possible_cpus()`.
    fn percpu_stride(&self) -> usize {
        (self.config.value_size as usize + 7) & !7
    }

    /// `BPF_MAP_LOOKUP_ELEM` against a `PerCpuHash`/`PerCpuArray`/
    /// `LruPerCpuHash` map: returns one value per possible CPU, in CPU
    /// order, rather than the single collapsed value `lookup` would try
    /// (and get wrong) against a per-CPU map type.
    pub fn lookup_percpu(&self, key: &K) -> Result<Option<Vec<V>>> {
        if !self.per_cpu {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }
        let ncpu = num_possible_cpus();
        let stride = self.percpu_stride();
        let mut buf = vec![0u8; stride * ncpu];
        let res = sys::map_lookup_elem(self.fd, key as *const K as *const u8, buf.as_mut_ptr());
        match res {
            Ok(()) => {
                let mut out = Vec::with_capacity(ncpu);
                for cpu in 0..ncpu {
                    let slot = buf.as_ptr().wrapping_add(cpu * stride) as *const V;
                    out.push(unsafe { std::ptr::read_unaligned(slot) });
                }
                Ok(Some(out))
            }
            Err(crate::error::Error::Map(MapError::KeyNotFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `BPF_MAP_UPDATE_ELEM` against a per-CPU map: `values` must have
    /// exactly `num_possible_cpus()` entries, one per CPU in CPU order.
    pub fn update_percpu(&self, key: &K, values: &[V], flags: u64) -> Result<()> {
        if !self.per_cpu {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }
        let ncpu = num_possible_cpus();
        if values.len() != ncpu {
            return Err(MapError::Other(nix::errno::Errno::EINVAL).into());
        }
        let stride = self.percpu_stride();
        let mut buf = vec![0u8; stride * ncpu];
        let value_size = std::mem::size_of::<V>();
        for (cpu, v) in values.iter().enumerate() {
            let src = unsafe { std::slice::from_raw_parts(v as *const V as *const u8, value_size) };
            buf[cpu * stride..cpu * stride + value_size].copy_from_slice(src);
        }
        sys::map_update_elem(self.fd, key as *const K as *const u8, buf.as_ptr(), flags)
    }
}

impl<K, V: PerCpuNumeric> Map<K, V> {
    /// Collapse a per-CPU lookup down to one logical value the way
    /// `bpftool map dump` does for a per-CPU map, instead of handing the
    /// caller the raw per-CPU vector every time.
    pub fn lookup_percpu_aggregate(&self, key: &K, agg: PerCpuAggregate) -> Result<Option<V>> {
        let values = match self.lookup_percpu(key)? {
            Some(v) => v,
            None => return Ok(None),
        };
        if values.is_empty() {
            return Ok(None);
        }
        let ints: Vec<i64> = values.iter().map(|v| v.as_i64()).collect();
        let result = match agg {
            PerCpuAggregate::Sum => ints.iter().sum(),
            PerCpuAggregate::Max => *ints.iter().max().unwrap(),
            PerCpuAggregate::Min => *ints.iter().min().unwrap(),
            PerCpuAggregate::Avg => ints.iter().sum::<i64>() / ints.len() as i64,
            PerCpuAggregate::First => ints[0],
        };
        Ok(Some(V::from_i64(result)))
    }
}

pub struct MapKeyIter<'a, K, V> {
    map: &'a Map<K, V>,
    cursor: Option<K>,
    done: bool,
}

impl<'a, K: Copy, V> Iterator for MapKeyIter<'a, K, V> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut next_key = std::mem::MaybeUninit::<K>::uninit();
        let cursor_ptr = self.cursor.as_ref().map(|k| k as *const K as *const u8);
        match sys::map_get_next_key(self.map.fd, cursor_ptr, next_key.as_mut_ptr() as *mut u8) {
            Ok(true) => {
                let key = unsafe { next_key.assume_init() };
                self.cursor = Some(key);
                Some(Ok(key))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<K, V> AsRawFd for Map<K, V> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl<K, V> Drop for Map<K, V> {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Per-CPU aggregation strategy applied by `lookup_percpu`/callers that need
/// a single logical value out of N per-CPU slots.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PerCpuAggregate {
    Sum,
    Max,
    Min,
    Avg,
    First,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_cpu_range() {
        assert_eq!(parse_cpu_range("0-7"), Some(8));
    }

    #[test]
    fn parses_multi_range_cpu_list() {
        assert_eq!(parse_cpu_range("0-3,8-11"), Some(12));
    }

    #[test]
    fn default_map_config_is_a_small_hash() {
        let cfg = MapConfig::default();
        assert_eq!(cfg.map_type, MapType::Hash);
        assert_eq!(cfg.max_entries, 1024);
    }

    #[test]
    fn percpu_stride_rounds_up_to_eight_bytes() {
        let map: Map<u32, u8> = Map {
            fd: -1,
            config: MapConfig { value_size: 1, ..MapConfig::default() },
            per_cpu: true,
            _marker: PhantomData,
        };
        assert_eq!(map.percpu_stride(), 8);

        let map: Map<u32, u64> = Map {
            fd: -1,
            config: MapConfig { value_size: 8, ..MapConfig::default() },
            per_cpu: true,
            _marker: PhantomData,
        };
        assert_eq!(map.percpu_stride(), 8);
    }

    #[test]
    fn percpu_numeric_round_trips_through_i64() {
        assert_eq!(u32::from_i64(42u32.as_i64()), 42u32);
        assert_eq!(i64::from_i64((-7i64).as_i64()), -7i64);
    }
}
