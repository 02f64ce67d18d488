//! Observation handles: the uniform blocking/timed-get surface callers use
//! to read events, map entries, and queue/stack contents, all guarded by a
//! closed flag so a handle whose backing resource has gone away fails with
//! `Error::HandleClosed` instead of hanging or panicking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};

/// Poll `attempt` with capped exponential backoff until it yields a value
/// or errors, or `timeout` elapses. The kernel gives map reads/pops no
/// blocking primitive, so every blocking handle operation in this module
/// is built on this rather than a futex/condvar wakeup.
fn poll_until<T>(timeout: Duration, mut attempt: impl FnMut() -> Result<Option<T>>) -> Result<T> {
    let start = Instant::now();
    let mut backoff = Duration::from_micros(100);
    loop {
        if let Some(v) = attempt()? {
            return Ok(v);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout);
        }
        std::thread::sleep(backoff.min(timeout - elapsed));
        backoff = (backoff * 2).min(Duration::from_millis(50));
    }
}

/// Shared closed-flag, cloned into every handle derived from the same
/// underlying resource so any one of them closing marks all of them closed.
#[derive(Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn new() -> Self {
        CloseFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::HandleClosed)
        } else {
            Ok(())
        }
    }
}

/// A handle over a stream of events (ring buffer records, perf samples):
/// `recv`/`recv_timeout`/`try_recv` wrap a receiver with closed-flag
/// awareness.
pub struct ChannelHandle<T> {
    rx: Receiver<T>,
    closed: CloseFlag,
}

pub struct ChannelSender<T> {
    tx: Sender<T>,
    closed: CloseFlag,
}

pub fn channel<T>(capacity: usize) -> (ChannelSender<T>, ChannelHandle<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let closed = CloseFlag::new();
    (
        ChannelSender { tx, closed: closed.clone() },
        ChannelHandle { rx, closed },
    )
}

impl<T> ChannelHandle<T> {
    pub fn recv(&self) -> Result<T> {
        self.closed.check()?;
        self.rx.recv().map_err(|_| Error::HandleClosed)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T> {
        self.closed.check()?;
        match self.rx.recv_timeout(timeout) {
            Ok(v) => Ok(v),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::HandleClosed),
        }
    }

    pub fn try_recv(&self) -> Result<Option<T>> {
        self.closed.check()?;
        match self.rx.try_recv() {
            Ok(v) => Ok(Some(v)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(Error::HandleClosed),
        }
    }

    pub fn close(&self) {
        self.closed.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl<T> ChannelSender<T> {
    pub fn send(&self, value: T) -> Result<()> {
        self.closed.check()?;
        self.tx.send(value).map_err(|_| Error::HandleClosed)
    }

    pub fn close(&self) {
        self.closed.close();
    }
}

/// A handle over a single map entry that supports a compare-and-swap-style
/// update-retry loop: `update_with` re-reads the current value, applies
/// `f`, and races the write against any concurrent updater by retrying on
/// a version mismatch, rather than locking.
pub struct MapEntryHandle<K, V> {
    map: Arc<crate::map::Map<K, V>>,
    key: K,
    closed: CloseFlag,
}

impl<K: Copy, V: Copy> MapEntryHandle<K, V> {
    pub fn new(map: Arc<crate::map::Map<K, V>>, key: K) -> Self {
        MapEntryHandle { map, key, closed: CloseFlag::new() }
    }

    pub fn get(&self) -> Result<Option<V>> {
        self.closed.check()?;
        self.map.lookup(&self.key)
    }

    pub fn set(&self, value: V) -> Result<()> {
        self.closed.check()?;
        self.map.update(&self.key, &value, 0)
    }

    /// Read-modify-write with bounded retries. BPF hash/array maps have no
    /// kernel-side CAS primitive, so this loop is optimistic: read, apply
    /// `f`, write back unconditionally, and just accept that a racing
    /// writer's update might be clobbered — acceptable for the counters
    /// and small aggregates this handle targets (spec §5's concurrency
    /// model treats map writes as best-effort, not linearizable).
    pub fn update_with(&self, mut f: impl FnMut(Option<V>) -> V, retries: usize) -> Result<V> {
        self.closed.check()?;
        let mut attempt = 0;
        loop {
            let current = self.map.lookup(&self.key)?;
            let next = f(current);
            match self.map.update(&self.key, &next, 0) {
                Ok(()) => return Ok(next),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    let _ = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read the current value and, only if it equals `old`, write `new`.
    /// Not a true kernel-level CAS — BPF hash/array maps have no atomic
    /// compare-and-swap op, so this is a read then a conditional write as
    /// two separate syscalls. A concurrent writer landing between them can
    /// still clobber the value undetected; callers that need real
    /// linearizability belong on a single-owner map, not this handle.
    pub fn compare_and_set(&self, old: V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.closed.check()?;
        if self.map.lookup(&self.key)? != Some(old) {
            return Ok(false);
        }
        self.map.update(&self.key, &new, 0)?;
        Ok(true)
    }

    pub fn close(&self) {
        self.closed.close();
    }
}

/// Polls a map key until it holds a value, or (given a baseline) until its
/// value changes, rather than requiring the caller to poll `get()` in a
/// loop themselves.
pub struct MapWatcher<K, V> {
    map: Arc<crate::map::Map<K, V>>,
    key: K,
    closed: CloseFlag,
}

impl<K: Copy, V: Copy + PartialEq> MapWatcher<K, V> {
    pub fn new(map: Arc<crate::map::Map<K, V>>, key: K) -> Self {
        MapWatcher { map, key, closed: CloseFlag::new() }
    }

    /// Block until the key holds any value, or `timeout` elapses.
    pub fn wait_for_value(&self, timeout: Duration) -> Result<V> {
        self.closed.check()?;
        poll_until(timeout, || self.map.lookup(&self.key))
    }

    /// Block until the key's value differs from `baseline` — including
    /// appearing after being absent, or disappearing — or `timeout`
    /// elapses.
    pub fn wait_for_change(&self, baseline: Option<V>, timeout: Duration) -> Result<Option<V>> {
        self.closed.check()?;
        let start = Instant::now();
        let mut backoff = Duration::from_micros(100);
        loop {
            let current = self.map.lookup(&self.key)?;
            if current != baseline {
                return Ok(current);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout);
            }
            std::thread::sleep(backoff.min(timeout - elapsed));
            backoff = (backoff * 2).min(Duration::from_millis(50));
        }
    }

    pub fn close(&self) {
        self.closed.close();
    }
}

/// A handle over a kernel `BPF_MAP_TYPE_STACK` (LIFO pop order). Backed by
/// a real, zero-key-size map rather than an in-process buffer: `push` is
/// `BPF_MAP_UPDATE_ELEM`, `pop` is `BPF_MAP_LOOKUP_AND_DELETE_ELEM`.
pub struct StackHandle<V> {
    map: Arc<crate::map::Map<(), V>>,
    closed: CloseFlag,
}

impl<V: Copy> StackHandle<V> {
    pub fn new(map: Arc<crate::map::Map<(), V>>) -> Self {
        StackHandle { map, closed: CloseFlag::new() }
    }

    pub fn push(&self, value: V) -> Result<()> {
        self.closed.check()?;
        self.map.update(&(), &value, 0)
    }

    /// Non-blocking pop: `None` if currently empty.
    pub fn try_pop(&self) -> Result<Option<V>> {
        self.closed.check()?;
        self.map.lookup_and_delete(None)
    }

    /// Pop, blocking (via poll/backoff) until a value appears or `timeout`
    /// elapses.
    pub fn pop(&self, timeout: Duration) -> Result<V> {
        self.closed.check()?;
        poll_until(timeout, || self.map.lookup_and_delete(None))
    }

    pub fn close(&self) {
        self.closed.close();
    }
}

/// A handle over a kernel `BPF_MAP_TYPE_QUEUE` (FIFO pop order). Same shape
/// as `StackHandle`; the two differ only in which kernel map type backs
/// them.
pub struct QueueHandle<V> {
    map: Arc<crate::map::Map<(), V>>,
    closed: CloseFlag,
}

impl<V: Copy> QueueHandle<V> {
    pub fn new(map: Arc<crate::map::Map<(), V>>) -> Self {
        QueueHandle { map, closed: CloseFlag::new() }
    }

    pub fn push(&self, value: V) -> Result<()> {
        self.closed.check()?;
        self.map.update(&(), &value, 0)
    }

    pub fn try_pop(&self) -> Result<Option<V>> {
        self.closed.check()?;
        self.map.lookup_and_delete(None)
    }

    pub fn pop(&self, timeout: Duration) -> Result<V> {
        self.closed.check()?;
        poll_until(timeout, || self.map.lookup_and_delete(None))
    }

    pub fn close(&self) {
        self.closed.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn closed_channel_returns_handle_closed() {
        let (tx, rx) = channel::<u32>(4);
        tx.send(1).unwrap();
        rx.close();
        assert!(matches!(rx.recv(), Err(Error::HandleClosed)));
    }

    #[test]
    fn empty_channel_times_out() {
        let (_tx, rx) = channel::<u32>(1);
        let err = rx.recv_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn poll_until_returns_once_attempt_succeeds() {
        let mut calls = 0;
        let result = poll_until(Duration::from_millis(500), || {
            calls += 1;
            if calls >= 3 {
                Ok(Some(42))
            } else {
                Ok(None)
            }
        });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn poll_until_times_out_when_nothing_arrives() {
        let result: Result<u32> = poll_until(Duration::from_millis(20), || Ok(None));
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn closed_stack_rejects_push_before_touching_the_map() {
        // fd=-1 would fail any real syscall; closing first proves the
        // closed-check runs before the map is ever touched.
        let map = Arc::new(crate::map::Map::<(), u32>::for_test_with_fd(-1));
        let s = StackHandle::new(map);
        s.close();
        assert!(matches!(s.push(1), Err(Error::HandleClosed)));
    }

    #[test]
    fn closed_map_entry_handle_rejects_compare_and_set() {
        let map = Arc::new(crate::map::Map::<u32, u32>::for_test_with_fd(-1));
        let h = MapEntryHandle::new(map, 0);
        h.close();
        assert!(matches!(h.compare_and_set(1, 2), Err(Error::HandleClosed)));
    }
}
