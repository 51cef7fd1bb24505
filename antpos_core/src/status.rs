//! Lock-free status publishing.
//!
//! The scheduler is the only writer; any number of observer threads read.
//! The cell is a sequence lock over a `Copy` value: the version counter
//! goes odd while a write is in flight, and a reader that sees the counter
//! change (or odd) throws its copy away and retries. Readers never block
//! the writer and the writer never blocks at all.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Single-writer, multi-reader snapshot cell.
///
/// `T` must be `Copy`: a retried read may copy torn bytes, and the version
/// check is what discards them before they are ever interpreted.
#[derive(Debug)]
pub struct StatusCell<T> {
    seq: AtomicU64,
    slot: UnsafeCell<T>,
}

// Readers only ever hand out copies validated by the sequence counter.
unsafe impl<T: Copy + Send> Sync for StatusCell<T> {}

impl<T: Copy> StatusCell<T> {
    pub const fn new(initial: T) -> Self {
        Self {
            seq: AtomicU64::new(0),
            slot: UnsafeCell::new(initial),
        }
    }

    /// Store a new snapshot. Must only be called from the single writer.
    pub fn publish(&self, value: T) {
        let seq = self.seq.load(Ordering::Relaxed);
        // Odd: write in progress.
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(self.slot.get(), value) };
        fence(Ordering::Release);
        // Even again: snapshot consistent.
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Load a coherent snapshot, retrying across concurrent writes.
    pub fn read(&self) -> T {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let value = unsafe { ptr::read_volatile(self.slot.get()) };
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return value;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn publish_then_read() {
        let cell = StatusCell::new(0u64);
        assert_eq!(cell.read(), 0);
        cell.publish(42);
        assert_eq!(cell.read(), 42);
    }

    #[test]
    fn readers_never_observe_torn_snapshots() {
        // Every published value keeps all lanes equal; a torn read would
        // surface mismatched lanes.
        #[derive(Clone, Copy)]
        struct Wide {
            lanes: [u64; 32],
        }

        let cell = Arc::new(StatusCell::new(Wide { lanes: [0; 32] }));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let snap = cell.read();
                        let first = snap.lanes[0];
                        assert!(
                            snap.lanes.iter().all(|&lane| lane == first),
                            "torn snapshot observed"
                        );
                    }
                })
            })
            .collect();

        for i in 1..=50_000u64 {
            cell.publish(Wide { lanes: [i; 32] });
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn reads_are_monotonic_with_single_writer() {
        let cell = Arc::new(StatusCell::new(0u64));
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 1..=10_000u64 {
                    cell.publish(i);
                }
            })
        };
        let mut last = 0;
        for _ in 0..10_000 {
            let value = cell.read();
            assert!(value >= last, "snapshot went backwards: {value} < {last}");
            last = value;
        }
        writer.join().unwrap();
    }
}
