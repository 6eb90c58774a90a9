//! Module `mem` implement memory-pressure hints, used to decide whether
//! a table can afford to keep a full copy of its rows in RAM.

use log::warn;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Mutex,
    },
    time::{Duration, Instant},
};

/// Query the memory currently available to this process.
pub trait MemoryHints: Send + Sync {
    /// Bytes of memory available for new allocations.
    fn available(&self) -> u64;

    /// Return true when the system is running short of memory, caches
    /// shall be abandoned.
    fn is_memory_short(&self) -> bool;
}

/// Default time for which a memory reading is reused, refer [SysMemory].
pub const SAMPLE_TTL: Duration = Duration::from_millis(100);

/// Memory hints as reported by the operating system.
///
/// Querying the operating system is costly compared to a table write, a
/// reading is reused for `ttl` before the system is queried again.
#[derive(Debug)]
pub struct SysMemory {
    ttl: Duration,
    sample: Mutex<Option<(Instant, Option<(u64, u64)>)>>,
    n_probes: AtomicU64,
}

impl Default for SysMemory {
    fn default() -> SysMemory {
        SysMemory::new(SAMPLE_TTL)
    }
}

impl SysMemory {
    pub fn new(ttl: Duration) -> SysMemory {
        SysMemory {
            ttl,
            sample: Mutex::new(None),
            n_probes: AtomicU64::new(0),
        }
    }

    /// Number of times the operating system was queried.
    pub fn to_probes(&self) -> u64 {
        self.n_probes.load(SeqCst)
    }

    // return (total, available) in bytes, None if probe failed.
    fn mem_info(&self) -> Option<(u64, u64)> {
        let mut sample = match self.sample.lock() {
            Ok(sample) => sample,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cached = match sample.as_ref() {
            Some((at, info)) if at.elapsed() < self.ttl => Some(*info),
            _ => None,
        };
        match cached {
            Some(info) => info,
            None => {
                let info = self.probe();
                *sample = Some((Instant::now(), info));
                info
            }
        }
    }

    fn probe(&self) -> Option<(u64, u64)> {
        self.n_probes.fetch_add(1, SeqCst);
        match sys_info::mem_info() {
            Ok(info) => Some((info.total * 1024, info.avail * 1024)),
            Err(err) => {
                warn!(target: "mem", "sys_info::mem_info {}", err);
                None
            }
        }
    }
}

impl MemoryHints for SysMemory {
    fn available(&self) -> u64 {
        match self.mem_info() {
            Some((_, avail)) => avail,
            None => 0,
        }
    }

    fn is_memory_short(&self) -> bool {
        match self.mem_info() {
            Some((total, avail)) => avail < (total / 16),
            None => true,
        }
    }
}

/// Memory hints with a fixed, caller adjustable, amount of memory.
/// Memory is considered short once it drops below `short`.
#[derive(Debug)]
pub struct FixedMemory {
    avail: AtomicU64,
    short: u64,
}

impl FixedMemory {
    pub fn new(avail: u64, short: u64) -> FixedMemory {
        FixedMemory {
            avail: AtomicU64::new(avail),
            short,
        }
    }

    /// Memory hints that never run short.
    pub fn unlimited() -> FixedMemory {
        FixedMemory::new(u64::MAX, 0)
    }

    /// Adjust available memory.
    pub fn set_available(&self, avail: u64) {
        self.avail.store(avail, SeqCst)
    }
}

impl MemoryHints for FixedMemory {
    fn available(&self) -> u64 {
        self.avail.load(SeqCst)
    }

    fn is_memory_short(&self) -> bool {
        self.avail.load(SeqCst) < self.short
    }
}

#[cfg(test)]
#[path = "mem_test.rs"]
mod mem_test;
