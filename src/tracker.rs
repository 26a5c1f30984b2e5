//! # Debug Tracker
//!
//! Records every live off-heap block and validates allocations, frees and
//! accesses against those records.
//!
//! ## Design
//!
//! Two maps guarded by `parking_lot::RwLock`:
//! - live: address → (size, allocation site)
//! - freed: address → free site, kept so that use-after-free and double free
//!   can report where the block went away
//!
//! Sites are captured with `#[track_caller]`, so a violation names the line
//! in the calling code rather than a line in this crate. A full
//! [`Backtrace`] is attached when `RUST_BACKTRACE` enables capture.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::address::Address;
use crate::error::AccessViolation;

/// Where and when an allocation or free happened.
pub struct AllocSite {
    location: &'static Location<'static>,
    thread: Option<String>,
    elapsed: Duration,
    backtrace: Backtrace,
}

impl AllocSite {
    #[track_caller]
    fn capture(epoch: Instant) -> Self {
        let thread = std::thread::current();
        Self {
            location: Location::caller(),
            thread: thread.name().map(str::to_string),
            elapsed: epoch.elapsed(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Source location of the call.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Name of the calling thread, if it has one.
    pub fn thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    /// Time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl fmt::Display for AllocSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {} on thread '{}' (t+{:?})",
            self.location,
            self.thread.as_deref().unwrap_or("<unnamed>"),
            self.elapsed
        )?;
        if self.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AllocSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocSite")
            .field("location", &self.location)
            .field("thread", &self.thread)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// A live block record.
#[derive(Debug)]
pub struct AllocRecord {
    /// Allocated size in bytes.
    pub size: u64,
    /// Where the block was allocated.
    pub site: AllocSite,
}

/// Tracker for live and freed off-heap blocks.
pub struct DebugTracker {
    live: RwLock<HashMap<u64, AllocRecord>>,
    freed: RwLock<HashMap<u64, AllocSite>>,
    epoch: Instant,
}

impl DebugTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self {
            live: RwLock::new(HashMap::with_capacity(16384)),
            freed: RwLock::new(HashMap::with_capacity(16384)),
            epoch: Instant::now(),
        }
    }

    /// Record a new allocation.
    ///
    /// Fails if the address is still live, which means either the allocator
    /// handed it out twice or a free went unrecorded.
    #[track_caller]
    pub fn record_allocation(&self, address: Address, size: u64) -> Result<(), AccessViolation> {
        let site = AllocSite::capture(self.epoch);
        let mut live = self.live.write();
        if live.contains_key(&address.as_u64()) {
            return Err(AccessViolation::DuplicateAddress { address });
        }
        self.freed.write().remove(&address.as_u64());
        live.insert(address.as_u64(), AllocRecord { size, site });
        Ok(())
    }

    /// Record a free.
    #[track_caller]
    pub fn record_free(&self, address: Address) -> Result<(), AccessViolation> {
        let site = AllocSite::capture(self.epoch);
        // Lock order is live then freed, as in `validate`, so no reader sees
        // the block in neither map.
        let mut live = self.live.write();
        let mut freed = self.freed.write();
        if live.remove(&address.as_u64()).is_none() {
            return Err(match freed.get(&address.as_u64()) {
                Some(freed_at) => AccessViolation::DoubleFree {
                    address,
                    freed_at: freed_at.to_string(),
                },
                None => AccessViolation::FreeOfUnallocated { address },
            });
        }
        freed.insert(address.as_u64(), site);
        Ok(())
    }

    /// Record a successful reallocation of `old` to `new` with `size` bytes.
    #[track_caller]
    pub fn record_reallocation(
        &self,
        old: Address,
        new: Address,
        size: u64,
    ) -> Result<(), AccessViolation> {
        if !old.is_null() {
            self.record_free(old)?;
        }
        self.record_allocation(new, size)
    }

    /// Validate an access of `len` bytes at `address + offset`.
    pub fn validate(&self, address: Address, offset: u64, len: u64) -> Result<(), AccessViolation> {
        if address.is_null() {
            return Err(AccessViolation::NullAddress);
        }

        let size = match self.live.read().get(&address.as_u64()) {
            Some(record) => record.size,
            None => {
                return Err(match self.freed.read().get(&address.as_u64()) {
                    Some(freed_at) => AccessViolation::UseAfterFree {
                        address,
                        freed_at: freed_at.to_string(),
                    },
                    None => AccessViolation::Unallocated { address },
                });
            }
        };

        let end = offset
            .checked_add(len)
            .ok_or(AccessViolation::LengthOverflow { address, offset, len })?;
        if end > size {
            return Err(AccessViolation::OutOfBounds {
                address,
                offset,
                len,
                size,
            });
        }
        Ok(())
    }

    /// Get the recorded size of a live block.
    pub fn size_of(&self, address: Address) -> Option<u64> {
        self.live.read().get(&address.as_u64()).map(|r| r.size)
    }

    /// Check if an address is currently allocated.
    pub fn is_allocated(&self, address: Address) -> bool {
        self.live.read().contains_key(&address.as_u64())
    }

    /// Check if an address has been freed and not reallocated since.
    pub fn is_freed(&self, address: Address) -> bool {
        self.freed.read().contains_key(&address.as_u64())
    }

    /// Get the number of live blocks.
    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    /// Check if no blocks are live.
    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }

    /// Remove and return every live record, sorted by address, and forget
    /// all freed records.
    pub fn take_live(&self) -> Vec<(Address, AllocRecord)> {
        let mut live = self.live.write();
        let mut records: Vec<_> = live
            .drain()
            .map(|(address, record)| (Address::from_raw(address), record))
            .collect();
        self.freed.write().clear();
        drop(live);
        records.sort_by_key(|(address, _)| *address);
        records
    }
}

impl Default for DebugTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DebugTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugTracker")
            .field("live", &self.live.read().len())
            .field("freed", &self.freed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address::from_raw(0x1000);
    const B: Address = Address::from_raw(0x2000);

    #[test]
    fn test_record_allocation() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        assert!(tracker.is_allocated(A));
        assert_eq!(tracker.size_of(A), Some(64));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_duplicate_address() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        assert_eq!(
            tracker.record_allocation(A, 32),
            Err(AccessViolation::DuplicateAddress { address: A })
        );
        assert_eq!(tracker.size_of(A), Some(64));
    }

    #[test]
    fn test_free_and_double_free() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        tracker.record_free(A).unwrap();
        assert!(!tracker.is_allocated(A));
        assert!(tracker.is_freed(A));

        match tracker.record_free(A) {
            Err(AccessViolation::DoubleFree { address, freed_at }) => {
                assert_eq!(address, A);
                assert!(freed_at.contains("tracker.rs"));
            }
            other => panic!("expected double free, got {:?}", other),
        }
    }

    #[test]
    fn test_free_of_unallocated() {
        let tracker = DebugTracker::new();
        assert_eq!(
            tracker.record_free(B),
            Err(AccessViolation::FreeOfUnallocated { address: B })
        );
    }

    #[test]
    fn test_reallocation_clears_freed_record() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        tracker.record_free(A).unwrap();
        tracker.record_allocation(A, 16).unwrap();
        assert!(!tracker.is_freed(A));
        assert_eq!(tracker.size_of(A), Some(16));
    }

    #[test]
    fn test_record_reallocation_moves_record() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        tracker.record_reallocation(A, B, 128).unwrap();
        assert!(!tracker.is_allocated(A));
        assert_eq!(tracker.size_of(B), Some(128));

        tracker.record_reallocation(B, B, 256).unwrap();
        assert_eq!(tracker.size_of(B), Some(256));
    }

    #[test]
    fn test_validate() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();

        assert!(tracker.validate(A, 0, 64).is_ok());
        assert!(tracker.validate(A, 56, 8).is_ok());
        assert!(tracker.validate(A, 64, 0).is_ok());
        assert_eq!(
            tracker.validate(A, 60, 8),
            Err(AccessViolation::OutOfBounds {
                address: A,
                offset: 60,
                len: 8,
                size: 64
            })
        );
        assert!(matches!(
            tracker.validate(A, u64::MAX, 2),
            Err(AccessViolation::LengthOverflow { .. })
        ));
        assert_eq!(tracker.validate(Address::NULL, 0, 1), Err(AccessViolation::NullAddress));
        assert_eq!(
            tracker.validate(B, 0, 1),
            Err(AccessViolation::Unallocated { address: B })
        );
    }

    #[test]
    fn test_validate_after_free() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 64).unwrap();
        tracker.record_free(A).unwrap();
        assert!(matches!(
            tracker.validate(A, 0, 8),
            Err(AccessViolation::UseAfterFree { .. })
        ));
    }

    #[test]
    fn test_take_live() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(B, 32).unwrap();
        tracker.record_allocation(A, 16).unwrap();
        tracker.record_allocation(Address::from_raw(0x3000), 8).unwrap();
        tracker.record_free(Address::from_raw(0x3000)).unwrap();

        let live = tracker.take_live();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].0, A);
        assert_eq!(live[0].1.size, 16);
        assert_eq!(live[1].0, B);
        assert!(tracker.is_empty());
        assert!(!tracker.is_freed(Address::from_raw(0x3000)));
    }

    #[test]
    fn test_concurrent_records() {
        let tracker = DebugTracker::new();
        std::thread::scope(|s| {
            for t in 0..8u64 {
                let tracker = &tracker;
                s.spawn(move || {
                    for i in 0..500u64 {
                        let address = Address::from_raw((t * 1_000_000 + i + 1) * 16);
                        tracker.record_allocation(address, 16).unwrap();
                        tracker.validate(address, 0, 16).unwrap();
                        if i % 2 == 0 {
                            tracker.record_free(address).unwrap();
                        }
                    }
                });
            }
        });
        assert_eq!(tracker.len(), 8 * 250);
    }

    #[test]
    fn test_concurrent_free_is_never_seen_as_unallocated() {
        let tracker = DebugTracker::new();
        let addresses: Vec<Address> = (1..=2_000u64).map(|i| Address::from_raw(i * 16)).collect();
        for &address in &addresses {
            tracker.record_allocation(address, 16).unwrap();
        }

        std::thread::scope(|s| {
            s.spawn(|| {
                for &address in &addresses {
                    tracker.record_free(address).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..5 {
                    for &address in &addresses {
                        match tracker.validate(address, 0, 8) {
                            Ok(()) | Err(AccessViolation::UseAfterFree { .. }) => {}
                            Err(other) => panic!("unexpected violation: {}", other),
                        }
                    }
                }
            });
        });
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_site_display() {
        let tracker = DebugTracker::new();
        tracker.record_allocation(A, 8).unwrap();
        let live = tracker.take_live();
        let site = live[0].1.site.to_string();
        assert!(site.starts_with("at "));
        assert!(site.contains("tracker.rs"));
    }
}
