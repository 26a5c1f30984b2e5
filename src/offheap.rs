//! # Off-heap Access
//!
//! [`OffHeap`] owns an allocator backend and, when debug access is enabled,
//! a [`DebugTracker`]. Every allocation, free and access goes through it.
//!
//! ## Access contract
//!
//! Methods taking an [`Address`] are `unsafe`: in production mode nothing is
//! checked, and the caller must guarantee that
//! - the address was returned by this `OffHeap` and has not been freed,
//! - `offset + len` lies within the size it was allocated with,
//! - no other thread writes the same bytes concurrently, except through the
//!   atomic operations ([`increment`](OffHeap::increment),
//!   [`decrement`](OffHeap::decrement), [`load_count`](OffHeap::load_count),
//!   [`store_count`](OffHeap::store_count),
//!   [`get_and_put_long`](OffHeap::get_and_put_long)).
//!
//! With debug access enabled the first two conditions are checked and a
//! violation panics with the [`AccessViolation`] describing it.
//!
//! Integers are read and written in the host's native byte order.

use std::alloc::{handle_alloc_error, Layout};
use std::fmt;

use tracing::{debug, error, warn};

use crate::address::Address;
use crate::alloc::{new_allocator, RawAllocator, BLOCK_ALIGN};
use crate::buffer::DirectBuffer;
use crate::config::OffHeapConfig;
use crate::error::{AccessViolation, LeakedBlock, OffHeapError};
use crate::header;
use crate::raw;
use crate::tracker::DebugTracker;

/// Raise a tracker violation.
#[cold]
#[track_caller]
fn fatal(violation: AccessViolation) -> ! {
    panic!("{}", violation)
}

/// Off-heap memory access layer.
pub struct OffHeap {
    allocator: Box<dyn RawAllocator>,
    tracker: Option<DebugTracker>,
}

impl OffHeap {
    /// Create an off-heap layer from configuration.
    pub fn new(config: OffHeapConfig) -> Self {
        Self::with_allocator(new_allocator(config.allocator), config.debug_access)
    }

    /// Create an off-heap layer configured from the environment.
    ///
    /// See [`OffHeapConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(OffHeapConfig::from_env())
    }

    /// Create an off-heap layer over a caller-supplied allocator backend.
    pub fn with_allocator(allocator: Box<dyn RawAllocator>, debug_access: bool) -> Self {
        let tracker = if debug_access {
            warn!(
                backend = allocator.name(),
                "degraded performance: off-heap allocations and accesses are tracked and validated"
            );
            Some(DebugTracker::new())
        } else {
            None
        };
        Self { allocator, tracker }
    }

    /// Check if debug access tracking is enabled.
    pub fn is_debug(&self) -> bool {
        self.tracker.is_some()
    }

    /// Get the debug tracker, if enabled.
    pub fn tracker(&self) -> Option<&DebugTracker> {
        self.tracker.as_ref()
    }

    /// Number of blocks the debug tracker considers live (0 when disabled).
    pub fn tracked_count(&self) -> usize {
        self.tracker.as_ref().map_or(0, DebugTracker::len)
    }

    /// Name of the allocator backend.
    pub fn allocator_name(&self) -> &'static str {
        self.allocator.name()
    }

    /// Bytes currently allocated.
    pub fn total_allocated(&self) -> u64 {
        self.allocator.total_allocated()
    }

    #[inline]
    #[track_caller]
    fn validate(&self, address: Address, offset: u64, len: u64) {
        if let Some(tracker) = &self.tracker {
            if let Err(violation) = tracker.validate(address, offset, len) {
                fatal(violation);
            }
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `size` bytes.
    ///
    /// Returns [`Address::NULL`] if the backend cannot satisfy the request.
    /// The contents of the block are uninitialized, except with debug access
    /// where they are zeroed.
    #[track_caller]
    pub fn allocate(&self, size: u64) -> Address {
        let address = self.allocator.allocate(size);
        if address.is_null() {
            debug!(size, backend = self.allocator.name(), "off-heap allocation failed");
            return address;
        }
        if let Some(tracker) = &self.tracker {
            if let Err(violation) = tracker.record_allocation(address, size) {
                fatal(violation);
            }
            // Safety: the backend just returned `size` writable bytes.
            unsafe { raw::fill(address, 0, size as usize, 0) };
        }
        address
    }

    /// Allocate `size` bytes, raising the out-of-memory handler on failure.
    ///
    /// See [`std::alloc::handle_alloc_error`].
    #[track_caller]
    pub fn allocate_or_abort(&self, size: u64) -> Address {
        let address = self.allocate(size);
        if address.is_null() {
            match usize::try_from(size)
                .ok()
                .and_then(|size| Layout::from_size_align(size, BLOCK_ALIGN).ok())
            {
                Some(layout) => handle_alloc_error(layout),
                None => panic!("unable to allocate {} bytes off-heap", size),
            }
        }
        address
    }

    /// Allocate `size` bytes, returning an error on failure.
    #[track_caller]
    pub fn try_allocate(&self, size: u64) -> Result<Address, OffHeapError> {
        let address = self.allocate(size);
        if address.is_null() {
            return Err(OffHeapError::OutOfMemory { size });
        }
        Ok(address)
    }

    /// Resize a block, in place or by moving it.
    ///
    /// Follows `realloc`: a null address allocates, and on failure
    /// [`Address::NULL`] is returned with the original block untouched.
    /// With debug access, bytes past the old size are zeroed.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live block from this `OffHeap`. After a
    /// successful call only the returned address may be used.
    #[track_caller]
    pub unsafe fn reallocate(&self, address: Address, new_size: u64) -> Address {
        let old_size = match &self.tracker {
            Some(tracker) if !address.is_null() => {
                self.validate(address, 0, 0);
                tracker.size_of(address).unwrap_or(0)
            }
            _ => 0,
        };
        let moved = self.allocator.reallocate(address, new_size);
        if moved.is_null() {
            debug!(%address, new_size, "off-heap reallocation failed");
            return moved;
        }
        if let Some(tracker) = &self.tracker {
            if let Err(violation) = tracker.record_reallocation(address, moved, new_size) {
                fatal(violation);
            }
            if new_size > old_size {
                raw::fill(moved, old_size, (new_size - old_size) as usize, 0);
            }
        }
        moved
    }

    /// Release a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live block from this `OffHeap`, and no
    /// [`DirectBuffer`] over it may be used afterwards.
    #[track_caller]
    pub unsafe fn free(&self, address: Address) {
        if address.is_null() {
            return;
        }
        if let Some(tracker) = &self.tracker {
            if let Err(violation) = tracker.record_free(address) {
                fatal(violation);
            }
        }
        self.allocator.free(address);
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    /// Read a byte.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_byte(&self, address: Address, offset: u64) -> i8 {
        self.validate(address, offset, 1);
        raw::read(address, offset)
    }

    /// Write a byte.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn put_byte(&self, address: Address, offset: u64, value: i8) {
        self.validate(address, offset, 1);
        raw::write(address, offset, value)
    }

    /// Read a 2-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_short(&self, address: Address, offset: u64) -> i16 {
        self.validate(address, offset, 2);
        raw::read(address, offset)
    }

    /// Write a 2-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn put_short(&self, address: Address, offset: u64, value: i16) {
        self.validate(address, offset, 2);
        raw::write(address, offset, value)
    }

    /// Read a 4-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_int(&self, address: Address, offset: u64) -> i32 {
        self.validate(address, offset, 4);
        raw::read(address, offset)
    }

    /// Write a 4-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn put_int(&self, address: Address, offset: u64, value: i32) {
        self.validate(address, offset, 4);
        raw::write(address, offset, value)
    }

    /// Read an 8-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_long(&self, address: Address, offset: u64) -> i64 {
        self.validate(address, offset, 8);
        raw::read(address, offset)
    }

    /// Write an 8-byte integer.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn put_long(&self, address: Address, offset: u64, value: i64) {
        self.validate(address, offset, 8);
        raw::write(address, offset, value)
    }

    /// Atomically install an 8-byte value, returning the previous one.
    ///
    /// # Panics
    ///
    /// Panics if `address + offset` is not 8-byte aligned.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_and_put_long(&self, address: Address, offset: u64, value: i64) -> i64 {
        self.validate(address, offset, 8);
        raw::swap_i64(address, offset, value)
    }

    /// Read an 8-byte address field such as `NEXT`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn get_address(&self, address: Address, offset: u64) -> Address {
        self.validate(address, offset, 8);
        Address::from_raw(raw::read(address, offset))
    }

    /// Write an 8-byte address field such as `NEXT`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn put_address(&self, address: Address, offset: u64, value: Address) {
        self.validate(address, offset, 8);
        raw::write(address, offset, value.as_u64())
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Atomically read the 4-byte counter at `offset`.
    ///
    /// Unlike [`get_int`](Self::get_int) this may run concurrently with
    /// [`increment`](Self::increment) and [`decrement`](Self::decrement).
    ///
    /// # Panics
    ///
    /// Panics if `address + offset` is not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn load_count(&self, address: Address, offset: u64) -> i32 {
        self.validate(address, offset, 4);
        raw::load_i32(address, offset)
    }

    /// Atomically set the 4-byte counter at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `address + offset` is not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn store_count(&self, address: Address, offset: u64, value: i32) {
        self.validate(address, offset, 4);
        raw::store_i32(address, offset, value)
    }

    /// Atomically add one to the 4-byte counter at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `address + offset` is not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn increment(&self, address: Address, offset: u64) {
        self.validate(address, offset, 4);
        raw::increment_i32(address, offset)
    }

    /// Atomically subtract one from the 4-byte counter at `offset`.
    ///
    /// Returns `true` exactly when the counter was 1 before the decrement,
    /// i.e. the last holder just released the block and it may be freed.
    ///
    /// # Panics
    ///
    /// Panics if `address + offset` is not 4-byte aligned.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn decrement(&self, address: Address, offset: u64) -> bool {
        self.validate(address, offset, 4);
        raw::decrement_i32(address, offset)
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Copy a byte slice into a block at `dst_offset`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn copy_from_bytes(&self, src: &[u8], dst: Address, dst_offset: u64) {
        self.validate(dst, dst_offset, src.len() as u64);
        raw::copy_from_slice(src, dst, dst_offset)
    }

    /// Fill a byte slice from a block starting at `src_offset`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn copy_to_bytes(&self, src: Address, src_offset: u64, dst: &mut [u8]) {
        self.validate(src, src_offset, dst.len() as u64);
        raw::copy_to_slice(src, src_offset, dst)
    }

    /// Copy `len` bytes between blocks. The ranges may overlap.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn copy_memory(
        &self,
        src: Address,
        src_offset: u64,
        dst: Address,
        dst_offset: u64,
        len: u64,
    ) {
        self.validate(src, src_offset, len);
        self.validate(dst, dst_offset, len);
        raw::copy(src, src_offset, dst, dst_offset, len as usize)
    }

    /// Fill `len` bytes with `value`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn set_memory(&self, address: Address, offset: u64, len: u64, value: u8) {
        self.validate(address, offset, len);
        raw::fill(address, offset, len as usize, value)
    }

    /// Compare `len` bytes of two ranges.
    ///
    /// Returns `false` if `a` is null and `true` without reading anything if
    /// both ranges start at the same place. Otherwise compares 8, 4 and 2
    /// byte chunks, then single bytes, stopping at the first difference.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract).
    #[track_caller]
    pub unsafe fn memory_compare(
        &self,
        a: Address,
        mut a_offset: u64,
        b: Address,
        mut b_offset: u64,
        mut len: u64,
    ) -> bool {
        if a.is_null() {
            return false;
        }
        if a == b && a_offset == b_offset {
            return true;
        }

        while len >= 8 {
            if self.get_long(a, a_offset) != self.get_long(b, b_offset) {
                return false;
            }
            len -= 8;
            a_offset += 8;
            b_offset += 8;
        }
        while len >= 4 {
            if self.get_int(a, a_offset) != self.get_int(b, b_offset) {
                return false;
            }
            len -= 4;
            a_offset += 4;
            b_offset += 4;
        }
        while len >= 2 {
            if self.get_short(a, a_offset) != self.get_short(b, b_offset) {
                return false;
            }
            len -= 2;
            a_offset += 2;
            b_offset += 2;
        }
        while len > 0 {
            if self.get_byte(a, a_offset) != self.get_byte(b, b_offset) {
                return false;
            }
            len -= 1;
            a_offset += 1;
            b_offset += 1;
        }
        true
    }

    // ========================================================================
    // Zero-copy views
    // ========================================================================

    /// Create a view aliasing `[address + offset, address + offset + len)`.
    ///
    /// The view reads and writes the block directly; nothing is copied.
    /// Fails with [`OffHeapError::InvalidBufferLength`] if `len` exceeds
    /// `i32::MAX`.
    ///
    /// # Safety
    ///
    /// See the [access contract](crate::offheap#access-contract). In addition
    /// the view must be [invalidated](Self::invalidate_direct_buffer) before
    /// the block is freed or reallocated, and must not be used after that.
    #[track_caller]
    pub unsafe fn direct_buffer_for(
        &self,
        address: Address,
        offset: u64,
        len: u64,
        read_only: bool,
    ) -> Result<DirectBuffer, OffHeapError> {
        if len > i32::MAX as u64 {
            return Err(OffHeapError::InvalidBufferLength { len });
        }
        self.validate(address, offset, len);
        Ok(DirectBuffer::from_raw_parts(
            Address::from_ptr(raw::at(address, offset)),
            len as usize,
            read_only,
        ))
    }

    /// Sever a view from its backing memory.
    ///
    /// Afterwards the view has a null address and zero capacity and limit.
    pub fn invalidate_direct_buffer(&self, buffer: &mut DirectBuffer) {
        buffer.invalidate();
    }

    // ========================================================================
    // Leak check
    // ========================================================================

    /// Report every block still allocated and reset the tracker.
    ///
    /// Each leaked block is logged and returned in [`OffHeapError::Leaked`]
    /// with its address, size, `REFCOUNT` value and allocation site. Blocks
    /// are zeroed on allocation in debug mode, so an entry whose count was
    /// never written reports 0. Tracker state is cleared whether or not
    /// anything leaked, so leaked blocks are no longer tracked afterwards.
    /// Always `Ok` without debug access.
    pub fn check_leaks(&self) -> Result<(), OffHeapError> {
        let Some(tracker) = &self.tracker else {
            return Ok(());
        };

        let records = tracker.take_live();
        if records.is_empty() {
            return Ok(());
        }

        let blocks: Vec<LeakedBlock> = records
            .into_iter()
            .map(|(address, record)| {
                let refcount = (record.size >= header::REFCOUNT + 4)
                    // Safety: the block is still allocated, the tracker just forgot it.
                    .then(|| unsafe { raw::load_i32(address, header::REFCOUNT) });
                let block = LeakedBlock {
                    address,
                    size: record.size,
                    refcount,
                    allocated_at: record.site.to_string(),
                };
                error!(
                    address = %block.address,
                    size = block.size,
                    refcount = ?block.refcount,
                    "still allocated, allocated {}",
                    block.allocated_at
                );
                block
            })
            .collect();

        Err(OffHeapError::Leaked { blocks })
    }
}

impl Default for OffHeap {
    fn default() -> Self {
        Self::new(OffHeapConfig::default())
    }
}

impl fmt::Debug for OffHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeap")
            .field("allocator", &self.allocator.name())
            .field("total_allocated", &self.total_allocated())
            .field("tracker", &self.tracker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorKind;

    fn debug_heap() -> OffHeap {
        OffHeap::new(OffHeapConfig::builder().debug_access(true).build())
    }

    #[test]
    fn test_default_has_no_tracker() {
        let heap = OffHeap::default();
        assert!(!heap.is_debug());
        assert_eq!(heap.allocator_name(), "system");
        assert_eq!(heap.tracked_count(), 0);
        assert!(heap.check_leaks().is_ok());
    }

    #[test]
    fn test_allocate_tracks_block() {
        let heap = debug_heap();
        let a = heap.allocate(64);
        assert!(!a.is_null());
        assert_eq!(heap.tracked_count(), 1);
        assert_eq!(heap.total_allocated(), 64);
        unsafe { heap.free(a) };
        assert_eq!(heap.tracked_count(), 0);
        assert_eq!(heap.total_allocated(), 0);
    }

    #[test]
    fn test_allocation_failure() {
        let heap = debug_heap();
        assert!(heap.allocate(u64::MAX).is_null());
        assert_eq!(heap.tracked_count(), 0);
        assert_eq!(
            heap.try_allocate(u64::MAX),
            Err(OffHeapError::OutOfMemory { size: u64::MAX })
        );
    }

    #[test]
    fn test_try_allocate_and_abort_variant_succeed() {
        let heap = debug_heap();
        let a = heap.try_allocate(16).unwrap();
        let b = heap.allocate_or_abort(16);
        unsafe {
            heap.free(a);
            heap.free(b);
        }
        assert!(heap.check_leaks().is_ok());
    }

    #[test]
    fn test_free_null_is_noop() {
        let heap = debug_heap();
        unsafe { heap.free(Address::NULL) };
        assert!(heap.check_leaks().is_ok());
    }

    #[test]
    fn test_accessors_roundtrip() {
        for kind in [AllocatorKind::System, AllocatorKind::Malloc] {
            let heap = OffHeap::new(OffHeapConfig::builder().debug_access(true).allocator(kind).build());
            let a = heap.allocate(32);
            unsafe {
                heap.put_byte(a, 0, i8::MIN);
                heap.put_short(a, 1, i16::MAX);
                heap.put_int(a, 3, -1);
                heap.put_long(a, 7, i64::MIN);
                assert_eq!(heap.get_byte(a, 0), i8::MIN);
                assert_eq!(heap.get_short(a, 1), i16::MAX);
                assert_eq!(heap.get_int(a, 3), -1);
                assert_eq!(heap.get_long(a, 7), i64::MIN);

                heap.put_long(a, 16, 5);
                assert_eq!(heap.get_and_put_long(a, 16, 6), 5);
                assert_eq!(heap.get_long(a, 16), 6);

                heap.put_address(a, 24, a);
                assert_eq!(heap.get_address(a, 24), a);

                heap.free(a);
            }
            assert!(heap.check_leaks().is_ok());
        }
    }

    #[test]
    fn test_reallocate_updates_tracker() {
        let heap = debug_heap();
        let a = heap.allocate(8);
        unsafe {
            heap.put_long(a, 0, 42);
            let b = heap.reallocate(a, 128);
            assert!(!b.is_null());
            assert_eq!(heap.tracker().unwrap().size_of(b), Some(128));
            assert_eq!(heap.get_long(b, 0), 42);
            heap.put_long(b, 120, 1);
            heap.free(b);
        }
        assert!(heap.check_leaks().is_ok());
    }

    #[test]
    fn test_memory_compare() {
        let heap = debug_heap();
        let a = heap.allocate(32);
        let b = heap.allocate(32);
        unsafe {
            heap.set_memory(a, 0, 32, 7);
            heap.set_memory(b, 0, 32, 7);
            assert!(heap.memory_compare(a, 0, b, 0, 32));
            assert!(heap.memory_compare(a, 0, a, 0, 32));
            assert!(heap.memory_compare(a, 3, b, 5, 27));
            assert!(!heap.memory_compare(Address::NULL, 0, b, 0, 8));

            heap.put_byte(b, 31, 8);
            assert!(!heap.memory_compare(a, 0, b, 0, 32));
            assert!(heap.memory_compare(a, 0, b, 0, 31));

            heap.free(a);
            heap.free(b);
        }
    }

    #[test]
    fn test_copy_between_blocks() {
        let heap = debug_heap();
        let a = heap.allocate(16);
        let b = heap.allocate(16);
        let mut out = [0u8; 16];
        unsafe {
            heap.copy_from_bytes(b"0123456789abcdef", a, 0);
            heap.copy_memory(a, 4, b, 0, 8);
            heap.copy_to_bytes(b, 0, &mut out[..8]);
            heap.free(a);
            heap.free(b);
        }
        assert_eq!(&out[..8], b"456789ab");
    }

    #[test]
    fn test_direct_buffer_length_limit() {
        let heap = OffHeap::default();
        let a = heap.allocate(8);
        let result = unsafe { heap.direct_buffer_for(a, 0, i32::MAX as u64 + 1, false) };
        assert_eq!(
            result.unwrap_err(),
            OffHeapError::InvalidBufferLength { len: i32::MAX as u64 + 1 }
        );
        unsafe { heap.free(a) };
    }

    #[test]
    fn test_check_leaks_reports_refcount() {
        let heap = debug_heap();
        let a = heap.allocate(header::DATA);
        let small = heap.allocate(4);
        unsafe {
            heap.put_int(a, header::REFCOUNT, 3);
        }

        match heap.check_leaks() {
            Err(OffHeapError::Leaked { blocks }) => {
                assert_eq!(blocks.len(), 2);
                let entry = blocks.iter().find(|b| b.address == a).unwrap();
                assert_eq!(entry.size, header::DATA);
                assert_eq!(entry.refcount, Some(3));
                assert!(entry.allocated_at.contains("offheap.rs"));
                let small_block = blocks.iter().find(|b| b.address == small).unwrap();
                assert_eq!(small_block.refcount, None);
            }
            other => panic!("expected leak report, got {:?}", other),
        }
        assert_eq!(heap.tracked_count(), 0);
        assert!(heap.check_leaks().is_ok());

        // The tracker forgot them; release through the backend directly.
        unsafe {
            heap.allocator.free(a);
            heap.allocator.free(small);
        }
    }

    #[test]
    fn test_unwritten_refcount_reports_zero() {
        let heap = debug_heap();
        let first = heap.allocate(header::HEADER_SIZE);
        unsafe {
            heap.put_int(first, header::REFCOUNT, 77);
            heap.free(first);
        }
        let reused = heap.allocate(header::HEADER_SIZE);

        match heap.check_leaks() {
            Err(OffHeapError::Leaked { blocks }) => {
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].address, reused);
                assert_eq!(blocks[0].refcount, Some(0));
            }
            other => panic!("expected leak report, got {:?}", other),
        }
        unsafe { heap.allocator.free(reused) };
    }

    #[test]
    fn test_debug_blocks_are_zeroed() {
        let heap = debug_heap();
        let a = heap.allocate(32);
        let mut bytes = [0xFFu8; 32];
        unsafe {
            heap.copy_to_bytes(a, 0, &mut bytes);
            assert!(bytes.iter().all(|&byte| byte == 0));

            heap.set_memory(a, 0, 32, 0xAB);
            let b = heap.reallocate(a, 96);
            let mut grown = [0u8; 96];
            heap.copy_to_bytes(b, 0, &mut grown);
            assert!(grown[..32].iter().all(|&byte| byte == 0xAB));
            assert!(grown[32..].iter().all(|&byte| byte == 0));
            heap.free(b);
        }
        assert!(heap.check_leaks().is_ok());
    }

    #[test]
    fn test_load_and_store_count() {
        let heap = debug_heap();
        let a = heap.allocate(header::HEADER_SIZE);
        unsafe {
            heap.store_count(a, header::REFCOUNT, 2);
            heap.increment(a, header::REFCOUNT);
            assert_eq!(heap.load_count(a, header::REFCOUNT), 3);
            heap.free(a);
        }
    }

    #[test]
    #[should_panic(expected = "access outside allocated region")]
    fn test_out_of_bounds_panics() {
        let heap = debug_heap();
        let a = heap.allocate(8);
        unsafe {
            heap.get_int(a, 6);
        }
    }

    #[test]
    #[should_panic(expected = "free of unallocated region")]
    fn test_free_of_unallocated_panics() {
        let heap = debug_heap();
        unsafe {
            heap.free(Address::from_raw(0x10));
        }
    }
}
