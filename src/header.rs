//! # Entry Header Layout
//!
//! Fixed byte layout at the start of every block used as a cache entry.
//! The offsets are part of the memory format shared with the hash table and
//! LRU engine and must never change.
//!
//! ```text
//! 0        8        16       24   28   32       40   44   48       56   60   64
//! ┌────────┬────────┬────────┬────┬────┬────────┬────┬────┬────────┬────┬────┬───────────────┐
//! │LRU_NEXT│LRU_PREV│  NEXT  │REF │SENT│EXPIRE  │GEN │ -- │  HASH  │VLEN│KLEN│ key │ value   │
//! └────────┴────────┴────────┴────┴────┴────────┴────┴────┴────────┴────┴────┴───────────────┘
//! ```
//!
//! Only `REFCOUNT` is updated atomically. The other fields are owned by the
//! engine and need its locking; `SENTINEL` is opaque to this crate.

use std::fmt;

use crate::address::Address;
use crate::offheap::OffHeap;

/// Forward pointer in the eviction list (8 bytes).
pub const LRU_NEXT: u64 = 0;
/// Backward pointer in the eviction list (8 bytes).
pub const LRU_PREV: u64 = 8;
/// Next entry in the hash bucket chain (8 bytes).
pub const NEXT: u64 = 16;
/// Live-holder count (4 bytes, atomic).
pub const REFCOUNT: u64 = 24;
/// Opaque guard value owned by the caller (4 bytes).
pub const SENTINEL: u64 = 28;
/// Expiration timestamp or slot (8 bytes).
pub const EXPIRE_AT: u64 = 32;
/// LRU generation, one of two values (4 bytes).
pub const GENERATION: u64 = 40;
// bytes 44..48 unused
/// Precomputed key hash (8 bytes).
pub const HASH: u64 = 48;
/// Serialized value length (4 bytes).
pub const VALUE_LENGTH: u64 = 56;
/// Serialized key length (4 bytes).
pub const KEY_LENGTH: u64 = 60;
/// Start of key bytes, followed by value bytes.
pub const DATA: u64 = 64;

/// Size of the header in bytes.
pub const HEADER_SIZE: u64 = DATA;

/// Minimum block size for an entry with the given key and value lengths.
///
/// Returns `None` on overflow.
pub fn allocation_size(key_len: u64, value_len: u64) -> Option<u64> {
    HEADER_SIZE.checked_add(key_len)?.checked_add(value_len)
}

/// Typed view of the header of a live entry block.
///
/// Every accessor goes through the owning [`OffHeap`], so debug-mode
/// validation still applies.
#[derive(Clone, Copy)]
pub struct EntryHeader<'a> {
    heap: &'a OffHeap,
    address: Address,
}

impl<'a> EntryHeader<'a> {
    /// Wrap the header at `address`.
    ///
    /// # Safety
    ///
    /// `address` must be a live block from `heap` of at least
    /// [`HEADER_SIZE`] bytes, and must stay allocated while the view is used.
    /// Callers coordinate concurrent access to every field except `REFCOUNT`.
    pub unsafe fn new(heap: &'a OffHeap, address: Address) -> Self {
        Self { heap, address }
    }

    /// Address of the entry block.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Forward pointer in the eviction list.
    pub fn lru_next(&self) -> Address {
        unsafe { self.heap.get_address(self.address, LRU_NEXT) }
    }

    /// Set the forward pointer in the eviction list.
    pub fn set_lru_next(&self, next: Address) {
        unsafe { self.heap.put_address(self.address, LRU_NEXT, next) }
    }

    /// Backward pointer in the eviction list.
    pub fn lru_prev(&self) -> Address {
        unsafe { self.heap.get_address(self.address, LRU_PREV) }
    }

    /// Set the backward pointer in the eviction list.
    pub fn set_lru_prev(&self, prev: Address) {
        unsafe { self.heap.put_address(self.address, LRU_PREV, prev) }
    }

    /// Next entry in the hash bucket chain.
    pub fn next(&self) -> Address {
        unsafe { self.heap.get_address(self.address, NEXT) }
    }

    /// Set the next entry in the hash bucket chain.
    pub fn set_next(&self, next: Address) {
        unsafe { self.heap.put_address(self.address, NEXT, next) }
    }

    /// Current reference count, read atomically.
    pub fn refcount(&self) -> i32 {
        unsafe { self.heap.load_count(self.address, REFCOUNT) }
    }

    /// Set the reference count atomically. Only for initializing a new entry.
    pub fn init_refcount(&self, refcount: i32) {
        unsafe { self.heap.store_count(self.address, REFCOUNT, refcount) }
    }

    /// Add a holder.
    pub fn reference(&self) {
        unsafe { self.heap.increment(self.address, REFCOUNT) }
    }

    /// Drop a holder. Returns `true` when the last holder is gone and the
    /// block may be freed.
    pub fn dereference(&self) -> bool {
        unsafe { self.heap.decrement(self.address, REFCOUNT) }
    }

    /// The opaque sentinel value.
    pub fn sentinel(&self) -> i32 {
        unsafe { self.heap.get_int(self.address, SENTINEL) }
    }

    /// Set the opaque sentinel value.
    pub fn set_sentinel(&self, sentinel: i32) {
        unsafe { self.heap.put_int(self.address, SENTINEL, sentinel) }
    }

    /// Expiration timestamp or slot.
    pub fn expire_at(&self) -> i64 {
        unsafe { self.heap.get_long(self.address, EXPIRE_AT) }
    }

    /// Set the expiration timestamp or slot.
    pub fn set_expire_at(&self, expire_at: i64) {
        unsafe { self.heap.put_long(self.address, EXPIRE_AT, expire_at) }
    }

    /// LRU generation.
    pub fn generation(&self) -> i32 {
        unsafe { self.heap.get_int(self.address, GENERATION) }
    }

    /// Set the LRU generation.
    pub fn set_generation(&self, generation: i32) {
        unsafe { self.heap.put_int(self.address, GENERATION, generation) }
    }

    /// Precomputed key hash.
    pub fn hash(&self) -> i64 {
        unsafe { self.heap.get_long(self.address, HASH) }
    }

    /// Set the precomputed key hash.
    pub fn set_hash(&self, hash: i64) {
        unsafe { self.heap.put_long(self.address, HASH, hash) }
    }

    /// Serialized value length.
    pub fn value_length(&self) -> i32 {
        unsafe { self.heap.get_int(self.address, VALUE_LENGTH) }
    }

    /// Set the serialized value length.
    pub fn set_value_length(&self, len: i32) {
        unsafe { self.heap.put_int(self.address, VALUE_LENGTH, len) }
    }

    /// Serialized key length.
    pub fn key_length(&self) -> i32 {
        unsafe { self.heap.get_int(self.address, KEY_LENGTH) }
    }

    /// Set the serialized key length.
    pub fn set_key_length(&self, len: i32) {
        unsafe { self.heap.put_int(self.address, KEY_LENGTH, len) }
    }

    /// Offset of the value bytes (right after the key).
    ///
    /// Returns `None` if the stored key length is negative.
    pub fn value_offset(&self) -> Option<u64> {
        u32::try_from(self.key_length()).ok().map(|len| DATA + u64::from(len))
    }
}

impl fmt::Debug for EntryHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryHeader")
            .field("address", &self.address)
            .field("refcount", &self.refcount())
            .field("key_length", &self.key_length())
            .field("value_length", &self.value_length())
            .finish()
    }
}
