//! # Off-heap Memory Access
//!
//! Raw memory blocks outside Rust's ownership model, laid out as cache
//! entries and shared between threads by reference count.
//!
//! - **Allocation**: pluggable backends (`std::alloc`, libc `malloc`) that
//!   track the live byte count
//! - **Entry header**: a fixed 64-byte layout for hash chain, LRU links,
//!   reference count, expiry and key/value lengths
//! - **Typed access**: 1, 2, 4 and 8-byte reads and writes, atomic swap,
//!   atomic reference counting
//! - **Bulk operations**: copy, fill and chunked compare
//! - **Zero-copy views**: [`DirectBuffer`] aliases a block without copying
//! - **Debug tracking**: optional validation of every allocation, free and
//!   access, with leak reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        OffHeap (offheap.rs)                  │
//! │  typed accessors · refcount · bulk ops · views · leak check  │
//! ├───────────────┬────────────────────┬─────────────────────────┤
//! │ RawAllocator  │   DebugTracker     │     raw primitives      │
//! │  (alloc.rs)   │   (tracker.rs)     │       (raw.rs)          │
//! └───────────────┴────────────────────┴─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use offheap::{header, OffHeap, OffHeapConfig};
//!
//! let heap = OffHeap::new(OffHeapConfig::builder().debug_access(true).build());
//!
//! let entry = heap.allocate(header::HEADER_SIZE);
//! assert!(!entry.is_null());
//! unsafe {
//!     heap.put_int(entry, header::REFCOUNT, 0);
//!     heap.increment(entry, header::REFCOUNT);
//!     heap.put_long(entry, header::HASH, 1234);
//!     assert_eq!(heap.get_long(entry, header::HASH), 1234);
//!     if heap.decrement(entry, header::REFCOUNT) {
//!         heap.free(entry);
//!     }
//! }
//! assert!(heap.check_leaks().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod address;
pub mod alloc;
pub mod buffer;
pub mod config;
pub mod error;
pub mod header;
pub mod offheap;
mod raw;
pub mod slice;
pub mod tracker;

// Re-exports
pub use address::Address;
pub use alloc::{RawAllocator, SystemAllocator};
#[cfg(unix)]
pub use alloc::MallocAllocator;
pub use buffer::{ByteOrder, DirectBuffer};
pub use config::{AllocatorKind, OffHeapConfig, OffHeapConfigBuilder};
pub use error::{AccessViolation, BufferError, ConfigError, LeakedBlock, OffHeapError};
pub use header::EntryHeader;
pub use offheap::OffHeap;
pub use tracker::DebugTracker;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
