//! # Allocator Backends
//!
//! Raw block allocation outside Rust's ownership model.
//!
//! ## Design
//!
//! Every block carries a hidden 16-byte prefix holding its requested size, so
//! `free` and `reallocate` need nothing but the address and the live byte
//! count stays exact for every backend. Addresses handed out are 16-byte
//! aligned, which keeps the 8-byte header fields naturally aligned for atomic
//! access.
//!
//! ```text
//! base               address (returned)
//! │                  │
//! ▼                  ▼
//! ┌────────┬────────┬──────────────────────────┐
//! │  size  │  pad   │  size bytes of payload   │
//! └────────┴────────┴──────────────────────────┘
//!   8 B      8 B
//! ```
//!
//! The backend is chosen once from [`AllocatorKind`] by [`new_allocator`].

use std::alloc::{self, Layout};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::address::Address;
use crate::config::AllocatorKind;

/// Size of the hidden block prefix.
const PREFIX: usize = 16;
/// Alignment of every returned address.
pub const BLOCK_ALIGN: usize = 16;

/// A raw block allocator.
///
/// Implementations must be usable from many threads at once.
pub trait RawAllocator: Send + Sync + fmt::Debug {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Allocate `size` bytes.
    ///
    /// Returns [`Address::NULL`] if the request cannot be satisfied.
    fn allocate(&self, size: u64) -> Address;

    /// Release a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live block returned by this allocator.
    unsafe fn free(&self, address: Address);

    /// Resize a block, in place or by moving it.
    ///
    /// A null `address` behaves like [`allocate`](Self::allocate). On failure
    /// [`Address::NULL`] is returned and the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live block returned by this allocator. On
    /// success the old address must no longer be used.
    unsafe fn reallocate(&self, address: Address, new_size: u64) -> Address;

    /// Bytes currently allocated through this backend (excluding prefixes).
    fn total_allocated(&self) -> u64;
}

/// Create the allocator selected by `kind`.
pub fn new_allocator(kind: AllocatorKind) -> Box<dyn RawAllocator> {
    match kind {
        AllocatorKind::System => {
            info!(backend = "system", "off-heap memory allocated through std::alloc");
            Box::new(SystemAllocator::new())
        }
        #[cfg(unix)]
        AllocatorKind::Malloc => {
            info!(backend = "malloc", "off-heap memory allocated through libc malloc/free");
            Box::new(MallocAllocator::new())
        }
        #[cfg(not(unix))]
        AllocatorKind::Malloc => {
            tracing::warn!("malloc backend unavailable on this target, using std::alloc");
            Box::new(SystemAllocator::new())
        }
    }
}

/// Total byte count (payload + prefix) for a request, if representable.
fn block_size(size: u64) -> Option<usize> {
    usize::try_from(size).ok()?.checked_add(PREFIX)
}

fn block_layout(size: u64) -> Option<Layout> {
    Layout::from_size_align(block_size(size)?, BLOCK_ALIGN).ok()
}

/// Write the size prefix and return the payload address.
///
/// # Safety
///
/// `base` must point to at least `PREFIX` writable, 8-byte aligned bytes.
unsafe fn stamp(base: *mut u8, size: u64) -> Address {
    (base as *mut u64).write(size);
    Address::from_ptr(base.add(PREFIX))
}

/// Recover the block base pointer and its recorded size.
///
/// # Safety
///
/// `address` must be a live, non-null block produced by [`stamp`].
unsafe fn unstamp(address: Address) -> (*mut u8, u64) {
    let base = (address.as_u64() as usize as *mut u8).sub(PREFIX);
    let size = (base as *const u64).read();
    (base, size)
}

// ============================================================================
// std::alloc backend
// ============================================================================

/// Allocator backed by Rust's global allocation functions.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    current: AtomicU64,
}

impl SystemAllocator {
    /// Create a new allocator with nothing allocated.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawAllocator for SystemAllocator {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate(&self, size: u64) -> Address {
        let Some(layout) = block_layout(size) else {
            return Address::NULL;
        };
        // Safety: the layout has a non-zero size (it includes the prefix).
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            return Address::NULL;
        }
        self.current.fetch_add(size, Ordering::Relaxed);
        unsafe { stamp(base, size) }
    }

    unsafe fn free(&self, address: Address) {
        if address.is_null() {
            return;
        }
        let (base, size) = unstamp(address);
        let layout = Layout::from_size_align_unchecked(size as usize + PREFIX, BLOCK_ALIGN);
        alloc::dealloc(base, layout);
        self.current.fetch_sub(size, Ordering::Relaxed);
    }

    unsafe fn reallocate(&self, address: Address, new_size: u64) -> Address {
        if address.is_null() {
            return self.allocate(new_size);
        }
        let Some(new_layout) = block_layout(new_size) else {
            return Address::NULL;
        };
        let (base, old_size) = unstamp(address);
        let old_layout = Layout::from_size_align_unchecked(old_size as usize + PREFIX, BLOCK_ALIGN);
        let new_base = alloc::realloc(base, old_layout, new_layout.size());
        if new_base.is_null() {
            return Address::NULL;
        }
        self.current.fetch_add(new_size, Ordering::Relaxed);
        self.current.fetch_sub(old_size, Ordering::Relaxed);
        stamp(new_base, new_size)
    }

    fn total_allocated(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }
}

// ============================================================================
// libc malloc backend
// ============================================================================

/// Allocator backed by the C library's `malloc`, `realloc` and `free`.
///
/// `malloc` guarantees alignment for `max_align_t`, which is 16 bytes on the
/// 64-bit targets this backend is meant for.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct MallocAllocator {
    current: AtomicU64,
}

#[cfg(unix)]
impl MallocAllocator {
    /// Create a new allocator with nothing allocated.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
impl RawAllocator for MallocAllocator {
    fn name(&self) -> &'static str {
        "malloc"
    }

    fn allocate(&self, size: u64) -> Address {
        use nix::libc;

        let Some(total) = block_size(size) else {
            return Address::NULL;
        };
        let base = unsafe { libc::malloc(total) } as *mut u8;
        if base.is_null() {
            return Address::NULL;
        }
        self.current.fetch_add(size, Ordering::Relaxed);
        unsafe { stamp(base, size) }
    }

    unsafe fn free(&self, address: Address) {
        use nix::libc;

        if address.is_null() {
            return;
        }
        let (base, size) = unstamp(address);
        libc::free(base as *mut libc::c_void);
        self.current.fetch_sub(size, Ordering::Relaxed);
    }

    unsafe fn reallocate(&self, address: Address, new_size: u64) -> Address {
        use nix::libc;

        if address.is_null() {
            return self.allocate(new_size);
        }
        let Some(total) = block_size(new_size) else {
            return Address::NULL;
        };
        let (base, old_size) = unstamp(address);
        let new_base = libc::realloc(base as *mut libc::c_void, total) as *mut u8;
        if new_base.is_null() {
            return Address::NULL;
        }
        self.current.fetch_add(new_size, Ordering::Relaxed);
        self.current.fetch_sub(old_size, Ordering::Relaxed);
        stamp(new_base, new_size)
    }

    fn total_allocated(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }
}
