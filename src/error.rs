//! Error types.
//!
//! Two tiers:
//! - [`AccessViolation`]: programmer errors detected by the debug tracker
//!   (bad access, double free, leaked blocks). [`OffHeap`](crate::OffHeap)
//!   raises them as panics.
//! - [`OffHeapError`], [`BufferError`], [`ConfigError`]: recoverable errors
//!   returned to the caller.

use std::fmt;

use thiserror::Error;

use crate::address::Address;

/// Violation detected by the debug tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessViolation {
    /// Access through the null address.
    #[error("access through null address")]
    NullAddress,

    /// Access to an address that was never allocated.
    #[error("access to unallocated region {address}")]
    Unallocated {
        /// Accessed address.
        address: Address,
    },

    /// Access to an address that has already been freed.
    #[error("access to freed region {address}, freed {freed_at}")]
    UseAfterFree {
        /// Accessed address.
        address: Address,
        /// Where the region was freed.
        freed_at: String,
    },

    /// `offset + len` does not fit in 64 bits.
    #[error("access length overflow at {address}: offset {offset} + length {len}")]
    LengthOverflow {
        /// Accessed address.
        address: Address,
        /// Access offset.
        offset: u64,
        /// Access length.
        len: u64,
    },

    /// Access beyond the allocated size.
    #[error("access outside allocated region {address}: offset {offset} + length {len} > size {size}")]
    OutOfBounds {
        /// Accessed address.
        address: Address,
        /// Access offset.
        offset: u64,
        /// Access length.
        len: u64,
        /// Allocated size of the region.
        size: u64,
    },

    /// Free of an address that was already freed.
    #[error("double free of region {address}, previously freed {freed_at}")]
    DoubleFree {
        /// Freed address.
        address: Address,
        /// Where the region was first freed.
        freed_at: String,
    },

    /// Free of an address that was never allocated.
    #[error("free of unallocated region {address}")]
    FreeOfUnallocated {
        /// Freed address.
        address: Address,
    },

    /// The allocator returned an address that is still live.
    #[error("allocator returned duplicate address {address}")]
    DuplicateAddress {
        /// Duplicated address.
        address: Address,
    },
}

/// A block still allocated when the leak check ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedBlock {
    /// Block address.
    pub address: Address,
    /// Allocated size in bytes.
    pub size: u64,
    /// Value of the entry REFCOUNT field, if the block is large enough to hold one.
    pub refcount: Option<i32>,
    /// Where the block was allocated.
    pub allocated_at: String,
}

impl fmt::Display for LeakedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address={}, size={}", self.address, self.size)?;
        if let Some(refcount) = self.refcount {
            write!(f, ", refcount={}", refcount)?;
        }
        write!(f, ", allocated {}", self.allocated_at)
    }
}

/// Recoverable off-heap error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffHeapError {
    /// The allocator backend could not satisfy the request.
    #[error("unable to allocate {size} bytes off-heap")]
    OutOfMemory {
        /// Requested size.
        size: u64,
    },

    /// A buffer view length does not fit in a 32-bit signed size.
    #[error("buffer length {len} outside representable range")]
    InvalidBufferLength {
        /// Requested length.
        len: u64,
    },

    /// Blocks were still allocated at leak check time.
    #[error("not all allocated memory has been freed: {} block(s) still allocated", .blocks.len())]
    Leaked {
        /// The leaked blocks.
        blocks: Vec<LeakedBlock>,
    },
}

/// Error from a [`DirectBuffer`](crate::DirectBuffer) access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Write to a read-only view.
    #[error("buffer is read-only")]
    ReadOnly,

    /// Absolute access past the limit.
    #[error("index {index} + width {width} out of bounds for limit {limit}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Access width in bytes.
        width: usize,
        /// Current limit.
        limit: usize,
    },

    /// Position set past the limit.
    #[error("position {position} out of bounds for limit {limit}")]
    PositionOutOfBounds {
        /// Requested position.
        position: usize,
        /// Current limit.
        limit: usize,
    },
}

impl From<BufferError> for std::io::Error {
    fn from(e: BufferError) -> std::io::Error {
        let kind = match e {
            BufferError::ReadOnly => std::io::ErrorKind::PermissionDenied,
            _ => std::io::ErrorKind::InvalidInput,
        };
        std::io::Error::new(kind, e)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Unknown allocator backend name.
    #[error("unknown allocator backend '{0}'")]
    UnknownAllocator(String),

    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field or variable name.
        field: String,
        /// Error message.
        message: String,
    },
}
