//! Raw off-heap addresses.
//!
//! Blocks are identified by a plain 64-bit address so that they can be stored
//! inside other blocks (the header's `LRU_NEXT`, `LRU_PREV` and `NEXT` fields
//! are addresses). Address `0` is reserved to mean "no block".

use std::fmt;

/// Address of an off-heap block.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    /// The null address ("no block").
    pub const NULL: Self = Self(0);

    /// Create an address from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw address value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Check if the address is null.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub(crate) fn from_ptr(ptr: *mut u8) -> Self {
        Self(ptr as usize as u64)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}
