//! Raw memory primitives.
//!
//! This is the only module that reads or writes block payloads. Everything
//! here is `unsafe` and unchecked; validation happens in
//! [`OffHeap`](crate::OffHeap) before these are called.

use std::mem;
use std::ptr;
use std::sync::atomic::{fence, AtomicI32, AtomicI64, Ordering};

use crate::address::Address;

/// Pointer to `address + offset`.
#[inline]
pub(crate) fn at(address: Address, offset: u64) -> *mut u8 {
    (address.as_u64().wrapping_add(offset)) as usize as *mut u8
}

#[inline]
fn aligned<T>(ptr: *mut u8) -> *mut T {
    // Atomics need natural alignment even where the plain integer does not.
    assert!(
        ptr as usize % mem::size_of::<T>() == 0,
        "misaligned atomic access at {:#x}",
        ptr as usize
    );
    ptr as *mut T
}

/// Read a value in native byte order.
///
/// # Safety
///
/// `address + offset .. + size_of::<T>()` must be readable.
#[inline]
pub(crate) unsafe fn read<T: Copy>(address: Address, offset: u64) -> T {
    ptr::read_unaligned(at(address, offset) as *const T)
}

/// Write a value in native byte order.
///
/// # Safety
///
/// `address + offset .. + size_of::<T>()` must be writable.
#[inline]
pub(crate) unsafe fn write<T: Copy>(address: Address, offset: u64, value: T) {
    ptr::write_unaligned(at(address, offset) as *mut T, value)
}

/// Atomically load a 4-byte value.
///
/// # Safety
///
/// The 4 bytes must be live.
#[inline]
pub(crate) unsafe fn load_i32(address: Address, offset: u64) -> i32 {
    AtomicI32::from_ptr(aligned(at(address, offset))).load(Ordering::Acquire)
}

/// Atomically store a 4-byte value.
///
/// # Safety
///
/// The 4 bytes must be live, and every concurrent access to them must be atomic.
#[inline]
pub(crate) unsafe fn store_i32(address: Address, offset: u64, value: i32) {
    AtomicI32::from_ptr(aligned(at(address, offset))).store(value, Ordering::Release)
}

/// Atomically replace an 8-byte value, returning the previous one.
///
/// # Safety
///
/// The 8 bytes must be live, and every concurrent access to them must be atomic.
#[inline]
pub(crate) unsafe fn swap_i64(address: Address, offset: u64, value: i64) -> i64 {
    AtomicI64::from_ptr(aligned(at(address, offset))).swap(value, Ordering::AcqRel)
}

/// Atomically add one to a 4-byte counter.
///
/// # Safety
///
/// The 4 bytes must be live, and every concurrent access to them must be atomic.
#[inline]
pub(crate) unsafe fn increment_i32(address: Address, offset: u64) {
    AtomicI32::from_ptr(aligned(at(address, offset))).fetch_add(1, Ordering::Relaxed);
}

/// Atomically subtract one from a 4-byte counter.
///
/// Returns `true` if the previous value was 1.
///
/// # Safety
///
/// The 4 bytes must be live, and every concurrent access to them must be atomic.
#[inline]
pub(crate) unsafe fn decrement_i32(address: Address, offset: u64) -> bool {
    let old = AtomicI32::from_ptr(aligned(at(address, offset))).fetch_sub(1, Ordering::Release);
    if old == 1 {
        // Synchronize with every earlier release decrement before the caller frees.
        fence(Ordering::Acquire);
        true
    } else {
        false
    }
}

/// Copy `len` bytes between off-heap ranges. The ranges may overlap.
///
/// # Safety
///
/// Both ranges must be live for `len` bytes.
#[inline]
pub(crate) unsafe fn copy(src: Address, src_offset: u64, dst: Address, dst_offset: u64, len: usize) {
    ptr::copy(at(src, src_offset), at(dst, dst_offset), len)
}

/// Copy a byte slice into off-heap memory.
///
/// # Safety
///
/// `dst + dst_offset .. + src.len()` must be writable and must not overlap `src`.
#[inline]
pub(crate) unsafe fn copy_from_slice(src: &[u8], dst: Address, dst_offset: u64) {
    ptr::copy_nonoverlapping(src.as_ptr(), at(dst, dst_offset), src.len())
}

/// Copy off-heap memory into a byte slice.
///
/// # Safety
///
/// `src + src_offset .. + dst.len()` must be readable and must not overlap `dst`.
#[inline]
pub(crate) unsafe fn copy_to_slice(src: Address, src_offset: u64, dst: &mut [u8]) {
    ptr::copy_nonoverlapping(at(src, src_offset), dst.as_mut_ptr(), dst.len())
}

/// Fill `len` bytes with `value`.
///
/// # Safety
///
/// The range must be writable.
#[inline]
pub(crate) unsafe fn fill(address: Address, offset: u64, len: usize, value: u8) {
    ptr::write_bytes(at(address, offset), value, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(16))]
    struct Block([u8; 64]);

    fn address_of(block: &mut Block) -> Address {
        Address::from_ptr(block.0.as_mut_ptr())
    }

    #[test]
    fn test_read_write_unaligned() {
        let mut block = Block([0; 64]);
        let a = address_of(&mut block);
        unsafe {
            write::<i64>(a, 3, -2);
            assert_eq!(read::<i64>(a, 3), -2);
            write::<i16>(a, 33, 0x1234);
            assert_eq!(read::<i16>(a, 33), 0x1234);
        }
    }

    #[test]
    fn test_counter_ops() {
        let mut block = Block([0; 64]);
        let a = address_of(&mut block);
        unsafe {
            increment_i32(a, 24);
            increment_i32(a, 24);
            assert!(!decrement_i32(a, 24));
            assert!(decrement_i32(a, 24));
            assert_eq!(read::<i32>(a, 24), 0);

            store_i32(a, 24, 5);
            assert_eq!(load_i32(a, 24), 5);
            assert!(!decrement_i32(a, 24));
            assert_eq!(load_i32(a, 24), 4);
        }
    }

    #[test]
    fn test_swap() {
        let mut block = Block([0; 64]);
        let a = address_of(&mut block);
        unsafe {
            write::<i64>(a, 8, 7);
            assert_eq!(swap_i64(a, 8, 9), 7);
            assert_eq!(read::<i64>(a, 8), 9);
        }
    }

    #[test]
    #[should_panic(expected = "misaligned atomic access")]
    fn test_misaligned_atomic_panics() {
        let mut block = Block([0; 64]);
        let a = address_of(&mut block);
        unsafe {
            increment_i32(a, 2);
        }
    }

    #[test]
    fn test_overlapping_copy() {
        let mut block = Block([0; 64]);
        for (i, b) in block.0.iter_mut().enumerate() {
            *b = i as u8;
        }
        let a = address_of(&mut block);
        unsafe {
            copy(a, 0, a, 4, 8);
        }
        assert_eq!(&block.0[4..12], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_fill_and_slices() {
        let mut block = Block([0; 64]);
        let a = address_of(&mut block);
        let mut out = [0u8; 4];
        unsafe {
            fill(a, 10, 4, 0xAB);
            copy_to_slice(a, 10, &mut out);
            assert_eq!(out, [0xAB; 4]);
            copy_from_slice(&[1, 2, 3], a, 0);
        }
        assert_eq!(&block.0[0..3], &[1, 2, 3]);
    }
}
