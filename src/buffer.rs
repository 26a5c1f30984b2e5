//! # Zero-copy Buffer Views
//!
//! A [`DirectBuffer`] aliases a range of off-heap memory: its address,
//! capacity and limit are set directly by
//! [`OffHeap::direct_buffer_for`](crate::OffHeap::direct_buffer_for) and
//! every read or write goes straight to the block. Writes made to the block
//! after the view was created are visible through it.
//!
//! Multi-byte accessors use the view's [`ByteOrder`], big-endian unless
//! changed. Relative access is available through [`std::io::Read`] and
//! [`std::io::Write`], advancing the position.
//!
//! Once the backing block is freed the view must be
//! [invalidated](DirectBuffer::invalidate); an invalidated view has a null
//! address and zero capacity, so every access fails with a bounds error.

use std::io;

use crate::address::Address;
use crate::error::BufferError;
use crate::raw;

/// Byte order for multi-byte view accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first.
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// A view aliasing off-heap memory without copying it.
#[derive(Debug)]
pub struct DirectBuffer {
    address: Address,
    capacity: usize,
    limit: usize,
    position: usize,
    read_only: bool,
    order: ByteOrder,
}

macro_rules! accessors {
    ($($get:ident, $put:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Read an `", stringify!($ty), "` at `index` in the view's byte order.")]
            pub fn $get(&self, index: usize) -> Result<$ty, BufferError> {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                self.read_at(index, &mut bytes)?;
                Ok(match self.order {
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(bytes),
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(bytes),
                })
            }

            #[doc = concat!("Write an `", stringify!($ty), "` at `index` in the view's byte order.")]
            pub fn $put(&mut self, index: usize, value: $ty) -> Result<(), BufferError> {
                let bytes = match self.order {
                    ByteOrder::BigEndian => value.to_be_bytes(),
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                };
                self.write_at(index, &bytes)
            }
        )*
    };
}

impl DirectBuffer {
    /// Alias `len` bytes at `address`.
    pub(crate) fn from_raw_parts(address: Address, len: usize, read_only: bool) -> Self {
        Self {
            address,
            capacity: len,
            limit: len,
            position: 0,
            read_only,
            order: ByteOrder::BigEndian,
        }
    }

    /// Start of the aliased memory, or null once invalidated.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Number of bytes aliased.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// End of the accessible range.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Current position for relative access.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes between position and limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Check if writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Check if the view still aliases memory.
    pub fn is_valid(&self) -> bool {
        !self.address.is_null()
    }

    /// Byte order of multi-byte accessors.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Change the byte order of multi-byte accessors.
    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Move the position used for relative access.
    pub fn set_position(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.limit {
            return Err(BufferError::PositionOutOfBounds {
                position,
                limit: self.limit,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Shrink the accessible range. Clamps the position to the new limit.
    pub fn set_limit(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit > self.capacity {
            return Err(BufferError::PositionOutOfBounds {
                position: limit,
                limit: self.capacity,
            });
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Sever the view from its memory: null address, zero capacity and limit.
    pub fn invalidate(&mut self) {
        self.position = 0;
        self.capacity = 0;
        self.limit = 0;
        self.address = Address::NULL;
    }

    fn check(&self, index: usize, width: usize) -> Result<(), BufferError> {
        match index.checked_add(width) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(BufferError::IndexOutOfBounds {
                index,
                width,
                limit: self.limit,
            }),
        }
    }

    /// Copy bytes at `index` into `dst`.
    pub fn read_at(&self, index: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        self.check(index, dst.len())?;
        if !dst.is_empty() {
            // Safety: the range lies within the aliased memory, which the
            // creator of the view keeps alive until it is invalidated.
            unsafe { raw::copy_to_slice(self.address, index as u64, dst) };
        }
        Ok(())
    }

    /// Copy `src` into the view at `index`.
    pub fn write_at(&mut self, index: usize, src: &[u8]) -> Result<(), BufferError> {
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        self.check(index, src.len())?;
        if !src.is_empty() {
            // Safety: as in `read_at`.
            unsafe { raw::copy_from_slice(src, self.address, index as u64) };
        }
        Ok(())
    }

    /// Read a byte at `index`.
    pub fn get_u8(&self, index: usize) -> Result<u8, BufferError> {
        let mut byte = [0u8; 1];
        self.read_at(index, &mut byte)?;
        Ok(byte[0])
    }

    /// Write a byte at `index`.
    pub fn put_u8(&mut self, index: usize, value: u8) -> Result<(), BufferError> {
        self.write_at(index, &[value])
    }

    accessors! {
        get_i16, put_i16, i16;
        get_i32, put_i32, i32;
        get_i64, put_i64, i64;
    }

    /// Copy the bytes between zero and the limit into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.limit];
        // The whole range up to the limit is always in bounds.
        let _ = self.read_at(0, &mut out);
        out
    }
}

impl io::Read for DirectBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        self.read_at(self.position, &mut buf[..n])?;
        self.position += n;
        Ok(n)
    }
}

impl io::Write for DirectBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        self.write_at(self.position, &buf[..n])?;
        self.position += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
