//! Native-order integer reads from byte slices.
//!
//! Counterparts of the off-heap accessors for keys and values still held in
//! ordinary memory, so both sides compare in the same representation.
//! Out-of-range reads return `None`.

fn array<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

/// Read an 8-byte integer at `offset`.
pub fn get_long(bytes: &[u8], offset: usize) -> Option<i64> {
    array(bytes, offset).map(i64::from_ne_bytes)
}

/// Read a 4-byte integer at `offset`.
pub fn get_int(bytes: &[u8], offset: usize) -> Option<i32> {
    array(bytes, offset).map(i32::from_ne_bytes)
}

/// Read a 2-byte integer at `offset`.
pub fn get_short(bytes: &[u8], offset: usize) -> Option<i16> {
    array(bytes, offset).map(i16::from_ne_bytes)
}
