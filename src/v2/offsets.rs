//! Self-relative offset arithmetic.
//!
//! Child pointers inside inner nodes are stored relative to the file
//! position of the slot holding them: `target = slot_offset + rel`. Encoding
//! pointers this way keeps any contiguous byte range relocatable without
//! rewriting it.

use std::mem::size_of;

use crate::error::{CatlError, Result};
use crate::v2::layout::{AbsOff, RelOff};

/// File offset of slot `index` in a pointer array starting at `array_base`.
#[inline]
pub fn slot_file_offset(array_base: AbsOff, index: usize) -> AbsOff {
    array_base + (index as u64) * size_of::<RelOff>() as u64
}

/// Resolve a self-relative value loaded from the slot at `slot_offset`.
#[inline]
pub fn absolute_of(slot_offset: AbsOff, rel: RelOff) -> AbsOff {
    slot_offset.wrapping_add(rel as u64)
}

/// Encode `target` relative to the slot that will hold the value.
#[inline]
pub fn relative_to(target: AbsOff, slot_offset: AbsOff) -> RelOff {
    target.wrapping_sub(slot_offset) as i64
}

/// Load the 8-byte self-relative value stored at `slot_offset`.
///
/// Slots are never naturally aligned (they follow a 40-byte header at an
/// arbitrary file position), so the value is assembled from bytes rather
/// than dereferenced.
#[inline]
pub fn load_rel(data: &[u8], slot_offset: AbsOff) -> Result<RelOff> {
    let start = slot_offset as usize;
    let bytes: [u8; 8] = data
        .get(start..start + size_of::<RelOff>())
        .and_then(|slice| slice.try_into().ok())
        .ok_or(CatlError::Truncated {
            offset: slot_offset,
            needed: size_of::<RelOff>() as u64,
            file_size: data.len() as u64,
        })?;
    Ok(RelOff::from_ne_bytes(bytes))
}
