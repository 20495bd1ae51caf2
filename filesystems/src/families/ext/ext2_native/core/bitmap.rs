// Bitmap helpers for ext2 block and inode allocation
// Bitmaps live inside the image, so everything here works on borrowed byte slices.
// Bit index = (number - 1); a set bit means the unit is in use.

use super::constants::{EXT2_BAD_INODE_INDEX, EXT2_RESERVED_INODE_INDICES};

/// Check if a bit is set. Indices past the end of the slice read as in use.
pub fn is_allocated(bitmap: &[u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    let bit_index = (index % 8) as u8;
    match bitmap.get(byte_index) {
        Some(byte) => (byte & (1 << bit_index)) != 0,
        None => true,
    }
}

/// Set a bit (mark as used)
pub fn set(bitmap: &mut [u8], index: u32) {
    let byte_index = (index / 8) as usize;
    let bit_index = (index % 8) as u8;
    if let Some(byte) = bitmap.get_mut(byte_index) {
        *byte |= 1 << bit_index;
    }
}

/// Clear a bit (mark as free)
pub fn clear(bitmap: &mut [u8], index: u32) {
    let byte_index = (index / 8) as usize;
    let bit_index = (index % 8) as u8;
    if let Some(byte) = bitmap.get_mut(byte_index) {
        *byte &= !(1 << bit_index);
    }
}

/// Set `count` bits starting at `start`
pub fn set_range(bitmap: &mut [u8], start: u32, count: u32) {
    for i in start..start.saturating_add(count) {
        set(bitmap, i);
    }
}

/// Count clear bits among the first `count` indices
pub fn count_free(bitmap: &[u8], count: u32) -> u32 {
    (0..count).filter(|&i| !is_allocated(bitmap, i)).count() as u32
}

/// First-fit scan for a clear block bit, starting at index 0
pub fn find_free_block(bitmap: &[u8], count: u32) -> Option<u32> {
    (0..count).find(|&i| !is_allocated(bitmap, i))
}

/// First-fit scan for a clear inode bit.
///
/// Index 0 (inode 1) and indices 2..=9 (inodes 3..=10) are never returned
/// even when clear. Index 1 (root) is still a candidate once its bit is clear.
pub fn find_free_inode(bitmap: &[u8], count: u32) -> Option<u32> {
    (0..count)
        .filter(|&i| i != EXT2_BAD_INODE_INDEX && !EXT2_RESERVED_INODE_INDICES.contains(&i))
        .find(|&i| !is_allocated(bitmap, i))
}
