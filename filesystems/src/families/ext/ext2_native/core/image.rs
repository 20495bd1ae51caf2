// EXT2 image arena
// The whole image is held in one owned buffer; every structure is reached
// through bounds-checked (block, offset) accessors.

use super::bitmap;
use super::constants::*;
use super::structures::{Ext2GroupDesc, Ext2Inode, Ext2Superblock};
use super::types::{BlockNumber, InodeNumber, Resource};
use ext2kit_core::{Ext2KitError, Ext2Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Geometry read once at load time. None of these values change while editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub first_data_block: u32,
    pub inode_size: usize,
    pub block_bitmap: BlockNumber,
    pub inode_bitmap: BlockNumber,
    pub inode_table: BlockNumber,
}

impl ImageLayout {
    /// Number of block bits; bit 0 is `first_data_block`
    pub fn block_bits(&self) -> u32 {
        self.blocks_count - self.first_data_block
    }

    pub fn inode_table_blocks(&self) -> u32 {
        let bytes = self.inodes_count as usize * self.inode_size;
        bytes.div_ceil(EXT2_BLOCK_SIZE) as u32
    }
}

pub struct Ext2Image {
    data: Vec<u8>,
    path: Option<PathBuf>,
    layout: ImageLayout,
}

impl std::fmt::Debug for Ext2Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Image")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("layout", &self.layout)
            .finish()
    }
}

impl Ext2Image {
    /// Read and validate an image file. `flush` writes back to the same path.
    pub fn open(path: &Path) -> Ext2Result<Self> {
        let data = std::fs::read(path)?;
        let mut image = Self::from_bytes(data)?;
        image.path = Some(path.to_path_buf());
        info!("Opened image {} ({} blocks)", path.display(), image.layout.blocks_count);
        Ok(image)
    }

    /// Validate an in-memory image
    pub fn from_bytes(data: Vec<u8>) -> Ext2Result<Self> {
        if data.len() % EXT2_BLOCK_SIZE != 0 {
            return Err(Ext2KitError::Corrupt(format!(
                "image size {} is not a multiple of {}",
                data.len(),
                EXT2_BLOCK_SIZE
            )));
        }
        if data.len() < EXT2_GROUP_DESC_OFFSET + EXT2_BLOCK_SIZE {
            return Err(Ext2KitError::Corrupt("image too small to hold a superblock".to_string()));
        }

        let sb = Ext2Superblock::read_from(&data[EXT2_SUPERBLOCK_OFFSET..])?;
        if sb.s_magic != EXT2_SUPER_MAGIC {
            return Err(Ext2KitError::Corrupt(format!(
                "bad superblock magic 0x{:04X}",
                sb.s_magic
            )));
        }
        if sb.s_log_block_size != EXT2_LOG_BLOCK_SIZE {
            return Err(Ext2KitError::Corrupt(format!(
                "unsupported block size {}",
                sb.block_size()
            )));
        }
        let available_blocks = (data.len() / EXT2_BLOCK_SIZE) as u32;
        if sb.s_blocks_count == 0 || sb.s_blocks_count > available_blocks {
            return Err(Ext2KitError::Corrupt(format!(
                "superblock claims {} blocks, image holds {}",
                sb.s_blocks_count, available_blocks
            )));
        }
        if sb.s_first_data_block >= sb.s_blocks_count {
            return Err(Ext2KitError::Corrupt("first data block out of range".to_string()));
        }
        let inode_size = sb.inode_size();
        if inode_size < EXT2_GOOD_OLD_INODE_SIZE || inode_size > EXT2_BLOCK_SIZE {
            return Err(Ext2KitError::Corrupt(format!("invalid inode size {}", inode_size)));
        }
        // Single group: each bitmap is one block
        let max_bits = (EXT2_BLOCK_SIZE * 8) as u32;
        if sb.s_inodes_count < EXT2_ROOT_INO || sb.s_inodes_count > max_bits {
            return Err(Ext2KitError::Corrupt(format!(
                "unsupported inode count {}",
                sb.s_inodes_count
            )));
        }
        if sb.s_blocks_count - sb.s_first_data_block > max_bits {
            return Err(Ext2KitError::Corrupt(format!(
                "{} blocks do not fit in one block group",
                sb.s_blocks_count
            )));
        }

        let gd = Ext2GroupDesc::read_from(&data[EXT2_GROUP_DESC_OFFSET..])?;
        let layout = ImageLayout {
            blocks_count: sb.s_blocks_count,
            inodes_count: sb.s_inodes_count,
            first_data_block: sb.s_first_data_block,
            inode_size,
            block_bitmap: gd.bg_block_bitmap,
            inode_bitmap: gd.bg_inode_bitmap,
            inode_table: gd.bg_inode_table,
        };

        for (what, block) in [("block bitmap", gd.bg_block_bitmap), ("inode bitmap", gd.bg_inode_bitmap)] {
            if block < sb.s_first_data_block || block >= sb.s_blocks_count {
                return Err(Ext2KitError::Corrupt(format!("{} at invalid block {}", what, block)));
            }
        }
        let table_end = gd.bg_inode_table as u64 + layout.inode_table_blocks() as u64;
        if gd.bg_inode_table < sb.s_first_data_block || table_end > sb.s_blocks_count as u64 {
            return Err(Ext2KitError::Corrupt(format!(
                "inode table at block {} does not fit in the image",
                gd.bg_inode_table
            )));
        }

        debug!("Loaded image layout: {:?}", layout);
        Ok(Self { data, path: None, layout })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Write the buffer back to the file it was opened from
    pub fn flush(&self) -> Ext2Result<()> {
        let path = self.path.as_deref().ok_or_else(|| {
            Ext2KitError::InvalidInput("image has no backing file".to_string())
        })?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Ext2Result<()> {
        std::fs::write(path, &self.data)?;
        info!("Wrote {} bytes to {}", self.data.len(), path.display());
        Ok(())
    }

    // ---- raw access ----

    fn range(&self, offset: usize, len: usize) -> Ext2Result<std::ops::Range<usize>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Ext2KitError::Corrupt(format!("access at {}+{} outside the image", offset, len))
            })?;
        Ok(offset..end)
    }

    /// Whole block `block`; block 0 (boot block) included
    pub fn block(&self, block: BlockNumber) -> Ext2Result<&[u8]> {
        self.check_block_number(block)?;
        let range = self.range(block as usize * EXT2_BLOCK_SIZE, EXT2_BLOCK_SIZE)?;
        Ok(&self.data[range])
    }

    pub fn block_mut(&mut self, block: BlockNumber) -> Ext2Result<&mut [u8]> {
        self.check_block_number(block)?;
        let range = self.range(block as usize * EXT2_BLOCK_SIZE, EXT2_BLOCK_SIZE)?;
        Ok(&mut self.data[range])
    }

    fn check_block_number(&self, block: BlockNumber) -> Ext2Result<()> {
        if block >= self.layout.blocks_count {
            return Err(Ext2KitError::Corrupt(format!(
                "block {} beyond end of filesystem ({} blocks)",
                block, self.layout.blocks_count
            )));
        }
        Ok(())
    }

    /// A pointer stored in an inode or indirect block must name a data block
    pub fn check_data_block(&self, block: BlockNumber) -> Ext2Result<()> {
        if block < self.layout.first_data_block || block >= self.layout.blocks_count {
            return Err(Ext2KitError::Corrupt(format!("invalid block pointer {}", block)));
        }
        Ok(())
    }

    pub fn is_valid_inode(&self, ino: InodeNumber) -> bool {
        ino >= 1 && ino <= self.layout.inodes_count
    }

    // ---- superblock / group descriptor ----

    pub fn superblock(&self) -> Ext2Result<Ext2Superblock> {
        Ext2Superblock::read_from(&self.data[self.range(EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?])
    }

    pub fn write_superblock(&mut self, sb: &Ext2Superblock) -> Ext2Result<()> {
        let range = self.range(EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?;
        sb.write_to(&mut self.data[range])
    }

    pub fn group_desc(&self) -> Ext2Result<Ext2GroupDesc> {
        Ext2GroupDesc::read_from(&self.data[self.range(EXT2_GROUP_DESC_OFFSET, EXT2_GROUP_DESC_SIZE)?])
    }

    pub fn write_group_desc(&mut self, gd: &Ext2GroupDesc) -> Ext2Result<()> {
        let range = self.range(EXT2_GROUP_DESC_OFFSET, EXT2_GROUP_DESC_SIZE)?;
        gd.write_to(&mut self.data[range])
    }

    // ---- inode table ----

    fn inode_range(&self, ino: InodeNumber) -> Ext2Result<std::ops::Range<usize>> {
        if !self.is_valid_inode(ino) {
            return Err(Ext2KitError::Corrupt(format!(
                "inode {} outside 1..={}",
                ino, self.layout.inodes_count
            )));
        }
        let offset = self.layout.inode_table as usize * EXT2_BLOCK_SIZE
            + (ino as usize - 1) * self.layout.inode_size;
        self.range(offset, self.layout.inode_size)
    }

    pub fn read_inode(&self, ino: InodeNumber) -> Ext2Result<Ext2Inode> {
        let range = self.inode_range(ino)?;
        Ext2Inode::read_from(&self.data[range])
    }

    pub fn write_inode(&mut self, ino: InodeNumber, inode: &Ext2Inode) -> Ext2Result<()> {
        let range = self.inode_range(ino)?;
        inode.write_to(&mut self.data[range])
    }

    // ---- bitmaps ----

    fn bitmap_range(&self, resource: Resource) -> Ext2Result<std::ops::Range<usize>> {
        let (block, bits) = match resource {
            Resource::Inodes => (self.layout.inode_bitmap, self.layout.inodes_count),
            Resource::Blocks => (self.layout.block_bitmap, self.layout.block_bits()),
        };
        self.range(block as usize * EXT2_BLOCK_SIZE, bits.div_ceil(8) as usize)
    }

    pub fn bitmap(&self, resource: Resource) -> Ext2Result<&[u8]> {
        let range = self.bitmap_range(resource)?;
        Ok(&self.data[range])
    }

    pub fn bitmap_mut(&mut self, resource: Resource) -> Ext2Result<&mut [u8]> {
        let range = self.bitmap_range(resource)?;
        Ok(&mut self.data[range])
    }

    /// Number of meaningful bits in a bitmap
    pub fn bit_count(&self, resource: Resource) -> u32 {
        match resource {
            Resource::Inodes => self.layout.inodes_count,
            Resource::Blocks => self.layout.block_bits(),
        }
    }

    fn bit_index(&self, resource: Resource, number: u32) -> Ext2Result<u32> {
        let base = match resource {
            Resource::Inodes => 1,
            Resource::Blocks => self.layout.first_data_block,
        };
        match number.checked_sub(base) {
            Some(index) if index < self.bit_count(resource) => Ok(index),
            _ => Err(Ext2KitError::Corrupt(format!("{} number {} out of range", resource, number))),
        }
    }

    fn number_for(&self, resource: Resource, index: u32) -> u32 {
        match resource {
            Resource::Inodes => index + 1,
            Resource::Blocks => index + self.layout.first_data_block,
        }
    }

    pub fn is_in_use(&self, resource: Resource, number: u32) -> Ext2Result<bool> {
        let index = self.bit_index(resource, number)?;
        Ok(bitmap::is_allocated(self.bitmap(resource)?, index))
    }

    pub fn inode_in_use(&self, ino: InodeNumber) -> Ext2Result<bool> {
        self.is_in_use(Resource::Inodes, ino)
    }

    pub fn block_in_use(&self, block: BlockNumber) -> Ext2Result<bool> {
        self.is_in_use(Resource::Blocks, block)
    }

    /// Free units according to the bitmap
    pub fn count_free(&self, resource: Resource) -> Ext2Result<u32> {
        Ok(bitmap::count_free(self.bitmap(resource)?, self.bit_count(resource)))
    }

    // ---- counters ----

    /// Move the group descriptor and superblock free counters together.
    pub fn adjust_free(&mut self, resource: Resource, delta: i64) -> Ext2Result<()> {
        let mut gd = self.group_desc()?;
        let mut sb = self.superblock()?;
        match resource {
            Resource::Inodes => {
                gd.bg_free_inodes_count = clamp_u16(gd.bg_free_inodes_count as i64 + delta);
                sb.s_free_inodes_count = clamp_u32(sb.s_free_inodes_count as i64 + delta);
            }
            Resource::Blocks => {
                gd.bg_free_blocks_count = clamp_u16(gd.bg_free_blocks_count as i64 + delta);
                sb.s_free_blocks_count = clamp_u32(sb.s_free_blocks_count as i64 + delta);
            }
        }
        self.write_group_desc(&gd)?;
        self.write_superblock(&sb)
    }

    /// Overwrite both free counters with `value`
    pub fn set_free(&mut self, resource: Resource, value: u32) -> Ext2Result<()> {
        let mut gd = self.group_desc()?;
        let mut sb = self.superblock()?;
        match resource {
            Resource::Inodes => {
                gd.bg_free_inodes_count = clamp_u16(value as i64);
                sb.s_free_inodes_count = value;
            }
            Resource::Blocks => {
                gd.bg_free_blocks_count = clamp_u16(value as i64);
                sb.s_free_blocks_count = value;
            }
        }
        self.write_group_desc(&gd)?;
        self.write_superblock(&sb)
    }

    pub fn adjust_used_dirs(&mut self, delta: i64) -> Ext2Result<()> {
        let mut gd = self.group_desc()?;
        gd.bg_used_dirs_count = clamp_u16(gd.bg_used_dirs_count as i64 + delta);
        self.write_group_desc(&gd)
    }

    // ---- allocation ----

    /// Set the bit for `number` and take one from the free counters.
    /// Returns false (and changes nothing) if it was already set.
    pub fn mark_in_use(&mut self, resource: Resource, number: u32) -> Ext2Result<bool> {
        let index = self.bit_index(resource, number)?;
        let map = self.bitmap_mut(resource)?;
        if bitmap::is_allocated(map, index) {
            return Ok(false);
        }
        bitmap::set(map, index);
        self.adjust_free(resource, -1)?;
        Ok(true)
    }

    /// Clear the bit for `number` and give one back to the free counters.
    /// Returns false (and changes nothing) if it was already clear.
    pub fn release(&mut self, resource: Resource, number: u32) -> Ext2Result<bool> {
        let index = self.bit_index(resource, number)?;
        let map = self.bitmap_mut(resource)?;
        if !bitmap::is_allocated(map, index) {
            return Ok(false);
        }
        bitmap::clear(map, index);
        self.adjust_free(resource, 1)?;
        Ok(true)
    }

    pub fn allocate_inode(&mut self) -> Ext2Result<InodeNumber> {
        let index = bitmap::find_free_inode(self.bitmap(Resource::Inodes)?, self.layout.inodes_count)
            .ok_or_else(|| Ext2KitError::NoSpace("no free inodes".to_string()))?;
        let ino = self.number_for(Resource::Inodes, index);
        self.mark_in_use(Resource::Inodes, ino)?;
        debug!("Allocated inode {}", ino);
        Ok(ino)
    }

    /// Allocate a block and zero its contents
    pub fn allocate_block(&mut self) -> Ext2Result<BlockNumber> {
        let index = bitmap::find_free_block(self.bitmap(Resource::Blocks)?, self.layout.block_bits())
            .ok_or_else(|| Ext2KitError::NoSpace("no free blocks".to_string()))?;
        let block = self.number_for(Resource::Blocks, index);
        self.mark_in_use(Resource::Blocks, block)?;
        self.block_mut(block)?.fill(0);
        debug!("Allocated block {}", block);
        Ok(block)
    }
}

fn clamp_u16(value: i64) -> u16 {
    value.clamp(0, u16::MAX as i64) as u16
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::ext::ext2_native::core::formatter::Ext2Formatter;
    use ext2kit_core::FormatOptions;

    fn blank() -> Ext2Image {
        Ext2Formatter::new(FormatOptions::default()).format_image().unwrap()
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = blank().into_bytes();
        bytes[EXT2_SUPERBLOCK_OFFSET + 0x38] = 0;
        let err = Ext2Image::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Ext2KitError::Corrupt(_)));
    }

    #[test]
    fn test_rejects_truncated_image() {
        let mut bytes = blank().into_bytes();
        bytes.truncate(bytes.len() - 100);
        assert!(Ext2Image::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_counters_move_together() {
        let mut image = blank();
        let before = image.superblock().unwrap().s_free_blocks_count;
        let block = image.allocate_block().unwrap();

        assert!(image.block_in_use(block).unwrap());
        let sb = image.superblock().unwrap();
        let gd = image.group_desc().unwrap();
        assert_eq!(sb.s_free_blocks_count, before - 1);
        assert_eq!(gd.bg_free_blocks_count as u32, sb.s_free_blocks_count);

        assert!(image.release(Resource::Blocks, block).unwrap());
        assert!(!image.release(Resource::Blocks, block).unwrap());
        assert_eq!(image.superblock().unwrap().s_free_blocks_count, before);
    }

    #[test]
    fn test_first_inode_allocation_skips_reserved() {
        let mut image = blank();
        let ino = image.allocate_inode().unwrap();
        // lost+found already holds inode 11
        assert_eq!(ino, 12);
    }

    #[test]
    fn test_cleared_bad_blocks_inode_is_not_reused() {
        let mut image = blank();
        assert!(image.release(Resource::Inodes, EXT2_BAD_INO).unwrap());
        assert_eq!(image.allocate_inode().unwrap(), 12);
        assert!(!image.inode_in_use(EXT2_BAD_INO).unwrap());
    }

    #[test]
    fn test_block_access_is_bounds_checked() {
        let image = blank();
        let blocks = image.layout().blocks_count;
        assert!(image.block(blocks - 1).is_ok());
        assert!(image.block(blocks).is_err());
        assert!(image.check_data_block(0).is_err());
        assert!(image.read_inode(0).is_err());
        assert!(image.read_inode(image.layout().inodes_count + 1).is_err());
    }
}
