// Indirect block support for EXT2 Writer
// 12 direct pointers plus one single-indirect block of 256 little-endian u32 slots

use super::*;
use byteorder::{ByteOrder, LittleEndian};

/// Every block an inode owns, in logical order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    pub data: Vec<BlockNumber>,
    pub indirect: Option<BlockNumber>,
}

impl BlockMap {
    /// Data blocks followed by the indirect block, if any
    pub fn all_blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.data.iter().copied().chain(self.indirect)
    }
}

/// Collect the blocks of `inode`. The count comes from `i_blocks`, which
/// includes the indirect block once there are more than 12 data blocks.
pub fn block_map(image: &Ext2Image, inode: &Ext2Inode) -> Ext2Result<BlockMap> {
    let mut count = inode.block_count();
    if count > EXT2_NDIR_BLOCKS {
        count -= 1;
    }
    if count > EXT2_MAX_FILE_BLOCKS {
        return Err(Ext2KitError::Corrupt(format!(
            "inode claims {} data blocks, at most {} are addressable",
            count, EXT2_MAX_FILE_BLOCKS
        )));
    }

    let mut map = BlockMap::default();
    for &block in inode.i_block.iter().take(count.min(EXT2_NDIR_BLOCKS)) {
        image.check_data_block(block)?;
        map.data.push(block);
    }

    if count > EXT2_NDIR_BLOCKS {
        let indirect = inode.i_block[EXT2_IND_BLOCK];
        image.check_data_block(indirect)?;
        let slots = image.block(indirect)?;
        for slot in 0..count - EXT2_NDIR_BLOCKS {
            let block = LittleEndian::read_u32(&slots[slot * 4..]);
            image.check_data_block(block)?;
            map.data.push(block);
        }
        map.indirect = Some(indirect);
    }
    Ok(map)
}

impl Ext2Writer<'_> {
    /// Point logical block `index` of `inode` at `block`, allocating the
    /// indirect block when the first slot past the direct pointers is used.
    pub(super) fn attach_block(
        &mut self,
        inode: &mut Ext2Inode,
        index: usize,
        block: BlockNumber,
    ) -> Ext2Result<()> {
        if index < EXT2_NDIR_BLOCKS {
            inode.i_block[index] = block;
            return Ok(());
        }
        if index >= EXT2_MAX_FILE_BLOCKS {
            return Err(Ext2KitError::NoSpace(format!(
                "logical block {} is past the single-indirect range",
                index
            )));
        }

        if index == EXT2_NDIR_BLOCKS {
            let indirect = self.image.allocate_block()?;
            inode.i_block[EXT2_IND_BLOCK] = indirect;
            inode.i_blocks += EXT2_SECTORS_PER_BLOCK;
            debug!("Allocated indirect block {}", indirect);
        }
        let indirect = inode.i_block[EXT2_IND_BLOCK];
        self.image.check_data_block(indirect)?;
        let slot = (index - EXT2_NDIR_BLOCKS) * 4;
        LittleEndian::write_u32(&mut self.image.block_mut(indirect)?[slot..], block);
        Ok(())
    }

    /// Allocate data blocks for `contents` and copy it in, 1 KiB per block.
    /// `i_blocks` must already count the data blocks.
    pub(super) fn populate_blocks(&mut self, inode: &mut Ext2Inode, contents: &[u8]) -> Ext2Result<()> {
        for (index, chunk) in contents.chunks(EXT2_BLOCK_SIZE).enumerate() {
            let block = self.image.allocate_block()?;
            self.image.block_mut(block)?[..chunk.len()].copy_from_slice(chunk);
            self.attach_block(inode, index, block)?;
        }
        Ok(())
    }
}

/// Number of data blocks needed for `len` bytes
pub fn blocks_for(len: usize) -> usize {
    len.div_ceil(EXT2_BLOCK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ext2kit_core::FormatOptions;

    #[test]
    fn test_populate_spills_into_indirect_block() {
        let mut image = Ext2Formatter::new(FormatOptions::default()).format_image().unwrap();
        let free_before = image.superblock().unwrap().s_free_blocks_count;
        let contents: Vec<u8> = (0..14 * EXT2_BLOCK_SIZE + 10).map(|i| (i % 251) as u8).collect();

        let mut inode = init_inode(S_IFREG | 0o644, contents.len() as u32);
        Ext2Writer::new(&mut image).populate_blocks(&mut inode, &contents).unwrap();

        // 15 data blocks + 1 indirect
        assert_eq!(inode.i_blocks, 32);
        assert_eq!(image.superblock().unwrap().s_free_blocks_count, free_before - 16);

        let map = block_map(&image, &inode).unwrap();
        assert_eq!(map.data.len(), 15);
        assert_eq!(map.indirect, Some(inode.i_block[EXT2_IND_BLOCK]));
        assert_eq!(map.all_blocks().count(), 16);

        let mut read_back = Vec::new();
        for block in &map.data {
            read_back.extend_from_slice(image.block(*block).unwrap());
        }
        read_back.truncate(contents.len());
        assert_eq!(read_back, contents);
    }

    #[test]
    fn test_block_map_rejects_wild_pointer() {
        let image = Ext2Formatter::new(FormatOptions::default()).format_image().unwrap();
        let mut inode = init_inode(S_IFREG | 0o644, 10);
        inode.i_block[0] = image.layout().blocks_count + 5;
        assert!(matches!(block_map(&image, &inode), Err(Ext2KitError::Corrupt(_))));
    }

    #[test]
    fn test_blocks_for() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(1024), 1);
        assert_eq!(blocks_for(1025), 2);
    }
}
