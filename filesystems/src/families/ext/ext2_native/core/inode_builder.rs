// EXT2 inode and directory-block initialisation
// Pure builders shared by the formatter and the writer

use super::constants::*;
use super::structures::{write_dir_entry, Ext2Inode};
use super::types::InodeNumber;
use ext2kit_core::Ext2Result;

/// Current time as an ext2 timestamp
pub fn now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// Fresh inode for an object of `mode` holding `size` bytes.
/// Pointers start zeroed; `i_blocks` counts data blocks only until an
/// indirect block is attached.
pub fn init_inode(mode: u16, size: u32) -> Ext2Inode {
    let timestamp = now();
    let is_dir = mode & S_IFMT == S_IFDIR;
    let data_blocks = (size as usize).div_ceil(EXT2_BLOCK_SIZE) as u32;

    Ext2Inode {
        i_mode: mode,
        i_size: size,
        i_links_count: if is_dir { 2 } else { 1 },
        i_dtime: 0,
        i_blocks: data_blocks * EXT2_SECTORS_PER_BLOCK,
        i_atime: timestamp,
        i_ctime: timestamp,
        i_mtime: timestamp,
        i_block: [0; EXT2_N_BLOCKS],
        ..Default::default()
    }
}

/// Lay out "." and ".." as the only two records of a directory block.
pub fn init_directory_block(
    block: &mut [u8],
    self_ino: InodeNumber,
    parent_ino: InodeNumber,
) -> Ext2Result<()> {
    block.fill(0);
    write_dir_entry(block, 0, self_ino, EXT2_DOT_REC_LEN, b".", EXT2_FT_DIR)?;
    write_dir_entry(
        block,
        EXT2_DOT_REC_LEN as usize,
        parent_ino,
        (EXT2_BLOCK_SIZE - EXT2_DOT_REC_LEN as usize) as u16,
        b"..",
        EXT2_FT_DIR,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::ext::ext2_native::core::structures::Ext2DirEntryHeader;

    #[test]
    fn test_init_inode_counts_sectors() {
        let inode = init_inode(S_IFREG | 0o644, 2049);
        assert_eq!(inode.i_blocks, 6);
        assert_eq!(inode.i_links_count, 1);
        assert_eq!(inode.i_dtime, 0);
        assert!(inode.i_mtime > 0);

        let dir = init_inode(S_IFDIR | 0o755, EXT2_BLOCK_SIZE as u32);
        assert_eq!(dir.i_blocks, 2);
        assert_eq!(dir.i_links_count, 2);

        assert_eq!(init_inode(S_IFREG | 0o644, 0).i_blocks, 0);
    }

    #[test]
    fn test_directory_block_records() {
        let mut block = vec![0xAAu8; EXT2_BLOCK_SIZE];
        init_directory_block(&mut block, 12, 2).unwrap();

        let dot = Ext2DirEntryHeader::read_at(&block, 0).unwrap();
        assert_eq!((dot.inode, dot.rec_len, dot.name_len), (12, 12, 1));
        let dotdot = Ext2DirEntryHeader::read_at(&block, 12).unwrap();
        assert_eq!((dotdot.inode, dotdot.rec_len, dotdot.name_len), (2, 1012, 2));
        assert_eq!(&block[20..22], b"..");
        assert_eq!(dotdot.file_type, EXT2_FT_DIR);
    }
}
