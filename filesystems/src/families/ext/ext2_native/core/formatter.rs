// EXT2 formatter
// Writes a blank single-group image: boot block, superblock, group
// descriptor, both bitmaps, inode table, root and optional lost+found.

use super::bitmap;
use super::constants::*;
use super::image::Ext2Image;
use super::inode_builder::{init_directory_block, init_inode, now};
use super::structures::{write_dir_entry, Ext2GroupDesc, Ext2Superblock};
use super::types::{BlockNumber, FileKind};
use ext2kit_core::{Ext2KitError, Ext2Result, FormatOptions};
use log::{debug, info};
use std::path::Path;
use uuid::Uuid;

const LOST_FOUND_INO: u32 = EXT2_GOOD_OLD_FIRST_INO;

/// Block positions chosen for a given set of options
#[derive(Debug, Clone, Copy)]
struct FormatLayout {
    block_bitmap: BlockNumber,
    inode_bitmap: BlockNumber,
    inode_table: BlockNumber,
    inode_table_blocks: u32,
    root_block: BlockNumber,
    lost_found_block: Option<BlockNumber>,
}

impl FormatLayout {
    fn new(options: &FormatOptions) -> Self {
        let block_bitmap = EXT2_FIRST_DATA_BLOCK + 2;
        let inode_bitmap = block_bitmap + 1;
        let inode_table = inode_bitmap + 1;
        let inode_table_blocks =
            (options.inodes_count as usize * EXT2_GOOD_OLD_INODE_SIZE).div_ceil(EXT2_BLOCK_SIZE) as u32;
        let root_block = inode_table + inode_table_blocks;
        let lost_found_block = options.with_lost_found.then_some(root_block + 1);
        Self {
            block_bitmap,
            inode_bitmap,
            inode_table,
            inode_table_blocks,
            root_block,
            lost_found_block,
        }
    }

    /// Last block number holding metadata or an initial directory
    fn last_used_block(&self) -> BlockNumber {
        self.lost_found_block.unwrap_or(self.root_block)
    }
}

fn block_range(block: BlockNumber) -> std::ops::Range<usize> {
    let start = block as usize * EXT2_BLOCK_SIZE;
    start..start + EXT2_BLOCK_SIZE
}

pub struct Ext2Formatter {
    options: FormatOptions,
}

impl Ext2Formatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    /// Build the image in memory
    pub fn format_image(&self) -> Ext2Result<Ext2Image> {
        self.options.validate()?;
        let options = &self.options;
        let layout = FormatLayout::new(options);
        if layout.last_used_block() >= options.blocks_count {
            return Err(Ext2KitError::InvalidInput(format!(
                "{} blocks cannot hold an inode table of {} blocks",
                options.blocks_count, layout.inode_table_blocks
            )));
        }

        info!("=== EXT2 FORMAT START ===");
        info!("  Blocks: {}  Inodes: {}", options.blocks_count, options.inodes_count);
        info!(
            "  Inode table: {} blocks at block {}",
            layout.inode_table_blocks, layout.inode_table
        );
        debug!("Format layout: {:?}", layout);

        let mut data = vec![0u8; options.blocks_count as usize * EXT2_BLOCK_SIZE];

        // Block bitmap: metadata and initial directories in use, tail padding set
        let block_bits = options.blocks_count - EXT2_FIRST_DATA_BLOCK;
        {
            let range = block_range(layout.block_bitmap);
            let map = &mut data[range];
            bitmap::set_range(map, 0, layout.last_used_block() - EXT2_FIRST_DATA_BLOCK + 1);
            bitmap::set_range(map, block_bits, (EXT2_BLOCK_SIZE * 8) as u32 - block_bits);
        }

        // Inode bitmap: reserved inodes 1..=10, lost+found, tail padding set
        {
            let range = block_range(layout.inode_bitmap);
            let map = &mut data[range];
            bitmap::set_range(map, 0, EXT2_GOOD_OLD_FIRST_INO - 1);
            if layout.lost_found_block.is_some() {
                bitmap::set(map, LOST_FOUND_INO - 1);
            }
            bitmap::set_range(
                map,
                options.inodes_count,
                (EXT2_BLOCK_SIZE * 8) as u32 - options.inodes_count,
            );
        }

        let free_blocks = block_bits - (layout.last_used_block() - EXT2_FIRST_DATA_BLOCK + 1);
        let used_inodes = EXT2_GOOD_OLD_FIRST_INO - 1 + u32::from(layout.lost_found_block.is_some());
        let free_inodes = options.inodes_count - used_inodes;
        let used_dirs = 1 + u16::from(layout.lost_found_block.is_some());

        let sb = self.superblock(free_blocks, free_inodes);
        sb.write_to(&mut data[EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE])?;

        let gd = Ext2GroupDesc {
            bg_block_bitmap: layout.block_bitmap,
            bg_inode_bitmap: layout.inode_bitmap,
            bg_inode_table: layout.inode_table,
            bg_free_blocks_count: free_blocks as u16,
            bg_free_inodes_count: free_inodes as u16,
            bg_used_dirs_count: used_dirs,
            bg_pad: 0,
        };
        gd.write_to(&mut data[EXT2_GROUP_DESC_OFFSET..EXT2_GROUP_DESC_OFFSET + EXT2_GROUP_DESC_SIZE])?;

        // Directories go in through the validated image accessors
        let mut image = Ext2Image::from_bytes(data)?;

        let dir_mode = FileKind::Directory.default_mode();
        let mut root = init_inode(dir_mode, EXT2_BLOCK_SIZE as u32);
        root.i_block[0] = layout.root_block;
        init_directory_block(image.block_mut(layout.root_block)?, EXT2_ROOT_INO, EXT2_ROOT_INO)?;

        if let Some(lf_block) = layout.lost_found_block {
            // Root gains a link from lost+found's ".."
            root.i_links_count += 1;

            let mut lost_found = init_inode(S_IFDIR | 0o700, EXT2_BLOCK_SIZE as u32);
            lost_found.i_block[0] = lf_block;
            image.write_inode(LOST_FOUND_INO, &lost_found)?;
            init_directory_block(image.block_mut(lf_block)?, LOST_FOUND_INO, EXT2_ROOT_INO)?;

            // Split root's ".." record to make room for the new entry
            let root_dir = image.block_mut(layout.root_block)?;
            let dotdot_len = 12u16;
            let tail = (EXT2_BLOCK_SIZE - EXT2_DOT_REC_LEN as usize - dotdot_len as usize) as u16;
            write_dir_entry(root_dir, EXT2_DOT_REC_LEN as usize, EXT2_ROOT_INO, dotdot_len, b"..", EXT2_FT_DIR)?;
            write_dir_entry(
                root_dir,
                (EXT2_DOT_REC_LEN + dotdot_len) as usize,
                LOST_FOUND_INO,
                tail,
                b"lost+found",
                EXT2_FT_DIR,
            )?;
        }
        image.write_inode(EXT2_ROOT_INO, &root)?;

        info!(
            "Formatted ext2 image: {} free blocks, {} free inodes",
            free_blocks, free_inodes
        );
        Ok(image)
    }

    /// Format and write the image to `path`, replacing any existing file
    pub fn format_to(&self, path: &Path) -> Ext2Result<Ext2Image> {
        let image = self.format_image()?;
        image.save_to(path)?;
        Ext2Image::open(path)
    }

    fn superblock(&self, free_blocks: u32, free_inodes: u32) -> Ext2Superblock {
        let options = &self.options;
        let mut volume_name = [0u8; 16];
        if let Some(ref label) = options.label {
            let bytes = label.as_bytes();
            volume_name[..bytes.len()].copy_from_slice(bytes);
        }
        let timestamp = now();

        Ext2Superblock {
            s_inodes_count: options.inodes_count,
            s_blocks_count: options.blocks_count,
            s_r_blocks_count: options.blocks_count / 20,
            s_free_blocks_count: free_blocks,
            s_free_inodes_count: free_inodes,
            s_first_data_block: EXT2_FIRST_DATA_BLOCK,
            s_log_block_size: EXT2_LOG_BLOCK_SIZE,
            s_log_frag_size: EXT2_LOG_BLOCK_SIZE,
            s_blocks_per_group: (EXT2_BLOCK_SIZE * 8) as u32,
            s_frags_per_group: (EXT2_BLOCK_SIZE * 8) as u32,
            s_inodes_per_group: options.inodes_count,
            s_wtime: timestamp,
            s_max_mnt_count: u16::MAX,
            s_magic: EXT2_SUPER_MAGIC,
            s_state: 1,  // clean
            s_errors: 1, // continue
            s_lastcheck: timestamp,
            s_rev_level: EXT2_DYNAMIC_REV,
            s_first_ino: EXT2_GOOD_OLD_FIRST_INO,
            s_inode_size: EXT2_GOOD_OLD_INODE_SIZE as u16,
            s_uuid: *Uuid::new_v4().as_bytes(),
            s_volume_name: volume_name,
            ..Default::default()
        }
    }
}
