// EXT2 on-disk structures
// CRITICAL: Field offsets must match the ext2 layout EXACTLY (all little-endian)

use super::constants::*;
use super::types::*;
use byteorder::{ByteOrder, LittleEndian};
use ext2kit_core::{Ext2KitError, Ext2Result};
use static_assertions::const_assert;

const_assert!(EXT2_GROUP_DESC_OFFSET == EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE);
const_assert!(INODE_BLOCK_OFFSET + EXT2_N_BLOCKS * 4 <= EXT2_GOOD_OLD_INODE_SIZE);
const_assert!(EXT2_BLOCK_SIZE % 4 == 0);

fn ensure_len(buf: &[u8], needed: usize, what: &str) -> Ext2Result<()> {
    if buf.len() < needed {
        return Err(Ext2KitError::Corrupt(format!(
            "{} needs {} bytes, only {} available",
            what,
            needed,
            buf.len()
        )));
    }
    Ok(())
}

/// EXT2 Superblock (the fields the editor reads or maintains)
/// Located at byte offset 1024 from the beginning of the image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ext2Superblock {
    /* 0x000 */ pub s_inodes_count: u32,
    /* 0x004 */ pub s_blocks_count: u32,
    /* 0x008 */ pub s_r_blocks_count: u32,
    /* 0x00C */ pub s_free_blocks_count: u32,
    /* 0x010 */ pub s_free_inodes_count: u32,
    /* 0x014 */ pub s_first_data_block: u32,
    /* 0x018 */ pub s_log_block_size: u32,
    /* 0x01C */ pub s_log_frag_size: u32,
    /* 0x020 */ pub s_blocks_per_group: u32,
    /* 0x024 */ pub s_frags_per_group: u32,
    /* 0x028 */ pub s_inodes_per_group: u32,
    /* 0x02C */ pub s_mtime: u32,
    /* 0x030 */ pub s_wtime: u32,
    /* 0x034 */ pub s_mnt_count: u16,
    /* 0x036 */ pub s_max_mnt_count: u16,
    /* 0x038 */ pub s_magic: u16,
    /* 0x03A */ pub s_state: u16,
    /* 0x03C */ pub s_errors: u16,
    /* 0x03E */ pub s_minor_rev_level: u16,
    /* 0x040 */ pub s_lastcheck: u32,
    /* 0x044 */ pub s_checkinterval: u32,
    /* 0x048 */ pub s_creator_os: u32,
    /* 0x04C */ pub s_rev_level: u32,
    /* 0x050 */ pub s_def_resuid: u16,
    /* 0x052 */ pub s_def_resgid: u16,
    // -- Dynamic revision fields (only valid if s_rev_level > 0) --
    /* 0x054 */ pub s_first_ino: u32,
    /* 0x058 */ pub s_inode_size: u16,
    /* 0x05A */ pub s_block_group_nr: u16,
    /* 0x05C */ pub s_feature_compat: u32,
    /* 0x060 */ pub s_feature_incompat: u32,
    /* 0x064 */ pub s_feature_ro_compat: u32,
    /* 0x068 */ pub s_uuid: [u8; 16],
    /* 0x078 */ pub s_volume_name: [u8; 16],
}

impl Ext2Superblock {
    pub fn read_from(buf: &[u8]) -> Ext2Result<Self> {
        ensure_len(buf, 0x88, "superblock")?;
        let mut s_uuid = [0u8; 16];
        s_uuid.copy_from_slice(&buf[0x68..0x78]);
        let mut s_volume_name = [0u8; 16];
        s_volume_name.copy_from_slice(&buf[0x78..0x88]);

        Ok(Self {
            s_inodes_count: LittleEndian::read_u32(&buf[0x00..]),
            s_blocks_count: LittleEndian::read_u32(&buf[0x04..]),
            s_r_blocks_count: LittleEndian::read_u32(&buf[0x08..]),
            s_free_blocks_count: LittleEndian::read_u32(&buf[0x0C..]),
            s_free_inodes_count: LittleEndian::read_u32(&buf[0x10..]),
            s_first_data_block: LittleEndian::read_u32(&buf[0x14..]),
            s_log_block_size: LittleEndian::read_u32(&buf[0x18..]),
            s_log_frag_size: LittleEndian::read_u32(&buf[0x1C..]),
            s_blocks_per_group: LittleEndian::read_u32(&buf[0x20..]),
            s_frags_per_group: LittleEndian::read_u32(&buf[0x24..]),
            s_inodes_per_group: LittleEndian::read_u32(&buf[0x28..]),
            s_mtime: LittleEndian::read_u32(&buf[0x2C..]),
            s_wtime: LittleEndian::read_u32(&buf[0x30..]),
            s_mnt_count: LittleEndian::read_u16(&buf[0x34..]),
            s_max_mnt_count: LittleEndian::read_u16(&buf[0x36..]),
            s_magic: LittleEndian::read_u16(&buf[0x38..]),
            s_state: LittleEndian::read_u16(&buf[0x3A..]),
            s_errors: LittleEndian::read_u16(&buf[0x3C..]),
            s_minor_rev_level: LittleEndian::read_u16(&buf[0x3E..]),
            s_lastcheck: LittleEndian::read_u32(&buf[0x40..]),
            s_checkinterval: LittleEndian::read_u32(&buf[0x44..]),
            s_creator_os: LittleEndian::read_u32(&buf[0x48..]),
            s_rev_level: LittleEndian::read_u32(&buf[0x4C..]),
            s_def_resuid: LittleEndian::read_u16(&buf[0x50..]),
            s_def_resgid: LittleEndian::read_u16(&buf[0x52..]),
            s_first_ino: LittleEndian::read_u32(&buf[0x54..]),
            s_inode_size: LittleEndian::read_u16(&buf[0x58..]),
            s_block_group_nr: LittleEndian::read_u16(&buf[0x5A..]),
            s_feature_compat: LittleEndian::read_u32(&buf[0x5C..]),
            s_feature_incompat: LittleEndian::read_u32(&buf[0x60..]),
            s_feature_ro_compat: LittleEndian::read_u32(&buf[0x64..]),
            s_uuid,
            s_volume_name,
        })
    }

    /// Write the modelled fields in place; bytes past 0x88 are left untouched.
    pub fn write_to(&self, buf: &mut [u8]) -> Ext2Result<()> {
        ensure_len(buf, 0x88, "superblock")?;
        LittleEndian::write_u32(&mut buf[0x00..], self.s_inodes_count);
        LittleEndian::write_u32(&mut buf[0x04..], self.s_blocks_count);
        LittleEndian::write_u32(&mut buf[0x08..], self.s_r_blocks_count);
        LittleEndian::write_u32(&mut buf[0x0C..], self.s_free_blocks_count);
        LittleEndian::write_u32(&mut buf[0x10..], self.s_free_inodes_count);
        LittleEndian::write_u32(&mut buf[0x14..], self.s_first_data_block);
        LittleEndian::write_u32(&mut buf[0x18..], self.s_log_block_size);
        LittleEndian::write_u32(&mut buf[0x1C..], self.s_log_frag_size);
        LittleEndian::write_u32(&mut buf[0x20..], self.s_blocks_per_group);
        LittleEndian::write_u32(&mut buf[0x24..], self.s_frags_per_group);
        LittleEndian::write_u32(&mut buf[0x28..], self.s_inodes_per_group);
        LittleEndian::write_u32(&mut buf[0x2C..], self.s_mtime);
        LittleEndian::write_u32(&mut buf[0x30..], self.s_wtime);
        LittleEndian::write_u16(&mut buf[0x34..], self.s_mnt_count);
        LittleEndian::write_u16(&mut buf[0x36..], self.s_max_mnt_count);
        LittleEndian::write_u16(&mut buf[0x38..], self.s_magic);
        LittleEndian::write_u16(&mut buf[0x3A..], self.s_state);
        LittleEndian::write_u16(&mut buf[0x3C..], self.s_errors);
        LittleEndian::write_u16(&mut buf[0x3E..], self.s_minor_rev_level);
        LittleEndian::write_u32(&mut buf[0x40..], self.s_lastcheck);
        LittleEndian::write_u32(&mut buf[0x44..], self.s_checkinterval);
        LittleEndian::write_u32(&mut buf[0x48..], self.s_creator_os);
        LittleEndian::write_u32(&mut buf[0x4C..], self.s_rev_level);
        LittleEndian::write_u16(&mut buf[0x50..], self.s_def_resuid);
        LittleEndian::write_u16(&mut buf[0x52..], self.s_def_resgid);
        LittleEndian::write_u32(&mut buf[0x54..], self.s_first_ino);
        LittleEndian::write_u16(&mut buf[0x58..], self.s_inode_size);
        LittleEndian::write_u16(&mut buf[0x5A..], self.s_block_group_nr);
        LittleEndian::write_u32(&mut buf[0x5C..], self.s_feature_compat);
        LittleEndian::write_u32(&mut buf[0x60..], self.s_feature_incompat);
        LittleEndian::write_u32(&mut buf[0x64..], self.s_feature_ro_compat);
        buf[0x68..0x78].copy_from_slice(&self.s_uuid);
        buf[0x78..0x88].copy_from_slice(&self.s_volume_name);
        Ok(())
    }

    /// On-disk inode record size
    pub fn inode_size(&self) -> usize {
        if self.s_rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.s_inode_size as usize
        }
    }

    pub fn block_size(&self) -> usize {
        1024usize << self.s_log_block_size
    }

    pub fn volume_name(&self) -> String {
        let end = self.s_volume_name.iter().position(|&b| b == 0).unwrap_or(16);
        String::from_utf8_lossy(&self.s_volume_name[..end]).into_owned()
    }
}

/// EXT2 block group descriptor (32 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ext2GroupDesc {
    /* 0x00 */ pub bg_block_bitmap: u32,
    /* 0x04 */ pub bg_inode_bitmap: u32,
    /* 0x08 */ pub bg_inode_table: u32,
    /* 0x0C */ pub bg_free_blocks_count: u16,
    /* 0x0E */ pub bg_free_inodes_count: u16,
    /* 0x10 */ pub bg_used_dirs_count: u16,
    /* 0x12 */ pub bg_pad: u16,
}

impl Ext2GroupDesc {
    pub fn read_from(buf: &[u8]) -> Ext2Result<Self> {
        ensure_len(buf, 0x14, "group descriptor")?;
        Ok(Self {
            bg_block_bitmap: LittleEndian::read_u32(&buf[0x00..]),
            bg_inode_bitmap: LittleEndian::read_u32(&buf[0x04..]),
            bg_inode_table: LittleEndian::read_u32(&buf[0x08..]),
            bg_free_blocks_count: LittleEndian::read_u16(&buf[0x0C..]),
            bg_free_inodes_count: LittleEndian::read_u16(&buf[0x0E..]),
            bg_used_dirs_count: LittleEndian::read_u16(&buf[0x10..]),
            bg_pad: LittleEndian::read_u16(&buf[0x12..]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Ext2Result<()> {
        ensure_len(buf, 0x14, "group descriptor")?;
        LittleEndian::write_u32(&mut buf[0x00..], self.bg_block_bitmap);
        LittleEndian::write_u32(&mut buf[0x04..], self.bg_inode_bitmap);
        LittleEndian::write_u32(&mut buf[0x08..], self.bg_inode_table);
        LittleEndian::write_u16(&mut buf[0x0C..], self.bg_free_blocks_count);
        LittleEndian::write_u16(&mut buf[0x0E..], self.bg_free_inodes_count);
        LittleEndian::write_u16(&mut buf[0x10..], self.bg_used_dirs_count);
        LittleEndian::write_u16(&mut buf[0x12..], self.bg_pad);
        Ok(())
    }
}

const INODE_BLOCK_OFFSET: usize = 0x28;

/// EXT2 inode (128-byte good-old layout; larger records keep their tail bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ext2Inode {
    /* 0x00 */ pub i_mode: u16,
    /* 0x02 */ pub i_uid: u16,
    /* 0x04 */ pub i_size: u32,
    /* 0x08 */ pub i_atime: u32,
    /* 0x0C */ pub i_ctime: u32,
    /* 0x10 */ pub i_mtime: u32,
    /* 0x14 */ pub i_dtime: u32,
    /* 0x18 */ pub i_gid: u16,
    /* 0x1A */ pub i_links_count: u16,
    /* 0x1C */ pub i_blocks: u32,          // 512-byte sectors
    /* 0x20 */ pub i_flags: u32,
    /* 0x24 */ pub i_osd1: u32,
    /* 0x28 */ pub i_block: [u32; EXT2_N_BLOCKS],
    /* 0x64 */ pub i_generation: u32,
    /* 0x68 */ pub i_file_acl: u32,
    /* 0x6C */ pub i_dir_acl: u32,
    /* 0x70 */ pub i_faddr: u32,
    /* 0x74 */ pub i_osd2: [u8; 12],
}

impl Ext2Inode {
    pub fn read_from(buf: &[u8]) -> Ext2Result<Self> {
        ensure_len(buf, EXT2_GOOD_OLD_INODE_SIZE, "inode")?;
        let mut i_block = [0u32; EXT2_N_BLOCKS];
        LittleEndian::read_u32_into(
            &buf[INODE_BLOCK_OFFSET..INODE_BLOCK_OFFSET + EXT2_N_BLOCKS * 4],
            &mut i_block,
        );
        let mut i_osd2 = [0u8; 12];
        i_osd2.copy_from_slice(&buf[0x74..0x80]);

        Ok(Self {
            i_mode: LittleEndian::read_u16(&buf[0x00..]),
            i_uid: LittleEndian::read_u16(&buf[0x02..]),
            i_size: LittleEndian::read_u32(&buf[0x04..]),
            i_atime: LittleEndian::read_u32(&buf[0x08..]),
            i_ctime: LittleEndian::read_u32(&buf[0x0C..]),
            i_mtime: LittleEndian::read_u32(&buf[0x10..]),
            i_dtime: LittleEndian::read_u32(&buf[0x14..]),
            i_gid: LittleEndian::read_u16(&buf[0x18..]),
            i_links_count: LittleEndian::read_u16(&buf[0x1A..]),
            i_blocks: LittleEndian::read_u32(&buf[0x1C..]),
            i_flags: LittleEndian::read_u32(&buf[0x20..]),
            i_osd1: LittleEndian::read_u32(&buf[0x24..]),
            i_block,
            i_generation: LittleEndian::read_u32(&buf[0x64..]),
            i_file_acl: LittleEndian::read_u32(&buf[0x68..]),
            i_dir_acl: LittleEndian::read_u32(&buf[0x6C..]),
            i_faddr: LittleEndian::read_u32(&buf[0x70..]),
            i_osd2,
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Ext2Result<()> {
        ensure_len(buf, EXT2_GOOD_OLD_INODE_SIZE, "inode")?;
        LittleEndian::write_u16(&mut buf[0x00..], self.i_mode);
        LittleEndian::write_u16(&mut buf[0x02..], self.i_uid);
        LittleEndian::write_u32(&mut buf[0x04..], self.i_size);
        LittleEndian::write_u32(&mut buf[0x08..], self.i_atime);
        LittleEndian::write_u32(&mut buf[0x0C..], self.i_ctime);
        LittleEndian::write_u32(&mut buf[0x10..], self.i_mtime);
        LittleEndian::write_u32(&mut buf[0x14..], self.i_dtime);
        LittleEndian::write_u16(&mut buf[0x18..], self.i_gid);
        LittleEndian::write_u16(&mut buf[0x1A..], self.i_links_count);
        LittleEndian::write_u32(&mut buf[0x1C..], self.i_blocks);
        LittleEndian::write_u32(&mut buf[0x20..], self.i_flags);
        LittleEndian::write_u32(&mut buf[0x24..], self.i_osd1);
        LittleEndian::write_u32_into(
            &self.i_block,
            &mut buf[INODE_BLOCK_OFFSET..INODE_BLOCK_OFFSET + EXT2_N_BLOCKS * 4],
        );
        LittleEndian::write_u32(&mut buf[0x64..], self.i_generation);
        LittleEndian::write_u32(&mut buf[0x68..], self.i_file_acl);
        LittleEndian::write_u32(&mut buf[0x6C..], self.i_dir_acl);
        LittleEndian::write_u32(&mut buf[0x70..], self.i_faddr);
        buf[0x74..0x80].copy_from_slice(&self.i_osd2);
        Ok(())
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.i_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Number of 1 KiB blocks accounted to this inode, indirect block included
    pub fn block_count(&self) -> usize {
        (self.i_blocks / EXT2_SECTORS_PER_BLOCK) as usize
    }

    pub fn is_deleted(&self) -> bool {
        self.i_dtime != 0
    }
}

/// Fixed 8-byte header of a directory entry; the name follows it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ext2DirEntryHeader {
    /* 0x00 */ pub inode: u32,
    /* 0x04 */ pub rec_len: u16,
    /* 0x06 */ pub name_len: u8,
    /* 0x07 */ pub file_type: u8,
}

impl Ext2DirEntryHeader {
    /// Read the header at `offset` in a directory block.
    pub fn read_at(block: &[u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(EXT2_DIR_ENTRY_HEADER_LEN)?;
        if end > block.len() {
            return None;
        }
        let buf = &block[offset..end];
        Some(Self {
            inode: LittleEndian::read_u32(&buf[0..]),
            rec_len: LittleEndian::read_u16(&buf[4..]),
            name_len: buf[6],
            file_type: buf[7],
        })
    }

    pub fn write_at(&self, block: &mut [u8], offset: usize) -> Ext2Result<()> {
        ensure_len(block, offset + EXT2_DIR_ENTRY_HEADER_LEN, "directory entry")?;
        let buf = &mut block[offset..offset + EXT2_DIR_ENTRY_HEADER_LEN];
        LittleEndian::write_u32(&mut buf[0..], self.inode);
        LittleEndian::write_u16(&mut buf[4..], self.rec_len);
        buf[6] = self.name_len;
        buf[7] = self.file_type;
        Ok(())
    }

    /// Smallest record that holds this entry's name
    pub fn min_rec_len(&self) -> usize {
        dir_entry_min_len(self.name_len as usize)
    }
}

/// Write a complete entry (header and name) at `offset`.
pub fn write_dir_entry(
    block: &mut [u8],
    offset: usize,
    inode: InodeNumber,
    rec_len: u16,
    name: &[u8],
    file_type: u8,
) -> Ext2Result<()> {
    if name.len() > EXT2_NAME_LEN {
        return Err(Ext2KitError::InvalidInput(format!(
            "name of {} bytes exceeds {}",
            name.len(),
            EXT2_NAME_LEN
        )));
    }
    let name_start = offset + EXT2_DIR_ENTRY_HEADER_LEN;
    ensure_len(block, name_start + name.len(), "directory entry name")?;
    let header = Ext2DirEntryHeader {
        inode,
        rec_len,
        name_len: name.len() as u8,
        file_type,
    };
    header.write_at(block, offset)?;
    block[name_start..name_start + name.len()].copy_from_slice(name);
    Ok(())
}

/// Name bytes of the entry whose header sits at `offset`
pub fn dir_entry_name<'a>(block: &'a [u8], offset: usize, header: &Ext2DirEntryHeader) -> Option<&'a [u8]> {
    let start = offset + EXT2_DIR_ENTRY_HEADER_LEN;
    block.get(start..start + header.name_len as usize)
}

/// Header plus name, rounded up so the next record starts 4-byte aligned.
pub fn dir_entry_min_len(name_len: usize) -> usize {
    EXT2_DIR_ENTRY_HEADER_LEN + ((name_len + 3) & !3)
}
