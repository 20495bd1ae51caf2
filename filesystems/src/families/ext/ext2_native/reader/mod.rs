// EXT2 image dump
// Read-only report of the group descriptor, bitmaps, in-use inodes and
// directory blocks.

use crate::families::ext::ext2_native::core::{
    constants::*,
    image::Ext2Image,
    structures::Ext2Inode,
    types::*,
};
use crate::families::ext::ext2_native::writer::{block_map, dir_entries};
use ext2kit_core::Ext2Result;
use std::fmt;

pub struct ImageDump<'a> {
    image: &'a Ext2Image,
}

impl<'a> ImageDump<'a> {
    pub fn new(image: &'a Ext2Image) -> Self {
        Self { image }
    }

    /// Render the whole report
    pub fn render(&self) -> Ext2Result<String> {
        let mut out = String::new();
        self.write_report(&mut out)?;
        Ok(out)
    }

    /// Write the report to any text sink
    pub fn write_report(&self, out: &mut impl fmt::Write) -> Ext2Result<()> {
        let sb = self.image.superblock()?;
        let gd = self.image.group_desc()?;

        writeln!(out, "Inodes: {}", sb.s_inodes_count)?;
        writeln!(out, "Blocks: {}", sb.s_blocks_count)?;
        if !sb.volume_name().is_empty() {
            writeln!(out, "Label: {}", sb.volume_name())?;
        }
        writeln!(out, "Block group:")?;
        writeln!(out, "    block bitmap: {}", gd.bg_block_bitmap)?;
        writeln!(out, "    inode bitmap: {}", gd.bg_inode_bitmap)?;
        writeln!(out, "    inode table: {}", gd.bg_inode_table)?;
        writeln!(out, "    free blocks: {}", gd.bg_free_blocks_count)?;
        writeln!(out, "    free inodes: {}", gd.bg_free_inodes_count)?;
        writeln!(out, "    used_dirs: {}", gd.bg_used_dirs_count)?;

        writeln!(out, "Block bitmap: {}", format_bitmap(self.image.bitmap(Resource::Blocks)?))?;
        writeln!(out, "Inode bitmap: {}", format_bitmap(self.image.bitmap(Resource::Inodes)?))?;

        let listed = self.listed_inodes()?;

        writeln!(out, "\nInodes:")?;
        for &ino in &listed {
            let inode = self.image.read_inode(ino)?;
            self.write_inode(out, ino, &inode)?;
        }

        writeln!(out, "\nDirectory Blocks:")?;
        for &ino in &listed {
            let inode = self.image.read_inode(ino)?;
            if !inode.is_dir() {
                continue;
            }
            let map = match block_map(self.image, &inode) {
                Ok(map) => map,
                Err(e) => {
                    writeln!(out, "    inode {}: {}", ino, e)?;
                    continue;
                }
            };
            for block in map.data {
                writeln!(out, "    DIR BLOCK NUM: {} (for inode {})", block, ino)?;
                match dir_entries(self.image.block(block)?) {
                    Ok(entries) => {
                        for entry in entries {
                            writeln!(
                                out,
                                "Inode: {} rec_len: {} name_len: {} type= {} name={}",
                                entry.header.inode,
                                entry.header.rec_len,
                                entry.header.name_len,
                                FileKind::from_file_type(entry.header.file_type).tag(),
                                String::from_utf8_lossy(&entry.name)
                            )?;
                        }
                    }
                    Err(e) => {
                        writeln!(out, "    <unreadable: {}>", e)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Root, then every in-use inode from the first non-reserved one on
    fn listed_inodes(&self) -> Ext2Result<Vec<InodeNumber>> {
        let mut listed = vec![EXT2_ROOT_INO];
        for ino in EXT2_GOOD_OLD_FIRST_INO..=self.image.layout().inodes_count {
            if self.image.inode_in_use(ino)? {
                listed.push(ino);
            }
        }
        Ok(listed)
    }

    fn write_inode(&self, out: &mut impl fmt::Write, ino: InodeNumber, inode: &Ext2Inode) -> Ext2Result<()> {
        writeln!(
            out,
            "[{}] type: {} size: {} links: {} blocks: {}",
            ino,
            inode.kind().tag(),
            inode.i_size,
            inode.i_links_count,
            inode.i_blocks
        )?;
        write!(out, "[{}] Blocks: ", ino)?;
        match block_map(self.image, inode) {
            Ok(map) => {
                for block in map.all_blocks() {
                    write!(out, " {}", block)?;
                }
                writeln!(out)?;
            }
            Err(e) => {
                writeln!(out, " <{}>", e)?;
            }
        }
        Ok(())
    }
}

/// Bits in on-disk order, one group of eight per byte
pub fn format_bitmap(bitmap: &[u8]) -> String {
    bitmap
        .iter()
        .map(|byte| (0..8).map(|bit| if byte & (1 << bit) != 0 { '1' } else { '0' }).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that refuses every write
    struct ClosedSink;

    impl fmt::Write for ClosedSink {
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        use crate::families::ext::ext2_native::core::formatter::Ext2Formatter;
        use ext2kit_core::{Ext2KitError, FormatOptions};

        let image = Ext2Formatter::new(FormatOptions::default()).format_image().unwrap();
        let err = ImageDump::new(&image).write_report(&mut ClosedSink).unwrap_err();
        assert!(matches!(err, Ext2KitError::Format(_)));
        assert_eq!(err.errno(), 5);
    }

    #[test]
    fn test_format_bitmap_lsb_first() {
        assert_eq!(format_bitmap(&[0b0000_0011, 0x80]), "11000000 00000001");
        assert_eq!(format_bitmap(&[]), "");
    }
}
