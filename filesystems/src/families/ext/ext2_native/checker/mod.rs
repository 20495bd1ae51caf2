// EXT2 consistency checker
// Five scan-and-repair passes. Bitmaps and inodes are trusted; counters,
// entry type tags, bitmap bits and deletion times are brought in line.
//
// Directory traversal is shallow: root first, then every allocated
// directory inode in ascending order, with each inode's bit read as the
// walk reaches it. Nothing is followed recursively.

use crate::families::ext::ext2_native::core::{
    constants::*,
    image::Ext2Image,
    types::*,
};
use crate::families::ext::ext2_native::writer::{block_map, dir_entries, DirEntryRecord};
use ext2kit_core::Ext2Result;
use log::{debug, info, warn};
use std::fmt;

/// Fix messages in the order they were made, plus the running tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub fixes: Vec<String>,
    pub total: u32,
}

impl CheckReport {
    fn record(&mut self, count: u32, message: String) {
        debug!("{} (counts {})", message, count);
        self.total += count;
        self.fixes.push(message);
    }

    pub fn is_clean(&self) -> bool {
        self.total == 0
    }

    pub fn summary(&self) -> String {
        if self.is_clean() {
            "No file system inconsistencies detected!".to_string()
        } else {
            format!("{} file system inconsistencies repaired!", self.total)
        }
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.fixes {
            writeln!(f, "{}", line)?;
        }
        write!(f, "{}", self.summary())
    }
}

/// One live entry found during traversal, with the block it sits in
struct EntrySite {
    block: BlockNumber,
    entry: DirEntryRecord,
}

pub struct Ext2Checker<'a> {
    image: &'a mut Ext2Image,
}

impl<'a> Ext2Checker<'a> {
    pub fn new(image: &'a mut Ext2Image) -> Self {
        Self { image }
    }

    /// Run every pass in order and return what was repaired.
    pub fn run(&mut self) -> Ext2Result<CheckReport> {
        let mut report = CheckReport::default();
        self.check_free_counts(&mut report)?;
        self.check_entry_types(&mut report)?;
        self.check_inode_bitmap(&mut report)?;
        self.check_deletion_times(&mut report)?;
        self.check_block_bitmap(&mut report)?;
        info!("Check finished: {}", report.summary());
        Ok(report)
    }

    /// (a) Free counters against the bitmaps
    fn check_free_counts(&mut self, report: &mut CheckReport) -> Ext2Result<()> {
        for resource in [Resource::Inodes, Resource::Blocks] {
            let actual = self.image.count_free(resource)?;
            let gd = self.image.group_desc()?;
            let sb = self.image.superblock()?;
            let (group_count, super_count) = match resource {
                Resource::Inodes => (gd.bg_free_inodes_count as u32, sb.s_free_inodes_count),
                Resource::Blocks => (gd.bg_free_blocks_count as u32, sb.s_free_blocks_count),
            };
            if group_count == actual && super_count == actual {
                continue;
            }

            let (who, off_by) = if group_count != actual {
                ("block group's", group_count.abs_diff(actual))
            } else {
                ("superblock's", super_count.abs_diff(actual))
            };
            self.image.set_free(resource, actual)?;
            report.record(
                off_by,
                format!(
                    "Fixed: {} free {} counter was off by {} compared to the bitmap.",
                    who, resource, off_by
                ),
            );
        }
        Ok(())
    }

    /// (b) Entry type tag against the inode's mode
    fn check_entry_types(&mut self, report: &mut CheckReport) -> Ext2Result<()> {
        self.visit_entries(report, |image, site, report| {
            let ino = site.entry.header.inode;
            let kind = image.read_inode(ino)?.kind();
            if kind == FileKind::Other || site.entry.header.file_type == kind.file_type() {
                return Ok(());
            }
            let mut header = site.entry.header;
            header.file_type = kind.file_type();
            header.write_at(image.block_mut(site.block)?, site.entry.offset)?;
            report.record(1, format!("Fixed: Entry type vs inode mismatch: inode [{}].", ino));
            Ok(())
        })
    }

    /// (c) Referenced inodes must be marked in the inode bitmap
    fn check_inode_bitmap(&mut self, report: &mut CheckReport) -> Ext2Result<()> {
        self.visit_entries(report, |image, site, report| {
            let ino = site.entry.header.inode;
            if image.mark_in_use(Resource::Inodes, ino)? {
                report.record(1, format!("Fixed: inode [{}] not marked as in-use.", ino));
            }
            Ok(())
        })
    }

    /// (d) Referenced inodes must not carry a deletion time
    fn check_deletion_times(&mut self, report: &mut CheckReport) -> Ext2Result<()> {
        self.visit_entries(report, |image, site, report| {
            let ino = site.entry.header.inode;
            let mut inode = image.read_inode(ino)?;
            if inode.i_dtime != 0 {
                inode.i_dtime = 0;
                image.write_inode(ino, &inode)?;
                report.record(1, format!("Fixed: valid inode marked for deletion: [{}].", ino));
            }
            Ok(())
        })
    }

    /// (e) Blocks of referenced inodes must be marked in the block bitmap
    fn check_block_bitmap(&mut self, report: &mut CheckReport) -> Ext2Result<()> {
        self.visit_entries(report, |image, site, report| {
            let ino = site.entry.header.inode;
            let inode = image.read_inode(ino)?;
            let map = match block_map(&*image, &inode) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Skipping blocks of inode {}: {}", ino, e);
                    return Ok(());
                }
            };
            let mut fixed = 0;
            for block in map.all_blocks() {
                if image.mark_in_use(Resource::Blocks, block)? {
                    fixed += 1;
                }
            }
            if fixed > 0 {
                report.record(
                    fixed,
                    format!(
                        "Fixed: {} in-use data blocks not marked in data bitmap for inode: [{}].",
                        fixed, ino
                    ),
                );
            }
            Ok(())
        })
    }

    /// Hand every live entry to `visit`: root's first, then those of each
    /// directory inode in ascending order. An inode's bit and mode are read
    /// when the walk reaches it, so a directory re-marked earlier in the same
    /// pass is scanned too.
    fn visit_entries<F>(&mut self, report: &mut CheckReport, mut visit: F) -> Ext2Result<()>
    where
        F: FnMut(&mut Ext2Image, &EntrySite, &mut CheckReport) -> Ext2Result<()>,
    {
        self.visit_directory(EXT2_ROOT_INO, report, &mut visit)?;
        for ino in 1..=self.image.layout().inodes_count {
            if ino == EXT2_ROOT_INO || !self.image.inode_in_use(ino)? {
                continue;
            }
            if self.image.read_inode(ino)?.is_dir() {
                self.visit_directory(ino, report, &mut visit)?;
            }
        }
        Ok(())
    }

    fn visit_directory<F>(&mut self, dir: InodeNumber, report: &mut CheckReport, visit: &mut F) -> Ext2Result<()>
    where
        F: FnMut(&mut Ext2Image, &EntrySite, &mut CheckReport) -> Ext2Result<()>,
    {
        let inode = self.image.read_inode(dir)?;
        let blocks = match block_map(&*self.image, &inode) {
            Ok(map) => map.data,
            Err(e) => {
                warn!("Skipping directory inode {}: {}", dir, e);
                return Ok(());
            }
        };

        for block in blocks {
            let entries = match dir_entries(self.image.block(block)?) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping directory block {}: {}", block, e);
                    continue;
                }
            };
            for entry in entries {
                let ino = entry.header.inode;
                if ino == 0 {
                    continue;
                }
                if !self.image.is_valid_inode(ino) {
                    warn!("Entry at {} in block {} names invalid inode {}", entry.offset, block, ino);
                    continue;
                }
                visit(&mut *self.image, &EntrySite { block, entry }, report)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_summary() {
        let mut report = CheckReport::default();
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "No file system inconsistencies detected!");

        report.record(3, "Fixed: something.".to_string());
        report.record(1, "Fixed: another.".to_string());
        assert_eq!(report.total, 4);
        assert_eq!(
            report.to_string(),
            "Fixed: something.\nFixed: another.\n4 file system inconsistencies repaired!"
        );
    }
}
