// Directory entry management for EXT2 Writer
// Entries are never shifted: removal tombstones or absorbs, restore splits.

use super::*;

/// One record of a directory block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub offset: usize,
    pub header: Ext2DirEntryHeader,
    pub name: Vec<u8>,
}

/// Where a live entry sits, and the record before it in the same block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub block: BlockNumber,
    pub offset: usize,
    pub prev_offset: Option<usize>,
    pub inode: InodeNumber,
}

/// A deleted entry found in the slack of a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredEntry {
    pub host_offset: usize,
    pub offset: usize,
    pub inode: InodeNumber,
    pub file_type: u8,
}

/// Walk the record chain of one directory block. Tombstones are included.
pub fn dir_entries(block: &[u8]) -> Ext2Result<Vec<DirEntryRecord>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < block.len() {
        let header = Ext2DirEntryHeader::read_at(block, offset).ok_or_else(|| {
            Ext2KitError::Corrupt(format!("directory entry header at {} overruns the block", offset))
        })?;
        let rec_len = header.rec_len as usize;
        if rec_len < EXT2_DIR_ENTRY_HEADER_LEN || offset + rec_len > block.len() {
            return Err(Ext2KitError::Corrupt(format!(
                "directory entry at {} has invalid rec_len {}",
                offset, rec_len
            )));
        }
        let name = dir_entry_name(block, offset, &header)
            .filter(|_| header.min_rec_len() <= rec_len)
            .ok_or_else(|| {
                Ext2KitError::Corrupt(format!("directory entry name at {} overruns its record", offset))
            })?
            .to_vec();
        entries.push(DirEntryRecord { offset, header, name });
        offset += rec_len;
    }
    Ok(entries)
}

/// Scan the slack after each live record for a deleted entry called `name`.
///
/// Inside a host record, candidates are re-derived one after another from
/// their own name lengths. A candidate with a zero name length, or one that
/// would spill past its host, ends the scan of that host.
pub fn find_deleted_entry(block: &[u8], name: &[u8]) -> Option<RecoveredEntry> {
    let mut host_offset = 0;
    while host_offset < block.len() {
        let host = Ext2DirEntryHeader::read_at(block, host_offset)?;
        let host_end = host_offset + host.rec_len as usize;
        if (host.rec_len as usize) < EXT2_DIR_ENTRY_HEADER_LEN || host_end > block.len() {
            return None;
        }

        let mut offset = host_offset + host.min_rec_len();
        while offset + EXT2_DIR_ENTRY_HEADER_LEN <= host_end {
            let candidate = match Ext2DirEntryHeader::read_at(block, offset) {
                Some(candidate) if candidate.name_len != 0 => candidate,
                _ => break,
            };
            let candidate_len = candidate.min_rec_len();
            if offset + candidate_len > host_end {
                break;
            }
            if candidate.inode != 0 && dir_entry_name(block, offset, &candidate) == Some(name) {
                return Some(RecoveredEntry {
                    host_offset,
                    offset,
                    inode: candidate.inode,
                    file_type: candidate.file_type,
                });
            }
            offset += candidate_len;
        }
        host_offset = host_end;
    }
    None
}

impl Ext2Writer<'_> {
    /// Add an entry for `ino` to the end of directory `parent`.
    pub(super) fn append_entry(
        &mut self,
        parent: InodeNumber,
        name: &[u8],
        ino: InodeNumber,
        kind: FileKind,
    ) -> Ext2Result<()> {
        let needed = dir_entry_min_len(name.len());
        let mut parent_inode = self.image.read_inode(parent)?;
        let map = block_map(self.image(), &parent_inode)?;

        if let Some(&last_block) = map.data.last() {
            let data = self.image.block(last_block)?;
            let last = dir_entries(data)?.pop().ok_or_else(|| {
                Ext2KitError::Corrupt(format!("directory block {} is empty", last_block))
            })?;
            let last_min = last.header.min_rec_len();
            let slack = last.header.rec_len as usize - last_min;

            if slack >= needed {
                let new_offset = last.offset + last_min;
                let block = self.image.block_mut(last_block)?;
                let mut shrunk = last.header;
                shrunk.rec_len = last_min as u16;
                shrunk.write_at(block, last.offset)?;
                write_dir_entry(
                    block,
                    new_offset,
                    ino,
                    (EXT2_BLOCK_SIZE - new_offset) as u16,
                    name,
                    kind.file_type(),
                )?;
                debug!(
                    "Appended '{}' -> {} in block {} at offset {}",
                    String::from_utf8_lossy(name),
                    ino,
                    last_block,
                    new_offset
                );
                return Ok(());
            }
        }

        // No room left: the entry gets a fresh block to itself
        let new_block = self.image.allocate_block()?;
        write_dir_entry(
            self.image.block_mut(new_block)?,
            0,
            ino,
            EXT2_BLOCK_SIZE as u16,
            name,
            kind.file_type(),
        )?;
        self.attach_block(&mut parent_inode, map.data.len(), new_block)?;
        parent_inode.i_blocks += EXT2_SECTORS_PER_BLOCK;
        parent_inode.i_size += EXT2_BLOCK_SIZE as u32;
        self.image.write_inode(parent, &parent_inode)?;
        debug!(
            "Appended '{}' -> {} in new block {} of directory {}",
            String::from_utf8_lossy(name),
            ino,
            new_block,
            parent
        );
        Ok(())
    }

    /// Drop the live entry at `location`. The first record of a block is
    /// tombstoned in place; any other is absorbed by its predecessor.
    pub(super) fn remove_entry(&mut self, location: &EntryLocation) -> Ext2Result<()> {
        let block = self.image.block_mut(location.block)?;
        let removed = Ext2DirEntryHeader::read_at(block, location.offset).ok_or_else(|| {
            Ext2KitError::Corrupt(format!("no entry at offset {}", location.offset))
        })?;

        match location.prev_offset {
            None => {
                let mut tombstone = removed;
                tombstone.inode = 0;
                tombstone.write_at(block, location.offset)?;
                debug!("Tombstoned first entry of block {}", location.block);
            }
            Some(prev_offset) => {
                let mut prev = Ext2DirEntryHeader::read_at(block, prev_offset).ok_or_else(|| {
                    Ext2KitError::Corrupt(format!("no entry at offset {}", prev_offset))
                })?;
                prev.rec_len += removed.rec_len;
                prev.write_at(block, prev_offset)?;
                debug!(
                    "Entry at {} absorbed by entry at {} in block {}",
                    location.offset, prev_offset, location.block
                );
            }
        }
        Ok(())
    }

    /// Make a recovered entry live again by splitting its host record.
    pub(super) fn restore_entry(&mut self, block: BlockNumber, found: &RecoveredEntry) -> Ext2Result<()> {
        let data = self.image.block_mut(block)?;
        let mut host = Ext2DirEntryHeader::read_at(data, found.host_offset)
            .ok_or_else(|| Ext2KitError::Corrupt("host entry vanished".to_string()))?;
        let mut recovered = Ext2DirEntryHeader::read_at(data, found.offset)
            .ok_or_else(|| Ext2KitError::Corrupt("recovered entry vanished".to_string()))?;

        let gap = (found.offset - found.host_offset) as u16;
        recovered.rec_len = host.rec_len - gap;
        host.rec_len = gap;
        host.write_at(data, found.host_offset)?;
        recovered.write_at(data, found.offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// "." / ".." / "a" / "b", with "b" absorbed into "a"
    fn block_with_deleted_b() -> Vec<u8> {
        let mut block = vec![0u8; EXT2_BLOCK_SIZE];
        write_dir_entry(&mut block, 0, 2, 12, b".", EXT2_FT_DIR).unwrap();
        write_dir_entry(&mut block, 12, 2, 12, b"..", EXT2_FT_DIR).unwrap();
        write_dir_entry(&mut block, 24, 12, 12, b"a", EXT2_FT_REG_FILE).unwrap();
        write_dir_entry(&mut block, 36, 13, 1024 - 36, b"b", EXT2_FT_REG_FILE).unwrap();
        // rm /b: "a" absorbs the record
        write_dir_entry(&mut block, 24, 12, 1024 - 24, b"a", EXT2_FT_REG_FILE).unwrap();
        block
    }

    fn rec_len_sum(block: &[u8]) -> usize {
        dir_entries(block)
            .unwrap()
            .iter()
            .map(|e| e.header.rec_len as usize)
            .sum()
    }

    #[test]
    fn test_dir_entries_walks_chain() {
        let block = block_with_deleted_b();
        let entries = dir_entries(&block).unwrap();
        let names: Vec<&[u8]> = entries.iter().map(|e| e.name.as_slice()).collect();
        assert_eq!(names, vec![&b"."[..], b"..", b"a"]);
        assert_eq!(rec_len_sum(&block), EXT2_BLOCK_SIZE);
    }

    #[test]
    fn test_dir_entries_rejects_broken_rec_len() {
        let mut block = block_with_deleted_b();
        block[24 + 4..24 + 6].copy_from_slice(&2000u16.to_le_bytes());
        assert!(matches!(dir_entries(&block), Err(Ext2KitError::Corrupt(_))));

        block[24 + 4..24 + 6].copy_from_slice(&0u16.to_le_bytes());
        assert!(dir_entries(&block).is_err());
    }

    #[test]
    fn test_find_deleted_entry_in_slack() {
        let block = block_with_deleted_b();
        let found = find_deleted_entry(&block, b"b").unwrap();
        assert_eq!(found.host_offset, 24);
        assert_eq!(found.offset, 36);
        assert_eq!(found.inode, 13);
        assert_eq!(found.file_type, EXT2_FT_REG_FILE);
    }

    #[test]
    fn test_find_deleted_entry_ignores_live_and_missing_names() {
        let block = block_with_deleted_b();
        assert_eq!(find_deleted_entry(&block, b"a"), None);
        assert_eq!(find_deleted_entry(&block, b"c"), None);
        // Prefix of a deleted name does not match
        assert_eq!(find_deleted_entry(&block, b"bb"), None);
    }

    #[test]
    fn test_find_deleted_entry_skips_zero_inode() {
        let mut block = block_with_deleted_b();
        block[36..40].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(find_deleted_entry(&block, b"b"), None);
    }

    #[test]
    fn test_find_deleted_entry_walks_several_candidates() {
        let mut block = block_with_deleted_b();
        // A second deleted entry after "b", both hidden behind "a"
        write_dir_entry(&mut block, 48, 14, 1024 - 48, b"third", EXT2_FT_REG_FILE).unwrap();
        let found = find_deleted_entry(&block, b"third").unwrap();
        assert_eq!((found.host_offset, found.offset, found.inode), (24, 48, 14));
    }

    #[test]
    fn test_find_deleted_entry_stops_at_empty_name() {
        let mut block = block_with_deleted_b();
        // Zero the name length of "b"; nothing behind it is reachable
        block[36 + 6] = 0;
        write_dir_entry(&mut block, 48, 14, 1024 - 48, b"third", EXT2_FT_REG_FILE).unwrap();
        assert_eq!(find_deleted_entry(&block, b"third"), None);
    }
}
