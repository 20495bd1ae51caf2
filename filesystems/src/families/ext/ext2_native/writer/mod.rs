// EXT2 Writer
// Mutation operations on a loaded image: copy-in, links, mkdir, rm, restore.
// Each operation validates first, then allocates; nothing is rolled back
// once allocation has begun.

mod directory;
mod indirect_blocks;
mod path_resolution;

pub use directory::{dir_entries, find_deleted_entry, DirEntryRecord, EntryLocation, RecoveredEntry};
pub use indirect_blocks::{block_map, blocks_for, BlockMap};
pub use path_resolution::{ImagePath, ParentLookup, Resolved};

use crate::families::ext::ext2_native::core::{
    constants::*,
    image::Ext2Image,
    inode_builder::{init_directory_block, init_inode, now},
    structures::{dir_entry_min_len, dir_entry_name, write_dir_entry, Ext2DirEntryHeader, Ext2Inode},
    types::*,
};
#[cfg(test)]
use crate::families::ext::ext2_native::core::formatter::Ext2Formatter;
use ext2kit_core::{Ext2KitError, Ext2Result};
use log::{debug, info};
use std::path::Path;

pub struct Ext2Writer<'a> {
    image: &'a mut Ext2Image,
}

impl<'a> Ext2Writer<'a> {
    pub fn new(image: &'a mut Ext2Image) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &Ext2Image {
        &*self.image
    }

    /// Copy a host file into the image at absolute path `dest`.
    pub fn copy_in(&mut self, host: &Path, dest: &str) -> Ext2Result<InodeNumber> {
        let contents = std::fs::read(host)?;
        let default_name = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned().into_bytes())
            .ok_or_else(|| {
                Ext2KitError::InvalidInput(format!("'{}' has no file name", host.display()))
            })?;
        self.create_file(dest, &default_name, &contents)
    }

    /// Create a regular file holding `contents`. When `dest` names an
    /// existing directory the file goes inside it as `default_name`.
    pub fn create_file(&mut self, dest: &str, default_name: &[u8], contents: &[u8]) -> Ext2Result<InodeNumber> {
        let path = ImagePath::parse(dest)?;
        let (dir, name) = if path.is_root() {
            (EXT2_ROOT_INO, default_name.to_vec())
        } else {
            let lookup = self.resolve_parent(&path)?;
            match lookup.existing {
                Some((inode, FileKind::Directory)) => (inode, default_name.to_vec()),
                Some(_) => return Err(already_exists(dest)),
                None => (lookup.parent, lookup.name),
            }
        };
        if name.is_empty() || name.len() > EXT2_NAME_LEN || name.contains(&b'/') {
            return Err(Ext2KitError::InvalidInput(format!(
                "invalid file name '{}'",
                String::from_utf8_lossy(&name)
            )));
        }
        if self.lookup(dir, &name)?.is_some() {
            return Err(already_exists(dest));
        }

        let ino = self.write_new_object(FileKind::Regular, contents)?;
        self.append_entry(dir, &name, ino, FileKind::Regular)?;
        info!(
            "Created file '{}' ({} bytes) as inode {}",
            String::from_utf8_lossy(&name),
            contents.len(),
            ino
        );
        Ok(ino)
    }

    /// Create a symlink at `dest` whose data block holds `target`.
    pub fn create_symlink(&mut self, target: &str, dest: &str) -> Ext2Result<InodeNumber> {
        let lookup = self.resolve_new_name(dest)?;
        let ino = self.write_new_object(FileKind::Symlink, target.as_bytes())?;
        self.append_entry(lookup.parent, &lookup.name, ino, FileKind::Symlink)?;
        info!("Created symlink {} -> '{}' as inode {}", dest, target, ino);
        Ok(ino)
    }

    /// Add a second name for the file at `source`.
    pub fn create_hardlink(&mut self, source: &str, dest: &str) -> Ext2Result<()> {
        let source_path = ImagePath::parse(source)?;
        let resolved = self.resolve(&source_path)?;
        if resolved.kind.is_dir() {
            return Err(Ext2KitError::IsDirectory(format!(
                "cannot hard link directory '{}'",
                source
            )));
        }
        let lookup = self.resolve_new_name(dest)?;

        let mut inode = self.image.read_inode(resolved.inode)?;
        inode.i_links_count = inode.i_links_count.saturating_add(1);
        self.image.write_inode(resolved.inode, &inode)?;
        self.append_entry(lookup.parent, &lookup.name, resolved.inode, resolved.kind)?;
        info!(
            "Linked {} -> inode {} (links now {})",
            dest, resolved.inode, inode.i_links_count
        );
        Ok(())
    }

    /// Create an empty directory at `path`.
    pub fn make_directory(&mut self, path: &str) -> Ext2Result<InodeNumber> {
        let lookup = self.resolve_new_name(path)?;

        let ino = self.image.allocate_inode()?;
        let block = self.image.allocate_block()?;
        let mut inode = init_inode(FileKind::Directory.default_mode(), EXT2_BLOCK_SIZE as u32);
        inode.i_block[0] = block;
        init_directory_block(self.image.block_mut(block)?, ino, lookup.parent)?;
        self.image.write_inode(ino, &inode)?;

        self.append_entry(lookup.parent, &lookup.name, ino, FileKind::Directory)?;
        let mut parent = self.image.read_inode(lookup.parent)?;
        parent.i_links_count = parent.i_links_count.saturating_add(1);
        self.image.write_inode(lookup.parent, &parent)?;
        self.image.adjust_used_dirs(1)?;

        info!("Created directory {} as inode {} (block {})", path, ino, block);
        Ok(ino)
    }

    /// Remove a file or symlink.
    pub fn remove(&mut self, path: &str) -> Ext2Result<()> {
        let image_path = ImagePath::parse(path)?;
        if image_path.is_root() {
            return Err(Ext2KitError::AlreadyExists("cannot remove the root directory".to_string()));
        }
        let resolved = self.resolve(&image_path)?;
        if resolved.kind.is_dir() {
            return Err(Ext2KitError::IsDirectory(format!("'{}' is a directory", path)));
        }
        let name = image_path.file_name().unwrap_or_default();
        self.unlink(resolved.parent, name)?;
        info!("Removed {}", path);
        Ok(())
    }

    /// Bring back a removed file whose entry and blocks are still intact.
    pub fn restore(&mut self, path: &str) -> Ext2Result<InodeNumber> {
        let image_path = ImagePath::parse(path)?;
        if image_path.is_root() {
            return Err(Ext2KitError::IsDirectory("cannot restore the root directory".to_string()));
        }
        let lookup = self.resolve_parent(&image_path)?;
        match lookup.existing {
            Some((_, FileKind::Directory)) => {
                return Err(Ext2KitError::IsDirectory(format!("'{}' is a directory", path)))
            }
            Some(_) => return Err(Ext2KitError::NotFound(format!("'{}' has not been removed", path))),
            None => {}
        }

        let parent = self.image.read_inode(lookup.parent)?;
        for block in block_map(self.image(), &parent)?.data {
            if let Some(found) = find_deleted_entry(self.image.block(block)?, &lookup.name) {
                debug!(
                    "Found deleted entry for inode {} at offset {} of block {}",
                    found.inode, found.offset, block
                );
                self.revive(block, &found)?;
                info!("Restored {} as inode {}", path, found.inode);
                return Ok(found.inode);
            }
        }
        Err(Ext2KitError::NotFound(format!("no deleted entry named '{}'", path)))
    }

    // ---- shared steps ----

    /// Resolve the parent of a name that must not exist yet.
    fn resolve_new_name(&self, dest: &str) -> Ext2Result<ParentLookup> {
        let path = ImagePath::parse(dest)?;
        if path.is_root() {
            return Err(already_exists(dest));
        }
        let lookup = self.resolve_parent(&path)?;
        if lookup.existing.is_some() {
            return Err(already_exists(dest));
        }
        Ok(lookup)
    }

    /// Allocate and fill an inode plus data blocks for a file or symlink.
    fn write_new_object(&mut self, kind: FileKind, contents: &[u8]) -> Ext2Result<InodeNumber> {
        let size = u32::try_from(contents.len())
            .ok()
            .filter(|_| blocks_for(contents.len()) <= EXT2_MAX_FILE_BLOCKS)
            .ok_or_else(|| {
                Ext2KitError::NoSpace(format!(
                    "{} bytes exceed the {} blocks one inode can address",
                    contents.len(),
                    EXT2_MAX_FILE_BLOCKS
                ))
            })?;

        let ino = self.image.allocate_inode()?;
        let mut inode = init_inode(kind.default_mode(), size);
        self.populate_blocks(&mut inode, contents)?;
        self.image.write_inode(ino, &inode)?;
        Ok(ino)
    }

    /// Drop the entry `name` from `parent` and one link from its inode,
    /// freeing the inode and its blocks when no links remain.
    fn unlink(&mut self, parent: InodeNumber, name: &[u8]) -> Ext2Result<InodeNumber> {
        let location = self.lookup(parent, name)?.ok_or_else(|| {
            Ext2KitError::NotFound(format!("'{}' not found", String::from_utf8_lossy(name)))
        })?;
        let mut inode = self.image.read_inode(location.inode)?;
        let links = inode.i_links_count.saturating_sub(1);
        let released = if links == 0 {
            Some(block_map(self.image(), &inode)?)
        } else {
            None
        };

        self.remove_entry(&location)?;
        inode.i_links_count = links;
        if let Some(map) = released {
            self.image.release(Resource::Inodes, location.inode)?;
            for block in map.all_blocks() {
                self.image.release(Resource::Blocks, block)?;
            }
            inode.i_dtime = now();
            debug!(
                "Inode {} freed with {} blocks",
                location.inode,
                map.all_blocks().count()
            );
        }
        self.image.write_inode(location.inode, &inode)?;
        Ok(location.inode)
    }

    /// Re-mark a recovered inode and its blocks, all or nothing.
    fn revive(&mut self, block: BlockNumber, found: &RecoveredEntry) -> Ext2Result<()> {
        let gone = || Ext2KitError::NotFound(format!("inode {} cannot be recovered", found.inode));
        if !self.image.is_valid_inode(found.inode) {
            return Err(gone());
        }
        let mut inode = self.image.read_inode(found.inode)?;
        if inode.is_dir() {
            return Err(Ext2KitError::IsDirectory(format!(
                "inode {} is a directory",
                found.inode
            )));
        }
        if self.image.inode_in_use(found.inode)? {
            debug!("Inode {} has been reused", found.inode);
            return Err(gone());
        }
        let map = block_map(self.image(), &inode).map_err(|_| gone())?;
        for b in map.all_blocks() {
            if self.image.block_in_use(b)? {
                debug!("Block {} of inode {} has been reused", b, found.inode);
                return Err(gone());
            }
        }

        self.restore_entry(block, found)?;
        self.image.mark_in_use(Resource::Inodes, found.inode)?;
        for b in map.all_blocks() {
            self.image.mark_in_use(Resource::Blocks, b)?;
        }
        inode.i_dtime = 0;
        inode.i_links_count = 1;
        self.image.write_inode(found.inode, &inode)
    }
}

fn already_exists(path: &str) -> Ext2KitError {
    Ext2KitError::AlreadyExists(format!("'{}' already exists", path))
}
