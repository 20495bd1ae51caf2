// Path Resolution for EXT2 Writer
// Walks absolute image paths from the root inode

use super::directory::{dir_entries, EntryLocation};
use super::*;

/// An absolute path inside the image, split into non-empty components.
/// Repeated and trailing slashes are ignored; the root has no components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePath {
    components: Vec<Vec<u8>>,
}

impl ImagePath {
    pub fn parse(path: &str) -> Ext2Result<Self> {
        if !path.starts_with('/') {
            return Err(Ext2KitError::InvalidInput(format!(
                "'{}' is not an absolute path",
                path
            )));
        }
        let components: Vec<Vec<u8>> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| c.as_bytes().to_vec())
            .collect();
        if let Some(long) = components.iter().find(|c| c.len() > EXT2_NAME_LEN) {
            return Err(Ext2KitError::InvalidInput(format!(
                "path component of {} bytes exceeds {}",
                long.len(),
                EXT2_NAME_LEN
            )));
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }

    /// Final component; `None` for the root
    pub fn file_name(&self) -> Option<&[u8]> {
        self.components.last().map(Vec::as_slice)
    }

    /// Everything before the final component
    pub fn parent_components(&self) -> &[Vec<u8>] {
        match self.components.split_last() {
            Some((_, parent)) => parent,
            None => &[],
        }
    }
}

/// Outcome of walking a path to its final component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub inode: InodeNumber,
    pub parent: InodeNumber,
    pub grandparent: InodeNumber,
    pub kind: FileKind,
}

/// Outcome of walking a path to the directory that should hold its final component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLookup {
    pub parent: InodeNumber,
    pub grandparent: InodeNumber,
    pub name: Vec<u8>,
    pub existing: Option<(InodeNumber, FileKind)>,
}

impl Ext2Writer<'_> {
    /// Find `name` among the live entries of directory `dir`. First match wins.
    pub(super) fn lookup(&self, dir: InodeNumber, name: &[u8]) -> Ext2Result<Option<EntryLocation>> {
        let dir_inode = self.image.read_inode(dir)?;
        for block in block_map(self.image(), &dir_inode)?.data {
            let data = self.image.block(block)?;
            let mut prev_offset = None;
            for entry in dir_entries(data)? {
                if entry.header.inode != 0 && entry.name == name {
                    return Ok(Some(EntryLocation {
                        block,
                        offset: entry.offset,
                        prev_offset,
                        inode: entry.header.inode,
                    }));
                }
                prev_offset = Some(entry.offset);
            }
        }
        Ok(None)
    }

    fn kind_of(&self, ino: InodeNumber) -> Ext2Result<FileKind> {
        Ok(self.image.read_inode(ino)?.kind())
    }

    /// Walk `components` from the root, requiring every step to be a directory.
    /// Returns (directory, its parent).
    fn walk_directories(&self, components: &[Vec<u8>]) -> Ext2Result<(InodeNumber, InodeNumber)> {
        let mut current = EXT2_ROOT_INO;
        let mut parent = EXT2_ROOT_INO;
        for component in components {
            let found = self.lookup(current, component)?.ok_or_else(|| {
                Ext2KitError::NotFound(format!(
                    "'{}' not found",
                    String::from_utf8_lossy(component)
                ))
            })?;
            if !self.kind_of(found.inode)?.is_dir() {
                return Err(Ext2KitError::NotFound(format!(
                    "'{}' is not a directory",
                    String::from_utf8_lossy(component)
                )));
            }
            parent = current;
            current = found.inode;
        }
        Ok((current, parent))
    }

    /// Resolve a path to its inode, parent and grandparent.
    pub fn resolve(&self, path: &ImagePath) -> Ext2Result<Resolved> {
        let name = match path.file_name() {
            Some(name) => name,
            None => {
                return Ok(Resolved {
                    inode: EXT2_ROOT_INO,
                    parent: EXT2_ROOT_INO,
                    grandparent: EXT2_ROOT_INO,
                    kind: FileKind::Directory,
                })
            }
        };
        let lookup = self.resolve_parent(path)?;
        let (inode, kind) = lookup.existing.ok_or_else(|| {
            Ext2KitError::NotFound(format!("'{}' not found", String::from_utf8_lossy(name)))
        })?;
        Ok(Resolved {
            inode,
            parent: lookup.parent,
            grandparent: lookup.grandparent,
            kind,
        })
    }

    /// Resolve everything but the final component, and report whether the
    /// final name already exists there.
    pub fn resolve_parent(&self, path: &ImagePath) -> Ext2Result<ParentLookup> {
        let name = path
            .file_name()
            .ok_or_else(|| Ext2KitError::InvalidInput("the root has no parent entry".to_string()))?;
        let (parent, grandparent) = self.walk_directories(path.parent_components())?;
        let existing = match self.lookup(parent, name)? {
            Some(found) => Some((found.inode, self.kind_of(found.inode)?)),
            None => None,
        };
        debug!(
            "Resolved parent of '{}': dir {} (parent {}), existing {:?}",
            String::from_utf8_lossy(name),
            parent,
            grandparent,
            existing
        );
        Ok(ParentLookup {
            parent,
            grandparent,
            name: name.to_vec(),
            existing,
        })
    }
}
