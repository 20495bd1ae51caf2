// EXT2 type definitions

use super::constants::*;
use std::fmt;

pub type InodeNumber = u32;
pub type BlockNumber = u32;

/// Object kinds the editor creates and understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl FileKind {
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }

    pub fn from_file_type(file_type: u8) -> Self {
        match file_type {
            EXT2_FT_REG_FILE => FileKind::Regular,
            EXT2_FT_DIR => FileKind::Directory,
            EXT2_FT_SYMLINK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }

    /// Directory entry type tag for this kind
    pub fn file_type(self) -> u8 {
        match self {
            FileKind::Regular => EXT2_FT_REG_FILE,
            FileKind::Directory => EXT2_FT_DIR,
            FileKind::Symlink => EXT2_FT_SYMLINK,
            FileKind::Other => EXT2_FT_UNKNOWN,
        }
    }

    /// Inode mode for a newly created object of this kind
    pub fn default_mode(self) -> u16 {
        match self {
            FileKind::Regular => S_IFREG | EXT2_DEFAULT_FILE_PERM,
            FileKind::Directory => S_IFDIR | EXT2_DEFAULT_DIR_PERM,
            FileKind::Symlink => S_IFLNK | EXT2_DEFAULT_LINK_PERM,
            FileKind::Other => 0,
        }
    }

    pub fn is_dir(self) -> bool {
        self == FileKind::Directory
    }

    /// Single-letter tag used by the dump output
    pub fn tag(self) -> char {
        match self {
            FileKind::Regular => 'f',
            FileKind::Directory => 'd',
            FileKind::Symlink => 'l',
            FileKind::Other => '0',
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Regular => "regular file",
            FileKind::Directory => "directory",
            FileKind::Symlink => "symlink",
            FileKind::Other => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Which allocation bitmap (and counter pair) an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Blocks,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => write!(f, "inodes"),
            Resource::Blocks => write!(f, "blocks"),
        }
    }
}
