// Core EXT2 implementation modules

pub mod bitmap;
pub mod constants;
pub mod formatter;
pub mod image;
pub mod inode_builder;
pub mod structures;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use formatter::Ext2Formatter;
pub use image::{Ext2Image, ImageLayout};
pub use structures::{Ext2DirEntryHeader, Ext2GroupDesc, Ext2Inode, Ext2Superblock};
pub use types::*;
