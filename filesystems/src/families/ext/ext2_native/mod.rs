// Native ext2 image editor
// Single block group, 1 KiB blocks, direct + single-indirect addressing

pub mod checker;
pub mod core;
pub mod reader;
pub mod writer;

pub use self::core::{Ext2Formatter, Ext2Image};
pub use checker::{CheckReport, Ext2Checker};
pub use reader::ImageDump;
pub use writer::{Ext2Writer, ImagePath};
