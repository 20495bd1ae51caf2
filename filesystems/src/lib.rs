// Filesystem families organization
pub mod families;

// Native ext2 image editing, checking and inspection
pub use families::ext::ext2_native::core::{
    constants, structures, types, FileKind, InodeNumber, BlockNumber, Resource,
};
pub use families::ext::{CheckReport, Ext2Checker, Ext2Formatter, Ext2Image, Ext2Writer, ImageDump};
