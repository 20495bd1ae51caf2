// EXT Filesystem Family

pub mod ext2_native;

pub use ext2_native::{CheckReport, Ext2Checker, Ext2Formatter, Ext2Image, Ext2Writer, ImageDump};
