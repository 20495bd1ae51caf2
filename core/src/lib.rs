pub mod error;
pub mod options;

pub use error::{Ext2KitError, Ext2Result};
pub use options::{FormatOptions, Settings};
