use crate::error::{Ext2KitError, Ext2Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative settings file.
pub const CONFIG_ENV_VAR: &str = "EXT2KIT_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub label: Option<String>,
    pub with_lost_found: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            inodes_count: 32,
            blocks_count: 128,
            label: None,
            with_lost_found: true,
        }
    }
}

impl FormatOptions {
    pub fn validate(&self) -> Ext2Result<()> {
        if self.inodes_count < 16 || self.inodes_count % 8 != 0 {
            return Err(Ext2KitError::InvalidInput(format!(
                "inode count must be a multiple of 8 and at least 16, got {}",
                self.inodes_count
            )));
        }
        // One group: every bit of each bitmap has to fit in a single block.
        if self.inodes_count > 8192 || self.blocks_count > 8192 {
            return Err(Ext2KitError::InvalidInput(
                "a single block group holds at most 8192 inodes and 8192 blocks".to_string(),
            ));
        }
        if self.blocks_count < 64 {
            return Err(Ext2KitError::InvalidInput(format!(
                "image needs at least 64 blocks, got {}",
                self.blocks_count
            )));
        }
        if let Some(ref label) = self.label {
            if label.len() > 16 {
                return Err(Ext2KitError::InvalidInput(
                    "label must be 16 bytes or less".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `env_logger` filter, e.g. "debug" or "ext2kit_filesystems=trace".
    pub log_level: Option<String>,
    /// Run commands against the in-memory image without writing it back.
    pub dry_run: bool,
    pub format: FormatOptions,
}

impl Settings {
    pub fn from_file(path: &Path) -> Ext2Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            Ext2KitError::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    /// Default settings location under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ext2kit").join("config.json"))
    }

    /// Resolve settings from an explicit path, the environment, or the user's
    /// config directory, in that order. Only an explicitly named file has to exist.
    pub fn load(explicit: Option<&Path>) -> Ext2Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading settings from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}
