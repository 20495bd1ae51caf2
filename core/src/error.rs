use thiserror::Error;

pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EEXIST: i32 = 17;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;

#[derive(Debug, Error)]
pub enum Ext2KitError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("No space left on image: {0}")]
    NoSpace(String),

    #[error("Corrupt image: {0}")]
    Corrupt(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Formatting error: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl Ext2KitError {
    /// Process exit code for this error, following the errno values the
    /// command-line tools report.
    pub fn errno(&self) -> i32 {
        match self {
            Ext2KitError::NotFound(_) => ENOENT,
            Ext2KitError::AlreadyExists(_) => EEXIST,
            Ext2KitError::IsDirectory(_) => EISDIR,
            Ext2KitError::NoSpace(_) => ENOSPC,
            Ext2KitError::InvalidInput(_) | Ext2KitError::Configuration(_) => EINVAL,
            Ext2KitError::Corrupt(_)
            | Ext2KitError::Io(_)
            | Ext2KitError::Serialization(_)
            | Ext2KitError::Format(_)
            | Ext2KitError::Other(_) => EIO,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Ext2KitError::NotFound(_))
    }
}

pub type Ext2Result<T> = Result<T, Ext2KitError>;
