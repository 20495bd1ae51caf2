// EXT2 Filesystem Constants
// Single-group, 1 KiB block layout used by the image editor

// Magic numbers
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

// Block geometry
pub const EXT2_BLOCK_SIZE: usize = 1024;
pub const EXT2_LOG_BLOCK_SIZE: u32 = 0;       // Block size = 1024 << 0
pub const EXT2_FIRST_DATA_BLOCK: u32 = 1;     // Block 0 is the boot block

// Fixed metadata locations
pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT2_GROUP_DESC_OFFSET: usize = 2048;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

// Inode layout
pub const EXT2_GOOD_OLD_REV: u32 = 0;
pub const EXT2_DYNAMIC_REV: u32 = 1;
pub const EXT2_GOOD_OLD_INODE_SIZE: usize = 128;
pub const EXT2_N_BLOCKS: usize = 15;
pub const EXT2_NDIR_BLOCKS: usize = 12;
pub const EXT2_IND_BLOCK: usize = 12;
pub const EXT2_POINTERS_PER_BLOCK: usize = EXT2_BLOCK_SIZE / 4;
pub const EXT2_MAX_FILE_BLOCKS: usize = EXT2_NDIR_BLOCKS + EXT2_POINTERS_PER_BLOCK;
pub const EXT2_SECTORS_PER_BLOCK: u32 = (EXT2_BLOCK_SIZE / 512) as u32;

// Special inode numbers
pub const EXT2_BAD_INO: u32 = 1;          // Bad blocks inode
pub const EXT2_ROOT_INO: u32 = 2;         // Root directory inode
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11; // First non-reserved inode

// Allocator: bitmap index 0 (the bad blocks inode) and indices 2..=9
// (inodes 3..=10) are never handed out
pub const EXT2_BAD_INODE_INDEX: u32 = EXT2_BAD_INO - 1;
pub const EXT2_RESERVED_INODE_INDICES: std::ops::RangeInclusive<u32> = 2..=9;

// Directory entries
pub const EXT2_DIR_ENTRY_HEADER_LEN: usize = 8;
pub const EXT2_NAME_LEN: usize = 255;
pub const EXT2_DOT_REC_LEN: u16 = 12;

// Directory entry file types
pub const EXT2_FT_UNKNOWN: u8 = 0;
pub const EXT2_FT_REG_FILE: u8 = 1;
pub const EXT2_FT_DIR: u8 = 2;
pub const EXT2_FT_SYMLINK: u8 = 7;

// Inode mode - file types
pub const S_IFMT: u16 = 0xF000;   // Format mask
pub const S_IFLNK: u16 = 0xA000;  // Symbolic link
pub const S_IFREG: u16 = 0x8000;  // Regular file
pub const S_IFDIR: u16 = 0x4000;  // Directory

// Default permission bits for new objects
pub const EXT2_DEFAULT_FILE_PERM: u16 = 0o644;
pub const EXT2_DEFAULT_DIR_PERM: u16 = 0o755;
pub const EXT2_DEFAULT_LINK_PERM: u16 = 0o777;
