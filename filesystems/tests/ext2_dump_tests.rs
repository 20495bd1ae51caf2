// Tests for the read-only image dump

use ext2kit_core::FormatOptions;
use ext2kit_filesystems::{Ext2Formatter, Ext2Writer, ImageDump};

#[test]
fn test_dump_of_fresh_image() {
    let image = Ext2Formatter::new(FormatOptions::default()).format_image().unwrap();
    let dump = ImageDump::new(&image).render().unwrap();

    assert!(dump.starts_with("Inodes: 32\nBlocks: 128\nBlock group:\n"));
    assert!(!dump.contains("Label:"));
    assert!(dump.contains("    used_dirs: 2\n"));
    assert!(dump.contains("[2] type: d size: 1024 links: 3 blocks: 2\n"));
    assert!(dump.contains("[11] type: d size: 1024 links: 2 blocks: 2\n"));
    assert!(dump.contains("DIR BLOCK NUM:"));
    assert!(dump.contains("rec_len: 12 name_len: 1 type= d name=.\n"));
    assert!(dump.contains("name_len: 10 type= d name=lost+found\n"));
    // Inode bitmap: inodes 1-11 in use
    assert!(dump.contains("Inode bitmap: 11111111 11100000 00000000 00000000\n"));
}

#[test]
fn test_dump_lists_new_objects() {
    let options = FormatOptions {
        label: Some("scratch".to_string()),
        ..FormatOptions::default()
    };
    let mut image = Ext2Formatter::new(options).format_image().unwrap();
    let mut writer = Ext2Writer::new(&mut image);
    let f = writer.create_file("/notes.txt", b"", b"some notes").unwrap();
    let l = writer.create_symlink("/notes.txt", "/link").unwrap();

    let dump = ImageDump::new(&image).render().unwrap();
    assert!(dump.contains("Label: scratch\n"));
    assert!(dump.contains(&format!("[{}] type: f size: 10 links: 1 blocks: 2\n", f)));
    assert!(dump.contains(&format!("[{}] type: l size: 10 links: 1 blocks: 2\n", l)));
    assert!(dump.contains(&format!("Inode: {} rec_len: 20 name_len: 9 type= f name=notes.txt\n", f)));
    assert!(dump.contains("name_len: 4 type= l name=link\n"));
}
