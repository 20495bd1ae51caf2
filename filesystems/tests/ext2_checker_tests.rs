// Integration tests for the ext2 consistency checker
// Each test damages a freshly formatted image in one specific way and
// checks the repair message, the tally and the repaired state.

use ext2kit_core::FormatOptions;
use ext2kit_filesystems::constants::*;
use ext2kit_filesystems::families::ext::ext2_native::writer::dir_entries;
use ext2kit_filesystems::structures::Ext2DirEntryHeader;
use ext2kit_filesystems::{CheckReport, Ext2Checker, Ext2Formatter, Ext2Image, Ext2Writer, InodeNumber, Resource};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn blank_image() -> Ext2Image {
    init_logging();
    Ext2Formatter::new(FormatOptions::default()).format_image().unwrap()
}

fn check(image: &mut Ext2Image) -> CheckReport {
    Ext2Checker::new(image).run().unwrap()
}

/// Offset of the live entry `name` in the first block of the root directory
fn root_entry_offset(image: &Ext2Image, name: &[u8]) -> (u32, usize) {
    let block = image.read_inode(EXT2_ROOT_INO).unwrap().i_block[0];
    let entries = dir_entries(image.block(block).unwrap()).unwrap();
    let entry = entries.iter().find(|e| e.name == name).unwrap();
    (block, entry.offset)
}

#[test]
fn test_fresh_image_is_clean() {
    let mut image = blank_image();
    let report = check(&mut image);
    assert!(report.is_clean());
    assert!(report.fixes.is_empty());
    assert_eq!(report.to_string(), "No file system inconsistencies detected!");
}

#[test]
fn test_edited_image_is_clean() {
    let mut image = blank_image();
    let mut writer = Ext2Writer::new(&mut image);
    writer.make_directory("/a").unwrap();
    writer.create_file("/a/f", b"", &[7u8; 13 * EXT2_BLOCK_SIZE]).unwrap();
    writer.create_hardlink("/a/f", "/g").unwrap();
    writer.create_symlink("/a/f", "/s").unwrap();
    writer.create_file("/gone", b"", b"bye").unwrap();
    writer.remove("/gone").unwrap();

    assert!(check(&mut image).is_clean());
}

#[test]
fn test_group_free_inode_counter_repaired() {
    let mut image = blank_image();
    let mut writer = Ext2Writer::new(&mut image);
    for i in 0..19 {
        writer.create_file(&format!("/f{}", i), b"", b"x").unwrap();
    }
    assert_eq!(image.count_free(Resource::Inodes).unwrap(), 2);

    // Descriptor and superblock both claim 5 free inodes
    let mut gd = image.group_desc().unwrap();
    gd.bg_free_inodes_count = 5;
    image.write_group_desc(&gd).unwrap();
    let mut sb = image.superblock().unwrap();
    sb.s_free_inodes_count = 5;
    image.write_superblock(&sb).unwrap();

    let report = check(&mut image);
    assert_eq!(
        report.fixes,
        vec!["Fixed: block group's free inodes counter was off by 3 compared to the bitmap.".to_string()]
    );
    assert!(report.total >= 3);
    assert_eq!(image.group_desc().unwrap().bg_free_inodes_count, 2);
    assert_eq!(image.superblock().unwrap().s_free_inodes_count, 2);
}

#[test]
fn test_superblock_free_block_counter_repaired() {
    let mut image = blank_image();
    let mut sb = image.superblock().unwrap();
    let actual = sb.s_free_blocks_count;
    sb.s_free_blocks_count = actual - 4;
    image.write_superblock(&sb).unwrap();

    let report = check(&mut image);
    assert_eq!(
        report.fixes,
        vec!["Fixed: superblock's free blocks counter was off by 4 compared to the bitmap.".to_string()]
    );
    assert_eq!(report.total, 4);
    assert_eq!(image.superblock().unwrap().s_free_blocks_count, actual);
}

#[test]
fn test_entry_type_mismatch_repaired() {
    let mut image = blank_image();
    let ino = Ext2Writer::new(&mut image).create_file("/f", b"", b"x").unwrap();

    let (block, offset) = root_entry_offset(&image, b"f");
    let data = image.block_mut(block).unwrap();
    let mut header = Ext2DirEntryHeader::read_at(data, offset).unwrap();
    header.file_type = EXT2_FT_SYMLINK;
    header.write_at(data, offset).unwrap();

    let report = check(&mut image);
    assert_eq!(report.fixes, vec![format!("Fixed: Entry type vs inode mismatch: inode [{}].", ino)]);
    assert_eq!(report.total, 1);

    let data = image.block(block).unwrap();
    assert_eq!(Ext2DirEntryHeader::read_at(data, offset).unwrap().file_type, EXT2_FT_REG_FILE);
}

#[test]
fn test_unmarked_inode_repaired() {
    let mut image = blank_image();
    let ino = Ext2Writer::new(&mut image).create_file("/f", b"", b"x").unwrap();
    let free_inodes = image.count_free(Resource::Inodes).unwrap();
    // Clears the bit and keeps the counters in step with it
    assert!(image.release(Resource::Inodes, ino).unwrap());

    let report = check(&mut image);
    assert_eq!(report.fixes, vec![format!("Fixed: inode [{}] not marked as in-use.", ino)]);
    assert_eq!(report.total, 1);
    assert!(image.inode_in_use(ino).unwrap());
    assert_eq!(image.superblock().unwrap().s_free_inodes_count, free_inodes);
}

#[test]
fn test_bare_bitmap_damage_counts_counter_and_bit() {
    let mut image = blank_image();
    let ino = Ext2Writer::new(&mut image).create_file("/f", b"", b"x").unwrap();
    // Clear the bit only; the counters now disagree with the bitmap too
    let bitmap = image.bitmap_mut(Resource::Inodes).unwrap();
    let index = (ino - 1) as usize;
    bitmap[index / 8] &= !(1 << (index % 8));

    let report = check(&mut image);
    assert_eq!(report.total, 2);
    assert_eq!(report.fixes.len(), 2);
    assert!(report.fixes[0].starts_with("Fixed: block group's free inodes counter was off by 1"));
    assert_eq!(report.fixes[1], format!("Fixed: inode [{}] not marked as in-use.", ino));
    assert!(check(&mut image).is_clean());
}

#[test]
fn test_deletion_time_cleared() {
    let mut image = blank_image();
    let ino = Ext2Writer::new(&mut image).create_file("/f", b"", b"x").unwrap();
    let mut inode = image.read_inode(ino).unwrap();
    inode.i_dtime = 1_700_000_000;
    image.write_inode(ino, &inode).unwrap();

    let report = check(&mut image);
    assert_eq!(report.fixes, vec![format!("Fixed: valid inode marked for deletion: [{}].", ino)]);
    assert_eq!(image.read_inode(ino).unwrap().i_dtime, 0);
}

#[test]
fn test_unmarked_blocks_repaired_including_indirect() {
    let mut image = blank_image();
    let ino = Ext2Writer::new(&mut image)
        .create_file("/big", b"", &vec![1u8; 14 * EXT2_BLOCK_SIZE])
        .unwrap();
    let inode = image.read_inode(ino).unwrap();
    let indirect = inode.i_block[EXT2_IND_BLOCK];

    let mut owned: Vec<u32> = inode.i_block[..EXT2_NDIR_BLOCKS].to_vec();
    owned.push(indirect);
    let slots = image.block(indirect).unwrap().to_vec();
    owned.extend(
        slots[..8]
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
    assert_eq!(owned.len(), 15);
    for &block in &owned {
        assert!(image.release(Resource::Blocks, block).unwrap());
    }

    let report = check(&mut image);
    assert_eq!(
        report.fixes,
        vec![format!(
            "Fixed: 15 in-use data blocks not marked in data bitmap for inode: [{}].",
            ino
        )]
    );
    assert_eq!(report.total, 15);
    for block in owned {
        assert!(image.block_in_use(block).unwrap());
    }
    assert!(check(&mut image).is_clean());
}

#[test]
fn test_checker_is_idempotent() {
    let mut image = blank_image();
    let mut writer = Ext2Writer::new(&mut image);
    let dir = writer.make_directory("/d").unwrap();
    let f = writer.create_file("/d/f", b"", b"inside").unwrap();
    let g = writer.create_file("/g", b"", &[3u8; 2048]).unwrap();

    let mut inode = image.read_inode(f).unwrap();
    inode.i_dtime = 42;
    image.write_inode(f, &inode).unwrap();
    image.release(Resource::Inodes, g).unwrap();
    let g_block = image.read_inode(g).unwrap().i_block[1];
    image.release(Resource::Blocks, g_block).unwrap();
    let mut gd = image.group_desc().unwrap();
    gd.bg_free_blocks_count += 9;
    image.write_group_desc(&gd).unwrap();
    let (block, offset) = root_entry_offset(&image, b"d");
    let data = image.block_mut(block).unwrap();
    let mut header = Ext2DirEntryHeader::read_at(data, offset).unwrap();
    header.file_type = EXT2_FT_REG_FILE;
    header.write_at(data, offset).unwrap();

    let first = check(&mut image);
    assert!(!first.is_clean());
    assert!(first.fixes.iter().any(|m| m.contains(&format!("[{}]", dir))));
    assert!(first.fixes.iter().any(|m| m.contains(&format!("[{}]", f))));
    assert!(first.fixes.iter().any(|m| m.contains(&format!("[{}]", g))));

    let repaired = image.as_bytes().to_vec();
    let second = check(&mut image);
    assert!(second.is_clean(), "second run still fixed: {:?}", second.fixes);
    assert_eq!(image.as_bytes(), repaired.as_slice());
}

#[test]
fn test_unmarked_directory_and_its_entries_repaired_in_one_run() {
    let mut image = blank_image();
    let mut writer = Ext2Writer::new(&mut image);
    let dir = writer.make_directory("/a").unwrap();
    let f = writer.create_file("/a/f", b"", b"x").unwrap();
    image.release(Resource::Inodes, dir).unwrap();
    image.release(Resource::Inodes, f).unwrap();

    // /a is re-marked from root's entry, then scanned when the walk reaches it
    let first = check(&mut image);
    assert_eq!(
        first.fixes,
        vec![
            format!("Fixed: inode [{}] not marked as in-use.", dir),
            format!("Fixed: inode [{}] not marked as in-use.", f),
        ]
    );
    assert_eq!(first.total, 2);
    assert!(image.inode_in_use(dir).unwrap());
    assert!(image.inode_in_use(f).unwrap());

    let second = check(&mut image);
    assert!(second.is_clean(), "second run still fixed: {:?}", second.fixes);
}

#[test]
fn test_entries_naming_invalid_inodes_are_skipped() {
    let mut image = blank_image();
    Ext2Writer::new(&mut image).create_file("/f", b"", b"x").unwrap();
    let (block, offset) = root_entry_offset(&image, b"f");
    let data = image.block_mut(block).unwrap();
    let mut header = Ext2DirEntryHeader::read_at(data, offset).unwrap();
    header.inode = 999;
    header.write_at(data, offset).unwrap();

    assert!(check(&mut image).is_clean());
}

#[test]
fn test_malformed_directory_block_is_skipped() {
    let mut image = blank_image();
    let dir: InodeNumber = Ext2Writer::new(&mut image).make_directory("/broken").unwrap();
    let block = image.read_inode(dir).unwrap().i_block[0];
    // rec_len of "." pointing past the block
    image.block_mut(block).unwrap()[4..6].copy_from_slice(&2000u16.to_le_bytes());

    let report = check(&mut image);
    assert!(report.is_clean());
}
