use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use ext2kit_core::{Ext2KitError, Settings};
use ext2kit_filesystems::{Ext2Checker, Ext2Formatter, Ext2Image, Ext2Writer, ImageDump};
use log::{debug, info};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "ext2kit")]
#[command(about = "Edit, check and inspect ext2 disk images", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to $EXT2KIT_CONFIG or the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Work on the in-memory image and leave the file untouched
    #[arg(long, global = true)]
    dry_run: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a blank image
    Format {
        image: PathBuf,
        /// Number of inodes (multiple of 8)
        #[arg(long)]
        inodes: Option<u32>,
        /// Number of 1 KiB blocks
        #[arg(long)]
        blocks: Option<u32>,
        /// Volume label
        #[arg(long)]
        label: Option<String>,
        /// Leave out the lost+found directory
        #[arg(long)]
        no_lost_found: bool,
    },
    /// Copy a host file into the image
    Cp {
        image: PathBuf,
        host: PathBuf,
        /// Absolute destination path inside the image
        dest: String,
    },
    /// Create a hard link, or a symbolic link with -s
    Ln {
        image: PathBuf,
        #[arg(short = 's', long = "symbolic")]
        symbolic: bool,
        /// Existing path in the image, or the symlink target
        source: String,
        dest: String,
    },
    /// Create a directory
    Mkdir { image: PathBuf, path: String },
    /// Remove a file or symlink
    Rm { image: PathBuf, path: String },
    /// Bring back a removed file
    Restore { image: PathBuf, path: String },
    /// Find and repair inconsistencies
    Check { image: PathBuf },
    /// Print superblock, bitmaps, inodes and directory blocks
    Dump { image: PathBuf },
}

fn init_logging(settings: &Settings, verbose: u8) {
    let mut builder = env_logger::Builder::new();
    let level = match verbose {
        0 => settings.log_level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    builder.parse_filters(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.format_timestamp(None).try_init();
}

fn open_image(path: &Path) -> anyhow::Result<Ext2Image> {
    Ext2Image::open(path).with_context(|| format!("cannot load image {}", path.display()))
}

/// Write a modified image back unless this is a dry run
fn finish(image: &Ext2Image, dry_run: bool) -> anyhow::Result<()> {
    if dry_run {
        info!("Dry run: image left unchanged");
        return Ok(());
    }
    image.flush()?;
    Ok(())
}

fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let dry_run = cli.dry_run || settings.dry_run;
    debug!("Running {:?} (dry run: {})", cli.command, dry_run);

    match cli.command {
        Commands::Format { image, inodes, blocks, label, no_lost_found } => {
            let mut options = settings.format;
            if let Some(inodes) = inodes {
                options.inodes_count = inodes;
            }
            if let Some(blocks) = blocks {
                options.blocks_count = blocks;
            }
            if label.is_some() {
                options.label = label;
            }
            if no_lost_found {
                options.with_lost_found = false;
            }
            let formatter = Ext2Formatter::new(options);
            if dry_run {
                formatter.format_image()?;
                info!("Dry run: {} not written", image.display());
            } else {
                formatter.format_to(&image)?;
            }
        }
        Commands::Cp { image, host, dest } => {
            let mut img = open_image(&image)?;
            Ext2Writer::new(&mut img).copy_in(&host, &dest)?;
            finish(&img, dry_run)?;
        }
        Commands::Ln { image, symbolic, source, dest } => {
            let mut img = open_image(&image)?;
            let mut writer = Ext2Writer::new(&mut img);
            if symbolic {
                writer.create_symlink(&source, &dest)?;
            } else {
                writer.create_hardlink(&source, &dest)?;
            }
            finish(&img, dry_run)?;
        }
        Commands::Mkdir { image, path } => {
            let mut img = open_image(&image)?;
            Ext2Writer::new(&mut img).make_directory(&path)?;
            finish(&img, dry_run)?;
        }
        Commands::Rm { image, path } => {
            let mut img = open_image(&image)?;
            Ext2Writer::new(&mut img).remove(&path)?;
            finish(&img, dry_run)?;
        }
        Commands::Restore { image, path } => {
            let mut img = open_image(&image)?;
            Ext2Writer::new(&mut img).restore(&path)?;
            finish(&img, dry_run)?;
        }
        Commands::Check { image } => {
            let mut img = open_image(&image)?;
            let report = Ext2Checker::new(&mut img).run()?;
            eprintln!("{}", report);
            if !report.is_clean() {
                finish(&img, dry_run)?;
            }
        }
        Commands::Dump { image } => {
            let img = open_image(&image)?;
            print!("{}", ImageDump::new(&img).render()?);
        }
    }
    Ok(())
}

/// Engine errors exit with their errno; anything else is a plain failure.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Ext2KitError>())
        .map(Ext2KitError::errno)
        .unwrap_or(1)
}

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("ext2kit: {}", e);
            std::process::exit(e.errno());
        }
    };
    init_logging(&settings, cli.verbose);

    if let Err(err) = run(cli, settings) {
        eprintln!("ext2kit: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_in() {
        let cli = Cli::try_parse_from(["ext2kit", "cp", "disk.img", "notes.txt", "/docs/"]).unwrap();
        match cli.command {
            Commands::Cp { image, host, dest } => {
                assert_eq!(image, PathBuf::from("disk.img"));
                assert_eq!(host, PathBuf::from("notes.txt"));
                assert_eq!(dest, "/docs/");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(!cli.dry_run);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_symbolic_link_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ext2kit", "ln", "-vv", "disk.img", "-s", "/target", "/link", "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Ln { symbolic: true, .. }));
    }

    #[test]
    fn test_parse_format_overrides() {
        let cli = Cli::try_parse_from([
            "ext2kit", "format", "disk.img", "--inodes", "64", "--label", "scratch", "--no-lost-found",
        ])
        .unwrap();
        match cli.command {
            Commands::Format { inodes, blocks, label, no_lost_found, .. } => {
                assert_eq!(inodes, Some(64));
                assert_eq!(blocks, None);
                assert_eq!(label.as_deref(), Some("scratch"));
                assert!(no_lost_found);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(Cli::try_parse_from(["ext2kit", "mkdir", "disk.img"]).is_err());
        assert!(Cli::try_parse_from(["ext2kit", "ln", "disk.img", "/only"]).is_err());
        assert!(Cli::try_parse_from(["ext2kit", "defrag", "disk.img"]).is_err());
    }

    #[test]
    fn test_exit_code_uses_errno() {
        let err = anyhow::Error::new(Ext2KitError::AlreadyExists("/a".into()));
        assert_eq!(exit_code(&err), 17);
        let err = anyhow::Error::new(Ext2KitError::NotFound("/a".into())).context("while linking");
        assert_eq!(exit_code(&err), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("usage")), 1);
    }
}
