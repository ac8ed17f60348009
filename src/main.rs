//! unionfs-shell - in-process driver for the union filesystem core
//!
//! this binary does not mount anything through the kernel FUSE channel;
//! that adapter, along with the runtime debug-toggle control tool, lives
//! outside this crate. what's here exercises the dispatcher directly
//! against a branch spec, useful for scripting and for the scenarios in
//! the test suite that don't need a real mountpoint.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use unionfs_core::config::MountOptions;
use unionfs_core::dispatch::OpenMode;
use unionfs_core::mount::UnionFs;
use unionfs_core::Result;

/// usage banner: `Usage: unionfs [OPTIONS] <BRANCH_SPEC> <MOUNTPOINT>`
#[derive(Parser)]
#[command(name = "unionfs")]
#[command(about = "Usage: unionfs [OPTIONS] <BRANCH_SPEC> <MOUNTPOINT>")]
#[command(version = "unionfs-fuse version: 0.1.0")]
struct Cli {
    /// colon-separated `dir1=MODE:dir2=MODE:...`, topmost-first
    branch_spec: String,

    /// mountpoint directory (not actually mounted by this binary)
    mountpoint: PathBuf,

    /// pass a mount option: cow, stats, relaxed_permissions, preserve_branch,
    /// auto_unmount, or debug_file=PATH
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// list a directory's merged contents
    Ls { path: Option<PathBuf> },
    /// print a file's contents
    Cat { path: PathBuf },
    /// write data to a file, promoting it if needed
    Write { path: PathBuf, data: String },
    /// remove a file or create a whiteout for it
    Rm { path: PathBuf },
    /// create a directory
    Mkdir { path: PathBuf },
    /// print the synthetic stats file
    Stats,
    /// print aggregated free/total space across branches
    Statfs,
}

fn main() -> ExitCode {
    env_logger::builder().parse_env("UNIONFS_LOG").init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = parse_options(&cli.options)?;
    let fs = UnionFs::from_branch_spec(&cli.branch_spec, options, &cli.mountpoint)?;
    let dispatcher = fs.dispatcher();

    match cli.command {
        Command::Ls { path } => {
            let path = path.unwrap_or_default();
            for entry in dispatcher.readdir(&path)? {
                println!("{}", entry.name.to_string_lossy());
            }
        }
        Command::Cat { path } => {
            let full = dispatcher.open(&path, OpenMode::ReadOnly)?;
            let content = std::fs::read_to_string(&full).map_err(|e| unionfs_core::Error::Io {
                path: full,
                source: e,
            })?;
            print!("{}", content);
        }
        Command::Write { path, data } => {
            let full = dispatcher.prepare_write(&path)?;
            std::fs::write(&full, data).map_err(|e| unionfs_core::Error::Io {
                path: full,
                source: e,
            })?;
        }
        Command::Rm { path } => {
            dispatcher.unlink(&path)?;
        }
        Command::Mkdir { path } => {
            let full = dispatcher.mkdir(&path)?;
            std::fs::create_dir_all(&full).map_err(|e| unionfs_core::Error::Io {
                path: full,
                source: e,
            })?;
        }
        Command::Stats => {
            if let Some(rendered) = dispatcher.read_stats_file() {
                print!("{}", rendered);
            } else {
                eprintln!("stats endpoint not enabled; pass -o stats");
            }
        }
        Command::Statfs => {
            let statfs = dispatcher.statfs()?;
            println!("block_size: {}", statfs.block_size);
            println!("blocks_total: {}", statfs.blocks_total);
            println!("blocks_free: {}", statfs.blocks_free);
            println!("blocks_available: {}", statfs.blocks_available);
            println!("files_total: {}", statfs.files_total);
            println!("files_free: {}", statfs.files_free);
        }
    }

    Ok(())
}

fn parse_options(raw: &[String]) -> Result<MountOptions> {
    let mut options = MountOptions::default();
    for opt in raw {
        match opt.split_once('=') {
            Some(("debug_file", path)) => options.debug_file = Some(PathBuf::from(path)),
            Some((name, _)) => {
                return Err(unionfs_core::Error::InvalidArgument(format!(
                    "unknown option '{}'",
                    name
                )))
            }
            None => match opt.as_str() {
                "cow" => options.cow = true,
                "stats" => options.stats = true,
                "relaxed_permissions" => options.relaxed_permissions = true,
                "preserve_branch" => options.preserve_branch = true,
                "auto_unmount" => options.auto_unmount = true,
                other => {
                    return Err(unionfs_core::Error::InvalidArgument(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            },
        }
    }
    Ok(options)
}
