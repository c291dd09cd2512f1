//! # treesync CLI - Mirror and move directory trees
//!
//! A command-line front end for the treesync library.
//!
//! ## Features
//! - Mirror a directory into another, optionally deleting extra entries
//! - Move a directory with its side files to a new library root
//! - Total the files, directories and bytes of a tree
//!
//! ## Usage
//! ```bash
//! # Copy everything new, delete what the source no longer has
//! treesync mirror ./photos /backup/photos --skip-identical --delete-extra
//!
//! # Move a game and its manifest to another library
//! treesync move /games /fast/games --primary common/Game --side-file appmanifest_1.acf
//!
//! # Show tree totals
//! treesync scan ./photos
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use treesync::mover::{discover, TreeTotals};
use treesync::utils::{format_bytes, make_relative, rebase};
use treesync::{
    CancellationToken, CopyOptions, LocalFileSystem, MoveGroup, MovePhase, MoveResult, StatisticsSnapshot,
    SyncConfig, Throttle,
};

/// treesync CLI - Concurrent directory mirroring and moving
#[derive(Parser)]
#[command(name = "treesync")]
#[command(version)]
#[command(about = "Mirror and move directory trees with live progress")]
#[command(long_about = None)]
struct Cli {
    /// JSON config file with defaults for workers, chunk size and excludes
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make a destination directory match a source directory
    Mirror(MirrorArgs),

    /// Move a directory and its side files under a new root
    Move {
        /// Library root the relative paths start from
        source_root: PathBuf,

        /// Library root to move into
        destination_root: PathBuf,

        /// Primary directory, relative to the source root
        #[arg(long)]
        primary: PathBuf,

        /// Secondary directory, relative to the source root
        #[arg(long)]
        secondary: Option<PathBuf>,

        /// Side file, relative to the source root (repeatable)
        #[arg(long = "side-file")]
        side_files: Vec<PathBuf>,
    },

    /// Total the files, directories and bytes under a directory
    Scan {
        /// Directory to scan
        directory: PathBuf,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct MirrorArgs {
    /// Source directory
    source: PathBuf,

    /// Destination directory (created if missing)
    destination: PathBuf,

    /// Leave destination files that match the source untouched
    #[arg(long)]
    skip_identical: bool,

    /// Delete destination entries the source does not have
    #[arg(long, conflicts_with = "delete_mismatched")]
    delete_extra: bool,

    /// Delete destination entries whose kind differs from the source
    #[arg(long)]
    delete_mismatched: bool,

    /// Exclude entries whose name matches this glob (repeatable)
    #[arg(short, long)]
    exclude: Vec<String>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the final statistics as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    match cli.command {
        Commands::Mirror(args) => cmd_mirror(config, args),
        Commands::Move {
            source_root,
            destination_root,
            primary,
            secondary,
            side_files,
        } => cmd_move(&config, source_root, destination_root, primary, secondary, side_files),
        Commands::Scan { directory, json } => cmd_scan(&directory, json),
    }
}

/// Mirror a directory
fn cmd_mirror(mut config: SyncConfig, args: MirrorArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    let base = config.effective_options();
    let options = base
        .clone()
        .skip_identical_files(base.skip_identical_files || args.skip_identical)
        .delete_extra_files(base.delete_extra_files || args.delete_extra)
        .delete_mismatched_files(base.delete_mismatched_files || args.delete_mismatched)
        .exclude(args.exclude);
    config.validate()?;

    let synchronizer = config.synchronizer().options(options.clone()).build()?;
    if !args.json {
        println!(
            "{} {} {} {}",
            "Mirroring".blue().bold(),
            args.source.display(),
            "->".dimmed(),
            args.destination.display()
        );
        print_policy(&options);
    }

    let handle = synchronizer.synchronize_paths(&args.source, &args.destination)?;

    let pb = spinner(args.json)?;
    let mut throttle = Throttle::new(config.pulse_interval());
    handle.wait_with_pulse(config.poll_interval(), &mut throttle, |stats| {
        pb.set_message(format!(
            "{} copied, {} skipped, {} deleted, {}",
            stats.files_copied,
            stats.files_skipped,
            stats.entries_deleted(),
            format_bytes(stats.bytes_copied)
        ));
    });
    pb.finish_and_clear();

    let stats = handle.join()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_mirror_summary(&stats);
    }

    if stats.has_errors() {
        bail!("{} entries failed", stats.errors.len());
    }
    Ok(())
}

fn print_policy(options: &CopyOptions) {
    let delete = match options.delete_policy() {
        treesync::DeletePolicy::None => "none",
        treesync::DeletePolicy::Mismatched => "mismatched kinds",
        treesync::DeletePolicy::Extra => "extra entries",
    };
    println!(
        "  Skip identical: {}  Delete: {}",
        options.skip_identical_files.to_string().cyan(),
        delete.cyan()
    );
    if !options.exclude.is_empty() {
        println!("  Excluding: {}", options.exclude.join(", ").cyan());
    }
}

fn print_mirror_summary(stats: &StatisticsSnapshot) {
    let marker = if stats.cancelled {
        "!".yellow().bold()
    } else if stats.has_errors() {
        "✗".red().bold()
    } else {
        "✓".green().bold()
    };
    println!("{} Mirror finished", marker);
    println!(
        "  Files: {} copied, {} skipped, {} deleted",
        stats.files_copied.to_string().cyan(),
        stats.files_skipped.to_string().cyan(),
        stats.files_deleted.to_string().cyan()
    );
    println!(
        "  Directories: {} created, {} deleted",
        stats.directories_created.to_string().cyan(),
        stats.directories_deleted.to_string().cyan()
    );
    if stats.links_enumerated > 0 {
        println!(
            "  Links: {} copied, {} skipped, {} deleted",
            stats.links_copied.to_string().cyan(),
            stats.links_skipped.to_string().cyan(),
            stats.links_deleted.to_string().cyan()
        );
    }
    println!(
        "  Bytes: {} copied, {} skipped",
        format_bytes(stats.bytes_copied).cyan(),
        format_bytes(stats.bytes_skipped).cyan()
    );
    println!(
        "  Time: {} (workers busy {})",
        format_duration(round(stats.elapsed)).to_string().cyan(),
        format_duration(round(stats.worker_time))
    );

    if stats.has_errors() {
        println!("\n{}", "Errors:".yellow().bold());
        for error in &stats.errors {
            println!("  {} {}: {}", "•".red(), error.path.display(), error.message);
        }
    }
}

/// Move a directory group
fn cmd_move(
    config: &SyncConfig,
    source_root: PathBuf,
    destination_root: PathBuf,
    primary: PathBuf,
    secondary: Option<PathBuf>,
    side_files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let relative = |path: PathBuf| -> anyhow::Result<PathBuf> {
        if path.is_absolute() {
            Ok(make_relative(&path, &source_root)?)
        } else {
            Ok(path)
        }
    };

    let mut group = MoveGroup::new(&source_root, relative(primary)?);
    if let Some(secondary) = secondary {
        group = group.with_secondary(relative(secondary)?);
    }
    for side_file in side_files {
        group = group.with_side_file(relative(side_file)?);
    }

    let from = source_root.join(group.primary());
    let to = rebase(&from, &source_root, &destination_root)?;
    println!("{} {} {} {}", "Moving".blue().bold(), from.display(), "->".dimmed(), to.display());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")?
            .progress_chars("=> "),
    );
    let start = Instant::now();
    let result = config.move_operation().run(
        &group,
        &destination_root,
        |info| {
            pb.set_length(info.total_bytes);
            pb.set_position(info.moved_bytes);
            let phase = match info.phase {
                MovePhase::DiscoveringSourceFiles => "Discovering".to_string(),
                MovePhase::CopyingFiles => match info.eta {
                    Some(eta) => format!("Copying, {} left", format_duration(round(eta))),
                    None => "Copying".to_string(),
                },
                MovePhase::DeletingSourceDirectory => "Removing source".to_string(),
                MovePhase::DeletingDestinationAfterCancellation => "Rolling back".to_string(),
            };
            pb.set_message(phase);
        },
        &CancellationToken::new(),
    );
    pb.finish_and_clear();

    match result {
        MoveResult::Completed(info) => {
            println!("{} Move complete", "✓".green().bold());
            println!(
                "  Files: {}  Directories: {}  Size: {}",
                info.moved_files.to_string().cyan(),
                info.moved_directories.to_string().cyan(),
                format_bytes(info.moved_bytes).cyan()
            );
            println!("  Time: {}", format_duration(round(start.elapsed())).to_string().cyan());
            Ok(())
        }
        MoveResult::Cancelled(info) => {
            for error in &info.rollback_errors {
                println!("  {} {}: {}", "•".red(), error.path.display(), error.message);
            }
            bail!("move cancelled");
        }
        MoveResult::Failed(e) => bail!(e.user_message()),
    }
}

/// Print tree totals
fn cmd_scan(directory: &Path, json: bool) -> anyhow::Result<()> {
    let totals: TreeTotals = discover(&LocalFileSystem::new(), directory)
        .with_context(|| format!("scanning {}", directory.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
        return Ok(());
    }
    println!("{} {}", "Scanned".blue().bold(), directory.display());
    println!("  Files: {}", totals.files.to_string().cyan());
    println!("  Links: {}", totals.links.to_string().cyan());
    println!("  Directories: {}", totals.directories.to_string().cyan());
    println!("  Size: {}", format_bytes(totals.bytes).cyan());
    Ok(())
}

fn spinner(hidden: bool) -> anyhow::Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Whole seconds read better than nanosecond precision
fn round(duration: Duration) -> Duration {
    if duration >= Duration::from_secs(1) {
        Duration::from_secs(duration.as_secs())
    } else {
        Duration::from_millis(duration.as_millis() as u64)
    }
}
