//! # Regsync CLI - Check in working copy changes
//!
//! Command-line front end for the regsync library.
//!
//! ## Features
//! - Check a working copy in to a directory-backed repository
//! - Dump the pending change-set without sending it
//! - Show what a check-in would send
//! - Mark new files as added and missing files as deleted
//!
//! ## Usage
//! ```bash
//! # Record a new folder
//! regsync add docs
//!
//! # Flag files removed from disk
//! regsync mark-deleted
//!
//! # See what would be sent
//! regsync status
//!
//! # Check in
//! regsync checkin --repository /srv/repo
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use regsync::reconcile::WalkSummary;
use regsync::utils::format_bytes;
use regsync::{
    working_copy, ChangeNotice, CheckInBuilder, CheckInReport, DirectoryRepository, SyncConfig,
    SyncError,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Regsync CLI - Check-in synchronization for repository working copies
#[derive(Parser)]
#[command(name = "regsync")]
#[command(version)]
#[command(about = "Send the local changes of a checked-out working copy back to its repository")]
#[command(long_about = None)]
struct Cli {
    /// Path to the working copy (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// JSON configuration file
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
    /// Check the working copy in
    #[command(alias = "ci")]
    Checkin {
        /// Repository root directory
        #[arg(short, long)]
        repository: PathBuf,

        /// Repository path or registry URL to check in to
        #[arg(short, long)]
        target: Option<String>,

        /// Acting user
        #[arg(short, long)]
        user: Option<String>,

        /// Let the repository reject updates that conflict with its copy
        #[arg(long)]
        strict: bool,

        /// Check in even when conflict markers are present
        #[arg(
            long,
            env = "REGSYNC_IGNORE_CONFLICTS",
            value_parser = clap::builder::FalseyValueParser::new()
        )]
        ignore_conflicts: bool,

        /// Clean up the local repository after the import
        #[arg(long)]
        clean: bool,

        /// Send the change-set even when nothing changed
        #[arg(long)]
        always_send: bool,

        /// Restore an existing change-set archive instead of the working copy
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Directory names to skip (glob syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Write the pending change-set to a file without sending it
    Dump {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Gzip the output
        #[arg(long)]
        gzip: bool,

        /// Repository path or registry URL the change-set is meant for
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Show what a check-in would send
    #[command(alias = "st")]
    Status,

    /// Mark files or directories as added
    Add {
        /// Paths to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Mark tracked files missing from disk as deleted
    MarkDeleted,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("regsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<SyncError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("cannot load configuration from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    match cli.command {
        Commands::Checkin {
            repository,
            target,
            user,
            strict,
            ignore_conflicts,
            clean,
            always_send,
            archive,
            ignore,
            progress,
        } => {
            let mut config = config;
            if let Some(user) = user {
                config.username = user;
            }
            config.silent_update &= !strict;
            config.ignore_conflicts |= ignore_conflicts;
            config.clean_registry |= clean;
            config.skip_if_unchanged &= !always_send;
            config.ignore_patterns.extend(ignore);
            cmd_checkin(root_path, repository, target, archive, config, progress)
        }
        Commands::Dump { output, gzip, target } => cmd_dump(root_path, output, gzip, target, config),
        Commands::Status => cmd_status(root_path, config),
        Commands::Add { paths } => cmd_add(root_path, paths, config),
        Commands::MarkDeleted => cmd_mark_deleted(root_path),
    }
}

/// Check the working copy in
///
/// Reconciles the working copy, sends the change-set to the repository and
/// updates the sidecars afterwards. When nothing changed the repository is
/// not contacted unless `--always-send` is given.
fn cmd_checkin(
    root_path: PathBuf,
    repository_root: PathBuf,
    target: Option<String>,
    archive: Option<PathBuf>,
    config: SyncConfig,
    show_progress: bool,
) -> anyhow::Result<()> {
    let mut builder = CheckInBuilder::new().config(config);
    if let Some(target) = target {
        builder = builder.target(target);
    }

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Reconciling working copy...");
        let spinner = pb.clone();
        builder = builder.callback(Arc::new(move |notice: ChangeNotice| {
            spinner.set_message(format!("{} {}", notice.kind, notice.repository_path));
        }));
        Some(pb)
    } else {
        None
    };

    let mut check_in = match archive {
        Some(archive) => builder.build_from_archive(archive, Some(root_path))?,
        None => builder.build(root_path)?,
    };

    println!(
        "{} {}",
        "Checking in to".blue().bold(),
        check_in.checkin_path().yellow()
    );

    let mut repository = DirectoryRepository::new(repository_root);
    let result = check_in.execute(&mut repository);

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = result?;

    print_report(&report, check_in.sent_count());
    Ok(())
}

/// Write the pending change-set to a file
///
/// Nothing is sent and the working copy is left untouched.
fn cmd_dump(
    root_path: PathBuf,
    output: PathBuf,
    gzip: bool,
    target: Option<String>,
    config: SyncConfig,
) -> anyhow::Result<()> {
    let mut builder = CheckInBuilder::new().config(config);
    if let Some(target) = target {
        builder = builder.target(target);
    }
    let check_in = builder.build(root_path)?;

    let file = File::create(&output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let summary = if gzip {
        let (summary, encoder) = check_in.stage(GzEncoder::new(file, Compression::default()))?;
        encoder.finish()?;
        summary
    } else {
        let (summary, writer) = check_in.stage(BufWriter::new(file))?;
        writer.into_inner().map_err(|e| e.into_error())?;
        summary
    };

    println!(
        "{} Wrote {} changes for {} to {}",
        "✓".green().bold(),
        summary.sent_count().to_string().yellow().bold(),
        check_in.checkin_path().cyan(),
        output.display().to_string().cyan()
    );
    print_warnings(&summary.warnings);
    Ok(())
}

/// Show what a check-in would send
fn cmd_status(root_path: PathBuf, config: SyncConfig) -> anyhow::Result<()> {
    let check_in = CheckInBuilder::new().config(config).build(&root_path)?;
    let (summary, _) = check_in.stage(std::io::sink())?;
    print_status(check_in.checkin_path(), &summary);
    Ok(())
}

fn print_status(checkin_path: &str, summary: &WalkSummary) {
    println!("{}", "Working copy status:".bold());
    println!("  Repository path: {}", checkin_path.cyan());

    let stats = &summary.stats;
    if !stats.has_changes() {
        println!("  {}", "Nothing to check in".green());
    } else {
        println!(
            "  Pending: {} added, {} updated, {} deleted ({})",
            stats.resources_added.to_string().green(),
            stats.resources_updated.to_string().yellow(),
            stats.resources_deleted.to_string().red(),
            format_bytes(stats.bytes_sent)
        );
        for path in &stats.changed_paths {
            println!("    {}", path);
        }
    }
    print_warnings(&summary.warnings);
}

/// Mark files or directories as added
fn cmd_add(root_path: PathBuf, paths: Vec<PathBuf>, config: SyncConfig) -> anyhow::Result<()> {
    let mut total = 0;
    for path in paths {
        let path = resolve(&root_path, path);
        let marked = working_copy::mark_added(&path, &config)?;
        for added in &marked {
            println!("  {} {}", "A".green().bold(), added.display());
        }
        total += marked.len();
    }
    println!("{} Marked {} node(s) as added", "✓".green().bold(), total);
    Ok(())
}

/// Mark tracked files missing from disk as deleted
fn cmd_mark_deleted(root_path: PathBuf) -> anyhow::Result<()> {
    let marked = working_copy::mark_missing_deleted(&root_path)?;
    for deleted in &marked {
        println!("  {} {}", "D".red().bold(), deleted.display());
    }
    println!("{} Marked {} resource(s) as deleted", "✓".green().bold(), marked.len());
    Ok(())
}

fn resolve(root_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root_path.join(path)
    }
}

fn print_report(report: &CheckInReport, sent_count: Option<usize>) {
    if !report.changed() {
        println!("{} Nothing to check in", "✓".green().bold());
    } else {
        println!("{} Check-in complete", "✓".green().bold());
        match sent_count {
            Some(count) => {
                println!("  Sent: {} changes", count.to_string().cyan());
                println!(
                    "  Added: {}, updated: {}, deleted: {}",
                    report.stats.resources_added.to_string().green(),
                    report.stats.resources_updated.to_string().yellow(),
                    report.stats.resources_deleted.to_string().red()
                );
                println!("  Content: {}", format_bytes(report.stats.bytes_sent).cyan());
            }
            None => println!("  Archive restored"),
        }
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms))
            .to_string()
            .cyan()
    );
    print_warnings(&report.warnings);
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("\n{}", "Warnings:".yellow().bold());
    for warning in warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }
}
