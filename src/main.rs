use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Builder;
use interpatch::{inter_diff, mixed_mode_path};
use log::{Level, LevelFilter};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        // Using {:?} prints the full anyhow error chain.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let result = match &args.command {
        Command::Interdiff { old_diff, new_diff } => {
            let old = open(old_diff)?;
            let new = open(new_diff)?;
            inter_diff(old, new).with_context(|| {
                format!(
                    "computing interdiff of '{}' and '{}'",
                    old_diff.display(),
                    new_diff.display()
                )
            })?
        }
        Command::Mixed {
            old_source,
            old_diff,
            new_source,
            new_diff,
        } => {
            let old = open(old_diff)?;
            let new = open(new_diff)?;
            mixed_mode_path(old_source, new_source, old, new).with_context(|| {
                format!(
                    "computing diff of '{}' + '{}' against '{}' + '{}'",
                    old_source.display(),
                    old_diff.display(),
                    new_source.display(),
                    new_diff.display()
                )
            })?
        }
    };

    print!("{result}");
    io::stdout().flush()?;
    Ok(())
}

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compute the difference between two unified diffs, with or without the patched sources."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Increase logging verbosity. Can be used multiple times.
    /// -v for info, -vv for debug, -vvv for trace.
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace."
    )]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the difference between a source patched with old-diff and the
    /// same source patched with new-diff, from the diffs alone.
    Interdiff {
        /// Path to the old version of the diff.
        #[arg(long)]
        old_diff: PathBuf,
        /// Path to the new version of the diff.
        #[arg(long)]
        new_diff: PathBuf,
    },
    /// Compute the difference between old-source patched with old-diff and
    /// new-source patched with new-diff. The sources must be both files or
    /// both directories.
    Mixed {
        /// Path to the old source file or directory.
        #[arg(long)]
        old_source: PathBuf,
        /// Path to the diff applied to the old source.
        #[arg(long)]
        old_diff: PathBuf,
        /// Path to the new source file or directory.
        #[arg(long)]
        new_source: PathBuf,
        /// Path to the diff applied to the new source.
        #[arg(long)]
        new_diff: PathBuf,
    },
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open '{}'", path.display()))
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
