//! mothkit CLI
//!
//! Command-line front end for the recording toolkit. The library stays
//! free of terminal and filesystem-walk concerns; this binary owns the
//! progress meter and the directory traversal behind `summarise`.

use clap::{Parser, Subcommand};
use mothkit_lib::{init, Aligner, Config, ExpansionType, Summary};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "mothkit")]
#[command(about = "Post-processing toolkit for acoustic-logger recordings", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a recording into uniform-duration pieces
    Split {
        /// Input WAV file
        input: PathBuf,

        /// Output directory (defaults to the input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for output filenames
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Maximum duration of each piece in seconds
        #[arg(short = 'm', long, default_value_t = mothkit_lib::ops::DEFAULT_FILE_DURATION)]
        max_duration: u32,
    },

    /// Downsample a recording to a lower sample rate
    Downsample {
        /// Input WAV file
        input: PathBuf,

        /// Output directory (defaults to the input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for output filenames
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Requested sample rate in Hz
        #[arg(short, long)]
        rate: u32,
    },

    /// Expand a trigger-compressed recording
    Expand {
        /// Input WAV file
        input: PathBuf,

        /// Output directory (defaults to the input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for output filenames
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Cut by event rather than by uniform duration
        #[arg(long)]
        by_event: bool,

        /// Maximum duration of each output in seconds
        #[arg(short = 'm', long, default_value_t = mothkit_lib::ops::DEFAULT_FILE_DURATION)]
        max_duration: u32,

        /// Emit files for fully silent periods as well
        #[arg(long)]
        silent_files: bool,

        /// Align event files to whole-second boundaries
        #[arg(long)]
        align_events: bool,
    },

    /// Synchronise a recording against its PPS event CSV
    Sync {
        /// Input WAV file (the companion .CSV sits alongside)
        input: PathBuf,

        /// Output directory (defaults to the input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for output filenames
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Resample the output to this rate in Hz
        #[arg(short, long)]
        resample: Option<u32>,

        /// Repair anomalies and report them instead of failing
        #[arg(short, long)]
        auto_resolve: bool,
    },

    /// Align recordings against a GPS fix log
    Align {
        /// The GPS.TXT fix log
        gps: PathBuf,

        /// Input WAV files
        inputs: Vec<PathBuf>,

        /// Output directory (defaults to each input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for output filenames
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Reject recordings that follow the last fix
        #[arg(long)]
        only_between_fixes: bool,

        /// Directory for the GPS.CSV session report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Summarise every recording under a directory
    Summarise {
        /// Root directory to walk
        root: PathBuf,

        /// Directory for SUMMARY.CSV (defaults to the root)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init(Config {
        verbose: cli.verbose,
        debug: cli.debug,
    })?;

    match cli.command {
        Commands::Split {
            input,
            output,
            prefix,
            max_duration,
        } => {
            let mut meter = meter();
            let written = mothkit_lib::split(
                &input,
                output.as_deref(),
                &prefix,
                max_duration,
                Some(&mut meter),
            )?;
            finish_meter();
            for path in written {
                println!("{}", path.display());
            }
        }

        Commands::Downsample {
            input,
            output,
            prefix,
            rate,
        } => {
            let mut meter = meter();
            let path = mothkit_lib::downsample(
                &input,
                output.as_deref(),
                &prefix,
                rate,
                Some(&mut meter),
            )?;
            finish_meter();
            println!("{}", path.display());
        }

        Commands::Expand {
            input,
            output,
            prefix,
            by_event,
            max_duration,
            silent_files,
            align_events,
        } => {
            let expansion = if by_event {
                ExpansionType::Event
            } else {
                ExpansionType::Duration
            };

            let mut meter = meter();
            let written = mothkit_lib::expand(
                &input,
                output.as_deref(),
                &prefix,
                expansion,
                max_duration,
                silent_files,
                align_events,
                Some(&mut meter),
            )?;
            finish_meter();
            for path in written {
                println!("{}", path.display());
            }
        }

        Commands::Sync {
            input,
            output,
            prefix,
            resample,
            auto_resolve,
        } => {
            let mut meter = meter();
            let path = mothkit_lib::sync(
                &input,
                output.as_deref(),
                &prefix,
                resample,
                auto_resolve,
                Some(&mut meter),
            )?;
            finish_meter();
            println!("{}", path.display());
        }

        Commands::Align {
            gps,
            inputs,
            output,
            prefix,
            only_between_fixes,
            report,
        } => {
            let mut aligner = Aligner::initialise(&gps)?;
            info!(fixes = aligner.fix_count(), "GPS log loaded");

            for input in &inputs {
                let mut meter = meter();
                match aligner.align(
                    input,
                    output.as_deref(),
                    &prefix,
                    only_between_fixes,
                    Some(&mut meter),
                ) {
                    Ok(path) => {
                        finish_meter();
                        println!("{}", path.display());
                    }
                    Err(e) => {
                        finish_meter();
                        eprintln!("{}: {}", input.display(), e);
                    }
                }
            }

            let report_dir = report
                .or_else(|| gps.parent().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| PathBuf::from("."));
            let path = aligner.finalise(&report_dir)?;
            println!("{}", path.display());
        }

        Commands::Summarise { root, output } => {
            let mut files = Vec::new();
            collect_files(&root, &mut files)?;
            files.sort();

            let mut summary = Summary::new();
            summary.initialise();

            for file in &files {
                summary.add(&root, file, None)?;
            }

            let out_dir = output.unwrap_or_else(|| root.clone());
            summary.finalise(&out_dir)?;
            println!("{} rows -> {}", summary.len(), out_dir.join("SUMMARY.CSV").display());
        }
    }

    Ok(())
}

/// A terminal percent meter for the progress callback
fn meter() -> impl FnMut(u32) {
    |percent: u32| {
        print!("\r{:3}%", percent);
        std::io::stdout().flush().ok();
    }
}

fn finish_meter() {
    println!();
}

/// Recursive directory walk; the library takes a flat file enumeration
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }

    Ok(())
}
