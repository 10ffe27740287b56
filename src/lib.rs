//! mothkit - a post-processing toolkit for acoustic-logger recordings
//!
//! mothkit transforms the 16-bit mono PCM WAV files written by a family
//! of battery-powered acoustic loggers: splitting long recordings,
//! downsampling, expanding trigger-compressed files, synchronising
//! GPS-disciplined recordings against their PPS event logs, and aligning
//! unsynchronised recordings to an independent GPS fix log.
//!
//! # Architecture
//!
//! mothkit is organized into several key modules:
//!
//! - `format`: RIFF/WAV/GUANO parsing, filename rules, comment grammar,
//!   and the CSV column reader
//! - `codec`: the trigger-compression sentinel decoder and segmenter
//! - `filter`: integer-ratio downsampling and the linear-interpolation
//!   playback kernel
//! - `ops`: the toolkit operations (split, downsample, expand, sync,
//!   align, summarise)
//! - `util`: byte I/O, timestamps, and progress reporting

pub mod codec;
pub mod error;
pub mod filter;
pub mod format;
pub mod ops;
pub mod util;

pub use error::{Error, Result};
pub use ops::{downsample, expand, split, sync, Aligner, ExpansionType, Summary};

/// mothkit version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the mothkit library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the mothkit library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }

    Ok(())
}
