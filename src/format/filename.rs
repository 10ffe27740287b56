//! Recording filename validation
//!
//! Each operation accepts a restricted filename shape built around the
//! compact timestring `YYYYMMDD_HHMMSS`. The timestring and any device-ID
//! prefix are cross-checked against the WAV comment and artist so that a
//! renamed or mismatched file is rejected before any bytes move.

use crate::error::{Error, Result};
use crate::format::comment;
use crate::format::wav::WavHeader;
use crate::util::time;
use regex::Regex;
use std::sync::OnceLock;

/// Device tag prefixed to the IART artist string
const ARTIST_TAG: &str = "AudioMoth ";

/// Operations with distinct filename grammars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Split,
    Downsample,
    Expand,
    Sync,
}

fn split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d{8}_\d{6})(_SYNC)?(?i:\.wav)$").unwrap())
}

fn expand_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d{8}_\d{6}|\d{6})(T)?(?i:\.wav)$").unwrap())
}

fn sync_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d{8}_\d{6})(?i:\.wav)$").unwrap())
}

fn regex_for(op: Operation) -> &'static Regex {
    match op {
        Operation::Split | Operation::Downsample => split_regex(),
        Operation::Expand => expand_regex(),
        Operation::Sync => sync_regex(),
    }
}

/// Validated filename fields
#[derive(Debug, Clone)]
pub struct FilenameParts {
    /// Device-ID or other text preceding the timestring
    pub prefix: String,
    /// The matched timestring
    pub timestring: String,
    /// Postfix carried to outputs (`_SYNC`) or the trigger marker (`T`)
    pub postfix: String,
    /// Recording start, UTC epoch milliseconds
    pub timestamp: i64,
}

/// Validate `filename` for `op` against the parsed header
pub fn validate(filename: &str, op: Operation, header: &WavHeader) -> Result<FilenameParts> {
    let caps = regex_for(op)
        .captures(filename)
        .ok_or_else(|| Error::filename(format!("{} does not match the expected shape", filename)))?;

    let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
    let timestring = caps[2].to_string();
    let postfix = caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string();

    let legacy = timestring.len() == 6;

    // Prefix must reproduce the artist device ID for Expand and Sync
    if matches!(op, Operation::Expand | Operation::Sync) && !prefix.is_empty() {
        let device = header
            .artist()
            .strip_prefix(ARTIST_TAG)
            .unwrap_or(header.artist());

        if device.is_empty() || prefix != format!("{}_", device) {
            return Err(Error::metadata(format!(
                "filename prefix {:?} does not match artist {:?}",
                prefix,
                header.artist()
            )));
        }
    }

    let timestamp = match op {
        Operation::Downsample => {
            time::parse_compact(&timestring)
                .ok_or_else(|| Error::filename(format!("invalid timestring {}", timestring)))?
        }
        Operation::Split | Operation::Expand | Operation::Sync => {
            let recorded = comment::recorded_at(header.comment()).ok_or_else(|| {
                Error::metadata("comment does not carry a recording time".to_string())
            })?;

            if legacy {
                // Legacy names carry only the time of day; the date comes
                // from the comment.
                let expected = &recorded[0..8];
                let named = format!(
                    "{}:{}:{}",
                    &timestring[0..2],
                    &timestring[2..4],
                    &timestring[4..6]
                );
                if named != expected {
                    return Err(Error::metadata(format!(
                        "filename time {} does not match comment time {}",
                        named, expected
                    )));
                }
                time::parse_comment(&recorded)
                    .ok_or_else(|| Error::metadata("unparseable comment time".to_string()))?
            } else {
                let ms = time::parse_compact(&timestring)
                    .ok_or_else(|| Error::filename(format!("invalid timestring {}", timestring)))?;
                if time::format_comment(ms) != recorded {
                    return Err(Error::metadata(format!(
                        "filename timestamp {} does not match comment time {}",
                        timestring, recorded
                    )));
                }
                ms
            }
        }
    };

    Ok(FilenameParts {
        prefix,
        timestring,
        postfix,
        timestamp,
    })
}

/// Build an output filename:
/// `[prefix_][existing_prefix]YYYYMMDD_HHMMSS[_mmm][postfix].WAV`
pub fn output_filename(
    prefix: &str,
    existing_prefix: &str,
    timestamp_ms: i64,
    milliseconds: Option<u32>,
    postfix: &str,
) -> String {
    let mut name = String::new();

    if !prefix.is_empty() {
        name.push_str(prefix);
        if !prefix.ends_with('_') {
            name.push('_');
        }
    }

    name.push_str(existing_prefix);
    name.push_str(&time::format_compact(timestamp_ms));

    if let Some(ms) = milliseconds {
        name.push_str(&format!("_{:03}", ms));
    }

    name.push_str(postfix);
    name.push_str(".WAV");
    name
}
