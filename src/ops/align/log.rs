//! GPS log parsing
//!
//! The GPS-disciplined firmware appends one line per event to `GPS.TXT`:
//!
//! ```text
//! 01/06/2024 12:00:00.000 UTC: Received GPS fix - 51.5074,-0.1278
//! 01/06/2024 12:00:01.000 UTC: Time was set
//! 01/06/2024 12:00:01.000 UTC: Actual sample rate will be 47999.500 Hz
//! ```
//!
//! A fix is committed only when a GPS-fix line, the following second's
//! time outcome (`Time was set` / `Time was updated by Nms fast|slow`),
//! and the sample-rate line all reconcile. `Time was not updated`
//! abandons the pending fix.

use crate::error::{Error, Result};
use crate::util::time;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Clock corrections are carried in tenths of a millisecond
pub const TIME_OFFSET_MULTIPLIER: i64 = 10;

/// A line's seconds must follow the fix line within this window, ms
const MAX_RECONCILE_WINDOW_MS: i64 = 2_000;

const DATE_TIME: &str = r"^(\d{2})/(\d{2})/(\d{4}) (\d{2}):(\d{2}):(\d{2})\.(\d{3}) UTC: ";

fn fix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"{}Received GPS fix - (-?\d+\.\d+),(-?\d+\.\d+)\.?$",
            DATE_TIME
        ))
        .unwrap()
    })
}

fn time_set_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"{}Time was set\.?$", DATE_TIME)).unwrap())
}

fn time_updated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"{}Time was updated by (\d+(?:\.\d+)?)ms (fast|slow)\.?$",
            DATE_TIME
        ))
        .unwrap()
    })
}

fn time_not_updated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"{}Time was not updated\.?$", DATE_TIME)).unwrap())
}

fn sample_rate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"{}Actual sample rate will be (\d+)\.(\d{{1,3}}) Hz\.?$",
            DATE_TIME
        ))
        .unwrap()
    })
}

fn line_timestamp(caps: &regex::Captures<'_>) -> Option<i64> {
    time::from_log_fields(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
        caps[4].parse().ok()?,
        caps[5].parse().ok()?,
        caps[6].parse().ok()?,
        caps[7].parse().ok()?,
    )
}

/// One committed GPS fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Event time, UTC epoch milliseconds
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Device clock error at the fix, tenths of a millisecond; positive
    /// when the clock ran fast
    pub time_offset: i64,
    /// Measured sample rate, millihertz
    pub sample_rate_mhz: i64,
}

/// The parsed GPS session log
#[derive(Debug, Clone)]
pub struct GpsLog {
    pub fixes: Vec<Fix>,
    /// Upper median of the committed fixes' sample rates, millihertz
    pub median_sample_rate_mhz: i64,
}

#[derive(Debug)]
enum Pending {
    Idle,
    HaveFix {
        timestamp: i64,
        latitude: f64,
        longitude: f64,
    },
    HaveOffset {
        timestamp: i64,
        latitude: f64,
        longitude: f64,
        time_offset: i64,
        offset_timestamp: i64,
    },
}

/// Parse `GPS.TXT` and commit reconciled fixes
pub fn parse(path: &Path) -> Result<GpsLog> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::TimeSourceInvalid(format!("Failed to open {}: {}", path.display(), e)))?;
    let reader = std::io::BufReader::new(file);

    let mut fixes: Vec<Fix> = Vec::new();
    let mut pending = Pending::Idle;
    let mut recognised = 0usize;

    for line in reader.lines() {
        let line =
            line.map_err(|e| Error::TimeSourceInvalid(format!("Failed to read GPS log: {}", e)))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = fix_regex().captures(line) {
            recognised += 1;
            let timestamp = match line_timestamp(&caps) {
                Some(ts) => ts,
                None => continue,
            };
            pending = Pending::HaveFix {
                timestamp,
                latitude: caps[8].parse().unwrap_or(0.0),
                longitude: caps[9].parse().unwrap_or(0.0),
            };
            continue;
        }

        if let Some(caps) = time_set_regex().captures(line) {
            recognised += 1;
            pending = advance_with_offset(pending, &caps, 0.0);
            continue;
        }

        if let Some(caps) = time_updated_regex().captures(line) {
            recognised += 1;
            let magnitude: f64 = caps[8].parse().unwrap_or(0.0);
            let signed = if &caps[9] == "fast" { magnitude } else { -magnitude };
            pending = advance_with_offset(pending, &caps, signed);
            continue;
        }

        if time_not_updated_regex().is_match(line) {
            recognised += 1;
            pending = Pending::Idle;
            continue;
        }

        if let Some(caps) = sample_rate_regex().captures(line) {
            recognised += 1;

            if let Pending::HaveOffset {
                timestamp,
                latitude,
                longitude,
                time_offset,
                offset_timestamp,
            } = pending
            {
                let line_ts = line_timestamp(&caps);
                let reconciles = line_ts
                    .map(|ts| ts - offset_timestamp >= 0 && ts - offset_timestamp <= MAX_RECONCILE_WINDOW_MS)
                    .unwrap_or(false);

                if reconciles {
                    let hz: i64 = caps[8].parse().unwrap_or(0);
                    let frac = &caps[9];
                    let mhz_frac: i64 = format!("{:0<3}", frac).parse().unwrap_or(0);

                    fixes.push(Fix {
                        timestamp,
                        latitude,
                        longitude,
                        time_offset,
                        sample_rate_mhz: hz * 1000 + mhz_frac,
                    });
                }
            }

            pending = Pending::Idle;
            continue;
        }
    }

    if recognised == 0 {
        return Err(Error::TimeSourceInvalid(format!(
            "{} contains no recognisable GPS events",
            path.display()
        )));
    }

    if fixes.len() < 2 {
        return Err(Error::InsufficientFixes(format!(
            "{} committed fixes, at least 2 required",
            fixes.len()
        )));
    }

    let mut rates: Vec<i64> = fixes.iter().map(|f| f.sample_rate_mhz).collect();
    rates.sort_unstable();
    let median_sample_rate_mhz = rates[rates.len() / 2];

    debug!(
        fixes = fixes.len(),
        median_sample_rate_mhz, "GPS log parsed"
    );

    Ok(GpsLog {
        fixes,
        median_sample_rate_mhz,
    })
}

fn advance_with_offset(pending: Pending, caps: &regex::Captures<'_>, offset_ms: f64) -> Pending {
    if let Pending::HaveFix {
        timestamp,
        latitude,
        longitude,
    } = pending
    {
        if let Some(line_ts) = line_timestamp(caps) {
            let delta = line_ts - timestamp;
            if (0..=MAX_RECONCILE_WINDOW_MS).contains(&delta) {
                // Half-unit rounding into tenths of a millisecond
                let tenths = (offset_ms * TIME_OFFSET_MULTIPLIER as f64).round() as i64;
                return Pending::HaveOffset {
                    timestamp,
                    latitude,
                    longitude,
                    time_offset: tenths,
                    offset_timestamp: line_ts,
                };
            }
        }
    }

    Pending::Idle
}
