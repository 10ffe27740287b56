//! Align recordings against an independent GPS fix log
//!
//! Unsynchronised recordings are bracketed between committed GPS fixes;
//! clock error and sample rate are interpolated linearly in time (or
//! extrapolated past the last fix), the leading samples are dropped or
//! padded to cancel the clock error, and the file is played out through
//! the interpolation kernel at the drift-corrected rate. The session ends
//! with a `GPS.CSV` report interleaving fixes and aligned recordings.

pub mod log;

use crate::error::{Error, Result};
use crate::filter::Interpolator;
use crate::format::comment;
use crate::format::filename::{self, Operation};
use crate::format::wav::{Guano, WavHeader};
use crate::util::io;
use crate::util::progress::ProgressFn;
use crate::util::time;
use crate::util::{Progress, SampleSink, SampleSource};
use self::log::{Fix, GpsLog, TIME_OFFSET_MULTIPLIER};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Largest relative divergence from the median rate a fix may show before
/// the median is used instead
const MAX_DIVERGENCE: f64 = 400.0 / 48e6;

/// Largest difference between the derived rate and the header rate, mHz
const MAX_RATE_DIFFERENCE_MHZ: f64 = 100_000.0;

/// Multiplicative correction applied to the instantaneous input rate
const RATE_CORRECTION: f64 = 1.0 - 2.0 / 48e6;

/// How the sample-rate endpoints were chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCalculation {
    Interpolation,
    Median,
}

impl RateCalculation {
    fn as_str(&self) -> &'static str {
        match self {
            RateCalculation::Interpolation => "INTERPOLATION",
            RateCalculation::Median => "MEDIAN",
        }
    }
}

/// One aligned recording in the session report
#[derive(Debug, Clone)]
struct RecordingEntry {
    timestamp: i64,
    timezone_minutes: i32,
    filename: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    duration_seconds: f64,
    temperature: Option<f64>,
    battery: Option<String>,
    time_offset: i64,
    sample_rate_start_mhz: i64,
    sample_rate_end_mhz: i64,
    calculation: RateCalculation,
}

/// The chosen correction for one recording
#[derive(Debug, Clone, Copy)]
struct Correction {
    time_offset: i64,
    rate_start_mhz: f64,
    rate_end_mhz: f64,
    calculation: RateCalculation,
}

/// Session state between `initialise` and `finalise`
#[derive(Debug)]
pub struct Aligner {
    gps: GpsLog,
    recordings: Vec<RecordingEntry>,
}

impl Aligner {
    /// Parse the GPS log and open an alignment session
    pub fn initialise(gps_txt: &Path) -> Result<Self> {
        let gps = log::parse(gps_txt)?;
        Ok(Aligner {
            gps,
            recordings: Vec::new(),
        })
    }

    /// Committed fixes available to this session
    pub fn fix_count(&self) -> usize {
        self.gps.fixes.len()
    }

    /// Align one recording and append it to the session report
    pub fn align(
        &mut self,
        input: &Path,
        output: Option<&Path>,
        prefix: &str,
        only_between_fixes: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PathBuf> {
        let file_size = io::file_size(input)?;
        let header = WavHeader::read_from_file(input)?;

        let input_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::filename("input path has no filename".to_string()))?;

        let parts = filename::validate(input_name, Operation::Sync, &header)?;

        let fields = comment::parse(header.comment());
        let utc = parts.timestamp - fields.timezone_minutes as i64 * 60_000;

        let duration_seconds = header.num_samples() as f64 / header.sample_rate() as f64;
        let correction = self.plan_correction(utc, duration_seconds, only_between_fixes)?;

        let header_mhz = header.sample_rate() as f64 * 1000.0;
        if (correction.rate_start_mhz - header_mhz).abs() > MAX_RATE_DIFFERENCE_MHZ
            || (correction.rate_end_mhz - header_mhz).abs() > MAX_RATE_DIFFERENCE_MHZ
        {
            return Err(Error::SampleRateMismatch(format!(
                "derived rate {:.0} mHz disagrees with the header rate {:.0} mHz",
                correction.rate_start_mhz, header_mhz
            )));
        }

        let guano = Guano::read_from_file(
            input,
            header.size() as u64 + header.data_size() as u64,
            file_size,
        )?;

        // Leading samples cancelled against the clock error
        let leading = ((correction.time_offset as f64 / TIME_OFFSET_MULTIPLIER as f64 / 1000.0)
            * (correction.rate_start_mhz / 1000.0))
            .abs()
            .round() as u64;

        let total_input = header.num_samples();
        let (dropped, padded) = if correction.time_offset >= 0 {
            (leading.min(total_input), 0)
        } else {
            (0, leading)
        };

        let output_count = total_input - dropped + padded;

        let mut out_header = header.clone();
        out_header.update_sizes(guano.as_ref(), (output_count * 2) as u32)?;

        let out_dir = super::split::resolve_output_dir(input, output)?;
        let out_path = out_dir.join(filename::output_filename(
            prefix,
            &parts.prefix,
            parts.timestamp,
            None,
            "_SYNC",
        ));

        info!(
            file = input_name,
            time_offset = correction.time_offset,
            dropped,
            padded,
            calculation = correction.calculation.as_str(),
            "aligning"
        );

        let mut source = SampleSource::open(input)?;
        source.seek_to(header.size() as u64 + dropped * 2)?;

        let mut sink = SampleSink::create(&out_path)?;
        sink.write_all(out_header.as_bytes())?;

        let mut progress = Progress::new(progress, output_count.max(1));

        play_corrected(
            &mut source,
            &mut sink,
            total_input - dropped,
            padded,
            output_count,
            header.sample_rate(),
            correction.rate_start_mhz,
            correction.rate_end_mhz,
            &mut progress,
        )?;

        if let Some(g) = guano.as_ref() {
            g.write_to(&mut sink)?;
        }

        sink.flush()?;
        progress.finish();

        let (latitude, longitude) = guano
            .as_ref()
            .and_then(|g| g.field("Loc Position"))
            .map(|position| {
                let mut split = position.split_whitespace();
                let lat = split.next().and_then(|p| p.parse().ok());
                let lon = split.next().and_then(|p| p.parse().ok());
                (lat, lon)
            })
            .unwrap_or((None, None));

        self.recordings.push(RecordingEntry {
            timestamp: utc,
            timezone_minutes: fields.timezone_minutes,
            filename: input_name.to_string(),
            latitude,
            longitude,
            duration_seconds,
            temperature: fields.temperature,
            battery: fields.battery.as_ref().map(|b| format!("{:.1}", b.volts())),
            time_offset: correction.time_offset,
            sample_rate_start_mhz: correction.rate_start_mhz.round() as i64,
            sample_rate_end_mhz: correction.rate_end_mhz.round() as i64,
            calculation: correction.calculation,
        });

        Ok(out_path)
    }

    fn plan_correction(
        &self,
        utc: i64,
        duration_seconds: f64,
        only_between_fixes: bool,
    ) -> Result<Correction> {
        let fixes = &self.gps.fixes;
        let median = self.gps.median_sample_rate_mhz;

        let (first, last) = match (fixes.first(), fixes.last()) {
            (Some(first), Some(last)) if fixes.len() >= 2 => (first, last),
            _ => {
                return Err(Error::InsufficientFixes(
                    "alignment requires at least two committed fixes".to_string(),
                ))
            }
        };

        if utc < first.timestamp {
            return Err(Error::RecordingOutsideFixes(format!(
                "recording at {} precedes the first fix",
                time::format_csv_time(utc)
            )));
        }

        if utc > last.timestamp {
            if only_between_fixes {
                return Err(Error::RecordingOutsideFixes(format!(
                    "recording at {} follows the last fix",
                    time::format_csv_time(utc)
                )));
            }

            // Extrapolate the clock drift from the last two fixes
            let previous = &fixes[fixes.len() - 2];
            let drift_per_ms = (last.time_offset - previous.time_offset) as f64
                / (last.timestamp - previous.timestamp) as f64;
            let time_offset =
                (last.time_offset as f64 + drift_per_ms * (utc - last.timestamp) as f64).round()
                    as i64;

            let divergent = relative_divergence(last.sample_rate_mhz, median) > MAX_DIVERGENCE;
            let (rate, calculation) = if divergent {
                (median as f64, RateCalculation::Median)
            } else {
                (last.sample_rate_mhz as f64, RateCalculation::Interpolation)
            };

            return Ok(Correction {
                time_offset,
                rate_start_mhz: rate,
                rate_end_mhz: rate,
                calculation,
            });
        }

        if let Some(exact) = fixes.iter().find(|f| f.timestamp == utc) {
            return Err(Error::invalid_argument(format!(
                "recording coincides exactly with the fix at {}",
                time::format_csv_time(exact.timestamp)
            )));
        }

        // utc is strictly inside the span, so a later fix always exists
        let after = fixes
            .iter()
            .position(|f| f.timestamp > utc)
            .unwrap_or(fixes.len() - 1)
            .max(1);
        let a = &fixes[after - 1];
        let b = &fixes[after];

        let span = (b.timestamp - a.timestamp) as f64;
        let progress = (utc - a.timestamp) as f64 / span;
        let time_offset = (a.time_offset as f64
            + progress * (b.time_offset - a.time_offset) as f64)
            .round() as i64;

        let rate_at = |at_ms: i64| -> f64 {
            let p = (at_ms - a.timestamp) as f64 / span;
            a.sample_rate_mhz as f64 + p * (b.sample_rate_mhz - a.sample_rate_mhz) as f64
        };

        let end_ms = utc + (duration_seconds * 1000.0).round() as i64;
        let mut rate_start = rate_at(utc);
        let mut rate_end = rate_at(end_ms);
        let mut calculation = RateCalculation::Interpolation;

        let divergent = relative_divergence(a.sample_rate_mhz, median) > MAX_DIVERGENCE
            || relative_divergence(b.sample_rate_mhz, median) > MAX_DIVERGENCE;
        if divergent {
            rate_start = median as f64;
            rate_end = median as f64;
            calculation = RateCalculation::Median;
        }

        Ok(Correction {
            time_offset,
            rate_start_mhz: rate_start,
            rate_end_mhz: rate_end,
            calculation,
        })
    }

    /// Sort the session's recordings, interleave them with the fixes, and
    /// write `GPS.CSV`
    pub fn finalise(&mut self, output: &Path) -> Result<PathBuf> {
        self.recordings.sort_by_key(|r| r.timestamp);

        let path = output.join("GPS.CSV");
        let mut file = std::fs::File::create(&path)
            .map_err(|e| Error::write(format!("Failed to create {}: {}", path.display(), e)))?;

        writeln!(
            file,
            "TIME,EVENT,LATITUDE,LONGITUDE,TIME_OFFSET,SAMPLE_RATE,FILE_NAME,TIMEZONE,\
             DURATION,TEMPERATURE,BATTERY_VOLTAGE,SAMPLE_RATE_START,SAMPLE_RATE_END,\
             SAMPLE_RATE_CALCULATION"
        )
        .map_err(|e| Error::write(format!("Failed to write header: {}", e)))?;

        let mut fix_index = 0usize;
        let mut rec_index = 0usize;
        let fixes = &self.gps.fixes;

        loop {
            let line = match (fixes.get(fix_index), self.recordings.get(rec_index)) {
                (Some(f), Some(r)) if f.timestamp <= r.timestamp => {
                    fix_index += 1;
                    fix_row(f)
                }
                (Some(f), None) => {
                    fix_index += 1;
                    fix_row(f)
                }
                (_, Some(r)) => {
                    rec_index += 1;
                    recording_row(r)
                }
                (None, None) => break,
            };

            writeln!(file, "{}", line)
                .map_err(|e| Error::write(format!("Failed to write row: {}", e)))?;
        }

        debug!(
            fixes = fixes.len(),
            recordings = self.recordings.len(),
            "session report written"
        );

        Ok(path)
    }
}

fn relative_divergence(rate_mhz: i64, median_mhz: i64) -> f64 {
    ((rate_mhz - median_mhz) as f64 / median_mhz as f64).abs()
}

fn fix_row(f: &Fix) -> String {
    format!(
        "{},GPS_FIX,{},{},{},{},,,,,,,,",
        time::format_csv_time(f.timestamp),
        f.latitude,
        f.longitude,
        f.time_offset,
        f.sample_rate_mhz,
    )
}

fn recording_row(r: &RecordingEntry) -> String {
    fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
        v.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }

    format!(
        "{},RECORDING,{},{},{},,{},{},{:.3},{},{},{},{},{}",
        time::format_csv_time(r.timestamp),
        opt(&r.latitude),
        opt(&r.longitude),
        r.time_offset,
        r.filename,
        r.timezone_minutes,
        r.duration_seconds,
        r.temperature.map(|t| format!("{:.1}", t)).unwrap_or_default(),
        opt(&r.battery),
        r.sample_rate_start_mhz,
        r.sample_rate_end_mhz,
        r.calculation.as_str(),
    )
}

/// Play the recording out at the drift-corrected instantaneous rate
#[allow(clippy::too_many_arguments)]
fn play_corrected(
    source: &mut SampleSource,
    sink: &mut SampleSink,
    available_input: u64,
    padded: u64,
    output_count: u64,
    sample_rate: u32,
    rate_start_mhz: f64,
    rate_end_mhz: f64,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let target = sample_rate as f64;
    let total_effective = (available_input + padded).max(1);

    let mut interp = Interpolator::new(1.0 / target);
    let mut in_offset = 0.0f64;
    let mut fed: u64 = 0;

    for j in 0..output_count {
        let current = j as f64 / target;

        while current > interp.next_offset() || fed == 0 {
            let sample = if fed < padded {
                0
            } else if fed - padded < available_input {
                source.read_sample()?
            } else {
                0
            };

            interp.push(sample, in_offset);

            let fraction = fed as f64 / total_effective as f64;
            let rate_mhz = rate_start_mhz + fraction * (rate_end_mhz - rate_start_mhz);
            let rate_hz = rate_mhz / 1000.0 * RATE_CORRECTION;
            in_offset += 1.0 / rate_hz;
            fed += 1;
        }

        sink.write_sample(interp.sample_at(current))?;
        progress.advance(1);
    }

    debug!(fed, output_count, "corrected playback complete");
    Ok(())
}
