//! Synchronise a recording against its PPS event log
//!
//! The planner reconciles the companion CSV into per-interval sample
//! rates; the engine plays the recording back against the corrected
//! clock, interpolating every output sample onto the uniform grid of the
//! target rate.

pub mod plan;

use crate::error::{Error, Result};
use crate::filter::resample;
use crate::filter::Interpolator;
use crate::format::filename::{self, Operation};
use crate::format::wav::{Guano, WavHeader};
use crate::util::io;
use crate::util::progress::ProgressFn;
use crate::util::{Progress, SampleSink, SampleSource};
use plan::{Interval, SyncPlan};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Offset of the next input sample relative to the current output
/// interval's start, seconds
fn input_next_offset(
    intervals: &[Interval],
    index: usize,
    within: i64,
    base: f64,
    virtual_gap_us: f64,
    last_rate: f64,
) -> f64 {
    if index < intervals.len() {
        let interval = &intervals[index];
        base + interval.first_sample_gap / 1e6 + within as f64 / interval.sample_rate
    } else {
        base + virtual_gap_us / 1e6 + within as f64 / last_rate
    }
}

/// Synchronise `input` against its companion `.CSV`
///
/// With `resample_rate` set the output is additionally resampled to that
/// rate, which must be at least the recording's own. Returns the output
/// path.
pub fn sync(
    input: &Path,
    output: Option<&Path>,
    prefix: &str,
    resample_rate: Option<u32>,
    auto_resolve: bool,
    progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf> {
    let file_size = io::file_size(input)?;
    let header = WavHeader::read_from_file(input)?;

    let input_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::filename("input path has no filename".to_string()))?;

    let parts = filename::validate(input_name, Operation::Sync, &header)?;

    let csv_path = input.with_extension("CSV");
    let sync_plan = plan::build(&csv_path, parts.timestamp, header.sample_rate(), auto_resolve)?;

    let nominal_rate = header.sample_rate();
    let target_rate = match resample_rate {
        Some(rate) if rate != nominal_rate => {
            if rate < nominal_rate {
                return Err(Error::invalid_argument(format!(
                    "resample rate {} Hz is below the recording rate {} Hz",
                    rate, nominal_rate
                )));
            }
            rate
        }
        _ => nominal_rate,
    };

    let total_input = header.num_samples();
    let samples_to_write = if target_rate != nominal_rate {
        resample::output_samples(total_input, nominal_rate, target_rate)
    } else {
        total_input
    };

    let guano = Guano::read_from_file(
        input,
        header.size() as u64 + header.data_size() as u64,
        file_size,
    )?;

    if samples_to_write * 2 > u32::MAX as u64 {
        return Err(Error::FileSizeExceedsLimit(format!(
            "{} output samples exceed the RIFF limit",
            samples_to_write
        )));
    }

    let mut out_header = header.clone();
    if target_rate != nominal_rate {
        out_header.update_sample_rate(target_rate);
    }
    out_header.update_sizes(guano.as_ref(), (samples_to_write * 2) as u32)?;

    let out_dir = super::split::resolve_output_dir(input, output)?;
    let out_path = out_dir.join(filename::output_filename(
        prefix,
        &parts.prefix,
        parts.timestamp,
        None,
        "_SYNC",
    ));

    if auto_resolve && !sync_plan.notes.is_empty() {
        write_report(&out_path, &sync_plan)?;
    }

    info!(
        intervals = sync_plan.intervals.len(),
        target_rate, samples_to_write, "synchronising"
    );

    let mut source = SampleSource::open(input)?;
    source.seek_to(header.size() as u64)?;

    let mut sink = SampleSink::create(&out_path)?;
    sink.write_all(out_header.as_bytes())?;

    let mut progress = Progress::new(progress, samples_to_write.max(1));

    run_engine(
        &mut source,
        &mut sink,
        &sync_plan,
        total_input,
        samples_to_write,
        target_rate,
        &mut progress,
    )?;

    if let Some(g) = guano.as_ref() {
        g.write_to(&mut sink)?;
    }

    sink.flush()?;
    progress.finish();

    Ok(out_path)
}

fn run_engine(
    source: &mut SampleSource,
    sink: &mut SampleSink,
    sync_plan: &SyncPlan,
    total_input: u64,
    samples_to_write: u64,
    target_rate: u32,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let intervals = &sync_plan.intervals;
    let target = target_rate as f64;

    let last = intervals
        .last()
        .ok_or_else(|| Error::InsufficientEvents("empty synchronisation plan".to_string()))?;
    let last_rate = last.sample_rate;
    let virtual_gap_us = 1e6 / last_rate - last.last_sample_gap;

    let mut interp = Interpolator::new(1.0 / target);
    let mut consumed: u64 = 0;

    // Input cursor over the interval sequence
    let mut in_idx = 0usize;
    let mut in_within: i64 = 0;
    let mut in_base = 0.0f64;

    if sync_plan.first_sample_before_first_interval {
        let sample = if consumed < total_input {
            source.read_sample()?
        } else {
            0
        };
        consumed += 1;
        interp.push(sample, sync_plan.lead_in_offset_us / 1e6);
    }

    let mut written: u64 = 0;

    'playback: for m in 0..=intervals.len() {
        let out_count = if m < intervals.len() {
            intervals[m].time_interval * target_rate as u64
        } else {
            // Virtual interval extending at the last measured rate
            samples_to_write - written
        };

        for j in 0..out_count {
            if written == samples_to_write {
                break 'playback;
            }

            let current = j as f64 / target;

            while current
                > input_next_offset(intervals, in_idx, in_within, in_base, virtual_gap_us, last_rate)
            {
                let offset = input_next_offset(
                    intervals,
                    in_idx,
                    in_within,
                    in_base,
                    virtual_gap_us,
                    last_rate,
                );

                let sample = if consumed < total_input {
                    source.read_sample()?
                } else {
                    0
                };
                consumed += 1;
                interp.push(sample, offset);

                in_within += 1;
                if in_idx < intervals.len() && in_within >= intervals[in_idx].number_of_samples {
                    in_base += intervals[in_idx].time_interval as f64;
                    in_idx += 1;
                    in_within = 0;
                }
            }

            sink.write_sample(interp.sample_at(current))?;
            written += 1;
            progress.advance(1);
        }

        if m < intervals.len() {
            let seconds = intervals[m].time_interval as f64;
            interp.rebase(seconds);
            in_base -= seconds;
        }
    }

    debug!(written, consumed, "playback complete");
    Ok(())
}

fn write_report(out_path: &Path, sync_plan: &SyncPlan) -> Result<()> {
    let report_path = out_path.with_extension("TXT");
    let mut file = std::fs::File::create(&report_path)
        .map_err(|e| Error::write(format!("Failed to create {}: {}", report_path.display(), e)))?;

    for note in &sync_plan.notes {
        writeln!(file, "{}", note)
            .map_err(|e| Error::write(format!("Failed to write report: {}", e)))?;
    }

    Ok(())
}
