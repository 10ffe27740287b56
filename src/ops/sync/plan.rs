//! GPS synchronisation planning
//!
//! Reconciles the per-second PPS event log against the recording's sample
//! counter, repairs the event patterns that arise when a sample straddles
//! a PPS edge, and produces the per-interval sample rates the playback
//! engine consumes.

use crate::error::{Error, PpsAnomalyKind, Result};
use crate::format::csv::{self, ColumnSpec};
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

/// Worst-case low-frequency crystal error, parts per million
const LFXO_PPM: f64 = 100.0;

/// Worst-case high-frequency crystal error on the first interval, ppm
const HFXO_PPM_ABSOLUTE: f64 = 100.0;

/// Worst-case interval-to-interval drift thereafter, ppm
const HFXO_PPM_RELATIVE: f64 = 40.0;

/// Buffer backlog that indicates samples were dropped
const MAX_BUFFER_LAG: u64 = 8;

/// Largest gap (µs) a straddling sample can sit past a PPS edge
const MAX_PPS_OFFSET_US: f64 = 100.0;

/// Largest tolerated difference between the filename timestamp and the
/// first logged event, milliseconds
const MAX_START_DIFFERENCE_MS: i64 = 500;

/// The highest rate at which straddle repairs beyond the simple pattern
/// are attempted
const MAX_REPAIR_RATE: u32 = 192_000;

/// One reconciled PPS interval
#[derive(Debug, Clone)]
pub struct Interval {
    /// Index of the PPS event opening the interval
    pub start_pps: usize,
    /// Index of the PPS event closing the interval
    pub end_pps: usize,
    /// Whole seconds spanned; at least one, more when events were missed
    pub time_interval: u64,
    /// Seconds from the first event to this interval's end
    pub cumulative_time: u64,
    /// Samples counted inside the interval
    pub number_of_samples: i64,
    /// Gap from the opening edge to the first sample, µs
    pub first_sample_gap: f64,
    /// Gap from the last sample to the closing edge, µs
    pub last_sample_gap: f64,
    /// Fractional sample rate over the interval, Hz
    pub sample_rate: f64,
}

impl Interval {
    fn recompute_rate(&mut self) {
        self.sample_rate = compute_rate(
            self.number_of_samples,
            self.time_interval,
            self.first_sample_gap,
            self.last_sample_gap,
        );
    }
}

fn compute_rate(samples: i64, seconds: u64, first_gap: f64, last_gap: f64) -> f64 {
    (samples - 1) as f64 * 1e6 / (seconds as f64 * 1e6 - first_gap - last_gap)
}

/// The reconciled plan the engine streams against
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub intervals: Vec<Interval>,
    /// Running average of the interval rates, Hz
    pub average_rate: f64,
    /// An extra input sample precedes interval 0 after alignment
    pub first_sample_before_first_interval: bool,
    /// Offset of that sample relative to interval 0's start, µs (negative)
    pub lead_in_offset_us: f64,
    /// Human-readable anomaly notes for the auto-resolve report
    pub notes: Vec<String>,
}

/// ADC oversampling factor for a nominal rate
pub fn over_sample_rate(sample_rate: u32) -> u32 {
    let mut ratio = 384_000 / sample_rate;
    let mut osr = 1;
    while ratio >= 2 {
        ratio /= 2;
        osr *= 2;
    }
    osr
}

/// ADC clock ticks from trigger to a completed sample
pub fn clock_ticks_to_complete_sample(sample_rate: u32) -> u32 {
    2 + 4 * (2 + over_sample_rate(sample_rate) * (16 + 12))
}

/// Convert a logged timer count to microseconds until the next sample
fn time_to_next_sample_us(timer_count: u64, sample_rate: u32) -> f64 {
    let ticks = clock_ticks_to_complete_sample(sample_rate) as f64;
    timer_count as f64 * 1e6 / (sample_rate as f64 * ticks)
}

/// Build the synchronisation plan from the companion CSV
pub fn build(
    csv_path: &Path,
    file_timestamp_ms: i64,
    nominal_rate: u32,
    auto_resolve: bool,
) -> Result<SyncPlan> {
    let file = std::fs::File::open(csv_path)
        .map_err(|e| Error::read(format!("Failed to open {}: {}", csv_path.display(), e)))?;

    let specs = [
        ColumnSpec {
            name: "PPS_NUMBER",
            parser: csv::parse_u64,
        },
        ColumnSpec {
            name: "AUDIOMOTH_TIME",
            parser: csv::parse_time,
        },
        ColumnSpec {
            name: "TOTAL_SAMPLES",
            parser: csv::parse_u64,
        },
        ColumnSpec {
            name: "TIMER_COUNT",
            parser: csv::parse_u64,
        },
        ColumnSpec {
            name: "BUFFERS_FILLED",
            parser: csv::parse_u64,
        },
        ColumnSpec {
            name: "BUFFERS_WRITTEN",
            parser: csv::parse_u64,
        },
    ];

    let columns = csv::read_columns(BufReader::new(file), &specs)?;

    let times: Vec<i64> = columns[1].iter().map(|c| c.as_i64()).collect();
    let totals: Vec<i64> = columns[2].iter().map(|c| c.as_i64()).collect();
    let timers: Vec<u64> = columns[3].iter().map(|c| c.as_u64()).collect();
    let filled: Vec<u64> = columns[4].iter().map(|c| c.as_u64()).collect();
    let written: Vec<u64> = columns[5].iter().map(|c| c.as_u64()).collect();

    let rows = times.len();
    if rows < 2 {
        return Err(Error::InsufficientEvents(format!(
            "{} PPS events logged, at least 2 required",
            rows
        )));
    }

    for i in 0..rows {
        if filled[i].saturating_sub(written[i]) >= MAX_BUFFER_LAG {
            return Err(Error::invalid_argument(format!(
                "buffer overflow at PPS event {}: {} buffers filled, {} written",
                i, filled[i], written[i]
            )));
        }
    }

    if (file_timestamp_ms - times[0]).abs() > MAX_START_DIFFERENCE_MS {
        return Err(Error::metadata(format!(
            "recording timestamp differs from first PPS event by {} ms",
            (file_timestamp_ms - times[0]).abs()
        )));
    }

    let ttns: Vec<f64> = timers
        .iter()
        .map(|&t| time_to_next_sample_us(t, nominal_rate))
        .collect();

    let sample_interval_us = 1e6 / nominal_rate as f64;
    let mut notes = Vec::new();

    // Walk consecutive rows, skipping those the crystal tolerances reject
    let mut intervals: Vec<Interval> = Vec::new();
    let mut cumulative_time = 0u64;
    let mut rate_sum = 0.0f64;
    let mut previous = 0usize;

    for j in 1..rows {
        let delta_ms = times[j] - times[previous];
        let delta_t = ((delta_ms as f64) / 1000.0).round() as i64;
        let delta_samples = totals[j] - totals[previous];

        let target_rate = if intervals.is_empty() {
            nominal_rate as f64
        } else {
            rate_sum / intervals.len() as f64
        };

        let tolerance_ppm = if intervals.is_empty() {
            HFXO_PPM_ABSOLUTE
        } else {
            HFXO_PPM_RELATIVE
        };

        let time_bound = (LFXO_PPM * 1e-6 * delta_t as f64 * 1000.0).ceil();
        let sample_bound = (tolerance_ppm * 1e-6 * target_rate * delta_t as f64).ceil();

        let time_ok = delta_t >= 1 && (delta_ms as f64 - delta_t as f64 * 1000.0).abs() <= time_bound;
        let samples_ok =
            (delta_samples as f64 - delta_t as f64 * target_rate).abs() <= sample_bound;

        if !time_ok || !samples_ok {
            if !auto_resolve {
                return Err(Error::pps(
                    PpsAnomalyKind::Misaligned,
                    format!("PPS event {} fails the crystal tolerance checks", j),
                ));
            }
            warn!(event = j, "skipping misaligned PPS event");
            notes.push(format!("Skipped misaligned PPS event {}.", j));
            continue;
        }

        if delta_t > 1 {
            if !auto_resolve {
                return Err(Error::pps(
                    PpsAnomalyKind::Missed,
                    format!("{} PPS events missing before event {}", delta_t - 1, j),
                ));
            }
            warn!(event = j, seconds = delta_t, "interval spans missed PPS events");
            notes.push(format!(
                "Interval before event {} spans {} seconds.",
                j, delta_t
            ));
        }

        cumulative_time += delta_t as u64;

        let first_sample_gap = ttns[previous];
        let last_sample_gap = (sample_interval_us - ttns[j]).max(0.0);

        let mut interval = Interval {
            start_pps: previous,
            end_pps: j,
            time_interval: delta_t as u64,
            cumulative_time,
            number_of_samples: delta_samples,
            first_sample_gap,
            last_sample_gap,
            sample_rate: 0.0,
        };
        interval.recompute_rate();

        rate_sum += interval.sample_rate;
        intervals.push(interval);
        previous = j;
    }

    if intervals.is_empty() {
        return Err(Error::InsufficientEvents(
            "no usable PPS intervals survived reconciliation".to_string(),
        ));
    }

    let average_rate = rate_sum / intervals.len() as f64;
    let mut plan = SyncPlan {
        intervals,
        average_rate,
        first_sample_before_first_interval: false,
        lead_in_offset_us: 0.0,
        notes,
    };

    fix_pps_events(&mut plan, nominal_rate, sample_interval_us);
    align_samples(&mut plan);

    plan.average_rate = plan.intervals.iter().map(|i| i.sample_rate).sum::<f64>()
        / plan.intervals.len() as f64;

    // Any interval still off by a whole sample per second is unusual
    let unusual: Vec<usize> = plan
        .intervals
        .iter()
        .enumerate()
        .filter(|(_, i)| (i.sample_rate - plan.average_rate).round() != 0.0)
        .map(|(k, _)| k)
        .collect();

    if !unusual.is_empty() {
        if !auto_resolve {
            return Err(Error::pps(
                PpsAnomalyKind::UnusualRate,
                format!("{} intervals have unusual sample rates", unusual.len()),
            ));
        }

        for k in unusual {
            let interval = &plan.intervals[k];
            plan.notes.push(format!(
                "Interval {} (PPS {} to {}) has unusual sample rate {:.3} Hz against average {:.3} Hz.",
                k, interval.start_pps, interval.end_pps, interval.sample_rate, plan.average_rate
            ));
        }
    }

    debug!(
        intervals = plan.intervals.len(),
        average_rate = plan.average_rate,
        "sync plan ready"
    );

    Ok(plan)
}

/// Repair the event patterns caused by a sample straddling a PPS edge
fn fix_pps_events(plan: &mut SyncPlan, nominal_rate: u32, sample_interval_us: f64) {
    let average = plan.average_rate;

    // A sample logged just before the edge that belongs to the next
    // interval shows up as a (-1, +1) rate pair.
    for k in 0..plan.intervals.len().saturating_sub(1) {
        let low = (plan.intervals[k].sample_rate - average).round() == -1.0;
        let high = (plan.intervals[k + 1].sample_rate - average).round() == 1.0;

        if plan.intervals[k].last_sample_gap < MAX_PPS_OFFSET_US && low && high {
            plan.intervals[k].number_of_samples -= 1;
            plan.intervals[k].last_sample_gap = sample_interval_us;
            plan.intervals[k + 1].number_of_samples += 1;
            plan.intervals[k + 1].first_sample_gap = 0.0;
            plan.intervals[k].recompute_rate();
            plan.intervals[k + 1].recompute_rate();
            debug!(interval = k, "moved straddling sample to the next interval");
        }
    }

    if nominal_rate != MAX_REPAIR_RATE {
        return;
    }

    // At the maximum rate the straddling sample can also be dropped by the
    // logger entirely, showing up as a (-1, 0) pair.
    for k in 0..plan.intervals.len().saturating_sub(1) {
        let low = (plan.intervals[k].sample_rate - average).round() == -1.0;
        let flat = (plan.intervals[k + 1].sample_rate - average).round() == 0.0;

        if plan.intervals[k].last_sample_gap < MAX_PPS_OFFSET_US && low && flat {
            plan.intervals[k].number_of_samples -= 1;
            plan.intervals[k].last_sample_gap = sample_interval_us;
            plan.intervals[k + 1].number_of_samples += 1;
            plan.intervals[k + 1].first_sample_gap = 0.0;
            plan.intervals[k].recompute_rate();
            plan.intervals[k + 1].recompute_rate();
            debug!(interval = k, "recovered dropped straddling sample");
        }
    }

    // First-interval overshoot: a gap longer than one sample period is a
    // timer artefact, not a real gap.
    if plan.intervals[0].first_sample_gap > sample_interval_us {
        plan.intervals[0].first_sample_gap -= sample_interval_us;
        plan.intervals[0].recompute_rate();
        debug!("corrected first interval overshoot");
    }

    // Add back samples the logger provably missed.
    for k in 0..plan.intervals.len() {
        if (plan.intervals[k].sample_rate - average).round() == -1.0 {
            plan.intervals[k].number_of_samples += 1;
            plan.intervals[k].recompute_rate();
            debug!(interval = k, "added back a missing sample");
        }
    }
}

/// Shift each interval's boundaries so sample timestamps refer to the
/// midpoint of the acquisition window rather than its end
///
/// The window is taken per interval from its own timer-derived timing:
/// the interval's first sample completes its conversion `first_sample_gap`
/// µs after the opening edge, having started acquisition one measured
/// sample period earlier. The shift is the distance from the window's
/// end back to `(last_acquisition_ends + first_acquisition_starts) / 2`.
fn align_samples(plan: &mut SyncPlan) {
    for k in 0..plan.intervals.len() {
        let interval = &plan.intervals[k];

        let measured_period_us = 1e6 / interval.sample_rate;
        let last_acquisition_ends = interval.first_sample_gap;
        let first_acquisition_starts = interval.first_sample_gap - measured_period_us;
        let midpoint = (last_acquisition_ends + first_acquisition_starts) / 2.0;
        let shift = last_acquisition_ends - midpoint;

        plan.intervals[k].first_sample_gap -= shift;
        plan.intervals[k].last_sample_gap += shift;

        if plan.intervals[k].first_sample_gap < 0.0 {
            // The first sample now precedes the interval; hand it to the
            // previous interval, or flag it on interval 0.
            let overhang = -plan.intervals[k].first_sample_gap;
            let interval_us = 1e6 / plan.intervals[k].sample_rate;

            plan.intervals[k].first_sample_gap += interval_us;
            plan.intervals[k].number_of_samples -= 1;

            if k == 0 {
                plan.first_sample_before_first_interval = true;
                plan.lead_in_offset_us = -overhang;
            } else {
                plan.intervals[k - 1].number_of_samples += 1;
                plan.intervals[k - 1].last_sample_gap = overhang;
                plan.intervals[k - 1].recompute_rate();
            }
        }

        plan.intervals[k].recompute_rate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time;
    use std::io::Write;

    fn write_csv(dir: &Path, rows: &[(u64, i64, i64, u64)]) -> std::path::PathBuf {
        let path = dir.join("input.CSV");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "PPS_NUMBER,AUDIOMOTH_TIME,TOTAL_SAMPLES,TIMER_COUNT,BUFFERS_FILLED,BUFFERS_WRITTEN"
        )
        .unwrap();
        for (pps, ms, samples, timer) in rows {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                pps,
                time::format_csv_time(*ms),
                samples,
                timer,
                pps + 2,
                pps + 2
            )
            .unwrap();
        }
        path
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("mothkit_sync_plan_{}", tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const START_MS: i64 = 1_672_531_200_000;

    #[test]
    fn test_oversample_rates() {
        assert_eq!(over_sample_rate(384_000), 1);
        assert_eq!(over_sample_rate(192_000), 2);
        assert_eq!(over_sample_rate(48_000), 8);
        assert_eq!(over_sample_rate(8_000), 32);
    }

    #[test]
    fn test_clock_ticks() {
        // osr 8 at 48 kHz: 2 + 4 * (2 + 8 * 28) = 914
        assert_eq!(clock_ticks_to_complete_sample(48_000), 914);
        // osr 1 at 384 kHz: 2 + 4 * 30 = 122
        assert_eq!(clock_ticks_to_complete_sample(384_000), 122);
    }

    #[test]
    fn test_clean_plan() {
        let dir = temp_dir("clean");
        let rows: Vec<(u64, i64, i64, u64)> = (0..5)
            .map(|i| (i as u64, START_MS + i * 1000, i * 48_000, 457))
            .collect();
        let path = write_csv(&dir, &rows);

        let plan = build(&path, START_MS, 48_000, false).unwrap();
        assert_eq!(plan.intervals.len(), 4);
        assert!((plan.average_rate - 48_000.0).abs() < 1.0);
        assert_eq!(plan.intervals[3].cumulative_time, 4);
        assert!(plan.notes.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    fn bare_interval(samples: i64, first_gap: f64, last_gap: f64, rate: f64) -> Interval {
        Interval {
            start_pps: 0,
            end_pps: 1,
            time_interval: 1,
            cumulative_time: 1,
            number_of_samples: samples,
            first_sample_gap: first_gap,
            last_sample_gap: last_gap,
            sample_rate: rate,
        }
    }

    #[test]
    fn test_align_samples_shift_follows_each_interval() {
        // two intervals with different measured rates get different
        // boundary shifts, half of each interval's own period
        let mut plan = SyncPlan {
            intervals: vec![
                bare_interval(48_000, 15.0, 15.0, 48_000.0),
                bare_interval(50_000, 15.0, 15.0, 50_000.0),
            ],
            average_rate: 49_000.0,
            first_sample_before_first_interval: false,
            lead_in_offset_us: 0.0,
            notes: Vec::new(),
        };

        align_samples(&mut plan);

        let first_shift = 15.0 - plan.intervals[0].first_sample_gap;
        let second_shift = 15.0 - plan.intervals[1].first_sample_gap;

        assert!((first_shift - 1e6 / 48_000.0 / 2.0).abs() < 1e-6);
        assert!((second_shift - 1e6 / 50_000.0 / 2.0).abs() < 1e-6);
        assert!(first_shift > second_shift);

        // the closing gap widens by the same per-interval amount
        assert!((plan.intervals[0].last_sample_gap - (15.0 + first_shift)).abs() < 1e-6);
        assert!((plan.intervals[1].last_sample_gap - (15.0 + second_shift)).abs() < 1e-6);
    }

    #[test]
    fn test_align_samples_transfers_leading_sample() {
        // a first gap smaller than the shift pushes the first sample in
        // front of interval 0
        let mut plan = SyncPlan {
            intervals: vec![bare_interval(48_000, 5.0, 15.0, 48_000.0)],
            average_rate: 48_000.0,
            first_sample_before_first_interval: false,
            lead_in_offset_us: 0.0,
            notes: Vec::new(),
        };

        align_samples(&mut plan);

        assert!(plan.first_sample_before_first_interval);
        assert!(plan.lead_in_offset_us < 0.0);
        assert_eq!(plan.intervals[0].number_of_samples, 47_999);
        assert!(plan.intervals[0].first_sample_gap > 0.0);
    }

    #[test]
    fn test_single_row_rejected() {
        let dir = temp_dir("single");
        let path = write_csv(&dir, &[(0, START_MS, 0, 457)]);
        assert!(matches!(
            build(&path, START_MS, 48_000, false),
            Err(Error::InsufficientEvents(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_start_time_mismatch_rejected() {
        let dir = temp_dir("start");
        let rows: Vec<(u64, i64, i64, u64)> = (0..3)
            .map(|i| (i as u64, START_MS + i * 1000, i * 48_000, 457))
            .collect();
        let path = write_csv(&dir, &rows);
        assert!(build(&path, START_MS + 600, 48_000, false).is_err());
        assert!(build(&path, START_MS + 400, 48_000, false).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unusual_rate_detected() {
        let dir = temp_dir("unusual");
        // third interval runs two samples long
        let mut total = 0i64;
        let mut rows = vec![(0u64, START_MS, 0i64, 457u64)];
        for i in 1..5 {
            total += if i == 3 { 48_002 } else { 48_000 };
            rows.push((i as u64, START_MS + i as i64 * 1000, total, 457));
        }
        let path = write_csv(&dir, &rows);

        let result = build(&path, START_MS, 48_000, false);
        assert!(matches!(
            result,
            Err(Error::PpsAnomaly {
                kind: PpsAnomalyKind::UnusualRate,
                ..
            })
        ));

        let plan = build(&path, START_MS, 48_000, true).unwrap();
        assert!(!plan.notes.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missed_pps_flagged() {
        let dir = temp_dir("missed");
        let rows = vec![
            (0u64, START_MS, 0i64, 457u64),
            (1, START_MS + 1000, 48_000, 457),
            // event 2 was never logged
            (3, START_MS + 3000, 144_000, 457),
            (4, START_MS + 4000, 192_000, 457),
        ];
        let path = write_csv(&dir, &rows);

        assert!(matches!(
            build(&path, START_MS, 48_000, false),
            Err(Error::PpsAnomaly {
                kind: PpsAnomalyKind::Missed,
                ..
            })
        ));

        let plan = build(&path, START_MS, 48_000, true).unwrap();
        assert_eq!(plan.intervals.len(), 3);
        assert_eq!(plan.intervals[1].time_interval, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_misaligned_row_skipped() {
        let dir = temp_dir("misaligned");
        let rows = vec![
            (0u64, START_MS, 0i64, 457u64),
            (1, START_MS + 1000, 48_000, 457),
            // sample counter jumps far beyond tolerance
            (2, START_MS + 2000, 99_000, 457),
            (3, START_MS + 3000, 144_000, 457),
        ];
        let path = write_csv(&dir, &rows);

        assert!(matches!(
            build(&path, START_MS, 48_000, false),
            Err(Error::PpsAnomaly {
                kind: PpsAnomalyKind::Misaligned,
                ..
            })
        ));

        let plan = build(&path, START_MS, 48_000, true).unwrap();
        // the bad row is dropped; events 1 and 3 pair across two seconds
        assert_eq!(plan.intervals.len(), 2);
        assert_eq!(plan.intervals[1].time_interval, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_buffer_overflow_rejected() {
        let dir = temp_dir("overflow");
        let path = dir.join("input.CSV");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "PPS_NUMBER,AUDIOMOTH_TIME,TOTAL_SAMPLES,TIMER_COUNT,BUFFERS_FILLED,BUFFERS_WRITTEN"
        )
        .unwrap();
        writeln!(file, "0,{},0,457,10,1", time::format_csv_time(START_MS)).unwrap();
        writeln!(
            file,
            "1,{},48000,457,11,2",
            time::format_csv_time(START_MS + 1000)
        )
        .unwrap();

        assert!(matches!(
            build(&path, START_MS, 48_000, false),
            Err(Error::InvalidArgument(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
