//! Expand a trigger-compressed recording
//!
//! Silent runs encoded as sentinel blocks are reconstructed into a
//! conventional PCM timeline, which is then cut into duration-aligned
//! slices or per-event files.

use crate::codec::trigger::{self, Segment, SegmentType};
use crate::error::{Error, Result};
use crate::format::filename::{self, Operation};
use crate::format::wav::{Guano, WavHeader};
use crate::util::io::{self, copy_range, write_zeros};
use crate::util::progress::ProgressFn;
use crate::util::{Progress, SampleSink, SampleSource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Seconds in the one-day slice that is always emitted
const FULL_DAY_SECONDS: u64 = 86_400;

/// How the reconstructed timeline is cut into files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionType {
    /// Uniform slices of at most the maximum duration
    Duration,
    /// One file per audio event
    Event,
}

/// A planned output file over the reconstructed timeline
#[derive(Debug, Clone, Copy)]
struct OutputFile {
    timestamp: i64,
    offset: u64,
    length: u64,
    milliseconds: Option<u32>,
}

/// Expand `input` into files under `output`
pub fn expand(
    input: &Path,
    output: Option<&Path>,
    prefix: &str,
    expansion_type: ExpansionType,
    maximum_file_duration: u32,
    generate_silent_files: bool,
    align_to_second_transitions: bool,
    progress: Option<ProgressFn<'_>>,
) -> Result<Vec<PathBuf>> {
    if maximum_file_duration == 0 {
        return Err(Error::invalid_argument(
            "maximum file duration must be a positive number of seconds",
        ));
    }

    let file_size = io::file_size(input)?;
    let header = WavHeader::read_from_file(input)?;

    let input_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::filename("input path has no filename".to_string()))?;

    let parts = filename::validate(input_name, Operation::Expand, &header)?;

    let guano = Guano::read_from_file(
        input,
        header.size() as u64 + header.data_size() as u64,
        file_size,
    )?;

    let mut source = SampleSource::open(input)?;
    source.seek_to(header.size() as u64)?;

    let mut scan_progress = Progress::new(None, 0);
    let segments = trigger::scan(
        &mut source,
        header.size() as u64,
        header.data_size() as u64,
        &mut scan_progress,
    )?;

    let bytes_per_second = header.sample_rate() as u64 * 2;
    let plan = match expansion_type {
        ExpansionType::Duration => plan_duration(
            &segments,
            bytes_per_second,
            maximum_file_duration as u64,
            generate_silent_files,
            parts.timestamp,
        ),
        ExpansionType::Event => plan_event(
            &segments,
            bytes_per_second,
            maximum_file_duration as u64,
            align_to_second_transitions,
            parts.timestamp,
        ),
    };

    debug!(
        segments = segments.len(),
        files = plan.len(),
        "expansion plan ready"
    );

    let out_dir = super::split::resolve_output_dir(input, output)?;
    let total_bytes: u64 = plan.iter().map(|f| f.length).sum();
    let mut progress = Progress::new(progress, total_bytes.max(1));
    let mut written = Vec::with_capacity(plan.len());

    for file in &plan {
        let mut out_guano = guano.clone();
        if let Some(g) = out_guano.as_mut() {
            g.set_timestamp(file.timestamp);
        }

        if file.length > u32::MAX as u64 {
            return Err(Error::FileSizeExceedsLimit(format!(
                "{} byte expansion exceeds the RIFF limit",
                file.length
            )));
        }

        let mut out_header = header.clone();
        out_header.update_sizes(out_guano.as_ref(), file.length as u32)?;

        let out_path = out_dir.join(filename::output_filename(
            prefix,
            &parts.prefix,
            file.timestamp,
            file.milliseconds,
            "",
        ));

        let mut sink = SampleSink::create(&out_path)?;
        sink.write_all(out_header.as_bytes())?;

        write_view(
            &mut source,
            &mut sink,
            &segments,
            header.size() as u64,
            file.offset,
            file.length,
            &mut progress,
        )?;

        if let Some(g) = out_guano.as_ref() {
            g.write_to(&mut sink)?;
        }

        sink.flush()?;
        written.push(out_path);
    }

    progress.finish();
    Ok(written)
}

fn intersects_audio(segments: &[Segment], start: u64, end: u64) -> bool {
    segments.iter().any(|s| {
        s.segment_type == SegmentType::Audio
            && s.output_offset < end
            && start < s.output_offset + s.output_bytes
    })
}

fn plan_duration(
    segments: &[Segment],
    bytes_per_second: u64,
    duration: u64,
    generate_silent_files: bool,
    base_timestamp: i64,
) -> Vec<OutputFile> {
    let total = trigger::decompressed_size(segments);
    let slice_bytes = duration * bytes_per_second;
    let full_day_bytes = FULL_DAY_SECONDS * bytes_per_second;
    let mut plan = Vec::new();

    let mut index = 0u64;
    let mut offset = 0u64;
    while offset < total {
        let length = slice_bytes.min(total - offset);

        let keep = generate_silent_files
            || length == full_day_bytes
            || intersects_audio(segments, offset, offset + length);

        if keep {
            plan.push(OutputFile {
                timestamp: base_timestamp + (index * duration) as i64 * 1000,
                offset,
                length,
                milliseconds: None,
            });
        }

        index += 1;
        offset += length;
    }

    plan
}

fn plan_event(
    segments: &[Segment],
    bytes_per_second: u64,
    duration: u64,
    align_to_second_transitions: bool,
    base_timestamp: i64,
) -> Vec<OutputFile> {
    let slab_bytes = duration * bytes_per_second;
    let mut plan = Vec::new();

    let mut i = 0;
    while i < segments.len() {
        let seg = &segments[i];
        if seg.segment_type != SegmentType::Audio {
            i += 1;
            continue;
        }

        let mut start = seg.output_offset;
        let mut end = seg.output_offset + seg.output_bytes;
        let mut next = i + 1;

        if align_to_second_transitions {
            // Round down to the previous whole-sample second, then fold in
            // any later events that begin within that same second.
            start = start / bytes_per_second * bytes_per_second;
            let second_end = start + bytes_per_second;

            while next < segments.len() {
                let later = &segments[next];
                if later.segment_type == SegmentType::Audio {
                    if later.output_offset < second_end {
                        end = later.output_offset + later.output_bytes;
                    } else {
                        break;
                    }
                }
                next += 1;
            }
        }

        let mut slab = start;
        while slab < end {
            let length = slab_bytes.min(end - slab);
            let time_ms = (slab * 1000 / bytes_per_second) as i64;

            plan.push(OutputFile {
                timestamp: base_timestamp + time_ms,
                offset: slab,
                length,
                milliseconds: if align_to_second_transitions {
                    None
                } else {
                    Some((time_ms % 1000) as u32)
                },
            });

            slab += length;
        }

        i = next.max(i + 1);
    }

    plan
}

/// Stream one `(segments, offset, length)` view of the reconstructed
/// timeline into `sink`
fn write_view(
    source: &mut SampleSource,
    sink: &mut SampleSink,
    segments: &[Segment],
    header_size: u64,
    offset: u64,
    length: u64,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let end = offset + length;

    for seg in segments {
        let seg_start = seg.output_offset;
        let seg_end = seg.output_offset + seg.output_bytes;

        let overlap_start = seg_start.max(offset);
        let overlap_end = seg_end.min(end);
        if overlap_start >= overlap_end {
            continue;
        }

        let overlap = overlap_end - overlap_start;
        match seg.segment_type {
            SegmentType::Audio => {
                let input_pos = header_size + seg.input_offset + (overlap_start - seg_start);
                copy_range(source, input_pos, overlap, sink, progress)?;
            }
            SegmentType::Silent => {
                write_zeros(sink, overlap, progress)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(input_offset: u64, output_offset: u64, bytes: u64) -> Segment {
        Segment {
            segment_type: SegmentType::Audio,
            input_bytes: bytes,
            output_bytes: bytes,
            input_offset,
            output_offset,
        }
    }

    fn silent(input_offset: u64, output_offset: u64, output_bytes: u64) -> Segment {
        Segment {
            segment_type: SegmentType::Silent,
            input_bytes: 512,
            output_bytes,
            input_offset,
            output_offset,
        }
    }

    // sampleRate 48000 -> 96000 bytes per second
    const BPS: u64 = 96_000;

    #[test]
    fn test_duration_plan_skips_silent_slices() {
        // AUDIO(512) SILENT(7*512) AUDIO(1024) SILENT(2*512)
        let segments = vec![
            audio(0, 0, 512),
            silent(512, 512, 7 * 512),
            audio(1024, 512 + 7 * 512, 1024),
            silent(2048, 512 + 7 * 512 + 1024, 2 * 512),
        ];

        let plan = plan_duration(&segments, BPS, 1, false, 0);
        // the whole reconstructed timeline fits inside the first second
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].offset, 0);

        let total = trigger::decompressed_size(&segments);
        assert_eq!(plan[0].length, total);
    }

    #[test]
    fn test_duration_plan_emits_all_when_requested() {
        let segments = vec![audio(0, 0, 512), silent(512, 512, 4 * BPS)];
        let total = trigger::decompressed_size(&segments);

        let without = plan_duration(&segments, BPS, 1, false, 0);
        let with = plan_duration(&segments, BPS, 1, true, 0);

        assert_eq!(without.len(), 1);
        assert_eq!(with.len(), total.div_ceil(BPS) as usize);
    }

    #[test]
    fn test_duration_plan_timestamps_step_by_duration() {
        let segments = vec![audio(0, 0, 3 * BPS)];
        let plan = plan_duration(&segments, BPS, 1, false, 1_000_000);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].timestamp, 1_000_000);
        assert_eq!(plan[1].timestamp, 1_001_000);
        assert_eq!(plan[2].timestamp, 1_002_000);
    }

    #[test]
    fn test_event_plan_unaligned_millisecond_suffix() {
        // event begins 512 bytes in: 512 / 96000 s = 5.33 ms
        let segments = vec![silent(0, 0, 512), audio(512, 512, 1024)];
        let plan = plan_event(&segments, BPS, 1, false, 0);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].offset, 512);
        assert_eq!(plan[0].length, 1024);
        assert_eq!(plan[0].milliseconds, Some(5));
        assert_eq!(plan[0].timestamp, 5);
    }

    #[test]
    fn test_event_plan_aligned_coalesces_same_second() {
        // two events inside the first second
        let segments = vec![
            silent(0, 0, 512),
            audio(512, 512, 1024),
            silent(1536, 1536, 2048),
            audio(2048, 3584, 1024),
            silent(3072, 4608, 10 * BPS),
            audio(3584, 4608 + 10 * BPS, 512),
        ];

        let plan = plan_event(&segments, BPS, 1, true, 0);

        assert_eq!(plan.len(), 2);
        // first file starts at the second boundary and spans both events
        assert_eq!(plan[0].offset, 0);
        assert_eq!(plan[0].length, 3584 + 1024);
        assert_eq!(plan[0].milliseconds, None);
        // the far event is its own file, aligned to its own second
        let far_start = (4608 + 10 * BPS) / BPS * BPS;
        assert_eq!(plan[1].offset, far_start);
    }

    #[test]
    fn test_event_plan_splits_long_event_into_slabs() {
        let segments = vec![audio(0, 0, 5 * BPS)];
        let plan = plan_event(&segments, BPS, 2, false, 0);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].length, 2 * BPS);
        assert_eq!(plan[1].length, 2 * BPS);
        assert_eq!(plan[2].length, BPS);
        assert_eq!(plan[2].timestamp, 4_000);
    }
}
