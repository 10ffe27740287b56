//! Trigger-compression decoding and segmentation
//!
//! Amplitude-triggered recordings replace silent runs with 512-byte
//! sentinel blocks. The first 32 samples of a sentinel encode a 32-bit
//! count, one bit per sample: `+1` sets the bit, `-1` clears it. Every
//! remaining sample must be zero, otherwise the block is ordinary audio.
//! The count is the number of 512-byte silent blocks the sentinel stands
//! for in the reconstructed timeline.

use crate::error::Result;
use crate::util::{Progress, SampleSource};

/// Compressed block size in bytes
pub const BLOCK_SIZE: u64 = 512;

/// Samples in one compressed block
const SAMPLES_PER_BLOCK: usize = BLOCK_SIZE as usize / 2;

/// Bits in the encoded silent-run count
const COUNT_BITS: usize = 32;

/// Decode a 512-byte block as a silent-run sentinel
///
/// Returns the number of silent blocks it stands for, or `None` when the
/// block is ordinary audio.
pub fn decode_silent_count(block: &[u8]) -> Option<u32> {
    if block.len() != BLOCK_SIZE as usize {
        return None;
    }

    let mut count: u32 = 0;

    for i in 0..SAMPLES_PER_BLOCK {
        let sample = i16::from_le_bytes([block[2 * i], block[2 * i + 1]]);

        if i < COUNT_BITS {
            match sample {
                1 => count |= 1 << i,
                -1 => {}
                _ => return None,
            }
        } else if sample != 0 {
            return None;
        }
    }

    Some(count)
}

/// Encode a silent-run sentinel block (test fixtures and round-trips)
pub fn encode_silent_count(count: u32) -> [u8; BLOCK_SIZE as usize] {
    let mut block = [0u8; BLOCK_SIZE as usize];

    for i in 0..COUNT_BITS {
        let sample: i16 = if count & (1 << i) != 0 { 1 } else { -1 };
        block[2 * i..2 * i + 2].copy_from_slice(&sample.to_le_bytes());
    }

    block
}

/// Timeline segment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Audio,
    Silent,
}

/// A maximal run of same-type blocks in the compressed stream
///
/// `input_*` fields address the compressed payload; `output_*` fields
/// address the reconstructed timeline. Adjacent same-type segments are
/// merged during the scan, so segments are always maximal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub segment_type: SegmentType,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub input_offset: u64,
    pub output_offset: u64,
}

fn push_segment(segments: &mut Vec<Segment>, segment_type: SegmentType, input: u64, output: u64) {
    if let Some(last) = segments.last_mut() {
        if last.segment_type == segment_type {
            last.input_bytes += input;
            last.output_bytes += output;
            return;
        }
    }

    let (input_offset, output_offset) = segments
        .last()
        .map(|s| (s.input_offset + s.input_bytes, s.output_offset + s.output_bytes))
        .unwrap_or((0, 0));

    segments.push(Segment {
        segment_type,
        input_bytes: input,
        output_bytes: output,
        input_offset,
        output_offset,
    });
}

/// Walk the compressed payload and build the segment map
///
/// `source` must be positioned at the start of the data payload. The
/// first window is shortened so that every later read starts on a
/// 512-byte boundary relative to `header_size`; short leading or trailing
/// windows are classified silent only when all-zero.
pub fn scan(
    source: &mut SampleSource,
    header_size: u64,
    data_size: u64,
    progress: &mut Progress<'_>,
) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut buf = [0u8; BLOCK_SIZE as usize];

    let remainder = header_size % BLOCK_SIZE;
    let mut window = if remainder == 0 {
        BLOCK_SIZE
    } else {
        BLOCK_SIZE - remainder
    };

    let mut pos = 0;

    while pos < data_size {
        let len = window.min(data_size - pos) as usize;
        source.read_exact(&mut buf[..len])?;

        if len as u64 == BLOCK_SIZE {
            match decode_silent_count(&buf) {
                Some(count) => push_segment(
                    &mut segments,
                    SegmentType::Silent,
                    BLOCK_SIZE,
                    count as u64 * BLOCK_SIZE,
                ),
                None => push_segment(&mut segments, SegmentType::Audio, BLOCK_SIZE, BLOCK_SIZE),
            }
        } else {
            // Short leading or trailing window: never a sentinel
            let segment_type = if buf[..len].iter().all(|&b| b == 0) {
                SegmentType::Silent
            } else {
                SegmentType::Audio
            };
            push_segment(&mut segments, segment_type, len as u64, len as u64);
        }

        progress.advance(len as u64);
        pos += len as u64;
        window = BLOCK_SIZE;
    }

    Ok(segments)
}

/// Total reconstructed timeline length in bytes
pub fn decompressed_size(segments: &[Segment]) -> u64 {
    segments.iter().map(|s| s.output_bytes).sum()
}
