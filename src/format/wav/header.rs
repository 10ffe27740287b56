//! WAV header parsing and rewriting
//!
//! The header is parsed once per operation and retained as raw bytes so
//! that outputs reproduce it verbatim outside the fields an operation
//! explicitly updates (sizes, sample rate, comment text).

use super::{
    ChunkHeader, DATA_CHUNK, FMT_CHUNK, IART_CHUNK, ICMT_CHUNK, INFO_MAGIC, LIST_CHUNK,
    RIFF_MAGIC, WAVE_MAGIC,
};
use crate::error::{Error, Result};
use crate::util::io::{self, HEADER_BUFFER_SIZE, MAX_FILE_SIZE};
use std::io::Read;
use std::path::Path;

/// Offset of the RIFF outer size field
const RIFF_SIZE_OFFSET: usize = 4;

/// PCM format tag
const FORMAT_PCM: u16 = 1;

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Byte range of a textual INFO subchunk payload within the raw header
#[derive(Debug, Clone, Copy)]
struct TextRange {
    offset: usize,
    capacity: usize,
}

/// Parsed WAV header with raw bytes retained for verbatim rewrite
#[derive(Debug, Clone)]
pub struct WavHeader {
    raw: Vec<u8>,
    sample_rate: u32,
    data_size: u32,
    comment: String,
    artist: String,
    comment_range: Option<TextRange>,
    artist_range: Option<TextRange>,
    sample_rate_offset: usize,
    byte_rate_offset: usize,
    data_size_offset: usize,
}

impl WavHeader {
    /// Parse a header from the opening bytes of a file
    ///
    /// `bytes` must cover the whole header (everything up to the `data`
    /// payload); `file_size` bounds the declared data size. Extra
    /// unrecognised chunks before `data` are tolerated and preserved.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self> {
        if bytes.len() < 12 || &bytes[0..4] != RIFF_MAGIC {
            return Err(Error::header("missing or malformed RIFF chunk"));
        }

        if &bytes[8..12] != WAVE_MAGIC {
            return Err(Error::header("not a WAVE file"));
        }

        let mut pos = 12;
        let mut fmt: Option<(usize, usize, u32)> = None;
        let mut comment_range = None;
        let mut artist_range = None;
        let mut data: Option<(usize, u32)> = None;

        while data.is_none() {
            let chunk = ChunkHeader::from_bytes(&bytes[pos.min(bytes.len())..])
                .ok_or_else(|| Error::header("data chunk not found"))?;
            let payload = pos + 8;

            if &chunk.id == DATA_CHUNK {
                data = Some((pos + 4, chunk.size));
                break;
            }

            if payload + chunk.size as usize > bytes.len() {
                return Err(Error::header("chunk extends past end of header buffer"));
            }

            if &chunk.id == FMT_CHUNK {
                if chunk.size < 16 {
                    return Err(Error::header("fmt chunk too small"));
                }

                let format_tag = read_u16(bytes, payload);
                if format_tag != FORMAT_PCM {
                    return Err(Error::header(format!(
                        "unsupported format tag {} (PCM required)",
                        format_tag
                    )));
                }

                let channels = read_u16(bytes, payload + 2);
                if channels != 1 {
                    return Err(Error::header(format!(
                        "unsupported channel count {} (mono required)",
                        channels
                    )));
                }

                let bits_per_sample = read_u16(bytes, payload + 14);
                if bits_per_sample != 16 {
                    return Err(Error::header(format!(
                        "unsupported bit depth {} (16-bit required)",
                        bits_per_sample
                    )));
                }

                let sample_rate = read_u32(bytes, payload + 4);
                fmt = Some((payload + 4, payload + 8, sample_rate));
            } else if &chunk.id == LIST_CHUNK && chunk.size >= 4 && &bytes[payload..payload + 4] == INFO_MAGIC {
                let list_end = payload + chunk.size as usize;
                let mut sub_pos = payload + 4;

                while sub_pos + 8 <= list_end {
                    let sub = ChunkHeader::from_bytes(&bytes[sub_pos..])
                        .ok_or_else(|| Error::header("malformed LIST subchunk"))?;
                    let sub_payload = sub_pos + 8;

                    if sub_payload + sub.size as usize > list_end {
                        return Err(Error::header("LIST subchunk extends past its parent"));
                    }

                    let range = TextRange {
                        offset: sub_payload,
                        capacity: sub.size as usize,
                    };

                    if &sub.id == ICMT_CHUNK {
                        comment_range = Some(range);
                    } else if &sub.id == IART_CHUNK {
                        artist_range = Some(range);
                    }

                    sub_pos = sub_payload + sub.size as usize + (sub.size as usize & 1);
                }
            }

            pos = payload + chunk.size as usize + (chunk.size as usize & 1);
        }

        let (sample_rate_offset, byte_rate_offset, sample_rate) =
            fmt.ok_or_else(|| Error::header("fmt chunk not found"))?;

        let (data_size_offset, data_size) =
            data.ok_or_else(|| Error::header("data chunk not found"))?;

        let header_size = data_size_offset + 4;

        if data_size as u64 > file_size.saturating_sub(header_size as u64) {
            return Err(Error::header(format!(
                "data chunk size {} exceeds file size {}",
                data_size, file_size
            )));
        }

        let comment = comment_range
            .map(|r| extract_text(bytes, r))
            .unwrap_or_default();
        let artist = artist_range
            .map(|r| extract_text(bytes, r))
            .unwrap_or_default();

        Ok(WavHeader {
            raw: bytes[..header_size].to_vec(),
            sample_rate,
            data_size,
            comment,
            artist,
            comment_range,
            artist_range,
            sample_rate_offset,
            byte_rate_offset,
            data_size_offset,
        })
    }

    /// Read and parse the header of a WAV file on disk
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let file_size = io::file_size(path)?;

        let mut file = std::fs::File::open(path)
            .map_err(|e| Error::read(format!("Failed to open {}: {}", path.display(), e)))?;

        let want = (file_size as usize).min(HEADER_BUFFER_SIZE);
        let mut bytes = vec![0u8; want];
        let mut filled = 0;

        while filled < want {
            let n = file
                .read(&mut bytes[filled..])
                .map_err(|e| Error::read(format!("Failed to read header: {}", e)))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        bytes.truncate(filled);

        Self::parse(&bytes, file_size)
    }

    /// Total header length up to (but excluding) the `data` payload
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Payload byte count
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    /// Number of 16-bit samples in the payload
    pub fn num_samples(&self) -> u64 {
        self.data_size as u64 / 2
    }

    /// ICMT comment text (NUL padding stripped)
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// IART artist text (NUL padding stripped)
    pub fn artist(&self) -> &str {
        &self.artist
    }

    /// Declared ICMT capacity in bytes
    pub fn comment_capacity(&self) -> usize {
        self.comment_range.map(|r| r.capacity).unwrap_or(0)
    }

    /// Replace the ICMT comment, zero-padded to the declared capacity
    pub fn update_comment(&mut self, text: &str) -> Result<()> {
        let range = self
            .comment_range
            .ok_or_else(|| Error::header("no ICMT chunk to update"))?;

        if text.len() > range.capacity {
            return Err(Error::invalid_argument(format!(
                "comment length {} exceeds declared capacity {}",
                text.len(),
                range.capacity
            )));
        }

        let region = &mut self.raw[range.offset..range.offset + range.capacity];
        region.fill(0);
        region[..text.len()].copy_from_slice(text.as_bytes());
        self.comment = text.to_string();

        Ok(())
    }

    /// Rewrite the sample rate and the derived bytes-per-second field
    pub fn update_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
        write_u32(&mut self.raw, self.sample_rate_offset, rate);
        write_u32(&mut self.raw, self.byte_rate_offset, rate * 2);
    }

    /// Set the data size and recompute the RIFF outer size, including the
    /// guano chunk when one will follow the payload
    pub fn update_sizes(&mut self, guano: Option<&super::Guano>, data_size: u32) -> Result<()> {
        let guano_size = guano.map(|g| g.size_on_disk()).unwrap_or(0);
        let total = self.raw.len() as u64 + data_size as u64 + guano_size;

        if total > MAX_FILE_SIZE {
            return Err(Error::FileSizeExceedsLimit(format!(
                "{} bytes exceeds the RIFF limit",
                total
            )));
        }

        self.data_size = data_size;
        write_u32(&mut self.raw, self.data_size_offset, data_size);
        write_u32(&mut self.raw, RIFF_SIZE_OFFSET, (total - 8) as u32);

        Ok(())
    }

    /// Raw header bytes in preserved chunk order
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

fn extract_text(bytes: &[u8], range: TextRange) -> String {
    let payload = &bytes[range.offset..range.offset + range.capacity];
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(comment: &str, artist: &str, sample_rate: u32, data_size: u32) -> Vec<u8> {
        let mut icmt = comment.as_bytes().to_vec();
        icmt.resize(comment.len() + 4, 0); // NUL padding
        let mut iart = artist.as_bytes().to_vec();
        iart.resize(artist.len() + 2, 0);
        if icmt.len() % 2 != 0 {
            icmt.push(0);
        }
        if iart.len() % 2 != 0 {
            iart.push(0);
        }

        let list_size = 4 + 8 + icmt.len() + 8 + iart.len();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&0u32.to_le_bytes()); // patched below
        bytes.extend_from_slice(b"WAVE");

        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());

        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&(list_size as u32).to_le_bytes());
        bytes.extend_from_slice(b"INFO");
        bytes.extend_from_slice(b"ICMT");
        bytes.extend_from_slice(&(icmt.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&icmt);
        bytes.extend_from_slice(b"IART");
        bytes.extend_from_slice(&(iart.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&iart);

        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());

        let riff_size = bytes.len() as u32 + data_size - 8;
        bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());

        bytes
    }

    #[test]
    fn test_parse_basic_header() {
        let comment = "Recorded at 00:00:00 01/01/2023 (UTC) by AudioMoth 24F3190361DA63A5.";
        let bytes = build_header(comment, "AudioMoth 24F3190361DA63A5", 48000, 960000);
        let file_size = bytes.len() as u64 + 960000;

        let header = WavHeader::parse(&bytes, file_size).unwrap();
        assert_eq!(header.sample_rate(), 48000);
        assert_eq!(header.data_size(), 960000);
        assert_eq!(header.num_samples(), 480000);
        assert_eq!(header.size(), bytes.len());
        assert_eq!(header.comment(), comment);
        assert_eq!(header.artist(), "AudioMoth 24F3190361DA63A5");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = build_header("c", "a", 48000, 0);
        bytes[0] = b'X';
        assert!(matches!(
            WavHeader::parse(&bytes, 1 << 20),
            Err(Error::HeaderInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_non_wave() {
        let mut bytes = build_header("c", "a", 48000, 0);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(WavHeader::parse(&bytes, 1 << 20).is_err());
    }

    #[test]
    fn test_rejects_stereo() {
        let mut bytes = build_header("c", "a", 48000, 0);
        // channel count lives at fmt payload offset 2
        bytes[22] = 2;
        assert!(WavHeader::parse(&bytes, 1 << 20).is_err());
    }

    #[test]
    fn test_rejects_oversized_data() {
        let bytes = build_header("c", "a", 48000, 960000);
        // file too small to hold the declared payload
        assert!(WavHeader::parse(&bytes, bytes.len() as u64 + 100).is_err());
    }

    #[test]
    fn test_update_comment_preserves_other_bytes() {
        let bytes = build_header("original comment here", "artist", 48000, 0);
        let mut header = WavHeader::parse(&bytes, bytes.len() as u64).unwrap();
        let before = header.as_bytes().to_vec();

        header.update_comment("new text").unwrap();
        assert_eq!(header.comment(), "new text");

        let after = header.as_bytes();
        assert_eq!(before.len(), after.len());
        let differing: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
        // all differing bytes fall inside the ICMT payload
        let cap = header.comment_capacity();
        assert!(!differing.is_empty());
        assert!(differing.len() <= cap);
    }

    #[test]
    fn test_update_comment_capacity_check() {
        let bytes = build_header("short", "artist", 48000, 0);
        let mut header = WavHeader::parse(&bytes, bytes.len() as u64).unwrap();
        let too_long = "x".repeat(header.comment_capacity() + 1);
        assert!(header.update_comment(&too_long).is_err());
    }

    #[test]
    fn test_update_sample_rate() {
        let bytes = build_header("c", "a", 48000, 0);
        let mut header = WavHeader::parse(&bytes, bytes.len() as u64).unwrap();

        header.update_sample_rate(16000);
        assert_eq!(header.sample_rate(), 16000);

        let reparsed = WavHeader::parse(header.as_bytes(), header.size() as u64).unwrap();
        assert_eq!(reparsed.sample_rate(), 16000);
    }

    #[test]
    fn test_update_sizes() {
        let bytes = build_header("c", "a", 48000, 960000);
        let mut header = WavHeader::parse(&bytes, bytes.len() as u64 + 960000).unwrap();

        header.update_sizes(None, 480000).unwrap();
        assert_eq!(header.data_size(), 480000);

        let reparsed =
            WavHeader::parse(header.as_bytes(), header.size() as u64 + 480000).unwrap();
        assert_eq!(reparsed.data_size(), 480000);
    }

    #[test]
    fn test_tolerates_unknown_chunk() {
        let comment = "c";
        let mut bytes = build_header(comment, "a", 48000, 4);
        // splice an unknown chunk right before data
        let data_pos = bytes.len() - 8;
        let mut junk = Vec::new();
        junk.extend_from_slice(b"junk");
        junk.extend_from_slice(&4u32.to_le_bytes());
        junk.extend_from_slice(&[1, 2, 3, 4]);
        bytes.splice(data_pos..data_pos, junk);

        let header = WavHeader::parse(&bytes, bytes.len() as u64 + 4).unwrap();
        assert_eq!(header.size(), bytes.len());
        assert_eq!(header.as_bytes(), &bytes[..]);
    }
}
