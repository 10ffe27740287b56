//! GUANO metadata chunk support
//!
//! GUANO is the bat-recording community's textual metadata block, carried
//! as a `guan` chunk past the `data` payload. The body is kept both as a
//! raw buffer (for verbatim rewrite) and exposed as text (for field lookup
//! and timestamp edits).

use super::{ChunkHeader, GUAN_CHUNK};
use crate::error::{Error, Result};
use crate::util::io::HEADER_BUFFER_SIZE;
use crate::util::SampleSink;
use regex::Regex;
use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::OnceLock;

fn iso_timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap())
}

/// Trailing `guan` chunk contents
#[derive(Debug, Clone)]
pub struct Guano {
    contents: Vec<u8>,
}

impl Guano {
    /// Parse one `guan` chunk from bytes
    ///
    /// `available` is the byte count remaining in the file from the start
    /// of the chunk; the declared size may not exceed it.
    pub fn parse(bytes: &[u8], available: u64) -> Result<Self> {
        let chunk = ChunkHeader::from_bytes(bytes)
            .ok_or_else(|| Error::header("guan chunk truncated"))?;

        if &chunk.id != GUAN_CHUNK {
            return Err(Error::header("not a guan chunk"));
        }

        if 8 + chunk.size as u64 > available {
            return Err(Error::header(format!(
                "guan chunk size {} exceeds remaining {} bytes",
                chunk.size, available
            )));
        }

        if 8 + chunk.size as usize > bytes.len() {
            return Err(Error::header("guan chunk truncated"));
        }

        Ok(Guano {
            contents: bytes[8..8 + chunk.size as usize].to_vec(),
        })
    }

    /// Read the optional `guan` chunk that follows the data payload
    ///
    /// Returns `Ok(None)` when the file ends at `offset` or the trailing
    /// bytes are not a guan chunk.
    pub fn read_from_file(path: &Path, offset: u64, file_size: u64) -> Result<Option<Self>> {
        if file_size < offset + 8 {
            return Ok(None);
        }

        let mut file = std::fs::File::open(path)
            .map_err(|e| Error::read(format!("Failed to open {}: {}", path.display(), e)))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::read(format!("Failed to seek to {}: {}", offset, e)))?;

        let available = file_size - offset;
        let want = (available as usize).min(HEADER_BUFFER_SIZE);
        let mut bytes = vec![0u8; want];
        file.read_exact(&mut bytes)
            .map_err(|e| Error::read(format!("Failed to read guan chunk: {}", e)))?;

        if &bytes[0..4] != GUAN_CHUNK {
            return Ok(None);
        }

        Self::parse(&bytes, available).map(Some)
    }

    /// UTF-8 view of the chunk body
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    /// Chunk size on disk (header plus body)
    pub fn size_on_disk(&self) -> u64 {
        8 + self.contents.len() as u64
    }

    /// Replace the first ISO timestamp in the body with one derived from
    /// `timestamp_ms`, leaving the rest of the body untouched
    pub fn set_timestamp(&mut self, timestamp_ms: i64) {
        let text = self.text().into_owned();
        let replacement = crate::util::time::format_iso(timestamp_ms);
        let updated = iso_timestamp_regex().replace(&text, replacement.as_str());

        if let Cow::Owned(updated) = updated {
            self.contents = updated.into_bytes();
        }
    }

    /// Look up the value of a `key: value` line in the body
    pub fn field(&self, key: &str) -> Option<String> {
        for line in self.text().lines() {
            if let Some((k, v)) = line.split_once(':') {
                if k.trim() == key {
                    return Some(v.trim().to_string());
                }
            }
        }
        None
    }

    /// Emit the chunk with its current size and body
    pub fn write_to(&self, sink: &mut SampleSink) -> Result<()> {
        let header = ChunkHeader {
            id: *GUAN_CHUNK,
            size: self.contents.len() as u32,
        };
        sink.write_all(&header.to_bytes())?;
        sink.write_all(&self.contents)?;
        Ok(())
    }
}
