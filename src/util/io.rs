//! Low-level byte I/O
//!
//! Buffered positional read/write over file handles and 16-bit
//! little-endian sample accessors. Every operation in the toolkit streams
//! through these helpers with fixed-size working buffers; no operation
//! holds a whole audio payload in memory.

use crate::error::{Error, Result};
use crate::util::Progress;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Working buffer for headers and GUANO chunks
pub const HEADER_BUFFER_SIZE: usize = 32 * 1024;

/// Working buffer for sample streaming
pub const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Bytes per 16-bit mono sample
pub const BYTES_PER_SAMPLE: u64 = 2;

/// Largest legal RIFF file size
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Return the size of a file, rejecting empty inputs
pub fn file_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| Error::read(format!("Failed to stat {}: {}", path.display(), e)))?;

    let size = metadata.len();
    if size == 0 {
        return Err(Error::FileSizeZero);
    }

    Ok(size)
}

/// Buffered 16-bit little-endian sample reader over an input file
pub struct SampleSource {
    reader: BufReader<File>,
}

impl SampleSource {
    /// Open an input file for sample streaming
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::read(format!("Failed to open {}: {}", path.display(), e)))?;

        Ok(SampleSource {
            reader: BufReader::with_capacity(STREAM_BUFFER_SIZE, file),
        })
    }

    /// Seek to an absolute byte offset
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::read(format!("Failed to seek to {}: {}", offset, e)))?;
        Ok(())
    }

    /// Read one sample
    pub fn read_sample(&mut self) -> Result<i16> {
        self.reader
            .read_i16::<LittleEndian>()
            .map_err(|e| Error::read(format!("Failed to read sample: {}", e)))
    }

    /// Fill `buf` exactly from the current position
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| Error::read(format!("Failed to read {} bytes: {}", buf.len(), e)))
    }

    /// Read up to `buf.len()` bytes, returning the count actually read
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader
            .read(buf)
            .map_err(|e| Error::read(format!("Failed to read: {}", e)))
    }
}

/// Buffered 16-bit little-endian sample writer over an output file
pub struct SampleSink {
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl SampleSink {
    /// Create an output file for sample streaming
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| Error::write(format!("Failed to create {}: {}", path.display(), e)))?;

        Ok(SampleSink {
            writer: BufWriter::with_capacity(STREAM_BUFFER_SIZE, file),
            bytes_written: 0,
        })
    }

    /// Write one sample
    pub fn write_sample(&mut self, sample: i16) -> Result<()> {
        self.writer
            .write_i16::<LittleEndian>(sample)
            .map_err(|e| Error::write(format!("Failed to write sample: {}", e)))?;
        self.bytes_written += BYTES_PER_SAMPLE;
        Ok(())
    }

    /// Write a raw byte slice
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.writer
            .write_all(buf)
            .map_err(|e| Error::write(format!("Failed to write {} bytes: {}", buf.len(), e)))?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::write(format!("Failed to flush output: {}", e)))
    }
}

/// Copy `length` bytes from `source` starting at `offset` into `sink`,
/// advancing `progress` as bytes move
pub fn copy_range(
    source: &mut SampleSource,
    offset: u64,
    length: u64,
    sink: &mut SampleSink,
    progress: &mut Progress<'_>,
) -> Result<()> {
    source.seek_to(offset)?;

    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    let mut remaining = length;

    while remaining > 0 {
        let step = remaining.min(buf.len() as u64) as usize;
        source.read_exact(&mut buf[..step])?;
        sink.write_all(&buf[..step])?;
        progress.advance(step as u64);
        remaining -= step as u64;
    }

    Ok(())
}

/// Fill `length` bytes of `sink` with zeros from a fixed working buffer
pub fn write_zeros(sink: &mut SampleSink, length: u64, progress: &mut Progress<'_>) -> Result<()> {
    let zeros = vec![0u8; STREAM_BUFFER_SIZE];
    let mut remaining = length;

    while remaining > 0 {
        let step = remaining.min(zeros.len() as u64) as usize;
        sink.write_all(&zeros[..step])?;
        progress.advance(step as u64);
        remaining -= step as u64;
    }

    Ok(())
}
