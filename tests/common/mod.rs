//! Shared fixtures: in-memory builders for logger-style WAV files

#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const DEVICE_ID: &str = "24F3190361DA63A5";

/// Comment capacity used by the builders; matches the loggers' fixed
/// header layout closely enough for every test
pub const COMMENT_CAPACITY: usize = 192;

/// The standard comment for a recording starting at `time` `date` (UTC)
pub fn comment_for(time: &str, date: &str) -> String {
    format!(
        "Recorded at {} {} (UTC) by AudioMoth {} at medium gain while battery \
         was 4.2V and temperature was 23.4C.",
        time, date, DEVICE_ID
    )
}

/// The standard artist string
pub fn artist() -> String {
    format!("AudioMoth {}", DEVICE_ID)
}

/// Build a complete mono 16-bit WAV file in memory
pub fn build_wav(
    comment: &str,
    artist: &str,
    sample_rate: u32,
    data: &[u8],
    guano: Option<&str>,
) -> Vec<u8> {
    let mut icmt = comment.as_bytes().to_vec();
    assert!(icmt.len() <= COMMENT_CAPACITY, "comment too long for fixture");
    icmt.resize(COMMENT_CAPACITY, 0);

    let mut iart = artist.as_bytes().to_vec();
    iart.push(0);
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
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());

    bytes.extend_from_slice(data);

    if let Some(text) = guano {
        bytes.extend_from_slice(b"guan");
        bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
    }

    let riff_size = bytes.len() as u32 - 8;
    bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());

    bytes
}

/// Encode samples as little-endian bytes
pub fn sample_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Decode the data payload of a written WAV file
pub fn read_wav(path: &Path) -> (mothkit_lib::format::WavHeader, Vec<u8>) {
    let bytes = std::fs::read(path).unwrap();
    let header = mothkit_lib::format::WavHeader::parse(&bytes, bytes.len() as u64).unwrap();
    let start = header.size();
    let end = start + header.data_size() as usize;
    (header, bytes[start..end].to_vec())
}

/// Write a WAV fixture into `dir` under `name`
pub fn write_wav_file(
    dir: &Path,
    name: &str,
    comment: &str,
    artist: &str,
    sample_rate: u32,
    data: &[u8],
    guano: Option<&str>,
) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, build_wav(comment, artist, sample_rate, data, guano)).unwrap();
    path
}

/// Length of the short leading window that brings later reads onto
/// 512-byte file boundaries
pub fn leading_window(header_size: usize) -> usize {
    (512 - header_size % 512) % 512
}

/// Header size of a fixture built by `build_wav`
pub fn fixture_header_size(comment: &str, artist: &str, sample_rate: u32) -> usize {
    let bytes = build_wav(comment, artist, sample_rate, &[], None);
    let header = mothkit_lib::format::WavHeader::parse(&bytes, bytes.len() as u64).unwrap();
    header.size()
}
