//! Align integration tests

mod common;

use common::*;
use mothkit_lib::error::Error;
use mothkit_lib::Aligner;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_gps_log(dir: &Path) -> PathBuf {
    let path = dir.join("GPS.TXT");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in [
        "01/06/2024 12:00:00.000 UTC: Received GPS fix - 51.5074,-0.1278",
        "01/06/2024 12:00:01.000 UTC: Time was set",
        "01/06/2024 12:00:01.000 UTC: Actual sample rate will be 47999.500 Hz",
        "01/06/2024 12:10:00.000 UTC: Received GPS fix - 51.5074,-0.1278",
        "01/06/2024 12:10:01.000 UTC: Time was updated by 120ms slow",
        "01/06/2024 12:10:01.000 UTC: Actual sample rate will be 47999.500 Hz",
    ] {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

fn recording(dir: &Path, name: &str, time: &str, date: &str, seconds: usize) -> PathBuf {
    let samples = vec![800i16; seconds * 48_000];
    write_wav_file(
        dir,
        name,
        &comment_for(time, date),
        &artist(),
        48_000,
        &sample_bytes(&samples),
        Some("GUANO|Version: 1.0\nTimestamp: 2024-06-01T12:05:00\nLoc Position: 51.5074 -0.1278"),
    )
}

#[test]
fn test_align_between_fixes() {
    let dir = tempdir().unwrap();
    let gps = write_gps_log(dir.path());
    let wav = recording(dir.path(), "20240601_120500.WAV", "12:05:00", "01/06/2024", 1);

    let mut aligner = Aligner::initialise(&gps).unwrap();
    assert_eq!(aligner.fix_count(), 2);

    let path = aligner.align(&wav, None, "", true, None).unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "20240601_120500_SYNC.WAV"
    );

    // halfway between the fixes the clock runs 60 ms slow, so the output
    // is padded by 60 ms of samples at the derived rate
    let padded = (0.060f64 * 47_999.5).round() as usize;
    let (header, payload) = read_wav(&path);
    assert_eq!(header.sample_rate(), 48_000);
    assert_eq!(payload.len(), (48_000 + padded) * 2);

    // the pad is silent; the signal follows
    let first = i16::from_le_bytes([payload[0], payload[1]]);
    assert_eq!(first, 0);
    let mid = payload.len() / 2;
    let sample = i16::from_le_bytes([payload[mid], payload[mid + 1]]);
    assert_eq!(sample, 800);
}

#[test]
fn test_recording_before_first_fix_rejected() {
    let dir = tempdir().unwrap();
    let gps = write_gps_log(dir.path());
    let wav = recording(dir.path(), "20240601_110000.WAV", "11:00:00", "01/06/2024", 1);

    let mut aligner = Aligner::initialise(&gps).unwrap();
    assert!(matches!(
        aligner.align(&wav, None, "", true, None),
        Err(Error::RecordingOutsideFixes(_))
    ));
}

#[test]
fn test_recording_after_last_fix() {
    let dir = tempdir().unwrap();
    let gps = write_gps_log(dir.path());
    let wav = recording(dir.path(), "20240601_123000.WAV", "12:30:00", "01/06/2024", 1);

    let mut aligner = Aligner::initialise(&gps).unwrap();

    assert!(matches!(
        aligner.align(&wav, None, "", true, None),
        Err(Error::RecordingOutsideFixes(_))
    ));

    // extrapolation is allowed when not restricted to the fix span
    let path = aligner.align(&wav, None, "", false, None).unwrap();
    assert!(path.exists());
}

#[test]
fn test_sample_rate_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let gps = write_gps_log(dir.path());

    let samples = vec![0i16; 96_000];
    let wav = write_wav_file(
        dir.path(),
        "20240601_120500.WAV",
        &comment_for("12:05:00", "01/06/2024"),
        &artist(),
        96_000,
        &sample_bytes(&samples),
        None,
    );

    let mut aligner = Aligner::initialise(&gps).unwrap();
    assert!(matches!(
        aligner.align(&wav, None, "", true, None),
        Err(Error::SampleRateMismatch(_))
    ));
}

#[test]
fn test_finalise_interleaves_events() {
    let dir = tempdir().unwrap();
    let gps = write_gps_log(dir.path());
    let wav = recording(dir.path(), "20240601_120500.WAV", "12:05:00", "01/06/2024", 1);

    let mut aligner = Aligner::initialise(&gps).unwrap();
    aligner.align(&wav, None, "", true, None).unwrap();

    let report_dir = tempdir().unwrap();
    let csv_path = aligner.finalise(report_dir.path()).unwrap();
    assert_eq!(csv_path.file_name().unwrap().to_str().unwrap(), "GPS.CSV");

    let text = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines[0].starts_with("TIME,EVENT,LATITUDE,LONGITUDE,TIME_OFFSET"));
    assert_eq!(lines.len(), 4);

    // events appear in time order: fix, recording, fix
    assert!(lines[1].contains("GPS_FIX"));
    assert!(lines[1].starts_with("2024-06-01 12:00:00.000"));
    assert!(lines[2].contains("RECORDING"));
    assert!(lines[2].contains("20240601_120500.WAV"));
    assert!(lines[2].ends_with("INTERPOLATION"));
    assert!(lines[3].contains("GPS_FIX"));
    assert!(lines[3].starts_with("2024-06-01 12:10:00.000"));
}

#[test]
fn test_garbage_gps_log_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("GPS.TXT");
    std::fs::write(&path, "nothing useful\n").unwrap();

    assert!(matches!(
        Aligner::initialise(&path),
        Err(Error::TimeSourceInvalid(_))
    ));
}
