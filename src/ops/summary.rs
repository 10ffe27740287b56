//! Recording tree summariser
//!
//! Walks a caller-supplied file enumeration and accumulates one row per
//! recognised recording. Rows are best-effort: a file that cannot be
//! read still contributes its name, folder, and size. The caller drives
//! the lifecycle: `new` (or `initialise`), `add` per file, `finalise`.

use crate::codec::trigger;
use crate::error::Result;
use crate::format::comment::{self, BatteryReading};
use crate::format::wav::{Guano, WavHeader};
use crate::util::progress::ProgressFn;
use crate::util::time;
use crate::util::{Progress, SampleSource};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Summary CSV header
const CSV_HEADER: &str = "File Name,Folder,File Size (bytes),Timestamp,Sample Rate (Hz),\
                          Duration (s),Samples,Triggered,Latitude,Longitude,\
                          Temperature (C),Battery Voltage (V)";

fn recording_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // union of the operation filename shapes
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d{8}_\d{6}|\d{6})(T)?(_SYNC)?(?i:\.wav)$").unwrap())
}

/// One summary row
#[derive(Debug, Clone, Default)]
struct Row {
    filename: String,
    folder: String,
    file_size: u64,
    timestamp: Option<i64>,
    sample_rate: Option<u32>,
    duration: Option<f64>,
    samples: Option<u64>,
    triggered: Option<bool>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    temperature: Option<f64>,
    battery: Option<String>,
}

impl Row {
    fn to_csv(&self) -> String {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|v| v.to_string()).unwrap_or_default()
        }

        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.filename,
            self.folder,
            self.file_size,
            self.timestamp.map(time::format_csv_time).unwrap_or_default(),
            opt(&self.sample_rate),
            self.duration.map(|d| format!("{:.3}", d)).unwrap_or_default(),
            opt(&self.samples),
            self.triggered
                .map(|t| if t { "TRUE" } else { "FALSE" })
                .unwrap_or("")
                .to_string(),
            opt(&self.latitude),
            opt(&self.longitude),
            self.temperature.map(|t| format!("{:.1}", t)).unwrap_or_default(),
            opt(&self.battery),
        )
    }
}

/// Accumulates summary rows across a file tree walk
#[derive(Debug, Default)]
pub struct Summary {
    rows: Vec<Row>,
}

impl Summary {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Summary { rows: Vec::new() }
    }

    /// Clear accumulated rows
    pub fn initialise(&mut self) {
        self.rows.clear();
    }

    /// Number of accumulated rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows have been accumulated
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Summarise one file found under `root`
    ///
    /// Unrecognised filenames are ignored. A recognised file that cannot
    /// be parsed still contributes a row with its name, folder, and size.
    pub fn add(&mut self, root: &Path, file: &Path, progress: Option<ProgressFn<'_>>) -> Result<()> {
        let filename = match file.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return Ok(()),
        };

        let caps = match recording_regex().captures(&filename) {
            Some(caps) => caps,
            None => return Ok(()),
        };
        let triggered = caps.get(3).is_some();

        let folder = file
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .and_then(|p| p.to_str())
            .unwrap_or("")
            .to_string();

        let mut row = Row {
            filename,
            folder,
            file_size: std::fs::metadata(file).map(|m| m.len()).unwrap_or(0),
            ..Row::default()
        };

        let mut progress = Progress::new(progress, row.file_size.max(1));

        if let Err(e) = self.probe(file, triggered, &mut row, &mut progress) {
            debug!(file = %file.display(), error = %e, "partial summary row");
        }

        self.rows.push(row);
        progress.finish();
        Ok(())
    }

    fn probe(
        &mut self,
        file: &Path,
        triggered: bool,
        row: &mut Row,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        let header = WavHeader::read_from_file(file)?;

        row.sample_rate = Some(header.sample_rate());
        row.triggered = Some(triggered);

        let fields = comment::parse(header.comment());
        row.timestamp = fields.timestamp;
        row.temperature = fields.temperature;
        row.battery = fields.battery.as_ref().map(|b| match b {
            BatteryReading::Exact(v) => format!("{:.1}", v),
            BatteryReading::GreaterThan(v) => format!(">{:.1}", v),
            BatteryReading::LessThan(v) => format!("<{:.1}", v),
        });

        let samples = if triggered {
            // decompressed length implied by the sentinel counts
            let mut source = SampleSource::open(file)?;
            source.seek_to(header.size() as u64)?;
            let segments = trigger::scan(
                &mut source,
                header.size() as u64,
                header.data_size() as u64,
                progress,
            )?;
            trigger::decompressed_size(&segments) / 2
        } else {
            header.num_samples()
        };

        row.samples = Some(samples);
        row.duration = Some(samples as f64 / header.sample_rate() as f64);

        let guano = Guano::read_from_file(
            file,
            header.size() as u64 + header.data_size() as u64,
            std::fs::metadata(file).map(|m| m.len()).unwrap_or(0),
        )?;

        if let Some(guano) = guano {
            if let Some(position) = guano.field("Loc Position") {
                let mut parts = position.split_whitespace();
                row.latitude = parts.next().and_then(|p| p.parse().ok());
                row.longitude = parts.next().and_then(|p| p.parse().ok());
            }

            if row.temperature.is_none() {
                row.temperature = guano
                    .field("Temperature Int")
                    .and_then(|t| t.parse().ok());
            }

            if row.battery.is_none() {
                row.battery = guano.field("OAD\\Battery Voltage");
            }
        }

        Ok(())
    }

    /// Sort rows by `(folder, filename)` and write `SUMMARY.CSV`
    ///
    /// Rows are not cleared; a second `finalise` without `initialise`
    /// rewrites the same (or a duplicated) accumulation.
    pub fn finalise(&mut self, output: &Path) -> Result<()> {
        self.rows
            .sort_by(|a, b| (a.folder.as_str(), a.filename.as_str())
                .cmp(&(b.folder.as_str(), b.filename.as_str())));

        let path = output.join("SUMMARY.CSV");
        let mut file = std::fs::File::create(&path)
            .map_err(|e| crate::error::Error::write(format!("Failed to create {}: {}", path.display(), e)))?;

        writeln!(file, "{}", CSV_HEADER)
            .map_err(|e| crate::error::Error::write(format!("Failed to write header: {}", e)))?;

        for row in &self.rows {
            writeln!(file, "{}", row.to_csv())
                .map_err(|e| crate::error::Error::write(format!("Failed to write row: {}", e)))?;
        }

        Ok(())
    }
}
