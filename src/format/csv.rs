//! Header-driven CSV column extraction
//!
//! The caller names the columns it wants, in order, with one parser per
//! column. The reader maps the header row once, then streams data rows
//! into per-column sequences. Rows whose cell count does not match the
//! header are skipped silently, as are rows any named parser rejects.

use crate::error::{Error, Result};
use crate::util::time;
use std::collections::HashMap;
use std::io::BufRead;

/// A parsed CSV cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    U64(u64),
    F64(f64),
    /// Epoch milliseconds
    Time(i64),
    Text(String),
}

impl CellValue {
    pub fn as_u64(&self) -> u64 {
        match self {
            CellValue::U64(v) => *v,
            CellValue::Time(v) => *v as u64,
            CellValue::F64(v) => *v as u64,
            CellValue::Text(_) => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            CellValue::U64(v) => *v as i64,
            CellValue::Time(v) => *v,
            CellValue::F64(v) => *v as i64,
            CellValue::Text(_) => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            CellValue::U64(v) => *v as f64,
            CellValue::Time(v) => *v as f64,
            CellValue::F64(v) => *v,
            CellValue::Text(_) => 0.0,
        }
    }
}

/// Per-cell parser callback
pub type CellParser = fn(&str) -> Option<CellValue>;

/// A named column and its parser
pub struct ColumnSpec {
    pub name: &'static str,
    pub parser: CellParser,
}

/// Parse an unsigned integer cell
pub fn parse_u64(cell: &str) -> Option<CellValue> {
    cell.trim().parse().ok().map(CellValue::U64)
}

/// Parse a floating-point cell
pub fn parse_f64(cell: &str) -> Option<CellValue> {
    cell.trim().parse().ok().map(CellValue::F64)
}

/// Parse a `YYYY-MM-DD HH:MM:SS.mmm` time cell
pub fn parse_time(cell: &str) -> Option<CellValue> {
    time::parse_csv_time(cell.trim()).map(CellValue::Time)
}

/// Keep a cell as text
pub fn parse_text(cell: &str) -> Option<CellValue> {
    Some(CellValue::Text(cell.trim().to_string()))
}

/// Read the named columns from a CSV stream
///
/// Returns one `Vec<CellValue>` per requested column, in request order.
/// Fails if the header row is missing or lacks a requested column.
pub fn read_columns<R: BufRead>(reader: R, specs: &[ColumnSpec]) -> Result<Vec<Vec<CellValue>>> {
    let mut lines = reader.lines();

    let header = lines
        .next()
        .ok_or_else(|| Error::invalid_argument("CSV file is empty"))?
        .map_err(|e| Error::read(format!("Failed to read CSV header: {}", e)))?;

    let positions: HashMap<&str, usize> = header
        .trim()
        .split(',')
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect();
    let column_count = header.trim().split(',').count();

    let mut indices = Vec::with_capacity(specs.len());
    for spec in specs {
        let index = positions.get(spec.name).ok_or_else(|| {
            Error::invalid_argument(format!("CSV is missing the {} column", spec.name))
        })?;
        indices.push(*index);
    }

    let mut columns: Vec<Vec<CellValue>> = specs.iter().map(|_| Vec::new()).collect();

    for line in lines {
        let line = line.map_err(|e| Error::read(format!("Failed to read CSV row: {}", e)))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let cells: Vec<&str> = trimmed.split(',').collect();
        if cells.len() != column_count {
            continue;
        }

        let mut parsed = Vec::with_capacity(specs.len());
        let mut ok = true;
        for (spec, &index) in specs.iter().zip(&indices) {
            match (spec.parser)(cells[index]) {
                Some(value) => parsed.push(value),
                None => {
                    ok = false;
                    break;
                }
            }
        }

        if ok {
            for (column, value) in columns.iter_mut().zip(parsed) {
                column.push(value);
            }
        }
    }

    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SPECS: &[ColumnSpec] = &[
        ColumnSpec {
            name: "PPS_NUMBER",
            parser: parse_u64,
        },
        ColumnSpec {
            name: "TOTAL_SAMPLES",
            parser: parse_u64,
        },
    ];

    #[test]
    fn test_reads_named_columns() {
        let csv = "PPS_NUMBER,AUDIOMOTH_TIME,TOTAL_SAMPLES\n0,2023-01-01 00:00:00.000,0\n1,2023-01-01 00:00:01.000,48000\n";
        let columns = read_columns(Cursor::new(csv), SPECS).unwrap();

        assert_eq!(columns[0], vec![CellValue::U64(0), CellValue::U64(1)]);
        assert_eq!(columns[1], vec![CellValue::U64(0), CellValue::U64(48000)]);
    }

    #[test]
    fn test_skips_short_rows() {
        let csv = "PPS_NUMBER,TOTAL_SAMPLES\n0,0\n1\n2,96000\n";
        let columns = read_columns(Cursor::new(csv), SPECS).unwrap();
        assert_eq!(columns[0].len(), 2);
        assert_eq!(columns[1], vec![CellValue::U64(0), CellValue::U64(96000)]);
    }

    #[test]
    fn test_missing_column_fails() {
        let csv = "PPS_NUMBER,SAMPLES\n0,0\n";
        assert!(read_columns(Cursor::new(csv), SPECS).is_err());
    }

    #[test]
    fn test_time_parser() {
        assert_eq!(
            parse_time("2023-01-01 00:00:00.250"),
            Some(CellValue::Time(1672531200250))
        );
        assert!(parse_time("not a time").is_none());
    }
}
