//! Workbook decoding into a header row plus data rows

use crate::StampError;
use calamine::{Data, Reader};
use std::io::Cursor;
use std::path::Path;

/// A decoded sheet. Cells are `None` when empty, NaN or an error value.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from string literals; empty strings become `None`
    pub fn from_strings(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| {
                            if cell.is_empty() {
                                None
                            } else {
                                Some(cell.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Bounds-safe cell access
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }
}

/// Read the first worksheet of an xlsx/xlsm/xlsb/xls/ods file
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Table, StampError> {
    let buffer = std::fs::read(path)?;
    read_table_mem(&buffer)
}

/// Read the first worksheet from a memory buffer
///
/// Row 0 becomes the header row; every following row is data.
pub fn read_table_mem(buffer: &[u8]) -> Result<Table, StampError> {
    let cursor = Cursor::new(buffer);
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| StampError::Spreadsheet("workbook has no worksheets".into()))??;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| cell_as_string(c).unwrap_or_default())
            .collect(),
        None => Vec::new(),
    };

    let rows: Vec<Vec<Option<String>>> = rows
        .map(|row| row.iter().map(cell_as_string).collect())
        .collect();

    log::info!(
        "read sheet: {} columns, {} data rows, headers {:?}",
        headers.len(),
        rows.len(),
        headers
    );

    Ok(Table { headers, rows })
}

fn cell_as_string(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Float(f) => format_float(*f),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(dt.to_string()),
        Data::Empty | Data::Error(_) => None,
        _ => Some(format!("{cell}")),
    }
}

/// Integral floats print without a fraction so numeric codes match filenames
fn format_float(f: f64) -> Option<String> {
    if f.is_nan() {
        None
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        Some(format!("{}", f as i64))
    } else {
        Some(f.to_string())
    }
}
