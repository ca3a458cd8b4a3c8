//! Batch injection of spreadsheet fields into PDF pages using lopdf
//!
//! This crate provides:
//! - Spreadsheet loading and header-to-field column mapping
//! - A record store keyed by document code (the PDF filename stem)
//! - Anchor text location on PDF pages with glyph-accurate bounding boxes
//! - Text injection at fixed or anchor-relative positions
//! - A batch orchestrator with per-item failure isolation and zip output
//! - Diagnostic coordinate analysis for calibrating positions

pub mod analyzer;
pub mod archive;
pub mod batch;
pub mod columns;
pub mod config;
pub mod fonts;
pub mod injector;
pub mod locator;
pub mod position;
pub mod records;
pub mod spreadsheet;

pub use analyzer::{analyze_document, analyze_page, coordinate_grid, AnchorReport};
pub use batch::{
    run_batch, Batch, BatchReport, BatchSession, BatchSummary, InputDocument, ItemStatus,
    PdfStamper, ProcessingResult, Progress, Stamper,
};
pub use columns::{map_columns, ColumnMapping, FieldSchema};
pub use config::{InjectionConfig, PageScope, PositionMode, Rotation, TextColor};
pub use injector::{inject, stamp_document, Stamp, StampPlan, TextStyle};
pub use locator::{find_boxes, AnchorBox, Marker, PageText};
pub use position::{resolve, FixedPosition, OffsetPosition, Point, PositionSpec};
pub use records::{Record, RecordStore};
pub use spreadsheet::{read_table, read_table_mem, Table};

use lopdf::Document;
use std::path::Path;

/// Load records from spreadsheet bytes using keyword column mapping
///
/// Returns the store together with the mapping that produced it, so callers
/// can report which header fed which field.
pub fn load_records_mem(
    buffer: &[u8],
    schema: &FieldSchema,
) -> Result<(RecordStore, ColumnMapping), StampError> {
    let table = read_table_mem(buffer)?;
    let mapping = map_columns(&table.headers, schema);
    let store = RecordStore::build(&table, &mapping);
    Ok((store, mapping))
}

/// Load records from a spreadsheet file
pub fn load_records<P: AsRef<Path>>(
    path: P,
    schema: &FieldSchema,
) -> Result<(RecordStore, ColumnMapping), StampError> {
    let buffer = std::fs::read(path)?;
    load_records_mem(&buffer, schema)
}

/// Open a PDF from memory, rejecting documents lopdf could not decrypt
pub fn open_document(buffer: &[u8]) -> Result<Document, StampError> {
    let doc = Document::load_mem(buffer)?;
    if doc.is_encrypted() {
        return Err(StampError::Encrypted);
    }
    Ok(doc)
}

/// Serialize a document back to bytes
pub fn save_document(doc: &mut Document) -> Result<Vec<u8>, StampError> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| StampError::Save(e.to_string()))?;
    Ok(output)
}

#[derive(Debug, thiserror::Error)]
pub enum StampError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("PDF has no pages")]
    NoPages,
    #[error("failed to write PDF: {0}")]
    Save(String),
    #[error("missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<lopdf::Error> for StampError {
    fn from(e: lopdf::Error) -> Self {
        StampError::Parse(e.to_string())
    }
}

impl From<calamine::Error> for StampError {
    fn from(e: calamine::Error) -> Self {
        StampError::Spreadsheet(e.to_string())
    }
}
