//! Batch orchestration: pair documents with records, stamp, aggregate
//!
//! Items are processed strictly in input order, one document at a time.
//! A failing item is recorded and the batch moves on.

use crate::archive::build_archive;
use crate::columns::{map_columns, map_exact, ColumnMapping, FieldSchema, CODE_FIELD};
use crate::config::InjectionConfig;
use crate::injector::{stamp_document, StampPlan};
use crate::records::RecordStore;
use crate::spreadsheet::{read_table_mem, Table};
use crate::{open_document, save_document, StampError};
use serde::Serialize;

/// One input file
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl InputDocument {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Record key for this file
    pub fn key(&self) -> String {
        key_from_filename(&self.filename)
    }
}

/// Strip directories and the final extension, then trim
pub fn key_from_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    stem.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Stamped document bytes
    Success(Vec<u8>),
    /// No record for the file's key
    Unmatched,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub filename: String,
    pub key: String,
    pub status: ItemStatus,
}

impl ProcessingResult {
    /// Output bytes, present only on success
    pub fn output(&self) -> Option<&[u8]> {
        match &self.status {
            ItemStatus::Success(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Success(_))
    }
}

/// Reported after every item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// 1-based position of the item just finished
    pub current: usize,
    pub total: usize,
    pub filename: String,
}

/// Per-document stamping step
pub trait Stamper {
    /// Stamp one document with `(field, value)` pairs and return its bytes
    fn stamp(&self, pdf: &[u8], values: &[(&str, &str)]) -> Result<Vec<u8>, StampError>;
}

impl<T: Stamper + ?Sized> Stamper for &T {
    fn stamp(&self, pdf: &[u8], values: &[(&str, &str)]) -> Result<Vec<u8>, StampError> {
        (**self).stamp(pdf, values)
    }
}

/// Stamps with lopdf following a fixed plan
pub struct PdfStamper<'a> {
    plan: &'a StampPlan,
}

impl<'a> PdfStamper<'a> {
    pub fn new(plan: &'a StampPlan) -> Self {
        Self { plan }
    }
}

impl Stamper for PdfStamper<'_> {
    fn stamp(&self, pdf: &[u8], values: &[(&str, &str)]) -> Result<Vec<u8>, StampError> {
        let mut doc = open_document(pdf)?;
        let drawn = stamp_document(&mut doc, self.plan, values)?;
        log::debug!("{} stamps drawn", drawn);
        save_document(&mut doc)
    }
}

/// A batch over one record store
pub struct Batch<'a, S> {
    store: &'a RecordStore,
    stamper: S,
}

impl<'a, S: Stamper> Batch<'a, S> {
    pub fn new(store: &'a RecordStore, stamper: S) -> Self {
        Self { store, stamper }
    }

    /// Process every item in order, calling `progress` after each
    pub fn run<F>(&self, items: &[InputDocument], mut progress: F) -> BatchReport
    where
        F: FnMut(&Progress),
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        for (index, item) in items.iter().enumerate() {
            results.push(self.process(item));
            progress(&Progress {
                current: index + 1,
                total,
                filename: item.filename.clone(),
            });
        }

        let report = BatchReport { results };
        let summary = report.summary();
        log::info!(
            "batch finished: {} ok, {} unmatched, {} failed of {}",
            summary.success,
            summary.unmatched,
            summary.failed,
            summary.total
        );
        report
    }

    fn process(&self, item: &InputDocument) -> ProcessingResult {
        let key = item.key();

        let status = match self.store.get(&key) {
            None => {
                log::warn!("{}: no record for key {:?}", item.filename, key);
                ItemStatus::Unmatched
            }
            Some(record) => {
                let mut values = vec![(CODE_FIELD, record.key())];
                values.extend(
                    record
                        .fields()
                        .iter()
                        .map(|(name, value)| (name.as_str(), value.as_str())),
                );

                match self.stamper.stamp(&item.bytes, &values) {
                    Ok(bytes) => {
                        log::info!("{}: stamped ({} bytes)", item.filename, bytes.len());
                        ItemStatus::Success(bytes)
                    }
                    Err(e) => {
                        log::warn!("{}: {}", item.filename, e);
                        ItemStatus::Error(e.to_string())
                    }
                }
            }
        };

        ProcessingResult {
            filename: item.filename.clone(),
            key,
            status,
        }
    }
}

/// Results of one batch run, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<ProcessingResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub filename: String,
    pub message: String,
}

/// Counts plus per-item error messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub unmatched_files: Vec<String>,
    pub errors: Vec<ItemError>,
}

impl BatchReport {
    pub fn unmatched(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == ItemStatus::Unmatched)
            .map(|r| r.filename.as_str())
            .collect()
    }

    /// `(filename, message)` of every failed item
    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter_map(|r| match &r.status {
                ItemStatus::Error(message) => Some((r.filename.as_str(), message.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<&ProcessingResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    pub fn summary(&self) -> BatchSummary {
        let errors: Vec<ItemError> = self
            .errors()
            .into_iter()
            .map(|(filename, message)| ItemError {
                filename: filename.to_string(),
                message: message.to_string(),
            })
            .collect();
        let unmatched_files: Vec<String> =
            self.unmatched().into_iter().map(str::to_string).collect();

        BatchSummary {
            total: self.results.len(),
            success: self.successes().len(),
            unmatched: unmatched_files.len(),
            failed: errors.len(),
            unmatched_files,
            errors,
        }
    }

    /// Zip of the successful outputs, named by original filename
    pub fn archive(&self, folder: Option<&str>) -> Result<Vec<u8>, StampError> {
        let entries: Vec<(&str, &[u8])> = self
            .results
            .iter()
            .filter_map(|r| r.output().map(|bytes| (r.filename.as_str(), bytes)))
            .collect();
        build_archive(&entries, folder)
    }
}

/// State carried across batch runs over the same spreadsheet
#[derive(Debug, Clone)]
pub struct BatchSession {
    store: RecordStore,
    mapping: ColumnMapping,
    config: InjectionConfig,
    plan: StampPlan,
    reports: Vec<BatchReport>,
    preview_index: usize,
}

impl BatchSession {
    /// Validate the configuration and headers, then build the record store
    ///
    /// Fails before any document is touched: invalid configuration, or in
    /// strict mode any required column missing from the headers.
    pub fn prepare(
        table: &Table,
        config: InjectionConfig,
        schema: &FieldSchema,
    ) -> Result<Self, StampError> {
        let plan = config.plan(schema)?;

        let mapping = if config.is_strict() {
            map_exact(&table.headers, schema, &config.required_columns)?
        } else {
            map_columns(&table.headers, schema)
        };
        let store = RecordStore::build(table, &mapping);

        Ok(Self {
            store,
            mapping,
            config,
            plan,
            reports: Vec::new(),
            preview_index: 0,
        })
    }

    /// Same as `prepare`, reading the table from workbook bytes
    pub fn from_workbook(
        workbook: &[u8],
        config: InjectionConfig,
        schema: &FieldSchema,
    ) -> Result<Self, StampError> {
        let table = read_table_mem(workbook)?;
        Self::prepare(&table, config, schema)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    pub fn plan(&self) -> &StampPlan {
        &self.plan
    }

    /// Reports of every run so far, oldest first
    pub fn reports(&self) -> &[BatchReport] {
        &self.reports
    }

    pub fn latest_report(&self) -> Option<&BatchReport> {
        self.reports.last()
    }

    pub fn preview_index(&self) -> usize {
        self.preview_index
    }

    /// Select the n-th successful output of the latest run for preview
    pub fn select_preview(&mut self, index: usize) -> Option<&ProcessingResult> {
        let count = self.latest_report().map_or(0, |r| r.successes().len());
        if index >= count {
            return None;
        }
        self.preview_index = index;
        self.preview()
    }

    pub fn preview(&self) -> Option<&ProcessingResult> {
        self.latest_report()?
            .successes()
            .get(self.preview_index)
            .copied()
    }

    /// Archive of the latest run under the configured folder
    pub fn archive(&self) -> Result<Option<Vec<u8>>, StampError> {
        self.latest_report()
            .map(|report| report.archive(self.config.archive_folder.as_deref()))
            .transpose()
    }
}

/// Run a batch with the session's plan and return the updated session
pub fn run_batch<F>(mut session: BatchSession, items: &[InputDocument], progress: F) -> BatchSession
where
    F: FnMut(&Progress),
{
    let report = Batch::new(&session.store, PdfStamper::new(&session.plan)).run(items, progress);
    session.reports.push(report);
    session.preview_index = 0;
    session
}
