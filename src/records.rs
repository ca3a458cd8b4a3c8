//! Record store: document code -> field values
//!
//! Built once per run from a table and a column mapping, then read-only.

use crate::columns::ColumnMapping;
use crate::spreadsheet::Table;
use std::collections::HashMap;

/// One spreadsheet row, keyed by its trimmed code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: String,
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(key: &str, fields: Vec<(String, String)>) -> Self {
        Self {
            key: key.trim().to_string(),
            fields,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Field value; `None` only when the field is not part of the record
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Fields in schema order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// Insertion-ordered map of records. Re-inserting a key replaces the fields
/// and keeps the key's original position.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from table rows
    ///
    /// Rows without a code (missing, empty or whitespace-only) are skipped.
    /// Unmapped or missing data cells become empty strings. Later rows with
    /// the same code overwrite earlier ones.
    pub fn build(table: &Table, mapping: &ColumnMapping) -> Self {
        let mut store = Self::new();
        let mut skipped = 0usize;

        let Some(code_column) = mapping.code_column() else {
            log::warn!("no column mapped to the code field; record store is empty");
            return store;
        };

        for row in 0..table.rows.len() {
            let code = match table.cell(row, code_column).map(str::trim) {
                Some(code) if !code.is_empty() => code,
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let fields = mapping
                .data_fields()
                .map(|(name, column)| {
                    let value = column
                        .and_then(|c| table.cell(row, c))
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default();
                    (name.to_string(), value)
                })
                .collect();

            store.insert(Record::new(code, fields));
        }

        log::info!(
            "record store: {} records from {} rows ({} rows without code)",
            store.len(),
            table.rows.len(),
            skipped
        );

        store
    }

    /// Insert or overwrite by key
    pub fn insert(&mut self, record: Record) {
        match self.index.get(record.key()) {
            Some(&pos) => {
                log::debug!("duplicate code {:?}: later row wins", record.key());
                self.records[pos] = record;
            }
            None => {
                self.index.insert(record.key().to_string(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Look up by key; surrounding whitespace is ignored
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.index.get(key.trim()).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key.trim())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in first-insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{map_columns, FieldSchema};

    fn store_from(headers: &[&str], rows: &[&[&str]]) -> RecordStore {
        let table = Table::from_strings(headers, rows);
        let mapping = map_columns(&table.headers, &FieldSchema::default());
        RecordStore::build(&table, &mapping)
    }

    #[test]
    fn test_trimmed_key_lookup() {
        let store = store_from(
            &["Código", "Sistema", "Subsistema"],
            &[&["  P-001  ", "Agua", "Bombeo"]],
        );
        let record = store.get("P-001").expect("record");
        assert_eq!(record.key(), "P-001");
        assert_eq!(record.get("sistema"), Some("Agua"));
        assert_eq!(record.get("subsistema"), Some("Bombeo"));
        assert!(store.get(" P-001 ").is_some());
    }

    #[test]
    fn test_duplicate_last_wins() {
        let store = store_from(
            &["Código", "Sistema"],
            &[&["A1", "X"], &["B2", "Z"], &["A1", "Y"]],
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("A1").unwrap().get("sistema"), Some("Y"));
        let keys: Vec<&str> = store.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["A1", "B2"]);
    }

    #[test]
    fn test_rows_without_code_skipped() {
        let store = store_from(
            &["Código", "Sistema"],
            &[&["", "orphan"], &["   ", "blank"], &["C3", "kept"]],
        );
        assert_eq!(store.len(), 1);
        assert!(store.contains("C3"));
    }

    #[test]
    fn test_missing_fields_are_empty() {
        // Row shorter than the header, and subsistema unmapped (only 2 columns)
        let store = store_from(&["Código", "Sistema"], &[&["D4"]]);
        let record = store.get("D4").unwrap();
        assert_eq!(record.get("sistema"), Some(""));
        assert_eq!(record.get("subsistema"), Some(""));
    }

    #[test]
    fn test_no_code_column() {
        let table = Table::from_strings(&[], &[&["A1"]]);
        let mapping = map_columns(&table.headers, &FieldSchema::default());
        assert!(RecordStore::build(&table, &mapping).is_empty());
    }
}
