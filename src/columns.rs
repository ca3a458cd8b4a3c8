//! Spreadsheet header to canonical field mapping
//!
//! Headers are matched against per-field keyword lists, left to right, with a
//! positional fallback for fields no keyword claimed.

use crate::StampError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Name of the canonical field that holds the record key
pub const CODE_FIELD: &str = "code";

/// A canonical field and the header keywords that identify it
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub keywords: Vec<String>,
}

impl FieldSpec {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Ordered canonical fields. Slot 0 is the code field; the order also
/// defines the positional fallback (slot `p` falls back to column `p`).
#[derive(Debug, Clone)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            fields: vec![
                FieldSpec::new(
                    CODE_FIELD,
                    &["código", "codigo", "code", "id", "número", "numero", "n°", "no"],
                ),
                FieldSpec::new("sistema", &["sistema", "system", "sist"]),
                FieldSpec::new(
                    "subsistema",
                    &["subsistema", "sub sistema", "subsystem", "subsist"],
                ),
            ],
        }
    }
}

impl FieldSchema {
    /// Build a schema from a code field spec followed by data field specs
    pub fn new(code: FieldSpec, data_fields: Vec<FieldSpec>) -> Self {
        let mut fields = Vec::with_capacity(data_fields.len() + 1);
        fields.push(FieldSpec {
            name: CODE_FIELD.to_string(),
            keywords: code.keywords,
        });
        fields.extend(data_fields);
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Canonical field name -> source column index (or unmapped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    slots: Vec<(String, Option<usize>)>,
}

impl ColumnMapping {
    /// Column feeding the given field, if any
    pub fn get(&self, field: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|(name, _)| name == field)
            .and_then(|(_, idx)| *idx)
    }

    pub fn code_column(&self) -> Option<usize> {
        self.get(CODE_FIELD)
    }

    /// Data fields (everything but the code) in schema order
    pub fn data_fields(&self) -> impl Iterator<Item = (&str, Option<usize>)> {
        self.slots
            .iter()
            .filter(|(name, _)| name != CODE_FIELD)
            .map(|(name, idx)| (name.as_str(), *idx))
    }

    /// All slots in schema order
    pub fn slots(&self) -> impl Iterator<Item = (&str, Option<usize>)> {
        self.slots.iter().map(|(name, idx)| (name.as_str(), *idx))
    }

    fn is_claimed(&self, column: usize) -> bool {
        self.slots.iter().any(|(_, idx)| *idx == Some(column))
    }
}

static SEPARATORS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_.\-]+").unwrap());

/// Lowercase, trim and collapse `_`, `-`, `.` and whitespace runs to one space
pub fn normalize_header(header: &str) -> String {
    let lower = header.to_lowercase();
    SEPARATORS_RE.replace_all(&lower, " ").trim().to_string()
}

/// Shortest keyword word that may match as the start of a longer header word
const MIN_PREFIX_CHARS: usize = 4;

/// True when the keyword's words appear as a contiguous word run in the header
///
/// The last keyword word may also start a header word (`sistemas`,
/// `codigoplano`) when it has at least [`MIN_PREFIX_CHARS`] characters.
fn keyword_matches(normalized_header: &str, keyword: &str) -> bool {
    let header_words: Vec<&str> = normalized_header.split(' ').collect();
    let keyword = normalize_header(keyword);
    let keyword_words: Vec<&str> = keyword.split(' ').collect();

    if keyword.is_empty() || keyword_words.len() > header_words.len() {
        return false;
    }

    let Some((last, leading)) = keyword_words.split_last() else {
        return false;
    };
    let allow_prefix = last.chars().count() >= MIN_PREFIX_CHARS;

    header_words.windows(keyword_words.len()).any(|window| {
        let (tail, head) = match window.split_last() {
            Some(split) => split,
            None => return false,
        };
        head == leading && (tail == last || (allow_prefix && tail.starts_with(*last)))
    })
}

/// Map headers to canonical fields
///
/// Keyword pass: each header, left to right, goes to the first field (schema
/// order) whose keywords match and which is still unassigned. Fallback pass:
/// a field still unassigned at schema position `p` takes column `p` when that
/// column exists and no other field holds it.
pub fn map_columns(headers: &[String], schema: &FieldSchema) -> ColumnMapping {
    let mut mapping = ColumnMapping {
        slots: schema.fields.iter().map(|f| (f.name.clone(), None)).collect(),
    };

    for (column, header) in headers.iter().enumerate() {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            continue;
        }

        let claimant = schema.fields.iter().enumerate().find(|(slot, field)| {
            mapping.slots[*slot].1.is_none()
                && field
                    .keywords
                    .iter()
                    .any(|k| keyword_matches(&normalized, k))
        });

        if let Some((slot, _)) = claimant {
            mapping.slots[slot].1 = Some(column);
        }
    }

    for slot in 0..mapping.slots.len() {
        if mapping.slots[slot].1.is_none() && slot < headers.len() && !mapping.is_claimed(slot) {
            mapping.slots[slot].1 = Some(slot);
        }
    }

    for (name, idx) in &mapping.slots {
        match idx {
            Some(i) => log::debug!("column {} ({:?}) -> {}", i, headers[*i], name),
            None => log::debug!("field {} left unmapped", name),
        }
    }

    mapping
}

/// Check that every required header is present exactly (after trimming)
pub fn validate_required(headers: &[String], required: &[String]) -> Result<(), StampError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !headers.iter().any(|h| h.trim() == name.trim()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StampError::Schema { missing })
    }
}

/// Strict mapping: `required[i]` is the exact header for schema slot `i`
pub fn map_exact(
    headers: &[String],
    schema: &FieldSchema,
    required: &[String],
) -> Result<ColumnMapping, StampError> {
    validate_required(headers, required)?;

    let slots = schema
        .fields
        .iter()
        .enumerate()
        .map(|(slot, field)| {
            let column = required
                .get(slot)
                .and_then(|name| headers.iter().position(|h| h.trim() == name.trim()));
            (field.name.clone(), column)
        })
        .collect();

    Ok(ColumnMapping { slots })
}
