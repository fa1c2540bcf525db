//! Reference-row ("application data") CSV parsing.
//!
//! Each row describes what one label is expected to say. The service
//! matches an uploaded image to a row by file stem == `label_id`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::MAX_BATCH_ITEMS;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The mandatory identifying column.
pub const COL_LABEL_ID: &str = "label_id";

/// All recognised columns, in canonical order. Anything else is dropped.
pub const RECOGNIZED_COLUMNS: &[&str] = &[
    COL_LABEL_ID,
    "brand_name",
    "class_type",
    "alcohol_content",
    "net_contents",
    "producer_name",
    "producer_address",
];

// ---------------------------------------------------------------------------
// ApplicationRow
// ---------------------------------------------------------------------------

/// One reference row, restricted to the recognised columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRow {
    pub label_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alcohol_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_address: Option<String>,
}

impl ApplicationRow {
    fn set(&mut self, column: &str, value: String) {
        match column {
            COL_LABEL_ID => self.label_id = value,
            "brand_name" => self.brand_name = Some(value),
            "class_type" => self.class_type = Some(value),
            "alcohol_content" => self.alcohol_content = Some(value),
            "net_contents" => self.net_contents = Some(value),
            "producer_name" => self.producer_name = Some(value),
            "producer_address" => self.producer_address = Some(value),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse reference rows from CSV bytes.
///
/// Header names are trimmed and matched case-insensitively. Cells are
/// trimmed; empty cells become `None`. Rows whose `label_id` is empty are
/// dropped. More than [`MAX_BATCH_ITEMS`] retained rows is an error.
pub fn parse_reference_csv(data: &[u8]) -> Result<Vec<ApplicationRow>, CoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| CoreError::Validation(format!("Could not read CSV header: {e}")))?
        .clone();

    // Column position -> recognised column name.
    let mapping: Vec<(usize, &'static str)> = headers
        .iter()
        .enumerate()
        .filter_map(|(pos, name)| {
            let name = name.trim().to_ascii_lowercase();
            RECOGNIZED_COLUMNS
                .iter()
                .find(|c| **c == name)
                .map(|c| (pos, *c))
        })
        .collect();

    if !mapping.iter().any(|(_, c)| *c == COL_LABEL_ID) {
        return Err(CoreError::Validation(format!(
            "Missing required column '{COL_LABEL_ID}'. Recognized columns: {}",
            RECOGNIZED_COLUMNS.join(", ")
        )));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            CoreError::Validation(format!("Malformed CSV at data row {}: {e}", line + 1))
        })?;

        let mut row = ApplicationRow::default();
        for &(pos, column) in &mapping {
            if let Some(value) = record.get(pos).map(str::trim).filter(|v| !v.is_empty()) {
                row.set(column, value.to_string());
            }
        }
        if row.label_id.is_empty() {
            continue;
        }
        rows.push(row);
    }

    if rows.len() > MAX_BATCH_ITEMS {
        return Err(CoreError::Validation(format!(
            "Reference data has {} rows; maximum is {MAX_BATCH_ITEMS}",
            rows.len()
        )));
    }

    tracing::debug!(rows = rows.len(), "Parsed reference rows");
    Ok(rows)
}
