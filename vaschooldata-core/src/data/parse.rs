//! CSV payload parsing into the wide raw schema.
//!
//! Every cell is kept as a string; type coercion belongs to the tidy
//! transformer so that bad values surface as schema errors at one place.

use crate::coverage::DatasetKind;
use crate::error::DataError;
use polars::prelude::*;
use std::collections::HashSet;

/// Normalize a provider header: trim, lowercase identity names, spaces to `_`.
///
/// Grade suffixes (`__TOTAL`, `__KG`) keep their case.
pub fn normalize_header(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    match trimmed.split_once("__") {
        Some((subgroup, suffix)) => format!(
            "{}__{}",
            snake(subgroup),
            suffix.trim().replace(' ', "_")
        ),
        None => snake(trimmed),
    }
}

fn snake(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Parse a CSV payload into a wide frame of nullable string columns.
pub fn parse_csv(bytes: &[u8], kind: DatasetKind, year: i32) -> Result<DataFrame, DataError> {
    let schema_err = |reason: String| DataError::schema(kind, Some(year), reason);

    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| schema_err(format!("unreadable header row: {e}")))?
        .iter()
        .map(normalize_header)
        .collect();

    if headers.is_empty() {
        return Err(schema_err("payload has no columns".into()));
    }
    let mut seen = HashSet::new();
    for h in &headers {
        if !seen.insert(h.as_str()) {
            return Err(schema_err(format!("duplicate column '{h}'")));
        }
    }

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| schema_err(format!("row {}: {e}", line + 2)))?;
        for (i, value) in record.iter().enumerate() {
            let value = value.trim();
            cells[i].push(if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            });
        }
    }

    let columns: Vec<Column> = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| Column::new(name.as_str().into(), values))
        .collect();

    DataFrame::new(columns).map_err(|e| schema_err(format!("frame construction: {e}")))
}
