//! Raw dataset type and the provider trait.
//!
//! The RawDataProvider trait abstracts over data sources (the remote HTTP
//! endpoint, the Parquet cache wrapper, the synthetic fixture) so the panel
//! pipeline never needs to know where a table came from.

use crate::coverage::DatasetKind;
use crate::error::DataError;
use polars::prelude::*;

/// Wide-format table exactly as published for one school year.
///
/// One row per locale, one column per subgroup/grade (or subgroup/measure)
/// combination. Nothing about the column set is trusted until the table
/// passes through the tidy transformer.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub kind: DatasetKind,
    pub end_year: i32,
    pub frame: DataFrame,
}

impl RawDataset {
    pub fn new(kind: DatasetKind, end_year: i32, frame: DataFrame) -> Self {
        Self {
            kind,
            end_year,
            frame,
        }
    }

    /// Number of locale rows.
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }
}

/// Source of raw per-year datasets.
///
/// Implementations handle the specifics of one source. Caching is itself a
/// provider wrapping another, so callers compose rather than branch.
pub trait RawDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Version tag of the published data. Part of every cache key, so bumping
    /// it invalidates previously cached tables.
    fn version(&self) -> &str;

    /// Fetch the wide table for one year.
    fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError>;
}
