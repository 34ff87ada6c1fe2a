//! Structured error types for the retrieval and tidying pipeline.
//!
//! Every variant carries enough context (dataset kind, year, attempts) to be
//! displayed as-is in CLI output.

use crate::coverage::DatasetKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no years requested")]
    EmptyRequest,

    #[error(
        "{kind} data not available for year(s) {}: valid range is {min_year}-{max_year}",
        join_years(.years)
    )]
    YearOutOfRange {
        kind: DatasetKind,
        years: Vec<i32>,
        min_year: i32,
        max_year: i32,
    },

    #[error("{kind} year coverage unavailable: {reason}")]
    CoverageUnavailable { kind: DatasetKind, reason: String },

    #[error("{kind} source unavailable for {year} after {attempts} attempt(s): {reason}")]
    SourceUnavailable {
        kind: DatasetKind,
        year: i32,
        attempts: u32,
        reason: String,
    },

    #[error("{kind} data for {year} is not published by the provider")]
    NotPublished { kind: DatasetKind, year: i32 },

    #[error("{kind} schema validation failed{}: {reason}", fmt_year(.year))]
    SchemaValidation {
        kind: DatasetKind,
        year: Option<i32>,
        reason: String,
    },

    #[error("{kind} fetch failed for year(s) {}: {source}", join_years(.years))]
    YearsFailed {
        kind: DatasetKind,
        years: Vec<i32>,
        #[source]
        source: Box<DataError>,
    },

    #[error("cache error: {0}")]
    Cache(String),
}

impl DataError {
    pub(crate) fn schema(kind: DatasetKind, year: Option<i32>, reason: impl Into<String>) -> Self {
        DataError::SchemaValidation {
            kind,
            year,
            reason: reason.into(),
        }
    }

    /// Year this error is attributed to, if any.
    pub fn year(&self) -> Option<i32> {
        match self {
            DataError::SourceUnavailable { year, .. } | DataError::NotPublished { year, .. } => {
                Some(*year)
            }
            DataError::SchemaValidation { year, .. } => *year,
            _ => None,
        }
    }
}

fn join_years(years: &[i32]) -> String {
    years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_year(year: &Option<i32>) -> String {
    year.map(|y| format!(" for {y}")).unwrap_or_default()
}

/// Errors from loading or validating [`crate::config::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
