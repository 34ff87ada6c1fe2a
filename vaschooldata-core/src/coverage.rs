//! Year coverage registry and request validation.
//!
//! Coverage is an explicit value: [`YearValidator`] loads it once per dataset
//! kind from a [`CoverageSource`] and only re-queries on [`YearValidator::refresh`].

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Which published dataset a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Enrollment,
    Graduation,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Enrollment, DatasetKind::Graduation];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Enrollment => "enrollment",
            DatasetKind::Graduation => "graduation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enrollment" | "enr" => Some(DatasetKind::Enrollment),
            "graduation" | "grad" => Some(DatasetKind::Graduation),
            _ => None,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of school years (by end year) the provider has published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCoverage")]
pub struct YearCoverage {
    min_year: i32,
    max_year: i32,
}

#[derive(Deserialize)]
struct RawCoverage {
    min_year: i32,
    max_year: i32,
}

impl TryFrom<RawCoverage> for YearCoverage {
    type Error = String;

    fn try_from(raw: RawCoverage) -> Result<Self, Self::Error> {
        YearCoverage::new(raw.min_year, raw.max_year)
    }
}

impl YearCoverage {
    /// Fails unless `min_year < max_year`.
    pub fn new(min_year: i32, max_year: i32) -> Result<Self, String> {
        if min_year >= max_year {
            return Err(format!(
                "min_year ({min_year}) must be less than max_year ({max_year})"
            ));
        }
        Ok(Self { min_year, max_year })
    }

    pub fn min_year(&self) -> i32 {
        self.min_year
    }

    pub fn max_year(&self) -> i32 {
        self.max_year
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.min_year..=self.max_year
    }

    /// Every year in `years` outside the range, sorted and deduplicated.
    pub fn out_of_range(&self, years: &[i32]) -> Vec<i32> {
        years
            .iter()
            .copied()
            .filter(|y| !self.contains(*y))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Coverage for every dataset kind, as published in provider metadata or config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageTable {
    pub enrollment: YearCoverage,
    pub graduation: YearCoverage,
}

impl CoverageTable {
    pub fn get(&self, kind: DatasetKind) -> YearCoverage {
        match kind {
            DatasetKind::Enrollment => self.enrollment,
            DatasetKind::Graduation => self.graduation,
        }
    }
}

impl Default for CoverageTable {
    fn default() -> Self {
        Self {
            enrollment: YearCoverage {
                min_year: 2014,
                max_year: 2024,
            },
            graduation: YearCoverage {
                min_year: 2016,
                max_year: 2024,
            },
        }
    }
}

/// Anything that can answer "which years exist for this kind".
pub trait CoverageSource: Send + Sync {
    fn coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError>;
}

/// Fixed coverage, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCoverage(pub CoverageTable);

impl CoverageSource for StaticCoverage {
    fn coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        Ok(self.0.get(kind))
    }
}

/// Configured per-kind ranges in front of another source.
///
/// Kinds without an override are answered by `fallback`, so a config that pins
/// only enrollment still reads graduation coverage from provider metadata.
pub struct OverrideCoverage {
    overrides: HashMap<DatasetKind, YearCoverage>,
    fallback: Arc<dyn CoverageSource>,
}

impl OverrideCoverage {
    pub fn new(fallback: Arc<dyn CoverageSource>) -> Self {
        Self {
            overrides: HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, kind: DatasetKind, coverage: YearCoverage) -> Self {
        self.overrides.insert(kind, coverage);
        self
    }
}

impl CoverageSource for OverrideCoverage {
    fn coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        match self.overrides.get(&kind) {
            Some(cov) => Ok(*cov),
            None => self.fallback.coverage(kind),
        }
    }
}

/// Validates requested years against memoized coverage.
pub struct YearValidator {
    source: Arc<dyn CoverageSource>,
    loaded: RwLock<HashMap<DatasetKind, YearCoverage>>,
}

impl YearValidator {
    pub fn new(source: Arc<dyn CoverageSource>) -> Self {
        Self {
            source,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Coverage for `kind`, queried from the source on first use only.
    pub fn available_years(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        if let Some(cov) = self.read_loaded(kind) {
            return Ok(cov);
        }
        self.refresh(kind)
    }

    /// Re-query the source and replace the memoized coverage.
    pub fn refresh(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        let cov = self.source.coverage(kind)?;
        tracing::debug!(%kind, min = cov.min_year, max = cov.max_year, "coverage loaded");
        let mut loaded = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loaded.insert(kind, cov);
        Ok(cov)
    }

    fn read_loaded(&self, kind: DatasetKind) -> Option<YearCoverage> {
        self.loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .copied()
    }

    pub fn validate_year(&self, year: i32, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        self.validate_years(&[year], kind)
    }

    /// Checks every year and reports all offenders in a single error.
    pub fn validate_years(&self, years: &[i32], kind: DatasetKind) -> Result<YearCoverage, DataError> {
        if years.is_empty() {
            return Err(DataError::EmptyRequest);
        }
        let cov = self.available_years(kind)?;
        let bad = cov.out_of_range(years);
        if !bad.is_empty() {
            return Err(DataError::YearOutOfRange {
                kind,
                years: bad,
                min_year: cov.min_year,
                max_year: cov.max_year,
            });
        }
        Ok(cov)
    }
}
