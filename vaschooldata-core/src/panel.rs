//! Multi-year panel assembly.
//!
//! Validates a batch of years up front, fetches and tidies each year
//! independently (optionally on the rayon pool), and concatenates the results
//! in ascending year order. Any failing year fails the whole batch; partial
//! panels are never returned.

use crate::coverage::YearValidator;
use crate::data::{RawDataProvider, RawDataset};
use crate::error::DataError;
use crate::tidy::{TidyOptions, TidyRecord};
use polars::prelude::DataFrame;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Tidy records for one or more years, ordered by year.
#[derive(Debug, Clone, PartialEq)]
pub struct TidyPanel<R> {
    records: Vec<R>,
}

impl<R: TidyRecord> TidyPanel<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    /// Distinct years present, ascending.
    pub fn years(&self) -> Vec<i32> {
        self.records
            .iter()
            .map(|r| r.end_year())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    pub fn to_dataframe(&self) -> Result<DataFrame, DataError> {
        R::to_frame(&self.records)
            .map_err(|e| DataError::schema(R::KIND, None, format!("frame construction: {e}")))
    }
}

impl<'a, R> IntoIterator for &'a TidyPanel<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Fetch-validate-tidy pipeline over one provider.
pub struct PanelAssembler {
    provider: Arc<dyn RawDataProvider>,
    validator: YearValidator,
    opts: TidyOptions,
    parallel: bool,
}

impl PanelAssembler {
    pub fn new(provider: Arc<dyn RawDataProvider>, validator: YearValidator, opts: TidyOptions) -> Self {
        Self {
            provider,
            validator,
            opts,
            parallel: true,
        }
    }

    /// Enables or disables fetching years on the rayon pool.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validator(&self) -> &YearValidator {
        &self.validator
    }

    pub fn provider(&self) -> &dyn RawDataProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &TidyOptions {
        &self.opts
    }

    /// Validated raw table for one year.
    pub fn fetch_raw<R: TidyRecord>(&self, year: i32) -> Result<RawDataset, DataError> {
        self.validator.validate_year(year, R::KIND)?;
        self.provider.fetch_raw(year, R::KIND)
    }

    pub fn fetch_one<R: TidyRecord>(&self, year: i32) -> Result<TidyPanel<R>, DataError> {
        let raw = self.fetch_raw::<R>(year)?;
        self.tidy(&raw)
    }

    /// Fetch every year in `years`, returning one panel sorted by year.
    ///
    /// Duplicate years are fetched once. If exactly one year fails its error
    /// is returned as-is; if several fail they are reported together.
    pub fn fetch_many<R: TidyRecord>(&self, years: &[i32]) -> Result<TidyPanel<R>, DataError> {
        self.validator.validate_years(years, R::KIND)?;

        let years: Vec<i32> = years.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        tracing::info!(kind = %R::KIND, years = ?years, parallel = self.parallel, "assembling panel");

        let fetch = |year: &i32| -> (i32, Result<Vec<R>, DataError>) {
            let result = self
                .provider
                .fetch_raw(*year, R::KIND)
                .and_then(|raw| R::tidy(&raw, &self.opts));
            (*year, result)
        };

        let results: Vec<(i32, Result<Vec<R>, DataError>)> = if self.parallel {
            years.par_iter().map(fetch).collect()
        } else {
            years.iter().map(fetch).collect()
        };

        let mut records = Vec::new();
        let mut failed = Vec::new();
        for (year, result) in results {
            match result {
                Ok(rows) => records.extend(rows),
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, year, error = %e, "year failed");
                    failed.push((year, e));
                }
            }
        }

        if failed.len() == 1 {
            let (_, err) = failed.remove(0);
            return Err(err);
        }
        if !failed.is_empty() {
            let years = failed.iter().map(|(y, _)| *y).collect();
            let (_, source) = failed.remove(0);
            return Err(DataError::YearsFailed {
                kind: R::KIND,
                years,
                source: Box::new(source),
            });
        }

        Ok(TidyPanel::new(records))
    }

    /// Tidy a raw table already in hand. No coverage check: the table exists.
    pub fn tidy<R: TidyRecord>(&self, raw: &RawDataset) -> Result<TidyPanel<R>, DataError> {
        if raw.kind != R::KIND {
            return Err(DataError::schema(
                R::KIND,
                Some(raw.end_year),
                format!("expected a {} table, got {}", R::KIND, raw.kind),
            ));
        }
        R::tidy(raw, &self.opts).map(TidyPanel::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{DatasetKind, StaticCoverage};
    use crate::data::FixtureProvider;
    use crate::tidy::{EnrollmentRecord, GraduationRecord};

    fn assembler() -> PanelAssembler {
        let provider = Arc::new(FixtureProvider::new());
        let validator = YearValidator::new(provider.clone());
        PanelAssembler::new(provider, validator, TidyOptions::default())
    }

    /// Fails every odd year; even years come from the fixture.
    struct OddYearsFail(FixtureProvider);

    impl RawDataProvider for OddYearsFail {
        fn name(&self) -> &str {
            "odd-years-fail"
        }

        fn version(&self) -> &str {
            "test"
        }

        fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError> {
            if year % 2 == 1 {
                return Err(DataError::SourceUnavailable {
                    kind,
                    year,
                    attempts: 3,
                    reason: "HTTP 503".into(),
                });
            }
            self.0.fetch_raw(year, kind)
        }
    }

    fn failing_assembler() -> PanelAssembler {
        PanelAssembler::new(
            Arc::new(OddYearsFail(FixtureProvider::new())),
            YearValidator::new(Arc::new(StaticCoverage::default())),
            TidyOptions::default(),
        )
    }

    #[test]
    fn multi_year_panel_is_sorted_and_deduplicated() {
        let panel: TidyPanel<EnrollmentRecord> = assembler().fetch_many(&[2022, 2020, 2022]).unwrap();
        assert_eq!(panel.years(), vec![2020, 2022]);

        let first_2022 = panel.iter().position(|r| r.end_year == 2022).unwrap();
        assert!(panel.records()[..first_2022].iter().all(|r| r.end_year == 2020));
        assert!(panel.records()[first_2022..].iter().all(|r| r.end_year == 2022));
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let years = [2019, 2020, 2021];
        let par: TidyPanel<GraduationRecord> = assembler().fetch_many(&years).unwrap();
        let seq: TidyPanel<GraduationRecord> =
            assembler().with_parallelism(false).fetch_many(&years).unwrap();
        assert_eq!(par, seq);
    }

    #[test]
    fn single_failure_is_returned_verbatim() {
        let err = failing_assembler()
            .fetch_many::<EnrollmentRecord>(&[2020, 2021, 2022])
            .unwrap_err();
        assert!(matches!(err, DataError::SourceUnavailable { year: 2021, .. }));
    }

    #[test]
    fn multiple_failures_are_aggregated() {
        let err = failing_assembler()
            .fetch_many::<EnrollmentRecord>(&[2019, 2020, 2021])
            .unwrap_err();
        match err {
            DataError::YearsFailed { years, source, .. } => {
                assert_eq!(years, vec![2019, 2021]);
                assert_eq!(source.year(), Some(2019));
            }
            other => panic!("expected YearsFailed, got {other:?}"),
        }
    }

    #[test]
    fn validation_happens_before_any_fetch() {
        let err = failing_assembler()
            .fetch_many::<EnrollmentRecord>(&[2021, 1800])
            .unwrap_err();
        assert!(matches!(err, DataError::YearOutOfRange { .. }));
    }

    #[test]
    fn tidy_rejects_the_wrong_kind() {
        let a = assembler();
        let raw = a.fetch_raw::<GraduationRecord>(2020).unwrap();
        assert!(a.tidy::<EnrollmentRecord>(&raw).is_err());
        assert!(!a.tidy::<GraduationRecord>(&raw).unwrap().is_empty());
    }

    #[test]
    fn empty_panel_still_has_columns() {
        let panel: TidyPanel<EnrollmentRecord> = TidyPanel::new(Vec::new());
        let frame = panel.to_dataframe().unwrap();
        assert_eq!(frame.height(), 0);
        assert!(frame.column("n_students").is_ok());
    }
}
