//! `VaSchoolData`: the public entry point.
//!
//! Wires a provider, a coverage source and tidy options into a
//! [`PanelAssembler`] and exposes the fetch, tidy, coverage and cache
//! operations as plain methods.

use crate::config::Settings;
use crate::coverage::{CoverageSource, DatasetKind, OverrideCoverage, YearCoverage, YearValidator};
use crate::data::{
    CacheEntryStatus, CachedProvider, FixtureProvider, HttpProvider, ParquetCache, RawDataProvider,
    RawDataset,
};
use crate::error::{ConfigError, DataError};
use crate::panel::{PanelAssembler, TidyPanel};
use crate::tidy::{EnrollmentRecord, GraduationRecord, TidyOptions, TidyRecord};
use polars::prelude::DataFrame;
use std::sync::Arc;

/// Input accepted by the tidy entry points.
#[derive(Debug, Clone)]
pub enum TidyInput {
    /// A wide table as published.
    Raw(RawDataset),
    /// A frame that is already in the tidy layout; validated, not reshaped.
    Frame(DataFrame),
}

impl From<RawDataset> for TidyInput {
    fn from(raw: RawDataset) -> Self {
        TidyInput::Raw(raw)
    }
}

impl From<DataFrame> for TidyInput {
    fn from(frame: DataFrame) -> Self {
        TidyInput::Frame(frame)
    }
}

pub struct VaSchoolData {
    assembler: PanelAssembler,
    cache: Option<Arc<ParquetCache>>,
}

impl VaSchoolData {
    /// Remote provider behind the Parquet cache, as described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let http = Arc::new(
            HttpProvider::new(settings.base_url.clone(), settings.retry.clone())
                .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?
                .with_version(settings.data_version.clone()),
        );
        let cache = Arc::new(ParquetCache::new(settings.cache_dir.clone()));
        let provider = Arc::new(CachedProvider::new(
            http.clone(),
            cache.clone(),
            settings.cache_mode,
        ));

        let mut coverage = OverrideCoverage::new(http);
        for kind in DatasetKind::ALL {
            if let Some(cov) = settings.coverage.get(kind) {
                coverage = coverage.with(kind, cov);
            }
        }

        tracing::debug!(
            base_url = %settings.base_url,
            data_version = %settings.data_version,
            cache_dir = %settings.cache_dir.display(),
            mode = ?settings.cache_mode,
            "client configured"
        );

        let client = Self::with_provider(provider, Arc::new(coverage), settings.tidy_options())
            .with_parallelism(settings.parallel)
            .with_cache(cache);
        Ok(client)
    }

    /// Any provider and coverage source, without a cache handle.
    pub fn with_provider(
        provider: Arc<dyn RawDataProvider>,
        coverage: Arc<dyn CoverageSource>,
        opts: TidyOptions,
    ) -> Self {
        Self {
            assembler: PanelAssembler::new(provider, YearValidator::new(coverage), opts),
            cache: None,
        }
    }

    /// Offline client over the deterministic fixture provider.
    pub fn fixture() -> Self {
        let fixture = Arc::new(FixtureProvider::new());
        Self::with_provider(fixture.clone(), fixture, TidyOptions::default())
    }

    /// Attach the cache that [`VaSchoolData::cache_status`] and
    /// [`VaSchoolData::clear_cache`] operate on.
    pub fn with_cache(mut self, cache: Arc<ParquetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.assembler = self.assembler.with_parallelism(parallel);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.assembler.provider().name()
    }

    /// Data version tag the provider stamps on cache entries.
    pub fn provider_version(&self) -> &str {
        self.assembler.provider().version()
    }

    // -- coverage ---------------------------------------------------------

    pub fn get_available_years(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        self.assembler.validator().available_years(kind)
    }

    pub fn get_available_grad_years(&self) -> Result<YearCoverage, DataError> {
        self.get_available_years(DatasetKind::Graduation)
    }

    /// Re-query the coverage source instead of using the memoized range.
    pub fn refresh_coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        self.assembler.validator().refresh(kind)
    }

    // -- enrollment -------------------------------------------------------

    pub fn fetch_enr(&self, year: i32) -> Result<TidyPanel<EnrollmentRecord>, DataError> {
        self.assembler.fetch_one(year)
    }

    pub fn fetch_enr_multi(&self, years: &[i32]) -> Result<TidyPanel<EnrollmentRecord>, DataError> {
        self.assembler.fetch_many(years)
    }

    /// The published wide table, validated for year but not tidied.
    pub fn fetch_enr_wide(&self, year: i32) -> Result<RawDataset, DataError> {
        self.assembler.fetch_raw::<EnrollmentRecord>(year)
    }

    pub fn tidy_enr(&self, input: impl Into<TidyInput>) -> Result<TidyPanel<EnrollmentRecord>, DataError> {
        self.tidy_input(input.into())
    }

    // -- graduation -------------------------------------------------------

    pub fn fetch_graduation(&self, year: i32) -> Result<TidyPanel<GraduationRecord>, DataError> {
        self.assembler.fetch_one(year)
    }

    pub fn fetch_graduation_multi(&self, years: &[i32]) -> Result<TidyPanel<GraduationRecord>, DataError> {
        self.assembler.fetch_many(years)
    }

    pub fn fetch_graduation_wide(&self, year: i32) -> Result<RawDataset, DataError> {
        self.assembler.fetch_raw::<GraduationRecord>(year)
    }

    pub fn tidy_graduation(
        &self,
        input: impl Into<TidyInput>,
    ) -> Result<TidyPanel<GraduationRecord>, DataError> {
        self.tidy_input(input.into())
    }

    fn tidy_input<R: TidyRecord>(&self, input: TidyInput) -> Result<TidyPanel<R>, DataError> {
        match input {
            TidyInput::Raw(raw) => self.assembler.tidy(&raw),
            TidyInput::Frame(frame) => R::from_frame(&frame).map(TidyPanel::new),
        }
    }

    // -- cache ------------------------------------------------------------

    /// Entries in the attached cache; empty when the client has none.
    pub fn cache_status(&self) -> Result<Vec<CacheEntryStatus>, DataError> {
        match &self.cache {
            Some(cache) => cache.status(),
            None => Ok(Vec::new()),
        }
    }

    /// Remove cached entries, all kinds or one. Returns how many were removed.
    pub fn clear_cache(&self, kind: Option<DatasetKind>) -> Result<usize, DataError> {
        match &self.cache {
            Some(cache) => cache.clear(kind),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CacheMode;
    use crate::tidy::LocaleLevel;

    #[test]
    fn fixture_client_reports_default_coverage() {
        let client = VaSchoolData::fixture();
        let enr = client.get_available_years(DatasetKind::Enrollment).unwrap();
        assert_eq!((enr.min_year(), enr.max_year()), (2014, 2024));
        let grad = client.get_available_grad_years().unwrap();
        assert_eq!(grad.min_year(), 2016);
        assert_eq!(client.refresh_coverage(DatasetKind::Graduation).unwrap(), grad);
        assert_eq!(client.provider_name(), "fixture");
        assert_eq!(client.provider_version(), "fixture-v1");
    }

    #[test]
    fn wide_then_tidy_equals_direct_fetch() {
        let client = VaSchoolData::fixture();
        let wide = client.fetch_enr_wide(2021).unwrap();
        assert_eq!(wide.kind, DatasetKind::Enrollment);
        assert_eq!(client.tidy_enr(wide).unwrap(), client.fetch_enr(2021).unwrap());
    }

    #[test]
    fn tidy_accepts_an_exported_frame() {
        let client = VaSchoolData::fixture();
        let panel = client.fetch_graduation(2022).unwrap();
        let frame = panel.to_dataframe().unwrap();
        assert_eq!(client.tidy_graduation(frame).unwrap(), panel);
    }

    #[test]
    fn graduation_panel_has_state_totals() {
        let panel = VaSchoolData::fixture().fetch_graduation(2023).unwrap();
        let state = panel
            .iter()
            .find(|r| r.locale_level == LocaleLevel::State && r.is_aggregate())
            .unwrap();
        let rate = state.grad_rate.unwrap();
        assert!((0.8..=1.0).contains(&rate), "{rate}");
    }

    #[test]
    fn graduation_years_before_coverage_are_rejected() {
        let err = VaSchoolData::fixture().fetch_graduation(2015).unwrap_err();
        assert!(matches!(err, DataError::YearOutOfRange { .. }));
    }

    #[test]
    fn settings_client_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(VaSchoolData::from_settings(&settings).is_err());
    }

    #[test]
    fn settings_with_static_coverage_validate_offline() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_toml(&format!(
            "cache_dir = {:?}\nbase_url = \"http://127.0.0.1:9\"\ncache_mode = \"bypass\"\n\
             [coverage.enrollment]\nmin_year = 2014\nmax_year = 2024\n",
            dir.path().display().to_string()
        ))
        .unwrap();
        assert_eq!(settings.cache_mode, CacheMode::Bypass);

        let client = VaSchoolData::from_settings(&settings).unwrap();
        assert_eq!(client.provider_version(), crate::data::DEFAULT_DATA_VERSION);
        // No network: the out-of-range check is answered from configuration.
        let err = client.fetch_enr_multi(&[1800, 2099]).unwrap_err();
        assert!(matches!(err, DataError::YearOutOfRange { .. }));
        assert!(client.cache_status().unwrap().is_empty());
    }

    #[test]
    fn client_without_cache_has_nothing_to_clear() {
        let client = VaSchoolData::fixture();
        assert!(client.cache_status().unwrap().is_empty());
        assert_eq!(client.clear_cache(None).unwrap(), 0);
    }

    #[test]
    fn settings_data_version_reaches_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            cache_dir: dir.path().to_path_buf(),
            data_version: "2024-09".to_string(),
            ..Settings::default()
        };
        let client = VaSchoolData::from_settings(&settings).unwrap();
        assert_eq!(client.provider_version(), "2024-09");
    }
}
