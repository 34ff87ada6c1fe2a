//! Client settings, loaded from TOML with environment overrides.

use crate::coverage::{DatasetKind, YearCoverage};
use crate::data::{CacheMode, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_DATA_VERSION};
use crate::error::ConfigError;
use crate::tidy::{TidyOptions, UnmappedColumns};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CACHE_DIR: &str = "VASCHOOLDATA_CACHE_DIR";
pub const ENV_BASE_URL: &str = "VASCHOOLDATA_BASE_URL";

/// Optional static coverage, replacing provider metadata per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageOverrides {
    pub enrollment: Option<YearCoverage>,
    pub graduation: Option<YearCoverage>,
}

impl CoverageOverrides {
    pub fn get(&self, kind: DatasetKind) -> Option<YearCoverage> {
        match kind {
            DatasetKind::Enrollment => self.enrollment,
            DatasetKind::Graduation => self.graduation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub base_url: String,
    /// Version tag of the published data; part of every cache path.
    pub data_version: String,
    pub cache_mode: CacheMode,
    /// Fetch the years of a multi-year request on the rayon pool.
    pub parallel: bool,
    pub unmapped_columns: UnmappedColumns,
    pub suppression_markers: Vec<String>,
    pub retry: RetryPolicy,
    pub coverage: CoverageOverrides,
}

impl Default for Settings {
    fn default() -> Self {
        let tidy = TidyOptions::default();
        Self {
            cache_dir: default_cache_dir(),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_version: DEFAULT_DATA_VERSION.to_string(),
            cache_mode: CacheMode::default(),
            parallel: true,
            unmapped_columns: tidy.unmapped,
            suppression_markers: tidy.suppression_markers,
            retry: RetryPolicy::default(),
            coverage: CoverageOverrides::default(),
        }
    }
}

/// `<platform cache dir>/vaschooldata`, or `.vaschooldata-cache` when the
/// platform has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("vaschooldata"))
        .unwrap_or_else(|| PathBuf::from(".vaschooldata-cache"))
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `VASCHOOLDATA_CACHE_DIR` and `VASCHOOLDATA_BASE_URL` if set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.timeout_secs == 0 {
            return Err(ConfigError::Invalid("retry.timeout_secs must be at least 1".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "base_url '{}' is not an http(s) URL",
                self.base_url
            )));
        }
        let version_ok = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
        if self.data_version.is_empty()
            || self.data_version.starts_with('.')
            || !self.data_version.chars().all(version_ok)
        {
            return Err(ConfigError::Invalid(format!(
                "data_version '{}' must be letters, digits, '-', '_' or '.' and not start with '.'",
                self.data_version
            )));
        }
        if self.suppression_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "suppression_markers may not contain blank markers".into(),
            ));
        }
        Ok(())
    }

    pub fn tidy_options(&self) -> TidyOptions {
        TidyOptions {
            unmapped: self.unmapped_columns,
            suppression_markers: self.suppression_markers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.data_version, DEFAULT_DATA_VERSION);
        assert_eq!(s.cache_mode, CacheMode::ReadWrite);
        assert_eq!(s.tidy_options(), TidyOptions::default());
    }

    #[test]
    fn full_file_parses() {
        let s = Settings::from_toml(
            r#"
            cache_dir = "/tmp/vsd"
            base_url = "https://mirror.example.org/v1"
            data_version = "2024-09"
            cache_mode = "refresh"
            parallel = false
            unmapped_columns = "drop"
            suppression_markers = ["*", "<", "n<10"]

            [retry]
            max_attempts = 5
            base_delay_ms = 100
            timeout_secs = 10

            [coverage.enrollment]
            min_year = 2014
            max_year = 2023
            "#,
        )
        .unwrap();

        assert_eq!(s.cache_dir, PathBuf::from("/tmp/vsd"));
        assert_eq!(s.data_version, "2024-09");
        assert_eq!(s.cache_mode, CacheMode::Refresh);
        assert!(!s.parallel);
        assert_eq!(s.tidy_options().unmapped, UnmappedColumns::Drop);
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(
            s.coverage.get(DatasetKind::Enrollment).map(|c| c.max_year()),
            Some(2023)
        );
        assert_eq!(s.coverage.get(DatasetKind::Graduation), None);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let zero = Settings::from_toml("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(zero, ConfigError::Invalid(_)));

        let inverted =
            Settings::from_toml("[coverage.graduation]\nmin_year = 2024\nmax_year = 2016\n").unwrap_err();
        assert!(matches!(inverted, ConfigError::Parse(_)));

        let url = Settings::from_toml("base_url = \"ftp://nope\"\n").unwrap_err();
        assert!(url.to_string().contains("ftp://nope"));

        for version in ["", "../x", "v1/2", ".hidden"] {
            let err = Settings::from_toml(&format!("data_version = {version:?}\n")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{version}: {err}");
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [(ENV_CACHE_DIR, "/var/cache/vsd"), (ENV_BASE_URL, "")].into();
        let s = Settings::default().with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.cache_dir, PathBuf::from("/var/cache/vsd"));
        // blank values are ignored
        assert_eq!(s.base_url, DEFAULT_BASE_URL);
    }
}
