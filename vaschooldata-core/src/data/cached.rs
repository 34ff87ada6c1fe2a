//! Cache-then-remote provider.
//!
//! Wraps any [`RawDataProvider`] with the Parquet cache:
//! 1. If a cached table exists for `(kind, year, version)` → use it
//! 2. Otherwise fetch from the inner provider and cache the result
//!
//! A failed cache write is logged and the fetched table is still returned.

use super::cache::{CacheKey, CacheMode, ParquetCache};
use super::provider::{RawDataProvider, RawDataset};
use crate::coverage::DatasetKind;
use crate::error::DataError;
use std::sync::Arc;

pub struct CachedProvider {
    inner: Arc<dyn RawDataProvider>,
    cache: Arc<ParquetCache>,
    mode: CacheMode,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn RawDataProvider>, cache: Arc<ParquetCache>, mode: CacheMode) -> Self {
        Self { inner, cache, mode }
    }

    pub fn cache(&self) -> &ParquetCache {
        &self.cache
    }

    fn key(&self, year: i32, kind: DatasetKind) -> CacheKey {
        CacheKey::new(kind, year, self.inner.version())
    }
}

impl RawDataProvider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError> {
        let key = self.key(year, kind);

        if self.mode == CacheMode::ReadWrite {
            match self.cache.load(&key) {
                Ok(Some(frame)) => {
                    tracing::debug!(%kind, year, "cache hit");
                    return Ok(RawDataset::new(kind, year, frame));
                }
                Ok(None) => tracing::debug!(%kind, year, "cache miss"),
                Err(e) => tracing::warn!(%kind, year, error = %e, "cache read failed"),
            }
        }

        let raw = self.inner.fetch_raw(year, kind)?;

        if self.mode != CacheMode::Bypass {
            if let Err(e) = self.cache.write(&key, &raw.frame, self.inner.name()) {
                tracing::warn!(%kind, year, error = %e, "cache write failed; returning fetched table");
            }
        }

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl RawDataProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn version(&self) -> &str {
            "test"
        }

        fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let frame = df!(
                "locale_id" => &["000"],
                "locale_name" => &["Virginia"],
                "total_enrollment__TOTAL" => &[f64::from(year)],
            )
            .unwrap();
            Ok(RawDataset::new(kind, year, frame))
        }
    }

    fn setup(mode: CacheMode) -> (tempfile::TempDir, Arc<CountingProvider>, CachedProvider) {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedProvider::new(inner.clone(), Arc::new(ParquetCache::new(dir.path())), mode);
        (dir, inner, cached)
    }

    #[test]
    fn second_fetch_is_served_from_cache() {
        let (_dir, inner, cached) = setup(CacheMode::ReadWrite);

        let first = cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        let second = cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(first.frame.equals(&second.frame));
        assert_eq!(second.end_year, 2023);
    }

    #[test]
    fn keys_are_separated_by_kind_and_year() {
        let (_dir, inner, cached) = setup(CacheMode::ReadWrite);
        cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        cached.fetch_raw(2022, DatasetKind::Enrollment).unwrap();
        cached.fetch_raw(2023, DatasetKind::Graduation).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn refresh_skips_reads_but_writes() {
        let (_dir, inner, cached) = setup(CacheMode::Refresh);
        cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cache().status().unwrap().len(), 1);
    }

    #[test]
    fn bypass_never_writes() {
        let (_dir, inner, cached) = setup(CacheMode::Bypass);
        cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        cached.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.cache().status().unwrap().is_empty());
    }
}
