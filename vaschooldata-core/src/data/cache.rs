//! Parquet cache for raw per-year tables.
//!
//! Layout: `{cache_dir}/kind={KIND}/version={VERSION}/{year}.parquet`
//! with a `{year}.meta.json` sidecar next to each table.
//!
//! Features:
//! - Atomic writes (write to a unique .tmp, rename into place)
//! - Per-key write lock; the first writer wins and later writers skip
//! - Integrity validation on load (sidecar checksum, row count, shape)
//! - Quarantine for corrupt files ({filename}.quarantined)

use crate::coverage::DatasetKind;
use crate::error::DataError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one cached table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: DatasetKind,
    pub year: i32,
    pub version: String,
}

impl CacheKey {
    pub fn new(kind: DatasetKind, year: i32, version: impl Into<String>) -> Self {
        Self {
            kind,
            year,
            version: version.into(),
        }
    }
}

/// Metadata sidecar for a cached table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub kind: DatasetKind,
    pub year: i32,
    pub version: String,
    pub rows: usize,
    pub columns: usize,
    pub checksum: String,
    pub provider: String,
    pub cached_at: chrono::NaiveDateTime,
}

/// Cache status for one entry on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryStatus {
    pub kind: DatasetKind,
    pub year: i32,
    pub version: String,
    pub rows: usize,
    pub bytes: u64,
    pub cached_at: Option<chrono::NaiveDateTime>,
}

/// How a cached provider uses the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve hits, write misses.
    #[default]
    ReadWrite,
    /// Ignore existing entries but write fresh ones. Existing entries are
    /// immutable, so a refresh only fills gaps under a new version.
    Refresh,
    /// Never touch the cache.
    Bypass,
}

/// The Parquet cache.
pub struct ParquetCache {
    cache_dir: PathBuf,
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/kind={KIND}/version={VERSION}/`
    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("kind={}", key.kind))
            .join(format!("version={}", key.version))
    }

    fn table_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(format!("{}.parquet", key.year))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(format!("{}.meta.json", key.year))
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.table_path(key).exists() && self.meta_path(key).exists()
    }

    /// Write a table under `key` unless an entry already exists.
    ///
    /// Returns `true` if this call wrote the entry, `false` if an earlier
    /// writer got there first.
    pub fn write(&self, key: &CacheKey, frame: &DataFrame, provider: &str) -> Result<bool, DataError> {
        if frame.height() == 0 {
            return Err(DataError::Cache("refusing to cache an empty table".into()));
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        if self.contains(key) {
            tracing::debug!(kind = %key.kind, year = key.year, "cache entry already present");
            return Ok(false);
        }

        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Cache(format!("failed to create {}: {e}", dir.display())))?;

        let path = self.table_path(key);
        let tmp_path = unique_tmp(&path);
        write_parquet(frame, &tmp_path)?;

        let checksum = match fs::read(&tmp_path) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(DataError::Cache(format!("re-read temp file: {e}")));
            }
        };

        let meta = CacheMeta {
            kind: key.kind,
            year: key.year,
            version: key.version.clone(),
            rows: frame.height(),
            columns: frame.width(),
            checksum,
            provider: provider.to_string(),
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Cache(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(key);
        let meta_tmp = unique_tmp(&meta_path);
        fs::write(&meta_tmp, meta_json).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("meta write: {e}"))
        })?;

        // Table first: a table without a sidecar is not a hit, so readers never
        // see a half-published entry.
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;
        fs::rename(&meta_tmp, &meta_path).map_err(|e| {
            let _ = fs::remove_file(&meta_tmp);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;

        tracing::info!(kind = %key.kind, year = key.year, rows = meta.rows, "cached raw table");
        Ok(true)
    }

    /// Load the table for `key`. Corrupt entries are quarantined and reported
    /// as a miss.
    pub fn load(&self, key: &CacheKey) -> Result<Option<DataFrame>, DataError> {
        if !self.contains(key) {
            return Ok(None);
        }

        let path = self.table_path(key);
        match self.load_and_validate(key, &path) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "quarantining corrupt cache entry");
                let _ = fs::rename(&path, path.with_extension("parquet.quarantined"));
                let _ = fs::remove_file(self.meta_path(key));
                Ok(None)
            }
        }
    }

    fn load_and_validate(&self, key: &CacheKey, path: &Path) -> Result<DataFrame, DataError> {
        let meta = self
            .get_meta(key)
            .ok_or_else(|| DataError::Cache("missing or unreadable sidecar".into()))?;

        let bytes = fs::read(path).map_err(|e| DataError::Cache(format!("read: {e}")))?;
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        if checksum != meta.checksum {
            return Err(DataError::Cache("checksum mismatch".into()));
        }

        let frame = ParquetReader::new(std::io::Cursor::new(bytes))
            .finish()
            .map_err(|e| DataError::Cache(format!("read parquet: {e}")))?;

        if frame.height() == 0 {
            return Err(DataError::Cache("empty parquet file".into()));
        }
        if frame.height() != meta.rows || frame.width() != meta.columns {
            return Err(DataError::Cache(format!(
                "shape {}x{} does not match sidecar {}x{}",
                frame.height(),
                frame.width(),
                meta.rows,
                meta.columns
            )));
        }
        Ok(frame)
    }

    pub fn get_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Every entry currently on disk, sorted by kind, version and year.
    pub fn status(&self) -> Result<Vec<CacheEntryStatus>, DataError> {
        let mut entries = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(entries);
        }

        for kind in DatasetKind::ALL {
            let kind_dir = self.cache_dir.join(format!("kind={kind}"));
            for version_dir in read_subdirs(&kind_dir)? {
                let Some(version) = dir_value(&version_dir, "version=") else {
                    continue;
                };
                for path in read_files(&version_dir)? {
                    if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                        continue;
                    }
                    let Some(year) = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<i32>().ok())
                    else {
                        continue;
                    };
                    let key = CacheKey::new(kind, year, version.clone());
                    let meta = self.get_meta(&key);
                    entries.push(CacheEntryStatus {
                        kind,
                        year,
                        version: version.clone(),
                        rows: meta.as_ref().map(|m| m.rows).unwrap_or(0),
                        bytes: fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                        cached_at: meta.map(|m| m.cached_at),
                    });
                }
            }
        }

        entries.sort_by(|a, b| (a.kind, &a.version, a.year).cmp(&(b.kind, &b.version, b.year)));
        Ok(entries)
    }

    /// Remove cached entries, optionally restricted to one kind. Returns the
    /// number of tables removed.
    pub fn clear(&self, kind: Option<DatasetKind>) -> Result<usize, DataError> {
        let removed = self
            .status()?
            .iter()
            .filter(|e| kind.map_or(true, |k| k == e.kind))
            .count();

        let kinds: Vec<DatasetKind> = match kind {
            Some(k) => vec![k],
            None => DatasetKind::ALL.to_vec(),
        };
        for k in kinds {
            let dir = self.cache_dir.join(format!("kind={k}"));
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .map_err(|e| DataError::Cache(format!("remove {}: {e}", dir.display())))?;
            }
        }
        tracing::info!(removed, "cache cleared");
        Ok(removed)
    }
}

fn unique_tmp(path: &Path) -> PathBuf {
    let id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.{id}.tmp", std::process::id()))
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    Ok(read_files(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}

fn read_files(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| DataError::Cache(format!("read dir: {e}")))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::Cache(format!("dir entry: {e}")))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn dir_value(dir: &Path, prefix: &str) -> Option<String> {
    dir.file_name()?
        .to_str()?
        .strip_prefix(prefix)
        .map(str::to_string)
}

fn write_parquet(frame: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path).map_err(|e| DataError::Cache(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut frame.clone())
        .map_err(|e| {
            let _ = fs::remove_file(path);
            DataError::Cache(format!("write parquet: {e}"))
        })?;
    Ok(())
}
