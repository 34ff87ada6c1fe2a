//! Raw data acquisition: providers, transport, parsing and the Parquet cache.

pub mod cache;
pub mod cached;
pub mod fixture;
pub mod http;
pub mod parse;
pub mod provider;
pub mod retry;

pub use cache::{CacheEntryStatus, CacheKey, CacheMeta, CacheMode, ParquetCache};
pub use cached::CachedProvider;
pub use fixture::FixtureProvider;
pub use http::{HttpProvider, DEFAULT_BASE_URL, DEFAULT_DATA_VERSION};
pub use provider::{RawDataProvider, RawDataset};
pub use retry::RetryPolicy;
