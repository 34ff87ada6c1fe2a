//! vaschooldata core: retrieval, caching and tidying of Virginia public-school
//! enrollment and graduation statistics.
//!
//! This crate contains the whole acquisition pipeline:
//! - Year coverage and request validation
//! - Raw data providers (HTTP with retry, Parquet cache wrapper, fixture)
//! - Wide-to-long tidy transforms for enrollment and graduation
//! - Multi-year panel assembly
//! - The [`VaSchoolData`] client facade and its TOML settings

pub mod client;
pub mod config;
pub mod coverage;
pub mod data;
pub mod error;
pub mod panel;
pub mod schema;
pub mod tidy;

pub use client::{TidyInput, VaSchoolData};
pub use config::Settings;
pub use coverage::{DatasetKind, YearCoverage};
pub use error::{ConfigError, DataError};
pub use panel::TidyPanel;
pub use tidy::{enr_grade_aggs, EnrollmentRecord, GraduationRecord, LocaleLevel};
