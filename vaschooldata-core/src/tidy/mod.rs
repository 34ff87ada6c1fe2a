//! Wide-to-long transforms for the two published datasets.

pub mod columns;
pub mod enrollment;
pub mod graduation;

pub use columns::{
    LocaleLevel, TidyOptions, UnmappedColumns, GRADES, STATE_LOCALE_ID, TOTAL_ENROLLMENT,
    TOTAL_GRADE, TOTAL_GRADUATES,
};
pub use enrollment::{enr_grade_aggs, tidy_enrollment, EnrollmentRecord};
pub use graduation::{tidy_graduation, GraduationRecord};

use crate::coverage::DatasetKind;
use crate::data::RawDataset;
use crate::error::DataError;
use polars::prelude::{DataFrame, PolarsResult};

/// A tidy row type the panel pipeline can produce for any year.
///
/// Implementations are pure: the same raw table and options always yield the
/// same records in the same order.
pub trait TidyRecord: Clone + Send + Sync + 'static {
    const KIND: DatasetKind;

    fn end_year(&self) -> i32;

    /// Pivot one raw table.
    fn tidy(raw: &RawDataset, opts: &TidyOptions) -> Result<Vec<Self>, DataError>;

    /// Columnar form with the fixed output column set, even when empty.
    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame>;

    /// Inverse of [`TidyRecord::to_frame`], validating the frame first.
    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, DataError>;
}
