//! Enrollment: wide `{subgroup}__{grade}` columns to one row per
//! (locale, grade, subgroup).

use super::columns::{
    classify_columns, count_cells, enrollment_subgroups, float_cells, int_cells, normalize_grade,
    read_locales, string_cells, tidy_row_label, tidy_row_locale, LocaleLevel, TidyOptions, GRADES,
    TOTAL_ENROLLMENT, TOTAL_GRADE,
};
use super::TidyRecord;
use crate::coverage::DatasetKind;
use crate::data::RawDataset;
use crate::error::DataError;
use crate::schema::TidySchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One tidy enrollment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub end_year: i32,
    pub locale_id: String,
    pub locale_name: String,
    pub locale_level: LocaleLevel,
    /// Grade label, `"TOTAL"` for the pre-aggregated all-grades count.
    pub grade_level: String,
    pub subgroup: String,
    pub n_students: f64,
    /// Share of the locale's total enrollment, when that total is published.
    pub pct: Option<f64>,
}

impl EnrollmentRecord {
    /// Pre-aggregated rows are published totals, never sums we derived.
    pub fn is_aggregate(&self) -> bool {
        self.grade_level == TOTAL_GRADE || self.subgroup == TOTAL_ENROLLMENT
    }

    /// The statewide, all-students, all-grades count.
    pub fn is_state_total(&self) -> bool {
        self.locale_level == LocaleLevel::State
            && self.subgroup == TOTAL_ENROLLMENT
            && self.grade_level == TOTAL_GRADE
    }
}

impl TidyRecord for EnrollmentRecord {
    const KIND: DatasetKind = DatasetKind::Enrollment;

    fn end_year(&self) -> i32 {
        self.end_year
    }

    fn tidy(raw: &RawDataset, opts: &TidyOptions) -> Result<Vec<Self>, DataError> {
        tidy_enrollment(raw, opts)
    }

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Column::new(
                "end_year".into(),
                records.iter().map(|r| r.end_year).collect::<Vec<i32>>(),
            ),
            Column::new(
                "locale_id".into(),
                records.iter().map(|r| r.locale_id.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "locale_name".into(),
                records.iter().map(|r| r.locale_name.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "locale_level".into(),
                records.iter().map(|r| r.locale_level.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "grade_level".into(),
                records.iter().map(|r| r.grade_level.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "subgroup".into(),
                records.iter().map(|r| r.subgroup.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "n_students".into(),
                records.iter().map(|r| r.n_students).collect::<Vec<f64>>(),
            ),
            Column::new(
                "pct".into(),
                records.iter().map(|r| r.pct).collect::<Vec<Option<f64>>>(),
            ),
        ])
    }

    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, DataError> {
        from_tidy_frame(frame)
    }
}

/// Pivot one wide enrollment table into tidy records.
///
/// Output order: locale rows as published, then measure columns as published.
pub fn tidy_enrollment(raw: &RawDataset, opts: &TidyOptions) -> Result<Vec<EnrollmentRecord>, DataError> {
    if raw.kind != DatasetKind::Enrollment {
        return Err(DataError::schema(
            DatasetKind::Enrollment,
            Some(raw.end_year),
            format!("expected an enrollment table, got {}", raw.kind),
        ));
    }

    let subgroups: Vec<&'static str> = enrollment_subgroups().collect();
    let measures = classify_columns(raw, opts, &subgroups, normalize_grade)?;
    let locales = read_locales(raw)?;

    let values = measures
        .iter()
        .map(|m| count_cells(&raw.frame, &m.name, &locales.ids, opts, raw.kind, raw.end_year))
        .collect::<Result<Vec<_>, _>>()?;

    let total_col = measures
        .iter()
        .position(|m| m.subgroup == TOTAL_ENROLLMENT && m.suffix == TOTAL_GRADE);

    let mut records = Vec::new();
    for row in 0..raw.height() {
        let locale_total = total_col.and_then(|c| values[c][row]).filter(|t| *t > 0.0);

        for (m, column) in measures.iter().zip(&values) {
            let Some(n_students) = column[row] else {
                continue;
            };
            records.push(EnrollmentRecord {
                end_year: raw.end_year,
                locale_id: locales.ids[row].clone(),
                locale_name: locales.names[row].clone(),
                locale_level: locales.levels[row],
                grade_level: m.suffix.to_string(),
                subgroup: m.subgroup.to_string(),
                n_students,
                pct: locale_total.map(|t| n_students / t),
            });
        }
    }

    tracing::debug!(year = raw.end_year, rows = records.len(), "tidied enrollment");
    Ok(records)
}

/// Rebuild records from an already-tidy enrollment frame.
///
/// Holds the frame to the same guarantees as [`tidy_enrollment`] output:
/// canonical grades and subgroups, levels consistent with locale ids, and
/// one row per (end_year, locale, grade, subgroup).
pub fn from_tidy_frame(frame: &DataFrame) -> Result<Vec<EnrollmentRecord>, DataError> {
    let kind = DatasetKind::Enrollment;
    let err = |reason: String| DataError::schema(kind, None, reason);

    TidySchema::for_kind(kind).validate(frame, kind)?;

    let years = int_cells(frame, "end_year", kind)?;
    let ids = string_cells(frame, "locale_id", kind, None)?;
    let names = string_cells(frame, "locale_name", kind, None)?;
    let grades = string_cells(frame, "grade_level", kind, None)?;
    let subgroups = string_cells(frame, "subgroup", kind, None)?;
    let counts = float_cells(frame, "n_students", kind)?;
    let levels = if frame.column("locale_level").is_ok() {
        string_cells(frame, "locale_level", kind, None)?
    } else {
        vec![None; frame.height()]
    };
    let pcts = if frame.column("pct").is_ok() {
        float_cells(frame, "pct", kind)?
    } else {
        vec![None; frame.height()]
    };

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let end_year = years[row].ok_or_else(|| err(format!("null end_year at row {row}")))?;
        let (locale_id, locale_level) =
            tidy_row_locale(ids[row].as_deref(), levels[row].as_deref(), row).map_err(err)?;
        let grade_level =
            tidy_row_label(grades[row].as_deref(), "grade_level", GRADES, row).map_err(err)?;
        let subgroup = tidy_row_label(subgroups[row].as_deref(), "subgroup", enrollment_subgroups(), row)
            .map_err(err)?;

        let n_students = counts[row].ok_or_else(|| err(format!("null n_students at row {row}")))?;
        if !n_students.is_finite() || n_students < 0.0 {
            return Err(err(format!("invalid n_students {n_students} at row {row}")));
        }
        if let Some(p) = pcts[row] {
            if !p.is_finite() || p < 0.0 {
                return Err(err(format!("invalid pct {p} at row {row}")));
            }
        }

        if !seen.insert((end_year, locale_id.clone(), grade_level.clone(), subgroup.clone())) {
            return Err(err(format!(
                "duplicate row for {end_year}/{locale_id}/{grade_level}/{subgroup} at row {row}"
            )));
        }

        records.push(EnrollmentRecord {
            end_year,
            locale_id,
            locale_name: names[row].clone().unwrap_or_default(),
            locale_level,
            grade_level,
            subgroup,
            n_students,
            pct: pcts[row],
        });
    }
    Ok(records)
}

/// Grade bands derived from granular `total_enrollment` rows.
const GRADE_BANDS: [(&str, &[&str]); 3] = [
    ("K8", &["KG", "01", "02", "03", "04", "05", "06", "07", "08"]),
    ("HS", &["09", "10", "11", "12"]),
    (
        "K12",
        &["KG", "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12"],
    ),
];

/// Sum granular grades into `K8`, `HS` and `K12` bands per year and locale.
///
/// Works on `total_enrollment` rows only and never reads `TOTAL`, so published
/// aggregates and derived bands cannot be double counted against each other.
pub fn enr_grade_aggs(records: &[EnrollmentRecord]) -> Vec<EnrollmentRecord> {
    let mut order: Vec<(i32, &str)> = Vec::new();
    let mut by_locale: HashMap<(i32, &str), (&EnrollmentRecord, HashMap<&str, f64>)> = HashMap::new();

    for r in records.iter().filter(|r| r.subgroup == TOTAL_ENROLLMENT) {
        let key = (r.end_year, r.locale_id.as_str());
        let entry = by_locale.entry(key).or_insert_with(|| {
            order.push(key);
            (r, HashMap::new())
        });
        entry.1.insert(r.grade_level.as_str(), r.n_students);
    }

    let mut out = Vec::new();
    for key in order {
        let (first, grades) = &by_locale[&key];
        for (band, members) in GRADE_BANDS {
            let present: Vec<f64> = members.iter().filter_map(|g| grades.get(g).copied()).collect();
            if present.is_empty() {
                continue;
            }
            out.push(EnrollmentRecord {
                end_year: first.end_year,
                locale_id: first.locale_id.clone(),
                locale_name: first.locale_name.clone(),
                locale_level: first.locale_level,
                grade_level: band.to_string(),
                subgroup: TOTAL_ENROLLMENT.to_string(),
                n_students: present.iter().sum(),
                pct: None,
            });
        }
    }
    out
}
