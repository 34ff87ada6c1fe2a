//! Graduation: wide `{subgroup}__{measure}` columns to one row per
//! (locale, subgroup) carrying cohort, graduate and completer counts.

use super::columns::{
    classify_columns, count_cells, float_cells, graduation_subgroups, int_cells, read_locales,
    string_cells, tidy_row_label, tidy_row_locale, LocaleLevel, MeasureColumn, TidyOptions,
    GRAD_MEASURES, TOTAL_GRADUATES,
};
use super::TidyRecord;
use crate::coverage::DatasetKind;
use crate::data::RawDataset;
use crate::error::DataError;
use crate::schema::TidySchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationRecord {
    pub end_year: i32,
    pub locale_id: String,
    pub locale_name: String,
    pub locale_level: LocaleLevel,
    pub subgroup: String,
    pub cohort_size: Option<f64>,
    pub n_graduates: Option<f64>,
    pub n_completers: Option<f64>,
    /// `n_graduates / cohort_size` when both are published and the cohort is non-empty.
    pub grad_rate: Option<f64>,
}

impl GraduationRecord {
    pub fn is_aggregate(&self) -> bool {
        self.subgroup == TOTAL_GRADUATES
    }
}

fn grad_rate(cohort: Option<f64>, graduates: Option<f64>) -> Option<f64> {
    match (cohort, graduates) {
        (Some(c), Some(g)) if c > 0.0 => Some(g / c),
        _ => None,
    }
}

fn resolve_measure(suffix: &str) -> Option<&'static str> {
    let lower = suffix.trim().to_ascii_lowercase();
    GRAD_MEASURES.iter().copied().find(|m| *m == lower)
}

impl TidyRecord for GraduationRecord {
    const KIND: DatasetKind = DatasetKind::Graduation;

    fn end_year(&self) -> i32 {
        self.end_year
    }

    fn tidy(raw: &RawDataset, opts: &TidyOptions) -> Result<Vec<Self>, DataError> {
        tidy_graduation(raw, opts)
    }

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        let strings = |f: fn(&GraduationRecord) -> &str| records.iter().map(f).collect::<Vec<_>>();
        let floats =
            |f: fn(&GraduationRecord) -> Option<f64>| records.iter().map(f).collect::<Vec<_>>();

        DataFrame::new(vec![
            Column::new(
                "end_year".into(),
                records.iter().map(|r| r.end_year).collect::<Vec<i32>>(),
            ),
            Column::new("locale_id".into(), strings(|r| r.locale_id.as_str())),
            Column::new("locale_name".into(), strings(|r| r.locale_name.as_str())),
            Column::new("locale_level".into(), strings(|r| r.locale_level.as_str())),
            Column::new("subgroup".into(), strings(|r| r.subgroup.as_str())),
            Column::new("cohort_size".into(), floats(|r| r.cohort_size)),
            Column::new("n_graduates".into(), floats(|r| r.n_graduates)),
            Column::new("n_completers".into(), floats(|r| r.n_completers)),
            Column::new("grad_rate".into(), floats(|r| r.grad_rate)),
        ])
    }

    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, DataError> {
        from_tidy_frame(frame)
    }
}

/// Pivot one wide graduation table into tidy records.
pub fn tidy_graduation(raw: &RawDataset, opts: &TidyOptions) -> Result<Vec<GraduationRecord>, DataError> {
    if raw.kind != DatasetKind::Graduation {
        return Err(DataError::schema(
            DatasetKind::Graduation,
            Some(raw.end_year),
            format!("expected a graduation table, got {}", raw.kind),
        ));
    }

    let subgroups: Vec<&'static str> = graduation_subgroups().collect();
    let measures = classify_columns(raw, opts, &subgroups, resolve_measure)?;
    let locales = read_locales(raw)?;

    // Subgroups in first-appearance column order, each with its measure columns.
    let mut groups: Vec<(&'static str, Vec<&MeasureColumn>)> = Vec::new();
    for m in &measures {
        match groups.iter_mut().find(|(s, _)| *s == m.subgroup) {
            Some((_, cols)) => cols.push(m),
            None => groups.push((m.subgroup, vec![m])),
        }
    }

    let mut values = Vec::with_capacity(groups.len());
    for (_, cols) in &groups {
        let mut by_measure: [Option<Vec<Option<f64>>>; 3] = [None, None, None];
        for m in cols {
            let idx = GRAD_MEASURES
                .iter()
                .position(|x| *x == m.suffix)
                .unwrap_or_default();
            by_measure[idx] = Some(count_cells(
                &raw.frame,
                &m.name,
                &locales.ids,
                opts,
                raw.kind,
                raw.end_year,
            )?);
        }
        values.push(by_measure);
    }

    let cell = |col: &Option<Vec<Option<f64>>>, row: usize| col.as_ref().and_then(|v| v[row]);

    let mut records = Vec::new();
    for row in 0..raw.height() {
        for ((subgroup, _), [cohort, graduates, completers]) in groups.iter().zip(&values) {
            let cohort_size = cell(cohort, row);
            let n_graduates = cell(graduates, row);
            let n_completers = cell(completers, row);
            if cohort_size.is_none() && n_graduates.is_none() && n_completers.is_none() {
                continue;
            }
            records.push(GraduationRecord {
                end_year: raw.end_year,
                locale_id: locales.ids[row].clone(),
                locale_name: locales.names[row].clone(),
                locale_level: locales.levels[row],
                subgroup: subgroup.to_string(),
                cohort_size,
                n_graduates,
                n_completers,
                grad_rate: grad_rate(cohort_size, n_graduates),
            });
        }
    }

    tracing::debug!(year = raw.end_year, rows = records.len(), "tidied graduation");
    Ok(records)
}

/// Rebuild records from an already-tidy graduation frame.
///
/// Rows must carry a known subgroup, a `locale_level` (when present) that
/// agrees with the locale id, and a unique (end_year, locale, subgroup) key.
pub fn from_tidy_frame(frame: &DataFrame) -> Result<Vec<GraduationRecord>, DataError> {
    let kind = DatasetKind::Graduation;
    let err = |reason: String| DataError::schema(kind, None, reason);

    TidySchema::for_kind(kind).validate(frame, kind)?;

    let years = int_cells(frame, "end_year", kind)?;
    let ids = string_cells(frame, "locale_id", kind, None)?;
    let names = string_cells(frame, "locale_name", kind, None)?;
    let subgroups = string_cells(frame, "subgroup", kind, None)?;
    let cohorts = float_cells(frame, "cohort_size", kind)?;
    let graduates = float_cells(frame, "n_graduates", kind)?;
    let levels = if frame.column("locale_level").is_ok() {
        string_cells(frame, "locale_level", kind, None)?
    } else {
        vec![None; frame.height()]
    };
    let completers = if frame.column("n_completers").is_ok() {
        float_cells(frame, "n_completers", kind)?
    } else {
        vec![None; frame.height()]
    };

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let end_year = years[row].ok_or_else(|| err(format!("null end_year at row {row}")))?;
        let (locale_id, locale_level) =
            tidy_row_locale(ids[row].as_deref(), levels[row].as_deref(), row).map_err(err)?;
        let subgroup = tidy_row_label(subgroups[row].as_deref(), "subgroup", graduation_subgroups(), row)
            .map_err(err)?;
        for v in [cohorts[row], graduates[row], completers[row]].into_iter().flatten() {
            if !v.is_finite() || v < 0.0 {
                return Err(err(format!("invalid count {v} at row {row}")));
            }
        }
        if !seen.insert((end_year, locale_id.clone(), subgroup.clone())) {
            return Err(err(format!(
                "duplicate row for {end_year}/{locale_id}/{subgroup} at row {row}"
            )));
        }
        records.push(GraduationRecord {
            end_year,
            locale_id,
            locale_name: names[row].clone().unwrap_or_default(),
            locale_level,
            subgroup,
            cohort_size: cohorts[row],
            n_graduates: graduates[row],
            n_completers: completers[row],
            grad_rate: grad_rate(cohorts[row], graduates[row]),
        });
    }
    Ok(records)
}
