//! Column vocabulary of the wide provider tables and value coercion.

use crate::coverage::DatasetKind;
use crate::data::RawDataset;
use crate::error::DataError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Separator between subgroup and grade/measure in a wide column name.
pub const SEP: &str = "__";

/// `locale_id` of the statewide aggregate row.
pub const STATE_LOCALE_ID: &str = "000";

pub const LOCALE_ID: &str = "locale_id";
pub const LOCALE_NAME: &str = "locale_name";
pub const END_YEAR: &str = "end_year";

/// Descriptive columns some payloads carry; never measures, never an error.
pub const DESCRIPTIVE_COLUMNS: [&str; 4] = ["division_id", "division_name", "school_id", "school_name"];

/// Grade levels in publication order. `TOTAL` is the pre-aggregated all-grades count.
pub const GRADES: [&str; 16] = [
    "PK", "KG", "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "UG",
    "TOTAL",
];

pub const TOTAL_GRADE: &str = "TOTAL";
pub const TOTAL_ENROLLMENT: &str = "total_enrollment";
pub const TOTAL_GRADUATES: &str = "total_graduates";

/// Demographic and program subgroups shared by both datasets.
pub const DEMOGRAPHIC_SUBGROUPS: [&str; 12] = [
    "male",
    "female",
    "white",
    "black",
    "hispanic",
    "asian",
    "native_american",
    "pacific_islander",
    "multiracial",
    "econ_disadv",
    "english_learner",
    "students_with_disabilities",
];

/// Graduation measures, in column order.
pub const GRAD_MEASURES: [&str; 3] = ["cohort", "graduates", "completers"];

pub fn enrollment_subgroups() -> impl Iterator<Item = &'static str> {
    std::iter::once(TOTAL_ENROLLMENT).chain(DEMOGRAPHIC_SUBGROUPS)
}

pub fn graduation_subgroups() -> impl Iterator<Item = &'static str> {
    std::iter::once(TOTAL_GRADUATES).chain(DEMOGRAPHIC_SUBGROUPS)
}

/// Aggregation level of a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocaleLevel {
    State,
    Division,
    School,
}

impl LocaleLevel {
    /// [`STATE_LOCALE_ID`] is the state; other bare digits are a division;
    /// `<division>-<school>` is a school. Other all-zero ids are rejected so
    /// there is exactly one way to spell the state.
    pub fn from_locale_id(id: &str) -> Option<Self> {
        let id = id.trim();
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        if id == STATE_LOCALE_ID {
            return Some(LocaleLevel::State);
        }
        if digits(id) {
            if id.bytes().all(|b| b == b'0') {
                return None;
            }
            return Some(LocaleLevel::Division);
        }
        match id.split_once('-') {
            Some((division, school)) if digits(division) && digits(school) => {
                Some(LocaleLevel::School)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocaleLevel::State => "state",
            LocaleLevel::Division => "division",
            LocaleLevel::School => "school",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "state" => Some(LocaleLevel::State),
            "division" => Some(LocaleLevel::Division),
            "school" => Some(LocaleLevel::School),
            _ => None,
        }
    }
}

impl fmt::Display for LocaleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical grade label: zero-padded numbers, uppercase codes.
pub fn normalize_grade(raw: &str) -> Option<&'static str> {
    let upper = raw.trim().to_ascii_uppercase();
    let candidate = match upper.parse::<u8>() {
        Ok(n) if upper.len() <= 2 => format!("{n:02}"),
        _ => match upper.as_str() {
            "K" => "KG".to_string(),
            "ALL" => TOTAL_GRADE.to_string(),
            _ => upper,
        },
    };
    GRADES.iter().copied().find(|g| *g == candidate)
}

/// What to do with a wide column that maps to no known measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedColumns {
    /// Fail the transform; dropping real data would corrupt totals.
    #[default]
    Reject,
    /// Drop the column with a warning.
    Drop,
}

/// Transformer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TidyOptions {
    pub unmapped: UnmappedColumns,
    /// Cell values meaning "suppressed", treated as not present.
    pub suppression_markers: Vec<String>,
}

impl Default for TidyOptions {
    fn default() -> Self {
        Self {
            unmapped: UnmappedColumns::Reject,
            suppression_markers: vec!["*".into(), "<".into()],
        }
    }
}

/// A wide measure column resolved to `(subgroup, suffix)`.
#[derive(Debug, Clone)]
pub(crate) struct MeasureColumn {
    pub name: String,
    pub subgroup: &'static str,
    pub suffix: &'static str,
}

/// Split the wide columns of `raw` into measure columns.
///
/// `resolve_suffix` maps the part after [`SEP`] to its canonical label.
pub(crate) fn classify_columns(
    raw: &RawDataset,
    opts: &TidyOptions,
    subgroups: &[&'static str],
    resolve_suffix: impl Fn(&str) -> Option<&'static str>,
) -> Result<Vec<MeasureColumn>, DataError> {
    let mut measures = Vec::new();
    let mut unmapped = Vec::new();

    for name in raw.column_names() {
        if [LOCALE_ID, LOCALE_NAME, END_YEAR].contains(&name.as_str())
            || DESCRIPTIVE_COLUMNS.contains(&name.as_str())
        {
            continue;
        }
        let resolved = name.split_once(SEP).and_then(|(subgroup, suffix)| {
            let subgroup = subgroups.iter().copied().find(|s| *s == subgroup)?;
            Some((subgroup, resolve_suffix(suffix)?))
        });
        match resolved {
            Some((subgroup, suffix)) => measures.push(MeasureColumn {
                name,
                subgroup,
                suffix,
            }),
            None => unmapped.push(name),
        }
    }

    if !unmapped.is_empty() {
        match opts.unmapped {
            UnmappedColumns::Reject => {
                return Err(DataError::schema(
                    raw.kind,
                    Some(raw.end_year),
                    format!("unmapped column(s): {}", unmapped.join(", ")),
                ))
            }
            UnmappedColumns::Drop => {
                tracing::warn!(
                    kind = %raw.kind,
                    year = raw.end_year,
                    columns = %unmapped.join(", "),
                    "dropping unmapped columns"
                );
            }
        }
    }

    let mut seen = HashSet::new();
    for m in &measures {
        if !seen.insert((m.subgroup, m.suffix)) {
            return Err(DataError::schema(
                raw.kind,
                Some(raw.end_year),
                format!("column '{}' duplicates {}{SEP}{}", m.name, m.subgroup, m.suffix),
            ));
        }
    }

    if measures.is_empty() {
        return Err(DataError::schema(
            raw.kind,
            Some(raw.end_year),
            "no measure columns",
        ));
    }
    Ok(measures)
}

/// Identity columns of a wide table, validated.
#[derive(Debug)]
pub(crate) struct Locales {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub levels: Vec<LocaleLevel>,
}

pub(crate) fn read_locales(raw: &RawDataset) -> Result<Locales, DataError> {
    let err = |reason: String| DataError::schema(raw.kind, Some(raw.end_year), reason);

    if raw.height() == 0 {
        return Err(err("payload has no locale rows".into()));
    }

    let ids = string_cells(&raw.frame, LOCALE_ID, raw.kind, Some(raw.end_year))?;
    let names = string_cells(&raw.frame, LOCALE_NAME, raw.kind, Some(raw.end_year))?;

    let mut seen = HashSet::new();
    let mut out_ids = Vec::with_capacity(ids.len());
    let mut levels = Vec::with_capacity(ids.len());
    for (row, id) in ids.into_iter().enumerate() {
        let id = id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(format!("null locale_id at row {row}")))?;
        let level = LocaleLevel::from_locale_id(&id)
            .ok_or_else(|| err(format!("unrecognized locale_id '{id}' at row {row}")))?;
        if !seen.insert(id.clone()) {
            return Err(err(format!("duplicate locale_id '{id}'")));
        }
        out_ids.push(id);
        levels.push(level);
    }

    if raw.frame.column(END_YEAR).is_ok() {
        let years = string_cells(&raw.frame, END_YEAR, raw.kind, Some(raw.end_year))?;
        for (row, value) in years.iter().enumerate() {
            let Some(value) = value else { continue };
            let parsed = value.trim().parse::<f64>().ok();
            if parsed != Some(f64::from(raw.end_year)) {
                return Err(err(format!(
                    "row {row} has end_year '{value}', expected {}",
                    raw.end_year
                )));
            }
        }
    }

    Ok(Locales {
        ids: out_ids,
        names: names.into_iter().map(Option::unwrap_or_default).collect(),
        levels,
    })
}

/// Locale identity of one row of an already-tidy frame.
///
/// The id must be well formed and, when the frame carries `locale_level`,
/// the declared level must be the one the id implies.
pub(crate) fn tidy_row_locale(
    id: Option<&str>,
    declared_level: Option<&str>,
    row: usize,
) -> Result<(String, LocaleLevel), String> {
    let id = id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("null locale_id at row {row}"))?;
    let level = LocaleLevel::from_locale_id(id)
        .ok_or_else(|| format!("unrecognized locale_id '{id}' at row {row}"))?;
    if let Some(declared) = declared_level {
        if LocaleLevel::parse(declared.trim()) != Some(level) {
            return Err(format!(
                "row {row}: locale_level '{declared}' does not match locale_id '{id}' ({level})"
            ));
        }
    }
    Ok((id.to_string(), level))
}

/// A tidy-frame cell that must be one of `allowed`.
pub(crate) fn tidy_row_label(
    value: Option<&str>,
    column: &str,
    allowed: impl IntoIterator<Item = &'static str>,
    row: usize,
) -> Result<String, String> {
    let value = value.ok_or_else(|| format!("null {column} at row {row}"))?;
    if !allowed.into_iter().any(|a| a == value) {
        return Err(format!("unknown {column} '{value}' at row {row}"));
    }
    Ok(value.to_string())
}

/// Read a column as nullable strings, casting non-string dtypes.
pub(crate) fn string_cells(
    frame: &DataFrame,
    name: &str,
    kind: DatasetKind,
    year: Option<i32>,
) -> Result<Vec<Option<String>>, DataError> {
    let column = frame
        .column(name)
        .map_err(|_| DataError::schema(kind, year, format!("missing column '{name}'")))?;
    let cast = column
        .cast(&DataType::String)
        .map_err(|e| DataError::schema(kind, year, format!("column '{name}': {e}")))?;
    let values = cast
        .str()
        .map_err(|e| DataError::schema(kind, year, format!("column '{name}': {e}")))?;
    Ok(values.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Coerce a measure column to non-negative counts. `None` means not present.
pub(crate) fn count_cells(
    frame: &DataFrame,
    name: &str,
    locale_ids: &[String],
    opts: &TidyOptions,
    kind: DatasetKind,
    year: i32,
) -> Result<Vec<Option<f64>>, DataError> {
    let err = |row: usize, detail: String| {
        let locale = locale_ids.get(row).map(String::as_str).unwrap_or("?");
        DataError::schema(
            kind,
            Some(year),
            format!("column '{name}', locale '{locale}': {detail}"),
        )
    };

    let column = frame
        .column(name)
        .map_err(|_| DataError::schema(kind, Some(year), format!("missing column '{name}'")))?;

    let values: Vec<Option<f64>> = if column.dtype() == &DataType::String {
        let cells = column
            .str()
            .map_err(|e| DataError::schema(kind, Some(year), format!("column '{name}': {e}")))?;
        let mut out = Vec::with_capacity(cells.len());
        for (row, cell) in cells.into_iter().enumerate() {
            out.push(parse_count(cell, opts).map_err(|d| err(row, d))?);
        }
        out
    } else {
        let cast = column
            .cast(&DataType::Float64)
            .map_err(|e| DataError::schema(kind, Some(year), format!("column '{name}': {e}")))?;
        let floats = cast
            .f64()
            .map_err(|e| DataError::schema(kind, Some(year), format!("column '{name}': {e}")))?;
        floats.into_iter().collect()
    };

    for (row, v) in values.iter().enumerate() {
        if let Some(v) = v {
            if !v.is_finite() {
                return Err(err(row, format!("non-finite value {v}")));
            }
            if *v < 0.0 {
                return Err(err(row, format!("negative count {v}")));
            }
        }
    }
    Ok(values)
}

pub(crate) fn int_cells(frame: &DataFrame, name: &str, kind: DatasetKind) -> Result<Vec<Option<i32>>, DataError> {
    let column = frame
        .column(name)
        .map_err(|_| DataError::schema(kind, None, format!("missing column '{name}'")))?;
    let cast = column
        .cast(&DataType::Int32)
        .map_err(|e| DataError::schema(kind, None, format!("column '{name}': {e}")))?;
    if cast.null_count() > column.null_count() {
        return Err(DataError::schema(
            kind,
            None,
            format!("column '{name}' has values that are not Int32"),
        ));
    }
    let ints = cast
        .i32()
        .map_err(|e| DataError::schema(kind, None, format!("column '{name}': {e}")))?;
    Ok(ints.into_iter().collect())
}

pub(crate) fn float_cells(frame: &DataFrame, name: &str, kind: DatasetKind) -> Result<Vec<Option<f64>>, DataError> {
    let column = frame
        .column(name)
        .map_err(|_| DataError::schema(kind, None, format!("missing column '{name}'")))?;
    let cast = column
        .cast(&DataType::Float64)
        .map_err(|e| DataError::schema(kind, None, format!("column '{name}': {e}")))?;
    if cast.null_count() > column.null_count() {
        return Err(DataError::schema(
            kind,
            None,
            format!("column '{name}' has values that are not Float64"),
        ));
    }
    let floats = cast
        .f64()
        .map_err(|e| DataError::schema(kind, None, format!("column '{name}': {e}")))?;
    Ok(floats.into_iter().collect())
}

fn parse_count(cell: Option<&str>, opts: &TidyOptions) -> Result<Option<f64>, String> {
    let Some(cell) = cell.map(str::trim) else {
        return Ok(None);
    };
    if cell.is_empty() || opts.suppression_markers.iter().any(|m| m == cell) {
        return Ok(None);
    }
    cell.replace(',', "")
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("non-numeric value '{cell}'"))
}
