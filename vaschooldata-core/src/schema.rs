//! Tidy frame contract: the column names and types every tidy table carries.
//!
//! Used when a caller hands us a frame that is supposedly already tidy, so a
//! malformed table fails with a named column instead of deep in a cast.

use crate::coverage::DatasetKind;
use crate::error::DataError;
use polars::prelude::{DataFrame, DataType};
use serde::{Deserialize, Serialize};

/// Logical column types of the tidy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    Int32,
    Float64,
    String,
}

impl SchemaType {
    /// Whether a frame column of `dtype` can stand in for this type.
    ///
    /// Numeric columns accept any numeric dtype and are cast on read; string
    /// columns must already be strings.
    pub fn accepts(&self, dtype: &DataType) -> bool {
        match self {
            SchemaType::String => dtype == &DataType::String,
            SchemaType::Int32 => dtype.is_integer(),
            SchemaType::Float64 => dtype.is_integer() || dtype.is_float() || dtype == &DataType::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
    pub required: bool,
}

const fn field(name: &'static str, dtype: SchemaType, required: bool) -> SchemaField {
    SchemaField {
        name,
        dtype,
        required,
    }
}

/// Columns of a tidy enrollment frame, in output order.
pub const ENROLLMENT_SCHEMA: &[SchemaField] = &[
    field("end_year", SchemaType::Int32, true),
    field("locale_id", SchemaType::String, true),
    field("locale_name", SchemaType::String, true),
    field("locale_level", SchemaType::String, false),
    field("grade_level", SchemaType::String, true),
    field("subgroup", SchemaType::String, true),
    field("n_students", SchemaType::Float64, true),
    field("pct", SchemaType::Float64, false),
];

/// Columns of a tidy graduation frame, in output order.
pub const GRADUATION_SCHEMA: &[SchemaField] = &[
    field("end_year", SchemaType::Int32, true),
    field("locale_id", SchemaType::String, true),
    field("locale_name", SchemaType::String, true),
    field("locale_level", SchemaType::String, false),
    field("subgroup", SchemaType::String, true),
    field("cohort_size", SchemaType::Float64, true),
    field("n_graduates", SchemaType::Float64, true),
    field("n_completers", SchemaType::Float64, false),
    field("grad_rate", SchemaType::Float64, false),
];

/// Result of schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Check `(name, dtype)` pairs against a field list. Extra columns are allowed.
pub fn validate_columns(fields: &[SchemaField], columns: &[(&str, DataType)]) -> SchemaValidation {
    let mut errors = Vec::new();

    for expected in fields {
        match columns.iter().find(|(name, _)| *name == expected.name) {
            Some((_, dtype)) if expected.dtype.accepts(dtype) => {}
            Some((_, dtype)) => errors.push(format!(
                "column '{}': expected {:?}, got {dtype}",
                expected.name, expected.dtype
            )),
            None if expected.required => {
                errors.push(format!("missing required column '{}'", expected.name))
            }
            None => {}
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// The contract for one dataset kind.
#[derive(Debug, Clone, Copy)]
pub struct TidySchema {
    pub fields: &'static [SchemaField],
}

impl TidySchema {
    pub fn enrollment() -> Self {
        Self {
            fields: ENROLLMENT_SCHEMA,
        }
    }

    pub fn graduation() -> Self {
        Self {
            fields: GRADUATION_SCHEMA,
        }
    }

    pub fn for_kind(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Enrollment => Self::enrollment(),
            DatasetKind::Graduation => Self::graduation(),
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn validate(&self, frame: &DataFrame, kind: DatasetKind) -> Result<(), DataError> {
        let columns: Vec<(&str, DataType)> = frame
            .get_columns()
            .iter()
            .map(|c| (c.name().as_str(), c.dtype().clone()))
            .collect();
        let result = validate_columns(self.fields, &columns);
        if result.is_valid {
            Ok(())
        } else {
            Err(DataError::schema(kind, None, result.errors.join("; ")))
        }
    }
}
