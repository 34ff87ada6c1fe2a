//! Synthetic, deterministic provider for tests, benches and offline demos.
//!
//! Each (kind, year) table is generated from an RNG seeded by BLAKE3 over the
//! kind and year, so the same request always yields the same bytes regardless
//! of call order or thread count. Tables come back as nullable string columns,
//! exactly like a parsed CSV payload, including suppression markers on small
//! school-level cells.

use super::provider::{RawDataProvider, RawDataset};
use crate::coverage::{CoverageSource, CoverageTable, DatasetKind, YearCoverage};
use crate::error::DataError;
use crate::tidy::columns::{
    enrollment_subgroups, graduation_subgroups, LocaleLevel, END_YEAR, GRADES, GRAD_MEASURES, LOCALE_ID, LOCALE_NAME, SEP, STATE_LOCALE_ID,
};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIVISIONS: [&str; 8] = [
    "Accomack County",
    "Albemarle County",
    "Alexandria City",
    "Arlington County",
    "Chesterfield County",
    "Fairfax County",
    "Henrico County",
    "Richmond City",
];

const SCHOOLS_PER_DIVISION: usize = 2;

/// Statewide students per granular grade before grade weights.
const STATE_GRADE_BASE: f64 = 92_000.0;

/// Relative grade sizes, aligned with [`GRADES`] minus `TOTAL`.
const GRADE_WEIGHTS: [f64; 15] = [
    0.40, 0.95, 0.97, 0.98, 0.99, 1.00, 1.00, 1.01, 1.01, 1.00, 1.06, 1.02, 0.98, 0.93, 0.02,
];

/// Approximate share of each demographic subgroup, aligned with
/// [`DEMOGRAPHIC_SUBGROUPS`](crate::tidy::columns::DEMOGRAPHIC_SUBGROUPS). `multiracial` absorbs the race remainder.
const SUBGROUP_SHARES: [f64; 12] = [
    0.512, 0.488, 0.44, 0.21, 0.18, 0.08, 0.003, 0.002, 0.0, 0.40, 0.12, 0.13,
];

const RACE_RANGE: std::ops::Range<usize> = 2..9;
const MULTIRACIAL: usize = 8;

/// Counts below this are suppressed at school level.
const SUPPRESS_BELOW: f64 = 10.0;

struct Locale {
    id: String,
    name: String,
    level: LocaleLevel,
    /// Size relative to the state.
    scale: f64,
}

pub struct FixtureProvider {
    coverage: CoverageTable,
    version: String,
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self {
            coverage: CoverageTable::default(),
            version: "fixture-v1".to_string(),
        }
    }

    pub fn with_coverage(mut self, coverage: CoverageTable) -> Self {
        self.coverage = coverage;
        self
    }

    fn rng(kind: DatasetKind, year: i32) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(&year.to_le_bytes());
        let hash = hasher.finalize();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&hash.as_bytes()[..8]);
        StdRng::seed_from_u64(u64::from_le_bytes(seed))
    }

    /// Locale rows: the state, then each division followed by its schools.
    fn locales(rng: &mut StdRng) -> Vec<Locale> {
        let mut out = vec![Locale {
            id: STATE_LOCALE_ID.to_string(),
            name: "Virginia".to_string(),
            level: LocaleLevel::State,
            scale: 1.0,
        }];
        for (i, division) in DIVISIONS.iter().enumerate() {
            let div_id = format!("{:03}", i + 1);
            let div_scale = rng.gen_range(0.004..0.06);
            out.push(Locale {
                id: div_id.clone(),
                name: division.to_string(),
                level: LocaleLevel::Division,
                scale: div_scale,
            });
            for s in 0..SCHOOLS_PER_DIVISION {
                let stem = division.split(' ').next().unwrap_or(division);
                let kind = if s == 0 { "Elementary" } else { "High" };
                out.push(Locale {
                    id: format!("{div_id}-{:04}", (s + 1) * 10),
                    name: format!("{stem} {kind}"),
                    level: LocaleLevel::School,
                    scale: div_scale * rng.gen_range(0.05..0.2),
                });
            }
        }
        out
    }

    /// Split `total` across demographic subgroups with multiplicative jitter.
    fn split(rng: &mut StdRng, total: f64) -> [f64; 12] {
        let mut out = [0.0; 12];
        for (i, share) in SUBGROUP_SHARES.iter().enumerate() {
            out[i] = (total * share * rng.gen_range(0.9..1.1)).round();
        }
        out[1] = (total - out[0]).max(0.0);
        let races: f64 = RACE_RANGE.filter(|i| *i != MULTIRACIAL).map(|i| out[i]).sum();
        out[MULTIRACIAL] = (total - races).max(0.0);
        out
    }

    fn cell(level: LocaleLevel, demographic: bool, value: f64) -> Option<String> {
        if level == LocaleLevel::School && demographic && value > 0.0 && value < SUPPRESS_BELOW {
            return Some("*".to_string());
        }
        Some(format!("{value:.0}"))
    }

    fn enrollment(&self, year: i32) -> PolarsResult<DataFrame> {
        let mut rng = Self::rng(DatasetKind::Enrollment, year);
        let locales = Self::locales(&mut rng);
        let trend = 1.0 + f64::from(year - 2019) * 0.002;

        let subgroups: Vec<&str> = enrollment_subgroups().collect();
        let granular = &GRADES[..GRADES.len() - 1];
        // cells[subgroup][grade] -> column of per-locale values
        let mut cells = vec![vec![Vec::with_capacity(locales.len()); GRADES.len()]; subgroups.len()];

        for locale in &locales {
            let mut totals = vec![0.0; subgroups.len()];
            for (g, weight) in GRADE_WEIGHTS.iter().enumerate() {
                let count =
                    (STATE_GRADE_BASE * locale.scale * weight * trend * rng.gen_range(0.97..1.03)).round();
                let parts = Self::split(&mut rng, count);

                cells[0][g].push(Self::cell(locale.level, false, count));
                totals[0] += count;
                for (s, value) in parts.iter().enumerate() {
                    cells[s + 1][g].push(Self::cell(locale.level, true, *value));
                    totals[s + 1] += value;
                }
            }
            for (s, total) in totals.iter().enumerate() {
                cells[s][granular.len()].push(Self::cell(locale.level, s > 0, *total));
            }
        }

        let mut columns = Self::identity_columns(&locales, year);
        for (s, subgroup) in subgroups.iter().enumerate() {
            for (g, grade) in GRADES.iter().enumerate() {
                let values = std::mem::take(&mut cells[s][g]);
                columns.push(Column::new(format!("{subgroup}{SEP}{grade}").into(), values));
            }
        }
        DataFrame::new(columns)
    }

    fn graduation(&self, year: i32) -> PolarsResult<DataFrame> {
        let mut rng = Self::rng(DatasetKind::Graduation, year);
        let locales = Self::locales(&mut rng);

        let subgroups: Vec<&str> = graduation_subgroups().collect();
        let mut cells = vec![vec![Vec::with_capacity(locales.len()); GRAD_MEASURES.len()]; subgroups.len()];

        for locale in &locales {
            let cohort = (STATE_GRADE_BASE * 1.05 * locale.scale * rng.gen_range(0.97..1.03)).round();
            let mut cohorts = vec![cohort];
            cohorts.extend(Self::split(&mut rng, cohort));

            for (s, cohort) in cohorts.iter().enumerate() {
                let graduates = (cohort * rng.gen_range(0.82..0.96)).round();
                let completers = (graduates + (cohort - graduates) * rng.gen_range(0.1..0.4)).round();
                for (m, value) in [*cohort, graduates, completers].iter().enumerate() {
                    cells[s][m].push(Self::cell(locale.level, s > 0, *value));
                }
            }
        }

        let mut columns = Self::identity_columns(&locales, year);
        for (s, subgroup) in subgroups.iter().enumerate() {
            for (m, measure) in GRAD_MEASURES.iter().enumerate() {
                let values = std::mem::take(&mut cells[s][m]);
                columns.push(Column::new(format!("{subgroup}{SEP}{measure}").into(), values));
            }
        }
        DataFrame::new(columns)
    }

    fn identity_columns(locales: &[Locale], year: i32) -> Vec<Column> {
        vec![
            Column::new(
                END_YEAR.into(),
                vec![Some(year.to_string()); locales.len()],
            ),
            Column::new(
                LOCALE_ID.into(),
                locales.iter().map(|l| Some(l.id.clone())).collect::<Vec<_>>(),
            ),
            Column::new(
                LOCALE_NAME.into(),
                locales.iter().map(|l| Some(l.name.clone())).collect::<Vec<_>>(),
            ),
        ]
    }
}

impl RawDataProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError> {
        if !self.coverage.get(kind).contains(year) {
            return Err(DataError::NotPublished { kind, year });
        }
        let frame = match kind {
            DatasetKind::Enrollment => self.enrollment(year),
            DatasetKind::Graduation => self.graduation(year),
        }
        .map_err(|e| DataError::schema(kind, Some(year), format!("fixture construction: {e}")))?;

        tracing::debug!(%kind, year, rows = frame.height(), cols = frame.width(), "fixture table");
        Ok(RawDataset::new(kind, year, frame))
    }
}

impl CoverageSource for FixtureProvider {
    fn coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        Ok(self.coverage.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tidy::columns::DEMOGRAPHIC_SUBGROUPS;

    #[test]
    fn tables_are_deterministic() {
        let p = FixtureProvider::new();
        let a = p.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        let b = p.fetch_raw(2023, DatasetKind::Enrollment).unwrap();
        assert!(a.frame.equals_missing(&b.frame));

        let other = p.fetch_raw(2022, DatasetKind::Enrollment).unwrap();
        assert!(!a.frame.equals_missing(&other.frame));
    }

    #[test]
    fn enrollment_layout() {
        let raw = FixtureProvider::new()
            .fetch_raw(2020, DatasetKind::Enrollment)
            .unwrap();
        assert_eq!(raw.height(), 1 + DIVISIONS.len() * (1 + SCHOOLS_PER_DIVISION));
        // identity + 13 subgroups x 16 grades
        assert_eq!(raw.frame.width(), 3 + (1 + DEMOGRAPHIC_SUBGROUPS.len()) * GRADES.len());

        let ids = raw.frame.column(LOCALE_ID).unwrap().str().unwrap().clone();
        assert_eq!(ids.get(0), Some("000"));
        assert_eq!(ids.get(1), Some("001"));
        assert_eq!(ids.get(2), Some("001-0010"));
    }

    #[test]
    fn graduation_layout() {
        let raw = FixtureProvider::new()
            .fetch_raw(2020, DatasetKind::Graduation)
            .unwrap();
        assert_eq!(raw.frame.width(), 3 + 13 * GRAD_MEASURES.len());
        assert!(raw.frame.column("total_graduates__cohort").is_ok());
    }

    #[test]
    fn years_outside_coverage_are_not_published() {
        let p = FixtureProvider::new();
        assert!(matches!(
            p.fetch_raw(2015, DatasetKind::Graduation),
            Err(DataError::NotPublished { year: 2015, .. })
        ));
        assert!(p.fetch_raw(2015, DatasetKind::Enrollment).is_ok());
        assert_eq!(p.coverage(DatasetKind::Enrollment).unwrap().min_year(), 2014);
    }

    #[test]
    fn subgroup_split_is_bounded_by_total() {
        let mut rng = FixtureProvider::rng(DatasetKind::Enrollment, 2000);
        for total in [0.0, 3.0, 75.0, 90_000.0] {
            let parts = FixtureProvider::split(&mut rng, total);
            assert_eq!(parts[0] + parts[1], total);
            assert!(parts.iter().all(|v| *v >= 0.0));
            let races: f64 = parts[RACE_RANGE].iter().sum();
            assert!(races >= total - 0.5, "races {races} < total {total}");
        }
    }
}
