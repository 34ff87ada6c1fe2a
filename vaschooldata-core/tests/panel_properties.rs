//! Property tests for multi-year panel assembly.
//!
//! Uses proptest to verify, for arbitrary year sets inside coverage:
//! 1. Additivity: multi-year row count is the sum of single-year counts
//! 2. Year-set equality: the panel holds exactly the requested years
//! 3. Single/multi equivalence: a one-year batch equals the single fetch
//! 4. Aggregated validation: every out-of-range year is reported at once

use proptest::prelude::*;
use std::collections::BTreeSet;
use vaschooldata_core::{DataError, VaSchoolData};

// ── Strategies ───────────────────────────────────────────────────────

fn arb_enr_years() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(2014..=2024i32, 1..5)
}

fn arb_grad_year() -> impl Strategy<Value = i32> {
    2016..=2024i32
}

fn arb_bad_year() -> impl Strategy<Value = i32> {
    prop_oneof![1800..2014i32, 2025..2200i32]
}

// ── 1 & 2. Additivity and year sets ──────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn multi_year_rows_are_the_sum_of_single_years(years in arb_enr_years()) {
        let client = VaSchoolData::fixture();
        let panel = client.fetch_enr_multi(&years).unwrap();

        let distinct: BTreeSet<i32> = years.iter().copied().collect();
        let expected: usize = distinct
            .iter()
            .map(|y| client.fetch_enr(*y).unwrap().len())
            .sum();

        prop_assert_eq!(panel.len(), expected);
        prop_assert_eq!(panel.years(), distinct.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn panel_years_are_non_decreasing(years in arb_enr_years()) {
        let panel = VaSchoolData::fixture().fetch_enr_multi(&years).unwrap();
        let ordered = panel
            .records()
            .windows(2)
            .all(|w| w[0].end_year <= w[1].end_year);
        prop_assert!(ordered);
    }
}

// ── 3. Single vs multi ───────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn one_year_batch_equals_single_fetch(year in arb_grad_year()) {
        let client = VaSchoolData::fixture().with_parallelism(false);
        prop_assert_eq!(
            client.fetch_graduation_multi(&[year]).unwrap(),
            client.fetch_graduation(year).unwrap()
        );
    }
}

// ── 4. Aggregated validation ─────────────────────────────────────────

proptest! {
    #[test]
    fn every_bad_year_is_reported(
        good in arb_enr_years(),
        bad in prop::collection::vec(arb_bad_year(), 1..4),
    ) {
        let mut years = good;
        years.extend(&bad);

        match VaSchoolData::fixture().fetch_enr_multi(&years) {
            Err(DataError::YearOutOfRange { years: reported, .. }) => {
                let expected: Vec<i32> = bad.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
                prop_assert_eq!(reported, expected);
            }
            other => prop_assert!(false, "expected YearOutOfRange, got {:?}", other),
        }
    }
}
