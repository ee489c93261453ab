use chrono::{Datelike, Months, NaiveDate};

use super::prices::PriceSeries;
use super::solver::{UNIT_DECIMALS, calculate_rebalance, round_to};
use super::types::{DeriskStrategy, EngineError, Instrument, LedgerRow};

const VALUE_DECIMALS: i32 = 2;

/// Target defensive weight as a function of the contribution date.
///
/// Zero up to and including `start_derisk_date`, then rising by
/// `per_month_increment` for every whole month elapsed, capped at 1.
#[derive(Debug, Clone, Copy)]
pub struct DeriskSchedule {
    start_derisk_date: NaiveDate,
    per_month_increment: f64,
}

impl DeriskSchedule {
    pub fn new(retire: NaiveDate, strategy: DeriskStrategy) -> Self {
        let derisk_months = strategy.derisk_years.saturating_mul(12);
        let start_derisk_date = retire
            .checked_sub_months(Months::new(derisk_months))
            .unwrap_or(NaiveDate::MIN);
        let denom = derisk_months.max(1) as f64;
        let per_month_increment = round_to(
            (1.0 - strategy.target_equity_floor) / denom,
            UNIT_DECIMALS,
        )
        .max(0.0);

        Self {
            start_derisk_date,
            per_month_increment,
        }
    }

    pub fn start_derisk_date(&self) -> NaiveDate {
        self.start_derisk_date
    }

    pub fn per_month_increment(&self) -> f64 {
        self.per_month_increment
    }

    pub fn defensive_weight(&self, date: NaiveDate) -> f64 {
        if date <= self.start_derisk_date {
            return 0.0;
        }
        let months = whole_months_between(self.start_derisk_date, date);
        (months as f64 * self.per_month_increment).min(1.0)
    }
}

/// Monthly accumulation under a glidepath. Each engine is one scenario; the
/// running holdings live only inside [`GlidepathEngine::accumulate`].
#[derive(Debug, Clone)]
pub struct GlidepathEngine {
    start: NaiveDate,
    retire: NaiveDate,
    monthly_contribution: f64,
    strategy: DeriskStrategy,
}

impl GlidepathEngine {
    pub fn new(
        start: NaiveDate,
        retire: NaiveDate,
        monthly_contribution: f64,
    ) -> Result<Self, EngineError> {
        if start >= retire {
            return Err(EngineError::InvalidRange { start, retire });
        }
        if !monthly_contribution.is_finite() || monthly_contribution < 0.0 {
            return Err(EngineError::InvalidContribution(monthly_contribution));
        }

        Ok(Self {
            start,
            retire,
            monthly_contribution,
            strategy: DeriskStrategy::default(),
        })
    }

    pub fn set_derisk_strategy(
        &mut self,
        target_equity_floor: f64,
        derisk_years: u32,
    ) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&target_equity_floor) {
            return Err(EngineError::InvalidFloor(target_equity_floor));
        }
        self.strategy = DeriskStrategy {
            target_equity_floor,
            derisk_years,
        };
        Ok(())
    }

    pub fn with_derisk_strategy(
        mut self,
        target_equity_floor: f64,
        derisk_years: u32,
    ) -> Result<Self, EngineError> {
        self.set_derisk_strategy(target_equity_floor, derisk_years)?;
        Ok(self)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn retire(&self) -> NaiveDate {
        self.retire
    }

    pub fn monthly_contribution(&self) -> f64 {
        self.monthly_contribution
    }

    pub fn strategy(&self) -> DeriskStrategy {
        self.strategy
    }

    pub fn derisk_schedule(&self) -> DeriskSchedule {
        DeriskSchedule::new(self.retire, self.strategy)
    }

    /// `start + i` months for every `i` that stays on or before retirement.
    pub fn contribution_dates(&self) -> Vec<NaiveDate> {
        (0u32..)
            .map_while(|i| self.start.checked_add_months(Months::new(i)))
            .take_while(|date| *date <= self.retire)
            .collect()
    }

    pub fn accumulate(&self, prices: &PriceSeries) -> Vec<LedgerRow> {
        let schedule = self.derisk_schedule();
        let dates = self.contribution_dates();
        let contribution = self.monthly_contribution;

        let mut growth_units = 0.0;
        let mut defensive_units = 0.0;
        let mut rows = Vec::with_capacity(dates.len());
        let mut skipped = 0usize;

        for date in dates {
            let growth_price = prices.price_at(date, Instrument::Growth);
            let defensive_price = prices.price_at(date, Instrument::Defensive);
            let defensive_target = schedule.defensive_weight(date);

            let purchase = calculate_rebalance(
                growth_units,
                defensive_units,
                growth_price,
                defensive_price,
                contribution,
                defensive_target,
            );
            if purchase.is_skipped() && contribution > 0.0 {
                skipped += 1;
                tracing::debug!(
                    %date,
                    growth_price,
                    defensive_price,
                    defensive_target,
                    "rebalance skipped"
                );
            }

            growth_units += purchase.growth_units;
            defensive_units += purchase.defensive_units;

            let growth_value = growth_units * growth_price;
            let defensive_value = defensive_units * defensive_price;
            rows.push(LedgerRow {
                date,
                contribution,
                growth_price,
                defensive_price,
                growth_purchased: purchase.growth_units,
                defensive_purchased: purchase.defensive_units,
                growth_units,
                defensive_units,
                growth_target: 1.0 - defensive_target,
                defensive_target,
                growth_value,
                defensive_value,
                portfolio_value: round_to(growth_value + defensive_value, VALUE_DECIMALS),
            });
        }

        tracing::info!(
            start = %self.start,
            retire = %self.retire,
            periods = rows.len(),
            skipped,
            ending_value = rows.last().map(|r| r.portfolio_value).unwrap_or_default(),
            "accumulation complete"
        );
        rows
    }
}

// Whole calendar months from `from` to `to`, where a month counts once
// `from + n months` (clamped to month end) has been reached.
fn whole_months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to <= from {
        return 0;
    }
    let span = (to.year() - from.year()) as i64 * 12 + to.month() as i64 - from.month() as i64;
    let mut months = span.max(0) as u32;
    while months > 0
        && from
            .checked_add_months(Months::new(months))
            .is_none_or(|reached| reached > to)
    {
        months -= 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PriceObservation;
    use chrono::{Days, Weekday};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    // Weekday quotes only, so most month starts hit the weekend fill path.
    fn synthetic_series(first: NaiveDate, last: NaiveDate) -> PriceSeries {
        let mut observations = Vec::new();
        let mut date = first;
        let mut i = 0.0_f64;
        while date <= last {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                let growth = 100.0 * 1.0002_f64.powf(i) * (1.0 + 0.08 * (i / 45.0).sin());
                let defensive = 50.0 * 1.00005_f64.powf(i) * (1.0 + 0.01 * (i / 90.0).cos());
                observations.push(PriceObservation::new(date, growth, defensive));
            }
            date = date + Days::new(1);
            i += 1.0;
        }
        PriceSeries::build(observations).expect("valid series")
    }

    fn scenario_engine() -> GlidepathEngine {
        GlidepathEngine::new(d(1990, 1, 1), d(2020, 1, 1), 500.0)
            .expect("valid range")
            .with_derisk_strategy(0.2, 15)
            .expect("valid strategy")
    }

    #[test]
    fn rejects_start_after_retirement() {
        let err = GlidepathEngine::new(d(2025, 1, 1), d(2020, 1, 1), 500.0)
            .expect_err("must reject inverted range");
        assert_eq!(
            err,
            EngineError::InvalidRange {
                start: d(2025, 1, 1),
                retire: d(2020, 1, 1),
            }
        );
    }

    #[test]
    fn rejects_equal_start_and_retirement() {
        let err = GlidepathEngine::new(d(2020, 1, 1), d(2020, 1, 1), 500.0)
            .expect_err("must reject empty range");
        assert!(matches!(err, EngineError::InvalidRange { .. }));
    }

    #[test]
    fn rejects_negative_contribution_and_bad_floor() {
        assert!(matches!(
            GlidepathEngine::new(d(2000, 1, 1), d(2001, 1, 1), -1.0),
            Err(EngineError::InvalidContribution(_))
        ));
        let mut engine =
            GlidepathEngine::new(d(2000, 1, 1), d(2001, 1, 1), 100.0).expect("valid range");
        assert_eq!(
            engine.set_derisk_strategy(1.5, 10),
            Err(EngineError::InvalidFloor(1.5))
        );
    }

    #[test]
    fn contribution_dates_include_both_endpoints() {
        let engine = scenario_engine();
        let dates = engine.contribution_dates();
        assert_eq!(dates.len(), 361);
        assert_eq!(dates.first(), Some(&d(1990, 1, 1)));
        assert_eq!(dates.last(), Some(&d(2020, 1, 1)));
    }

    #[test]
    fn contribution_dates_stop_before_unaligned_retirement() {
        let engine = GlidepathEngine::new(d(2020, 1, 15), d(2020, 3, 1), 100.0).expect("valid");
        assert_eq!(engine.contribution_dates(), vec![d(2020, 1, 15), d(2020, 2, 15)]);
    }

    #[test]
    fn month_end_start_stays_anchored() {
        let engine = GlidepathEngine::new(d(2021, 1, 31), d(2021, 4, 30), 100.0).expect("valid");
        assert_eq!(
            engine.contribution_dates(),
            vec![d(2021, 1, 31), d(2021, 2, 28), d(2021, 3, 31), d(2021, 4, 30)]
        );
    }

    #[test]
    fn scenario_weights_follow_the_glidepath() {
        let schedule = scenario_engine().derisk_schedule();
        let inc = schedule.per_month_increment();

        assert_eq!(schedule.start_derisk_date(), d(2005, 1, 1));
        assert_approx(inc, 0.004444);
        assert_eq!(schedule.defensive_weight(d(2005, 1, 1)), 0.0);
        assert_eq!(schedule.defensive_weight(d(1995, 6, 1)), 0.0);
        assert_approx(schedule.defensive_weight(d(2005, 2, 1)), inc);
        assert_approx(schedule.defensive_weight(d(2010, 1, 1)), 60.0 * inc);

        let terminal = schedule.defensive_weight(d(2020, 1, 1));
        assert_eq!(terminal, (180.0 * inc).min(1.0));
        assert!(schedule.defensive_weight(d(2019, 1, 1)) < 0.8);
        assert!(terminal - schedule.defensive_weight(d(2019, 12, 1)) <= inc + EPS);
        assert!((0.8 - terminal).abs() <= 180.0 * 5e-7);
    }

    #[test]
    fn zero_year_window_never_derisks() {
        let engine = GlidepathEngine::new(d(2000, 1, 1), d(2005, 1, 1), 250.0)
            .expect("valid range")
            .with_derisk_strategy(0.2, 0)
            .expect("valid strategy");
        let prices = synthetic_series(d(1999, 12, 1), d(2005, 2, 1));
        let ledger = engine.accumulate(&prices);

        assert_eq!(ledger.len(), 61);
        for row in &ledger {
            assert_eq!(row.defensive_target, 0.0);
            assert_eq!(row.growth_target, 1.0);
            assert_eq!(row.defensive_units, 0.0);
        }
    }

    #[test]
    fn partial_months_do_not_count() {
        assert_eq!(whole_months_between(d(2020, 1, 15), d(2020, 2, 14)), 0);
        assert_eq!(whole_months_between(d(2020, 1, 15), d(2020, 2, 15)), 1);
        assert_eq!(whole_months_between(d(2020, 1, 31), d(2020, 2, 29)), 1);
        assert_eq!(whole_months_between(d(2020, 3, 1), d(2020, 1, 1)), 0);
    }

    #[test]
    fn scenario_ledger_is_on_target_and_spends_exactly() {
        let engine = scenario_engine();
        let prices = synthetic_series(d(1989, 12, 1), d(2020, 2, 1));
        let ledger = engine.accumulate(&prices);
        assert_eq!(ledger.len(), 361);

        for row in &ledger {
            let spent =
                row.growth_price * row.growth_purchased + row.defensive_price * row.defensive_purchased;
            assert!((spent - row.contribution).abs() <= 1e-4 * row.contribution);

            let total = row.growth_value + row.defensive_value;
            let share = row.defensive_value / total;
            assert!(
                (share - row.defensive_target).abs() <= 1e-4,
                "{}: share {share} target {}",
                row.date,
                row.defensive_target
            );
            assert_approx(row.growth_target + row.defensive_target, 1.0);
        }

        let last = ledger.last().expect("non-empty ledger");
        assert_eq!(last.date, d(2020, 1, 1));
        assert_approx(last.defensive_target, engine.derisk_schedule().defensive_weight(last.date));
    }

    #[test]
    fn values_are_marked_to_market_each_period() {
        let engine = GlidepathEngine::new(d(2021, 1, 1), d(2021, 3, 1), 100.0)
            .expect("valid range")
            .with_derisk_strategy(0.2, 0)
            .expect("valid strategy");
        let prices = PriceSeries::build(vec![
            PriceObservation::new(d(2021, 1, 1), 10.0, 1.0),
            PriceObservation::new(d(2021, 2, 1), 20.0, 1.0),
            PriceObservation::new(d(2021, 3, 1), 5.0, 1.0),
        ])
        .expect("valid series");

        let ledger = engine.accumulate(&prices);
        assert_approx(ledger[0].growth_units, 10.0);
        assert_approx(ledger[1].growth_units, 15.0);
        assert_approx(ledger[1].portfolio_value, 300.0);
        assert_approx(ledger[2].growth_units, 35.0);
        assert_approx(ledger[2].growth_value, 175.0);
        assert_approx(ledger[2].portfolio_value, 175.0);
    }

    #[test]
    fn zero_price_period_is_skipped_and_holdings_carry_forward() {
        let engine = GlidepathEngine::new(d(2021, 1, 1), d(2021, 3, 1), 100.0)
            .expect("valid range")
            .with_derisk_strategy(0.5, 0)
            .expect("valid strategy");
        let prices = PriceSeries::build(vec![
            PriceObservation::new(d(2021, 1, 1), 10.0, 10.0),
            PriceObservation::new(d(2021, 2, 1), 0.0, 10.0),
            PriceObservation::new(d(2021, 3, 1), 10.0, 10.0),
        ])
        .expect("valid series");

        let ledger = engine.accumulate(&prices);
        assert_eq!(ledger.len(), 3);

        let skipped = &ledger[1];
        assert_eq!(skipped.growth_purchased, 0.0);
        assert_eq!(skipped.defensive_purchased, 0.0);
        assert_eq!(skipped.growth_units, ledger[0].growth_units);
        assert_eq!(skipped.defensive_units, ledger[0].defensive_units);
        assert_eq!(skipped.growth_value, 0.0);

        assert!(ledger[2].growth_purchased > 0.0);
        assert_approx(ledger[2].growth_units, 20.0);
    }

    #[test]
    fn contributions_past_price_history_use_last_known_price() {
        let engine = GlidepathEngine::new(d(2021, 1, 1), d(2021, 4, 1), 100.0)
            .expect("valid range")
            .with_derisk_strategy(0.2, 0)
            .expect("valid strategy");
        let prices = PriceSeries::build(vec![
            PriceObservation::new(d(2021, 1, 1), 10.0, 5.0),
            PriceObservation::new(d(2021, 1, 20), 25.0, 5.0),
        ])
        .expect("valid series");

        let ledger = engine.accumulate(&prices);
        assert_eq!(ledger.len(), 4);
        for row in &ledger[1..] {
            assert_eq!(row.growth_price, 25.0);
            assert_approx(row.growth_purchased, 4.0);
        }
    }

    #[test]
    fn independent_engines_do_not_share_holdings() {
        let prices = synthetic_series(d(2009, 12, 1), d(2012, 2, 1));
        let engine = GlidepathEngine::new(d(2010, 1, 1), d(2012, 1, 1), 300.0)
            .expect("valid range")
            .with_derisk_strategy(0.4, 1)
            .expect("valid strategy");

        let first = engine.accumulate(&prices);
        let second = engine.accumulate(&prices);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.growth_units, b.growth_units);
            assert_eq!(a.portfolio_value, b.portfolio_value);
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_defensive_weight_is_monotonic_and_bounded(
            floor_bp in 0u32..=10_000,
            derisk_years in 0u32..45,
            retire_year in 1990i32..2060,
            span_days in 1u32..20_000,
            step_days in 1u32..120
        ) {
            let strategy = DeriskStrategy {
                target_equity_floor: floor_bp as f64 / 10_000.0,
                derisk_years,
            };
            let retire = d(retire_year, 1, 1);
            let schedule = DeriskSchedule::new(retire, strategy);

            let mut date = retire - Days::new(span_days as u64);
            let end = retire + Days::new(400);
            let mut previous = 0.0;
            while date <= end {
                let weight = schedule.defensive_weight(date);
                prop_assert!((0.0..=1.0).contains(&weight));
                prop_assert!(weight >= previous);
                previous = weight;
                date = date + Days::new(step_days as u64);
            }
        }

        #[test]
        fn prop_zero_window_weight_is_zero_up_to_retirement(
            floor_bp in 0u32..=10_000,
            offset_days in 0u32..15_000
        ) {
            let retire = d(2030, 6, 1);
            let schedule = DeriskSchedule::new(retire, DeriskStrategy {
                target_equity_floor: floor_bp as f64 / 10_000.0,
                derisk_years: 0,
            });
            prop_assert_eq!(schedule.defensive_weight(retire - Days::new(offset_days as u64)), 0.0);
        }

        #[test]
        fn prop_ledger_has_one_row_per_month_inclusive(
            start_year in 1990i32..2010,
            start_month in 1u32..=12,
            months in 1u32..240
        ) {
            let start = d(start_year, start_month, 1);
            let retire = start + Months::new(months);
            let engine = GlidepathEngine::new(start, retire, 100.0).expect("valid range");
            let prices = PriceSeries::build(vec![PriceObservation::new(start, 10.0, 5.0)])
                .expect("valid series");
            let ledger = engine.accumulate(&prices);
            prop_assert_eq!(ledger.len(), months as usize + 1);
            prop_assert!(ledger.windows(2).all(|w| w[0].date < w[1].date));
        }
    }
}
