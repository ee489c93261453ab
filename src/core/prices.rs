use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::types::{Instrument, PriceObservation, PriceSeriesError};

/// Daily prices for the growth and defensive funds on a contiguous calendar.
///
/// Days without a quote take the next quoted price, so a contribution placed
/// on a weekend or holiday executes at the following trading day's price.
/// Lookups that cannot be resolved that way fall back to the last known price.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    first_date: NaiveDate,
    growth: Vec<Option<f64>>,
    defensive: Vec<Option<f64>>,
    last_known_growth: f64,
    last_known_defensive: f64,
}

impl PriceSeries {
    /// Duplicate dates resolve to the last observation supplied for that date.
    pub fn build<I>(observations: I) -> Result<Self, PriceSeriesError>
    where
        I: IntoIterator<Item = PriceObservation>,
    {
        let mut by_date = BTreeMap::new();
        for obs in observations {
            validate_price(obs.date, Instrument::Growth, obs.growth_price)?;
            validate_price(obs.date, Instrument::Defensive, obs.defensive_price)?;
            by_date.insert(obs.date, obs);
        }

        let (Some((&first_date, _)), Some((&last_date, _))) =
            (by_date.first_key_value(), by_date.last_key_value())
        else {
            return Err(PriceSeriesError::Empty);
        };

        let days = (last_date - first_date).num_days() as usize + 1;
        let mut growth = vec![None; days];
        let mut defensive = vec![None; days];
        for (date, obs) in &by_date {
            let idx = (*date - first_date).num_days() as usize;
            growth[idx] = obs.growth_price;
            defensive[idx] = obs.defensive_price;
        }

        fill_from_next(&mut growth);
        fill_from_next(&mut defensive);

        let last_known_growth =
            last_known(&growth).ok_or(PriceSeriesError::NoKnownPrice(Instrument::Growth))?;
        let last_known_defensive =
            last_known(&defensive).ok_or(PriceSeriesError::NoKnownPrice(Instrument::Defensive))?;

        Ok(Self {
            first_date,
            growth,
            defensive,
            last_known_growth,
            last_known_defensive,
        })
    }

    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.first_date + chrono::Days::new(self.growth.len() as u64 - 1)
    }

    /// Number of calendar days covered, gaps included.
    pub fn len(&self) -> usize {
        self.growth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.growth.is_empty()
    }

    pub fn price_at(&self, date: NaiveDate, instrument: Instrument) -> f64 {
        let (column, fallback) = match instrument {
            Instrument::Growth => (&self.growth, self.last_known_growth),
            Instrument::Defensive => (&self.defensive, self.last_known_defensive),
        };

        let offset = (date - self.first_date).num_days();
        let filled = usize::try_from(offset)
            .ok()
            .and_then(|idx| column.get(idx).copied().flatten());

        match filled {
            Some(price) => price,
            None => {
                tracing::trace!(%date, ?instrument, fallback, "price outside known range");
                fallback
            }
        }
    }
}

fn validate_price(
    date: NaiveDate,
    instrument: Instrument,
    price: Option<f64>,
) -> Result<(), PriceSeriesError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(PriceSeriesError::InvalidPrice {
            date,
            instrument,
            price: p,
        }),
        _ => Ok(()),
    }
}

// Walk backwards so each gap picks up the nearest later quote.
fn fill_from_next(column: &mut [Option<f64>]) {
    let mut next = None;
    for slot in column.iter_mut().rev() {
        match slot {
            Some(price) => next = Some(*price),
            None => *slot = next,
        }
    }
}

fn last_known(column: &[Option<f64>]) -> Option<f64> {
    column.iter().rev().find_map(|p| *p)
}
