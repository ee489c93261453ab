use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Growth,
    Defensive,
}

/// One row of the fund price file. A `None` price is a gap for that instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub growth_price: Option<f64>,
    pub defensive_price: Option<f64>,
}

impl PriceObservation {
    pub fn new(date: NaiveDate, growth_price: f64, defensive_price: f64) -> Self {
        Self {
            date,
            growth_price: Some(growth_price),
            defensive_price: Some(defensive_price),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeriskStrategy {
    pub target_equity_floor: f64,
    pub derisk_years: u32,
}

impl Default for DeriskStrategy {
    fn default() -> Self {
        Self {
            target_equity_floor: 0.2,
            derisk_years: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRow {
    pub date: NaiveDate,
    pub contribution: f64,
    pub growth_price: f64,
    pub defensive_price: f64,
    pub growth_purchased: f64,
    pub defensive_purchased: f64,
    pub growth_units: f64,
    pub defensive_units: f64,
    pub growth_target: f64,
    pub defensive_target: f64,
    pub growth_value: f64,
    pub defensive_value: f64,
    pub portfolio_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub ending_value: f64,
    pub total_contributions: f64,
    pub return_pct: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("start date {start} must be before retirement date {retire}")]
    InvalidRange { start: NaiveDate, retire: NaiveDate },
    #[error("monthly contribution must be a finite amount >= 0, got {0}")]
    InvalidContribution(f64),
    #[error("target equity floor must be between 0 and 1, got {0}")]
    InvalidFloor(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum PriceSeriesError {
    #[error("no price observations supplied")]
    Empty,
    #[error("no known {0:?} price in the series")]
    NoKnownPrice(Instrument),
    #[error("invalid {instrument:?} price {price} on {date}")]
    InvalidPrice {
        date: NaiveDate,
        instrument: Instrument,
        price: f64,
    },
}
