use std::io;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use thiserror::Error;

use super::prices::PriceSeries;
use super::types::{PriceObservation, PriceSeriesError};

pub const DATE_COLUMN: &str = "date";
pub const GROWTH_COLUMN: &str = "ety_open_price";
pub const DEFENSIVE_COLUMN: &str = "bnd_open_price";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Unparseable date {value:?} on line {line}")]
    InvalidDate { line: u64, value: String },
    #[error(transparent)]
    Series(#[from] PriceSeriesError),
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    date: String,
    ety_open_price: Option<f64>,
    bnd_open_price: Option<f64>,
}

pub fn load_price_series(path: impl AsRef<Path>) -> Result<PriceSeries, LoadError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    let observations = read_observations(file)?;
    let series = PriceSeries::build(observations)?;
    tracing::info!(
        path = %path.display(),
        first = %series.first_date(),
        last = %series.last_date(),
        days = series.len(),
        "loaded fund prices"
    );
    Ok(series)
}

/// Reads `date`, `ety_open_price` and `bnd_open_price`; header case and
/// surrounding whitespace are ignored, as are any other columns. Empty price
/// cells are gaps.
pub fn read_observations<R: io::Read>(reader: R) -> Result<Vec<PriceObservation>, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: StringRecord = rdr.headers()?.iter().map(|h| h.to_lowercase()).collect();
    for column in [DATE_COLUMN, GROWTH_COLUMN, DEFENSIVE_COLUMN] {
        if !headers.iter().any(|h| h == column) {
            return Err(LoadError::MissingColumn(column.to_string()));
        }
    }
    rdr.set_headers(headers);

    let mut observations = Vec::new();
    for result in rdr.deserialize::<PriceRecord>() {
        let record = result?;
        let date = parse_date(&record.date).ok_or_else(|| LoadError::InvalidDate {
            line: observations.len() as u64 + 2,
            value: record.date.clone(),
        })?;
        observations.push(PriceObservation {
            date,
            growth_price: record.ety_open_price,
            defensive_price: record.bnd_open_price,
        });
    }
    Ok(observations)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}
