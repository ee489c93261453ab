mod engine;
mod loader;
mod prices;
mod solver;
mod summary;
mod types;

pub use engine::{DeriskSchedule, GlidepathEngine};
pub use loader::{LoadError, load_price_series, read_observations};
pub use prices::PriceSeries;
pub use solver::{Rebalance, calculate_rebalance, solve_2x2};
pub use summary::summarize;
pub use types::{
    DeriskStrategy, EngineError, Instrument, LedgerRow, LedgerSummary, PriceObservation,
    PriceSeriesError,
};
