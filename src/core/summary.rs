use super::solver::round_to;
use super::types::{LedgerRow, LedgerSummary};

/// Headline figures: ending pot and total paid in, both in whole currency
/// units, and the return on contributions as a percentage.
pub fn summarize(ledger: &[LedgerRow]) -> LedgerSummary {
    let ending_value = ledger
        .last()
        .map(|row| row.portfolio_value.round())
        .unwrap_or_default();
    let total_contributions = ledger.iter().map(|row| row.contribution).sum::<f64>().round();
    let return_pct = if total_contributions > 0.0 {
        (round_to(ending_value / total_contributions, 4) - 1.0) * 100.0
    } else {
        0.0
    };

    LedgerSummary {
        ending_value,
        total_contributions,
        return_pct,
    }
}
