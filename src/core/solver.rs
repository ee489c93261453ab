/// Fractional digits kept on unit purchases.
pub const UNIT_DECIMALS: i32 = 6;

const SINGULAR_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rebalance {
    pub growth_units: f64,
    pub defensive_units: f64,
}

impl Rebalance {
    pub const SKIPPED: Self = Self {
        growth_units: 0.0,
        defensive_units: 0.0,
    };

    pub fn is_skipped(self) -> bool {
        self == Self::SKIPPED
    }
}

/// Units of each fund to buy so that the contribution is spent exactly and the
/// portfolio value ends the period on `target_defensive_weight`.
///
/// Purchases may be negative: a period corrects any drift left by price moves
/// since the previous contribution. Non-positive prices or a singular system
/// skip the period with a zero purchase.
pub fn calculate_rebalance(
    current_growth_units: f64,
    current_defensive_units: f64,
    growth_price: f64,
    defensive_price: f64,
    contribution: f64,
    target_defensive_weight: f64,
) -> Rebalance {
    if growth_price <= 0.0 || defensive_price <= 0.0 {
        return Rebalance::SKIPPED;
    }

    let w = target_defensive_weight;
    // pE*dE + pB*dB = c
    // w*pE*dE - (1-w)*pB*dB = (1-w)*pB*B - w*pE*E
    let matrix = [
        [growth_price, defensive_price],
        [w * growth_price, -(1.0 - w) * defensive_price],
    ];
    let rhs = [
        contribution,
        (1.0 - w) * defensive_price * current_defensive_units
            - w * growth_price * current_growth_units,
    ];

    match solve_2x2(matrix, rhs) {
        Some((growth_units, defensive_units)) => Rebalance {
            growth_units: round_to(growth_units, UNIT_DECIMALS),
            defensive_units: round_to(defensive_units, UNIT_DECIMALS),
        },
        None => Rebalance::SKIPPED,
    }
}

/// Cramer's rule on a 2x2 system; `None` when the matrix is singular or any
/// term is not finite.
pub fn solve_2x2(a: [[f64; 2]; 2], b: [f64; 2]) -> Option<(f64, f64)> {
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    let scale = a
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !det.is_finite() || scale == 0.0 || det.abs() <= SINGULAR_EPS * scale * scale {
        return None;
    }

    let x = (b[0] * a[1][1] - a[0][1] * b[1]) / det;
    let y = (a[0][0] * b[1] - a[1][0] * b[0]) / det;
    if x.is_finite() && y.is_finite() {
        Some((x, y))
    } else {
        None
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
