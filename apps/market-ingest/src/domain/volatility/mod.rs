//! Annualized Volatility
//!
//! Sample standard deviation of daily log returns, scaled by the square root
//! of the trading days in a year.

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Annualized volatility from daily closes, oldest first.
///
/// Returns `None` for fewer than two closes so callers leave any previous
/// value untouched. Pairs with a non-positive close are skipped. With fewer
/// than two usable returns, or a non-positive variance, the result is `0.0`.
#[must_use]
pub fn annualized_volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|pair| pair[0] > 0.0 && pair[1] > 0.0)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect();

    if returns.len() < 2 {
        return Some(0.0);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = returns.len() as f64;
    let sum: f64 = returns.iter().sum();
    let sum_sq: f64 = returns.iter().map(|r| r * r).sum();
    let variance = sum.mul_add(-sum / n, sum_sq) / (n - 1.0);

    if !variance.is_finite() || variance <= 0.0 {
        return Some(0.0);
    }

    Some((variance * TRADING_DAYS_PER_YEAR).sqrt())
}
