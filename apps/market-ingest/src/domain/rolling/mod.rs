//! Rolling Symbol State
//!
//! Per-symbol time-windowed buffers of trade prices and sizes. The hot path
//! records every trade here and reads back short-horizon returns and volume
//! sums when building payloads.
//!
//! # Window Rules
//!
//! - Each symbol keeps a price window and a separate volume window.
//! - Both are bounded to the look-back (6 minutes by default), measured from
//!   the timestamp of the trade being recorded.
//! - Trades with `size == 0` contribute a price point but no volume point.
//!
//! # Locking
//!
//! Windows sit behind one `RwLock`, the volatility map behind another. Writers
//! take the write lock for a single append-and-trim; readers take the read
//! lock and compute over a consistent snapshot.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

// =============================================================================
// Constants
// =============================================================================

/// Retained history per symbol, in seconds.
pub const DEFAULT_LOOKBACK_SECS: i64 = 6 * 60;

/// One-minute horizon used for `volume_1m` / `return_1m`.
#[must_use]
pub fn one_minute() -> TimeDelta {
    TimeDelta::seconds(60)
}

/// Five-minute horizon used for `volume_5m` / `return_5m`.
#[must_use]
pub fn five_minutes() -> TimeDelta {
    TimeDelta::seconds(300)
}

// =============================================================================
// Window Storage
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    at: DateTime<Utc>,
    price: f64,
}

#[derive(Debug, Clone, Copy)]
struct VolumePoint {
    at: DateTime<Utc>,
    size: u64,
}

#[derive(Debug, Default)]
struct SymbolWindow {
    prices: VecDeque<PricePoint>,
    volumes: VecDeque<VolumePoint>,
}

impl SymbolWindow {
    fn record(&mut self, price: f64, size: u64, at: DateTime<Utc>, lookback: TimeDelta) {
        self.prices.push_back(PricePoint { at, price });
        if size > 0 {
            self.volumes.push_back(VolumePoint { at, size });
        }

        let cutoff = at - lookback;
        while self.prices.front().is_some_and(|p| p.at < cutoff) {
            self.prices.pop_front();
        }
        while self.volumes.front().is_some_and(|v| v.at < cutoff) {
            self.volumes.pop_front();
        }
    }

    fn volume_after(&self, cutoff: DateTime<Utc>) -> u64 {
        self.volumes
            .iter()
            .filter(|v| v.at > cutoff)
            .map(|v| v.size)
            .sum()
    }

    fn price_at_or_before(&self, cutoff: DateTime<Utc>) -> Option<f64> {
        self.prices
            .iter()
            .rev()
            .find(|p| p.at <= cutoff)
            .map(|p| p.price)
    }
}

// =============================================================================
// Derived Statistics
// =============================================================================

/// Derived statistics for one symbol, read under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    /// Volume traded in the last minute.
    pub volume_1m: u64,
    /// Volume traded in the last five minutes.
    pub volume_5m: u64,
    /// Simple return against the price one minute ago.
    pub return_1m: f64,
    /// Simple return against the price five minutes ago.
    pub return_5m: f64,
    /// Last refreshed annualized volatility, `0.0` when unknown.
    pub volatility: f64,
}

fn simple_return(current: f64, past: Option<f64>) -> f64 {
    match past {
        Some(past) if current > 0.0 && past > 0.0 => (current - past) / past,
        _ => 0.0,
    }
}

// =============================================================================
// Rolling Symbol State
// =============================================================================

/// Shared per-symbol rolling state.
///
/// Constructed once and shared behind an `Arc` by every task that records
/// trades or builds payloads.
#[derive(Debug)]
pub struct RollingSymbolState {
    lookback: TimeDelta,
    windows: RwLock<HashMap<String, SymbolWindow>>,
    volatility: RwLock<HashMap<String, f64>>,
}

impl Default for RollingSymbolState {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingSymbolState {
    /// Create state with the default six-minute look-back.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookback(TimeDelta::seconds(DEFAULT_LOOKBACK_SECS))
    }

    /// Create state with a custom look-back.
    #[must_use]
    pub fn with_lookback(lookback: TimeDelta) -> Self {
        Self {
            lookback,
            windows: RwLock::new(HashMap::new()),
            volatility: RwLock::new(HashMap::new()),
        }
    }

    /// Configured look-back.
    #[must_use]
    pub const fn lookback(&self) -> TimeDelta {
        self.lookback
    }

    /// Record a trade, then evict points older than the look-back.
    pub fn record_trade(&self, symbol: &str, price: f64, size: u64, at: DateTime<Utc>) {
        let mut windows = self.windows.write();
        windows
            .entry(symbol.to_string())
            .or_default()
            .record(price, size, at, self.lookback);
    }

    /// Sum of sizes recorded within `window` of the current wall clock.
    #[must_use]
    pub fn volume_since(&self, symbol: &str, window: TimeDelta) -> u64 {
        self.volume_since_at(symbol, window, Utc::now())
    }

    /// Sum of sizes recorded strictly after `now - window`.
    ///
    /// `window` is clamped to the look-back.
    #[must_use]
    pub fn volume_since_at(&self, symbol: &str, window: TimeDelta, now: DateTime<Utc>) -> u64 {
        let cutoff = now - window.min(self.lookback);
        self.windows
            .read()
            .get(symbol)
            .map_or(0, |w| w.volume_after(cutoff))
    }

    /// Return of `current` against the price `window` ago, using the wall clock.
    #[must_use]
    pub fn return_since(&self, symbol: &str, current: f64, window: TimeDelta) -> f64 {
        self.return_since_at(symbol, current, window, Utc::now())
    }

    /// Return of `current` against the most recent point at or before
    /// `now - window`.
    ///
    /// Yields `0.0` when no such point exists or either price is not positive,
    /// so a warming-up symbol reads as flat.
    #[must_use]
    pub fn return_since_at(
        &self,
        symbol: &str,
        current: f64,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> f64 {
        let cutoff = now - window;
        let past = self
            .windows
            .read()
            .get(symbol)
            .and_then(|w| w.price_at_or_before(cutoff));
        simple_return(current, past)
    }

    /// One- and five-minute statistics plus volatility for `symbol`.
    #[must_use]
    pub fn stats_at(&self, symbol: &str, current: f64, now: DateTime<Utc>) -> WindowStats {
        let volatility = self.volatility(symbol).unwrap_or(0.0);

        let windows = self.windows.read();
        let Some(window) = windows.get(symbol) else {
            return WindowStats {
                volatility,
                ..WindowStats::default()
            };
        };

        let one = one_minute().min(self.lookback);
        let five = five_minutes().min(self.lookback);

        WindowStats {
            volume_1m: window.volume_after(now - one),
            volume_5m: window.volume_after(now - five),
            return_1m: simple_return(current, window.price_at_or_before(now - one_minute())),
            return_5m: simple_return(current, window.price_at_or_before(now - five_minutes())),
            volatility,
        }
    }

    /// Set one symbol's volatility.
    pub fn set_volatility(&self, symbol: &str, value: f64) {
        self.volatility.write().insert(symbol.to_string(), value);
    }

    /// Merge a refreshed volatility map; symbols absent from `values` keep
    /// their previous value.
    pub fn set_volatility_map(&self, values: HashMap<String, f64>) {
        self.volatility.write().extend(values);
    }

    /// Last known volatility for `symbol`.
    #[must_use]
    pub fn volatility(&self, symbol: &str) -> Option<f64> {
        self.volatility.read().get(symbol).copied()
    }

    /// Number of symbols with recorded trades.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.windows.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap()
    }

    fn secs(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    #[test]
    fn return_one_minute_after_price_move() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 10, t0());
        state.record_trade("AAPL", 101.0, 10, t0() + secs(61));

        let r = state.return_since_at("AAPL", 101.0, one_minute(), t0() + secs(61));
        assert!((r - 0.01).abs() < 1e-12);
    }

    #[test]
    fn return_is_zero_without_history() {
        let state = RollingSymbolState::new();
        assert_eq!(state.return_since_at("AAPL", 100.0, one_minute(), t0()), 0.0);

        state.record_trade("AAPL", 100.0, 10, t0());
        // Only point is newer than the cutoff.
        assert_eq!(
            state.return_since_at("AAPL", 105.0, one_minute(), t0() + secs(30)),
            0.0
        );
    }

    #[test]
    fn return_is_zero_for_non_positive_prices() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 0.0, 10, t0());
        let now = t0() + secs(90);
        assert_eq!(state.return_since_at("AAPL", 101.0, one_minute(), now), 0.0);

        state.record_trade("MSFT", 100.0, 10, t0());
        assert_eq!(state.return_since_at("MSFT", 0.0, one_minute(), now), 0.0);
        assert_eq!(state.return_since_at("MSFT", -1.0, one_minute(), now), 0.0);
    }

    #[test]
    fn return_uses_most_recent_point_before_cutoff() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 1, t0());
        state.record_trade("AAPL", 110.0, 1, t0() + secs(20));
        state.record_trade("AAPL", 120.0, 1, t0() + secs(70));

        // Cutoff at t0+30: the t0+20 point wins over t0 even though the
        // t0+70 point is closer in absolute distance.
        let r = state.return_since_at("AAPL", 121.0, one_minute(), t0() + secs(90));
        assert!((r - (121.0 - 110.0) / 110.0).abs() < 1e-12);
    }

    #[test]
    fn return_accepts_point_exactly_at_cutoff() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 50.0, 1, t0());
        let r = state.return_since_at("AAPL", 55.0, one_minute(), t0() + secs(60));
        assert!((r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn volume_sums_and_expires() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 10, t0());
        state.record_trade("AAPL", 100.0, 20, t0() + secs(10));
        state.record_trade("AAPL", 100.0, 30, t0() + secs(20));

        assert_eq!(
            state.volume_since_at("AAPL", five_minutes(), t0() + secs(30)),
            60
        );
        assert_eq!(
            state.volume_since_at("AAPL", five_minutes(), t0() + secs(20 + 301)),
            0
        );
    }

    #[test]
    fn wall_clock_forms_measure_from_now() {
        let state = RollingSymbolState::new();
        let now = Utc::now();
        state.record_trade("AAPL", 200.0, 7, now - secs(90));
        state.record_trade("AAPL", 202.0, 3, now - secs(10));

        assert_eq!(state.volume_since("AAPL", one_minute()), 3);
        assert_eq!(state.volume_since("AAPL", five_minutes()), 10);
        assert!((state.return_since("AAPL", 204.0, one_minute()) - 0.02).abs() < 1e-12);
        assert_eq!(state.return_since("AAPL", 204.0, five_minutes()), 0.0);
    }

    #[test]
    fn zero_size_trade_records_price_only() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 0, t0());
        assert_eq!(state.volume_since_at("AAPL", one_minute(), t0()), 0);

        let r = state.return_since_at("AAPL", 110.0, one_minute(), t0() + secs(60));
        assert!((r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn record_evicts_points_older_than_lookback() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 5, t0());
        state.record_trade("AAPL", 100.0, 7, t0() + secs(DEFAULT_LOOKBACK_SECS + 1));

        let windows = state.windows.read();
        let window = windows.get("AAPL").unwrap();
        assert_eq!(window.prices.len(), 1);
        assert_eq!(window.volumes.len(), 1);
        assert_eq!(window.volumes[0].size, 7);
    }

    #[test]
    fn volume_window_is_clamped_to_lookback() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 5, t0());
        let now = t0() + secs(DEFAULT_LOOKBACK_SECS + 10);
        assert_eq!(state.volume_since_at("AAPL", TimeDelta::hours(1), now), 0);
    }

    #[test]
    fn symbols_are_independent() {
        let state = RollingSymbolState::new();
        state.record_trade("AAPL", 100.0, 10, t0());
        state.record_trade("MSFT", 300.0, 99, t0());
        assert_eq!(state.volume_since_at("AAPL", one_minute(), t0()), 10);
        assert_eq!(state.volume_since_at("MSFT", one_minute(), t0()), 99);
        assert_eq!(state.tracked_symbols(), 2);
    }

    #[test]
    fn volatility_map_merges_last_write_wins() {
        let state = RollingSymbolState::new();
        state.set_volatility("AAPL", 0.2);
        state.set_volatility("MSFT", 0.3);

        state.set_volatility_map(HashMap::from([("AAPL".to_string(), 0.25)]));

        assert_eq!(state.volatility("AAPL"), Some(0.25));
        assert_eq!(state.volatility("MSFT"), Some(0.3));
        assert_eq!(state.volatility("TSLA"), None);
    }

    #[test]
    fn stats_combine_windows_and_volatility() {
        let state = RollingSymbolState::new();
        state.set_volatility("AAPL", 0.42);
        state.record_trade("AAPL", 100.0, 10, t0());
        state.record_trade("AAPL", 101.0, 5, t0() + secs(61));

        let stats = state.stats_at("AAPL", 101.0, t0() + secs(61));
        assert_eq!(stats.volume_1m, 5);
        assert_eq!(stats.volume_5m, 15);
        assert!((stats.return_1m - 0.01).abs() < 1e-12);
        assert_eq!(stats.return_5m, 0.0);
        assert_eq!(stats.volatility, 0.42);
    }

    #[test]
    fn stats_for_unknown_symbol_are_zero() {
        let state = RollingSymbolState::new();
        let stats = state.stats_at("NOPE", 10.0, t0());
        assert_eq!(stats, WindowStats::default());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let state = std::sync::Arc::new(RollingSymbolState::new());
        let handles: Vec<_> = (0..4_i64)
            .map(|i| {
                let state = std::sync::Arc::clone(&state);
                std::thread::spawn(move || {
                    for j in 0..250 {
                        state.record_trade("AAPL", 100.0, 1, t0() + secs(i * 250 + j) / 10);
                        let _ = state.stats_at("AAPL", 100.0, t0());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(state.volume_since_at("AAPL", five_minutes(), t0() + secs(100)) > 0);
    }

    proptest! {
        #[test]
        fn volume_matches_naive_sum(
            gaps in prop::collection::vec(1_i64..40, 1..60),
            sizes in prop::collection::vec(0_u64..500, 60),
            window_secs in 1_i64..400,
        ) {
            let state = RollingSymbolState::new();
            let mut at = t0();
            let mut points = Vec::new();
            for (gap, size) in gaps.iter().zip(sizes.iter()) {
                at += secs(*gap);
                state.record_trade("AAPL", 100.0, *size, at);
                points.push((at, *size));
            }

            let now = at;
            let window = secs(window_secs);
            let cutoff = now - window.min(state.lookback());
            let expected: u64 = points
                .iter()
                .filter(|(t, _)| *t > cutoff)
                .map(|(_, s)| *s)
                .sum();

            prop_assert_eq!(state.volume_since_at("AAPL", window, now), expected);
        }
    }
}
