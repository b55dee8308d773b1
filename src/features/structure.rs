//! Market structure - fractal pivots and liquidity sweeps
//!
//! A 5-bar fractal is a bar whose high (low) is strictly above (below) the
//! two bars on each side. It is only confirmed once both right-hand bars have
//! closed, so the newest bar that can carry a confirmed fractal is `len - 3`.

use serde::{Deserialize, Serialize};

use crate::types::{Bar, Direction, MarketPhase, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractalKind {
    /// Swing high
    High,
    /// Swing low
    Low,
}

/// A confirmed pivot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub kind: FractalKind,
    /// Position of the pivot bar in the slice it was found in
    pub index: usize,
    /// Open time of the pivot bar
    pub open_time: i64,
    pub price: f64,
}

/// Fractal centred on `index`, if any.
///
/// An outside bar that is both a swing high and a swing low reports the high.
pub fn detect_fractal(bars: &[Bar], index: usize) -> Option<Fractal> {
    if index < 2 || index + 2 >= bars.len() {
        return None;
    }

    let pivot = &bars[index];
    let neighbours = [
        &bars[index - 2],
        &bars[index - 1],
        &bars[index + 1],
        &bars[index + 2],
    ];

    if neighbours.iter().all(|b| pivot.high > b.high) {
        return Some(Fractal {
            kind: FractalKind::High,
            index,
            open_time: pivot.open_time,
            price: pivot.high,
        });
    }
    if neighbours.iter().all(|b| pivot.low < b.low) {
        return Some(Fractal {
            kind: FractalKind::Low,
            index,
            open_time: pivot.open_time,
            price: pivot.low,
        });
    }
    None
}

/// Most recent fractal confirmed by the last closed bar
pub fn latest_confirmed_fractal(bars: &[Bar]) -> Option<Fractal> {
    if bars.len() < 5 {
        return None;
    }
    detect_fractal(bars, bars.len() - 3)
}

/// Stop-hunt on the last bar.
///
/// Wicking under the prior `lookback` low and closing back above it swept
/// sell-side liquidity (favours BUY); the mirror image favours SELL.
pub fn detect_liquidity_sweep(bars: &[Bar], lookback: usize) -> Option<Direction> {
    if lookback == 0 || bars.len() < lookback + 1 {
        return None;
    }

    let last = &bars[bars.len() - 1];
    let prior = &bars[bars.len() - 1 - lookback..bars.len() - 1];
    let prior_low = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let prior_high = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

    let swept_low = last.low < prior_low && last.close > prior_low;
    let swept_high = last.high > prior_high && last.close < prior_high;

    match (swept_low, swept_high) {
        (true, false) => Some(Direction::Buy),
        (false, true) => Some(Direction::Sell),
        _ => None,
    }
}

/// Phase tag for structural catalogues
pub fn classify_phase(trend: Trend, sweep: Option<Direction>) -> MarketPhase {
    if sweep.is_some() {
        MarketPhase::Manipulation
    } else if trend == Trend::Range {
        MarketPhase::Ranging
    } else {
        MarketPhase::Trending
    }
}

/// Emits each confirmed fractal once.
///
/// Re-running detection on every refresh sees the same pivot until a newer
/// one forms; the tracker turns that into a one-shot structural event.
#[derive(Debug, Clone, Default)]
pub struct StructureTracker {
    last_pivot_time: Option<i64>,
}

impl StructureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// New confirmed fractal since the previous call, if any
    pub fn observe(&mut self, bars: &[Bar]) -> Option<Fractal> {
        let fractal = latest_confirmed_fractal(bars)?;
        if self.last_pivot_time == Some(fractal.open_time) {
            return None;
        }
        self.last_pivot_time = Some(fractal.open_time);
        Some(fractal)
    }

    pub fn reset(&mut self) {
        self.last_pivot_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(t: i64, high: f64, low: f64) -> Bar {
        Bar {
            open_time: t,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 0.0,
        }
    }

    #[test]
    fn test_swing_high_fractal() {
        let bars = vec![
            bar(0, 10.0, 9.0),
            bar(1, 11.0, 9.5),
            bar(2, 13.0, 10.0),
            bar(3, 12.0, 10.5),
            bar(4, 11.5, 10.0),
        ];
        let fractal = latest_confirmed_fractal(&bars).unwrap();
        assert_eq!(fractal.kind, FractalKind::High);
        assert_eq!(fractal.index, 2);
        assert_eq!(fractal.price, 13.0);
    }

    #[test]
    fn test_equal_highs_not_fractal() {
        let bars = vec![
            bar(0, 10.0, 9.0),
            bar(1, 13.0, 9.5),
            bar(2, 13.0, 10.0),
            bar(3, 12.0, 10.5),
            bar(4, 11.5, 10.0),
        ];
        assert!(detect_fractal(&bars, 2).is_none());
        assert!(detect_fractal(&bars, 3).is_none());
        assert!(latest_confirmed_fractal(&bars[..4]).is_none());
    }

    #[test]
    fn test_tracker_emits_once() {
        let mut bars = vec![
            bar(0, 10.0, 9.0),
            bar(1, 10.5, 8.5),
            bar(2, 10.2, 7.0),
            bar(3, 10.4, 8.0),
            bar(4, 10.6, 8.2),
        ];
        let mut tracker = StructureTracker::new();
        let first = tracker.observe(&bars).unwrap();
        assert_eq!(first.kind, FractalKind::Low);
        assert!(tracker.observe(&bars).is_none());

        bars.push(bar(5, 10.7, 8.4));
        assert!(tracker.observe(&bars).is_none());
    }

    #[test]
    fn test_liquidity_sweep() {
        let mut bars: Vec<Bar> = (0..10).map(|i| bar(i, 11.0, 9.0)).collect();
        // Wick to 8.5 under the 9.0 low, close back at 9.6
        bars.push(Bar {
            open_time: 10,
            open: 9.2,
            high: 9.8,
            low: 8.5,
            close: 9.6,
            volume: 0.0,
        });
        assert_eq!(detect_liquidity_sweep(&bars, 10), Some(Direction::Buy));
        assert_eq!(
            classify_phase(Trend::Bullish, Some(Direction::Buy)),
            MarketPhase::Manipulation
        );
        assert_eq!(detect_liquidity_sweep(&bars[..5], 10), None);
    }
}
