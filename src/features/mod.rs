//! Feature Classifier - Categorical tags from raw indicator values
//!
//! Turns already-computed indicator values into the tags the rule engine
//! consumes:
//! - Trend direction from a fast/slow(/long) moving-average stack
//! - Candle behaviour from the body-to-range ratio of the last closed bar
//! - Support/resistance proximity to a rolling high/low
//! - Oscillator state relative to the trend
//! - Momentum slope of the fast average
//! - Market activity against its own rolling average
//!
//! Every function is total: short or degenerate input yields the fallback
//! tag (RANGE / NEUTRAL / FLAT / false), never an error.

use serde::{Deserialize, Serialize};

use crate::types::{
    Bar, CandleBehavior, Direction, Features, OscillatorState, SupportResistance, Trend,
};

pub mod structure;
pub use structure::{
    classify_phase, detect_fractal, detect_liquidity_sweep, latest_confirmed_fractal, Fractal,
    FractalKind, StructureTracker,
};

pub mod visual;
pub use visual::{CandleBox, StructureFlags, VisualClassifier, VisualConfig, VisualFrame};

/// Classifier thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Body/range ratio at or above which a candle is an impulse
    pub impulse_ratio: f64,
    /// Body/range ratio at or below which a candle is neutral
    pub neutral_ratio: f64,
    /// Relative distance to the rolling low/high that counts as "at" the level
    pub sr_tolerance: f64,
    /// Rolling window for support/resistance
    pub sr_lookback: usize,
    /// Fewer bars than this and the trend is RANGE
    pub min_trend_bars: usize,
    /// Bars back for the fast-average slope
    pub slope_horizon: usize,
    /// Rolling window for market activity
    pub activity_window: usize,
    /// Last bar activity below this fraction of the average is "inactive"
    pub activity_ratio: f64,
    /// Oscillator band considered tradable (e.g. RSI 40-60)
    pub oscillator_band_low: f64,
    pub oscillator_band_high: f64,
    /// Differentials within this magnitude are flat
    pub oscillator_flat_epsilon: f64,
    /// Bars searched for a liquidity sweep
    pub sweep_lookback: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            impulse_ratio: 0.6,
            neutral_ratio: 0.3,
            sr_tolerance: 0.002,
            sr_lookback: 20,
            min_trend_bars: 200,
            slope_horizon: 3,
            activity_window: 20,
            activity_ratio: 0.5,
            oscillator_band_low: 40.0,
            oscillator_band_high: 60.0,
            oscillator_flat_epsilon: 0.0,
            sweep_lookback: 10,
        }
    }
}

/// Raw per-cycle values handed over by the indicator adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Closed bars, oldest first
    pub bars: Vec<Bar>,
    /// Fast moving average series, aligned with `bars`; NaN where unknown
    pub fast_ma: Vec<f64>,
    /// Slow moving average series, aligned like `fast_ma`
    pub slow_ma: Vec<f64>,
    /// Optional long moving average series (three-average stack); empty when absent
    #[serde(default)]
    pub long_ma: Vec<f64>,
    /// Latest RSI-style reading
    pub rsi: Option<f64>,
    /// Latest oscillator differential (e.g. MACD histogram change)
    pub oscillator_diff: Option<f64>,
    /// Macro event inside the blackout window
    #[serde(default)]
    pub news_imminent: bool,
}

/// Map a body and range to a candle tag
pub(crate) fn ratio_behavior(
    body: f64,
    range: f64,
    impulse_ratio: f64,
    neutral_ratio: f64,
) -> CandleBehavior {
    if !(range > 0.0) || !body.is_finite() || !range.is_finite() {
        return CandleBehavior::Neutral;
    }
    let ratio = body / range;
    if ratio >= impulse_ratio {
        CandleBehavior::Impulse
    } else if ratio <= neutral_ratio {
        CandleBehavior::Neutral
    } else {
        CandleBehavior::Rejection
    }
}

/// Colour of a bar; None for a zero body
pub fn candle_direction(bar: &Bar) -> Option<Direction> {
    if bar.close > bar.open {
        Some(Direction::Buy)
    } else if bar.close < bar.open {
        Some(Direction::Sell)
    } else {
        None
    }
}

/// Trend from the latest moving-average values.
///
/// With a long average the full stack must be ordered; without one the
/// fast/slow relation decides.
pub fn classify_trend(fast: Option<f64>, slow: Option<f64>, long: Option<f64>) -> Trend {
    let (fast, slow) = match (fast, slow) {
        (Some(f), Some(s)) if f.is_finite() && s.is_finite() => (f, s),
        _ => return Trend::Range,
    };

    match long {
        Some(l) if l.is_finite() => {
            if fast > slow && slow > l {
                Trend::Bullish
            } else if fast < slow && slow < l {
                Trend::Bearish
            } else {
                Trend::Range
            }
        }
        Some(_) => Trend::Range,
        None => {
            if fast > slow {
                Trend::Bullish
            } else if fast < slow {
                Trend::Bearish
            } else {
                Trend::Range
            }
        }
    }
}

/// Proximity of the last close to the rolling `lookback` low/high
pub fn support_resistance(bars: &[Bar], lookback: usize, tolerance: f64) -> SupportResistance {
    if lookback == 0 || bars.len() < lookback {
        return SupportResistance::default();
    }

    let window = &bars[bars.len() - lookback..];
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let price = window[window.len() - 1].close;

    let near = |level: f64| level > 0.0 && level.is_finite() && ((price - level) / level).abs() <= tolerance;

    SupportResistance {
        support: near(low),
        resistance: near(high),
    }
}

/// Difference of the series over the last `horizon` points
pub fn momentum_slope(series: &[f64], horizon: usize) -> f64 {
    if horizon == 0 || series.len() <= horizon {
        return 0.0;
    }
    let last = series[series.len() - 1];
    let past = series[series.len() - 1 - horizon];
    let slope = last - past;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Whether the last bar's activity keeps up with its rolling average.
///
/// Uses volume when the feed has it, bar range otherwise. Too little history
/// counts as active.
pub fn market_active(bars: &[Bar], window: usize, ratio: f64) -> bool {
    if window == 0 || bars.len() < window + 1 {
        return true;
    }

    let has_volume = bars.iter().any(|b| b.volume > 0.0);
    let activity = |b: &Bar| if has_volume { b.volume } else { b.range() };

    let last = activity(&bars[bars.len() - 1]);
    let history = &bars[bars.len() - 1 - window..bars.len() - 1];
    let avg = history.iter().map(activity).sum::<f64>() / window as f64;

    if !(avg > 0.0) || !avg.is_finite() {
        return true;
    }
    last >= avg * ratio
}

/// Deterministic, total feature classifier
#[derive(Debug, Clone, Default)]
pub struct FeatureClassifier {
    config: ClassifierConfig,
}

impl FeatureClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Candle tag from the body-to-range ratio
    pub fn classify_candle(&self, bar: &Bar) -> CandleBehavior {
        ratio_behavior(
            bar.body(),
            bar.range(),
            self.config.impulse_ratio,
            self.config.neutral_ratio,
        )
    }

    /// Oscillator state relative to the trend
    pub fn classify_oscillator(
        &self,
        trend: Trend,
        rsi: Option<f64>,
        diff: Option<f64>,
    ) -> OscillatorState {
        let in_band = rsi
            .filter(|r| r.is_finite())
            .map(|r| r >= self.config.oscillator_band_low && r <= self.config.oscillator_band_high)
            .unwrap_or(false);
        let fallback = if in_band {
            OscillatorState::Valid
        } else {
            OscillatorState::Flat
        };

        match diff.filter(|d| d.is_finite()) {
            Some(d) if d.abs() > self.config.oscillator_flat_epsilon => match trend.direction() {
                Some(dir) if d.signum() == dir.sign() => OscillatorState::Agreeing,
                Some(_) => OscillatorState::Contradicting,
                None => fallback,
            },
            _ => fallback,
        }
    }

    /// Classify one cycle's snapshot
    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> Features {
        let bars = &snapshot.bars;
        let Some(last) = bars.last() else {
            tracing::debug!("FeatureClassifier::classify: no bars provided");
            return Features {
                news_imminent: snapshot.news_imminent,
                ..Features::default()
            };
        };

        let trend = if bars.len() < self.config.min_trend_bars {
            Trend::Range
        } else {
            classify_trend(
                snapshot.fast_ma.last().copied(),
                snapshot.slow_ma.last().copied(),
                snapshot.long_ma.last().copied(),
            )
        };

        let sweep = detect_liquidity_sweep(bars, self.config.sweep_lookback);

        let features = Features {
            trend,
            candle: self.classify_candle(last),
            candle_direction: candle_direction(last),
            levels: support_resistance(bars, self.config.sr_lookback, self.config.sr_tolerance),
            oscillator: self.classify_oscillator(trend, snapshot.rsi, snapshot.oscillator_diff),
            momentum_slope: momentum_slope(&snapshot.fast_ma, self.config.slope_horizon),
            phase: classify_phase(trend, sweep),
            sweep,
            market_active: market_active(
                bars,
                self.config.activity_window,
                self.config.activity_ratio,
            ),
            news_imminent: snapshot.news_imminent,
        };

        tracing::debug!(
            trend = %features.trend,
            candle = %features.candle,
            support = features.levels.support,
            resistance = features.levels.resistance,
            oscillator = %features.oscillator,
            slope = features.momentum_slope,
            "Features classified"
        );

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketPhase;

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                open_time: i as i64 * 60_000,
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price + 0.5,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_candle_ratio_boundaries() {
        let classifier = FeatureClassifier::default();

        // body 3 / range 5 = 0.6 exactly
        let impulse = Bar::new(100.0, 105.0, 100.0, 103.0);
        assert_eq!(classifier.classify_candle(&impulse), CandleBehavior::Impulse);

        // body 3 / range 10 = 0.3 exactly
        let neutral = Bar::new(100.0, 110.0, 100.0, 103.0);
        assert_eq!(classifier.classify_candle(&neutral), CandleBehavior::Neutral);

        // body 4 / range 10 = 0.4
        let rejection = Bar::new(100.0, 110.0, 100.0, 104.0);
        assert_eq!(
            classifier.classify_candle(&rejection),
            CandleBehavior::Rejection
        );
    }

    #[test]
    fn test_zero_range_candle_is_neutral() {
        let classifier = FeatureClassifier::default();
        let doji = Bar::new(100.0, 100.0, 100.0, 100.0);
        assert_eq!(classifier.classify_candle(&doji), CandleBehavior::Neutral);
        assert_eq!(candle_direction(&doji), None);
    }

    #[test]
    fn test_trend_stack() {
        assert_eq!(
            classify_trend(Some(3.0), Some(2.0), Some(1.0)),
            Trend::Bullish
        );
        assert_eq!(
            classify_trend(Some(1.0), Some(2.0), Some(3.0)),
            Trend::Bearish
        );
        // Fast above slow but slow under long: not a clean stack
        assert_eq!(classify_trend(Some(3.0), Some(1.0), Some(2.0)), Trend::Range);
        assert_eq!(classify_trend(Some(2.0), Some(1.0), None), Trend::Bullish);
        assert_eq!(classify_trend(Some(1.0), Some(1.0), None), Trend::Range);
        assert_eq!(classify_trend(None, Some(1.0), None), Trend::Range);
        assert_eq!(classify_trend(Some(f64::NAN), Some(1.0), None), Trend::Range);
    }

    #[test]
    fn test_support_resistance_tolerance() {
        let mut bars = flat_bars(19, 100.0);
        // Rolling low 99.0, close 99.1 is within 0.2%
        bars.push(Bar::new(99.5, 99.6, 99.0, 99.1));
        let sr = support_resistance(&bars, 20, 0.002);
        assert!(sr.support);
        assert!(!sr.resistance);

        // Not enough bars
        let sr = support_resistance(&bars[..10], 20, 0.002);
        assert_eq!(sr, SupportResistance::default());
    }

    #[test]
    fn test_momentum_slope_insufficient() {
        assert_eq!(momentum_slope(&[1.0, 2.0], 3), 0.0);
        assert_eq!(momentum_slope(&[1.0, 2.0, 3.0, 4.5], 3), 3.5);
    }

    #[test]
    fn test_market_activity() {
        let mut bars = flat_bars(21, 100.0);
        assert!(market_active(&bars, 20, 0.5));
        bars.last_mut().unwrap().volume = 1.0;
        assert!(!market_active(&bars, 20, 0.5));
        // Short history is active
        assert!(market_active(&bars[..5], 20, 0.5));
    }

    #[test]
    fn test_oscillator_states() {
        let classifier = FeatureClassifier::default();
        assert_eq!(
            classifier.classify_oscillator(Trend::Bullish, Some(55.0), Some(0.2)),
            OscillatorState::Agreeing
        );
        assert_eq!(
            classifier.classify_oscillator(Trend::Bearish, Some(55.0), Some(0.2)),
            OscillatorState::Contradicting
        );
        assert_eq!(
            classifier.classify_oscillator(Trend::Range, Some(50.0), Some(0.2)),
            OscillatorState::Valid
        );
        assert_eq!(
            classifier.classify_oscillator(Trend::Bullish, Some(75.0), None),
            OscillatorState::Flat
        );
        assert_eq!(
            classifier.classify_oscillator(Trend::Bullish, None, None),
            OscillatorState::Flat
        );
    }

    #[test]
    fn test_classify_empty_snapshot_falls_back() {
        let classifier = FeatureClassifier::default();
        let features = classifier.classify(&IndicatorSnapshot::default());
        assert_eq!(features.trend, Trend::Range);
        assert_eq!(features.candle, CandleBehavior::Neutral);
        assert_eq!(features.oscillator, OscillatorState::Flat);
        assert_eq!(features.phase, MarketPhase::Ranging);
    }

    #[test]
    fn test_classify_short_history_is_range() {
        let classifier = FeatureClassifier::default();
        let snapshot = IndicatorSnapshot {
            bars: flat_bars(50, 100.0),
            fast_ma: vec![3.0; 50],
            slow_ma: vec![2.0; 50],
            long_ma: vec![1.0; 50],
            ..Default::default()
        };
        assert_eq!(classifier.classify(&snapshot).trend, Trend::Range);

        let classifier = FeatureClassifier::new(ClassifierConfig {
            min_trend_bars: 20,
            ..Default::default()
        });
        assert_eq!(classifier.classify(&snapshot).trend, Trend::Bullish);
    }
}
