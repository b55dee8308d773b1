//! Visual Feature Classifier - tags from extracted chart primitives
//!
//! Consumes what the image pipeline already extracted from a screenshot
//! (candle bounding boxes, moving-average curve points, structure flags)
//! and maps it onto the same `Features` the bar path produces.
//!
//! Pixel coordinates grow downward, so "up" on the chart is a smaller `y`.

use serde::{Deserialize, Serialize};

use super::{classify_phase, ratio_behavior, FeatureClassifier};
use crate::types::{CandleBehavior, Direction, Features, OscillatorState, Trend};

/// Bounding box of one candle in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleBox {
    pub body_top: f64,
    pub body_bottom: f64,
    pub wick_top: f64,
    pub wick_bottom: f64,
    /// Colour mask the box was extracted from
    pub bullish: bool,
}

impl CandleBox {
    pub fn body(&self) -> f64 {
        (self.body_bottom - self.body_top).abs()
    }

    pub fn range(&self) -> f64 {
        (self.wick_bottom - self.wick_top).abs()
    }
}

/// Boolean structure flags raised by the image pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureFlags {
    pub support: bool,
    pub resistance: bool,
    /// A new swing point was marked on this frame
    pub fractal: bool,
    pub sweep_low: bool,
    pub sweep_high: bool,
}

/// One frame worth of extracted primitives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualFrame {
    /// Candles left to right; the last one is the most recently closed
    pub candles: Vec<CandleBox>,
    /// Fast average curve as (x, y) pixels
    #[serde(default)]
    pub fast_curve: Vec<(f64, f64)>,
    /// Slow average curve as (x, y) pixels
    #[serde(default)]
    pub slow_curve: Vec<(f64, f64)>,
    /// Oscillator pane curve as (x, y) pixels
    #[serde(default)]
    pub oscillator_curve: Vec<(f64, f64)>,
    #[serde(default)]
    pub structure: StructureFlags,
    /// The capture's last candle closed since the previous frame
    #[serde(default)]
    pub new_bar: bool,
    /// Supplied by the caller when it has an activity gauge
    pub market_active: Option<bool>,
    #[serde(default)]
    pub news_imminent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualConfig {
    pub impulse_ratio: f64,
    pub neutral_ratio: f64,
    /// Vertical gap under which the two curves count as intertwined
    pub flat_tolerance_px: f64,
    /// Trailing points used for slopes
    pub slope_points: usize,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            impulse_ratio: 0.6,
            neutral_ratio: 0.3,
            flat_tolerance_px: 2.0,
            slope_points: 5,
        }
    }
}

/// Least-squares slope in chart orientation (positive = rising).
///
/// None for fewer than two points or a vertical point-set.
pub fn curve_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| -p.1).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (x, y) in points {
        let dx = x - mean_x;
        cov += dx * (-y - mean_y);
        var += dx * dx;
    }

    if var <= f64::EPSILON {
        return None;
    }
    let slope = cov / var;
    slope.is_finite().then_some(slope)
}

/// Rightmost point of a curve
fn rightmost(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    points
        .iter()
        .copied()
        .filter(|p| p.0.is_finite() && p.1.is_finite())
        .max_by(|a, b| a.0.total_cmp(&b.0))
}

/// Trend from which curve sits on top at the right edge
pub fn trend_from_curves(fast: &[(f64, f64)], slow: &[(f64, f64)], tolerance_px: f64) -> Trend {
    let (Some(fast), Some(slow)) = (rightmost(fast), rightmost(slow)) else {
        return Trend::Range;
    };
    // Positive gap: fast drawn above slow
    let gap = slow.1 - fast.1;
    if gap.abs() <= tolerance_px {
        Trend::Range
    } else if gap > 0.0 {
        Trend::Bullish
    } else {
        Trend::Bearish
    }
}

fn tail(points: &[(f64, f64)], n: usize) -> &[(f64, f64)] {
    &points[points.len().saturating_sub(n)..]
}

/// Classifier for visual frames
#[derive(Debug, Clone, Default)]
pub struct VisualClassifier {
    config: VisualConfig,
    oscillator: FeatureClassifier,
}

impl VisualClassifier {
    pub fn new(config: VisualConfig) -> Self {
        Self {
            config,
            oscillator: FeatureClassifier::default(),
        }
    }

    pub fn classify_candle(&self, candle: &CandleBox) -> CandleBehavior {
        ratio_behavior(
            candle.body(),
            candle.range(),
            self.config.impulse_ratio,
            self.config.neutral_ratio,
        )
    }

    pub fn classify(&self, frame: &VisualFrame) -> Features {
        let last = frame.candles.last();
        let candle = last
            .map(|c| self.classify_candle(c))
            .unwrap_or(CandleBehavior::Neutral);
        let candle_direction = last.and_then(|c| {
            if c.body() <= 0.0 {
                None
            } else if c.bullish {
                Some(Direction::Buy)
            } else {
                Some(Direction::Sell)
            }
        });

        let trend = trend_from_curves(
            &frame.fast_curve,
            &frame.slow_curve,
            self.config.flat_tolerance_px,
        );

        let oscillator = if frame.oscillator_curve.is_empty() {
            OscillatorState::Flat
        } else {
            let diff = curve_slope(tail(&frame.oscillator_curve, self.config.slope_points));
            self.oscillator.classify_oscillator(trend, None, diff)
        };

        let sweep = match (frame.structure.sweep_low, frame.structure.sweep_high) {
            (true, false) => Some(Direction::Buy),
            (false, true) => Some(Direction::Sell),
            _ => None,
        };

        Features {
            trend,
            candle,
            candle_direction,
            levels: crate::types::SupportResistance {
                support: frame.structure.support,
                resistance: frame.structure.resistance,
            },
            oscillator,
            momentum_slope: curve_slope(tail(&frame.fast_curve, self.config.slope_points))
                .unwrap_or(0.0),
            phase: classify_phase(trend, sweep),
            sweep,
            market_active: frame.market_active.unwrap_or(true),
            news_imminent: frame.news_imminent,
        }
    }
}
