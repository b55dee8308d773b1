//! Core types used throughout Malagna
//!
//! Defines the shared vocabulary for bars, classified features and signals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction a rule votes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// The other side
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// +1.0 for buy, -1.0 for sell
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Final recommendation emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Wait,
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Wait
    }
}

impl Signal {
    pub fn is_wait(&self) -> bool {
        matches!(self, Signal::Wait)
    }

    /// Direction carried by a BUY/SELL signal
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::Buy => Some(Direction::Buy),
            Signal::Sell => Some(Direction::Sell),
            Signal::Wait => None,
        }
    }
}

impl From<Direction> for Signal {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Buy => Signal::Buy,
            Direction::Sell => Signal::Sell,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Wait => write!(f, "WAIT"),
        }
    }
}

/// Higher-timeframe trend tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Range,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Range
    }
}

impl Trend {
    /// Direction implied by a directional trend
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Buy),
            Trend::Bearish => Some(Direction::Sell),
            Trend::Range => None,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
            Trend::Range => write!(f, "RANGE"),
        }
    }
}

/// Behaviour of the most recently closed candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandleBehavior {
    Impulse,
    Rejection,
    Neutral,
}

impl Default for CandleBehavior {
    fn default() -> Self {
        CandleBehavior::Neutral
    }
}

impl fmt::Display for CandleBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandleBehavior::Impulse => write!(f, "IMPULSE"),
            CandleBehavior::Rejection => write!(f, "REJECTION"),
            CandleBehavior::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Proximity of price to the rolling support/resistance levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: bool,
    pub resistance: bool,
}

/// Oscillator reading relative to the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OscillatorState {
    /// No usable reading
    Flat,
    /// Differential points the same way as the trend
    Agreeing,
    /// Differential points against the trend
    Contradicting,
    /// Inside the tradable band without a directional push
    Valid,
}

impl Default for OscillatorState {
    fn default() -> Self {
        OscillatorState::Flat
    }
}

impl fmt::Display for OscillatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscillatorState::Flat => write!(f, "FLAT"),
            OscillatorState::Agreeing => write!(f, "AGREEING"),
            OscillatorState::Contradicting => write!(f, "CONTRADICTING"),
            OscillatorState::Valid => write!(f, "VALID"),
        }
    }
}

/// Market phase tag used by structural catalogues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketPhase {
    Trending,
    Ranging,
    /// A liquidity sweep (stop hunt) was printed on the last bar
    Manipulation,
}

impl Default for MarketPhase {
    fn default() -> Self {
        MarketPhase::Ranging
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketPhase::Trending => write!(f, "TRENDING"),
            MarketPhase::Ranging => write!(f, "RANGING"),
            MarketPhase::Manipulation => write!(f, "MANIPULATION"),
        }
    }
}

/// Slope bucket used by rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Slope {
    Rising,
    Falling,
}

/// Instrument data quality tag shown next to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::Medium
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reliability::High => write!(f, "High"),
            Reliability::Medium => write!(f, "Medium"),
            Reliability::Low => write!(f, "Low"),
        }
    }
}

/// One closed OHLCV bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time in milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            ..Default::default()
        }
    }

    /// Absolute body size
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// High-to-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Classified features for one evaluation cycle.
///
/// Owned by the cycle that produced it; nothing here persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub trend: Trend,
    pub candle: CandleBehavior,
    /// Colour of the last closed candle (None for a zero body)
    pub candle_direction: Option<Direction>,
    pub levels: SupportResistance,
    pub oscillator: OscillatorState,
    /// Short-horizon slope of the fast average
    pub momentum_slope: f64,
    pub phase: MarketPhase,
    /// Side favoured by a liquidity sweep on the last bar
    pub sweep: Option<Direction>,
    /// Recent activity is not depressed against its rolling average
    pub market_active: bool,
    /// High-impact macro event inside the blackout window
    pub news_imminent: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            trend: Trend::Range,
            candle: CandleBehavior::Neutral,
            candle_direction: None,
            levels: SupportResistance::default(),
            oscillator: OscillatorState::Flat,
            momentum_slope: 0.0,
            phase: MarketPhase::Ranging,
            sweep: None,
            market_active: true,
            news_imminent: false,
        }
    }
}

impl Features {
    /// Slope bucket, None when exactly flat
    pub fn slope(&self) -> Option<Slope> {
        if self.momentum_slope > 0.0 {
            Some(Slope::Rising)
        } else if self.momentum_slope < 0.0 {
            Some(Slope::Falling)
        } else {
            None
        }
    }
}
