//! Confidence Resolver - vote tally to (signal, reason, confidence)
//!
//! 1. No votes: WAIT
//! 2. Sum weights and count votes per side
//! 3. Exact score tie: WAIT
//! 4. Dominant side, optionally gated by confluence floors
//! 5. Base = top rule weight + step * (count - 1), capped
//! 6. Gatekeeper penalties, additive
//! 7. Clamp to [floor, ceiling]
//! 8. Below the weak-setup threshold: WAIT
//!
//! WAIT always carries confidence 0.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::rules::Vote;
use super::setup::SetupState;
use crate::error::ConfigError;
use crate::types::{CandleBehavior, Direction, Features, Signal};

/// Why a cycle ended in WAIT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitReason {
    NoRuleAlignment,
    NoDominantSide,
    InsufficientConfluence { count: usize, score: u32 },
    WeakSetup { confidence: u32 },
    SetupNotReady(SetupState),
    SetupAlreadyFired,
    AwaitingConfirmation,
    FireRejected(SetupState),
}

impl WaitReason {
    /// Produced by the vote tally itself rather than a downstream gate
    pub fn is_resolver_wait(&self) -> bool {
        matches!(
            self,
            WaitReason::NoRuleAlignment
                | WaitReason::NoDominantSide
                | WaitReason::InsufficientConfluence { .. }
                | WaitReason::WeakSetup { .. }
        )
    }
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitReason::NoRuleAlignment => write!(f, "no rule alignment"),
            WaitReason::NoDominantSide => write!(f, "no dominant side"),
            WaitReason::InsufficientConfluence { count, score } => {
                write!(f, "insufficient confluence ({} rules, score {})", count, score)
            }
            WaitReason::WeakSetup { confidence } => write!(f, "weak setup ({})", confidence),
            WaitReason::SetupNotReady(state) => write!(f, "setup not ready ({})", state),
            WaitReason::SetupAlreadyFired => write!(f, "setup already fired"),
            WaitReason::AwaitingConfirmation => write!(f, "awaiting confirmation"),
            WaitReason::FireRejected(state) => {
                write!(f, "setup not ready: fire rejected in {}", state)
            }
        }
    }
}

/// Per-side vote totals plus the confluence breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub buy_score: u32,
    pub sell_score: u32,
    pub buy_count: usize,
    pub sell_count: usize,
    pub buy_labels: Vec<String>,
    pub sell_labels: Vec<String>,
}

impl VoteTally {
    pub fn from_votes(votes: &[Vote]) -> Self {
        let mut tally = Self::default();
        for vote in votes {
            match vote.direction {
                Direction::Buy => {
                    tally.buy_score += vote.weight;
                    tally.buy_count += 1;
                    tally.buy_labels.push(vote.label.clone());
                }
                Direction::Sell => {
                    tally.sell_score += vote.weight;
                    tally.sell_count += 1;
                    tally.sell_labels.push(vote.label.clone());
                }
            }
        }
        tally
    }

    /// (score, count) for one side
    pub fn side(&self, direction: Direction) -> (u32, usize) {
        match direction {
            Direction::Buy => (self.buy_score, self.buy_count),
            Direction::Sell => (self.sell_score, self.sell_count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buy_count == 0 && self.sell_count == 0
    }
}

/// Penalty points per gatekeeper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperPenalties {
    pub weak_candle: u32,
    pub proximity_conflict: u32,
    pub counter_momentum: u32,
    pub news_pending: u32,
    pub low_activity: u32,
}

impl Default for GatekeeperPenalties {
    fn default() -> Self {
        Self {
            weak_candle: 10,
            proximity_conflict: 15,
            counter_momentum: 10,
            news_pending: 20,
            low_activity: 8,
        }
    }
}

/// Which gatekeepers tripped, with the points each one cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperReport {
    pub weak_candle: Option<u32>,
    pub proximity_conflict: Option<u32>,
    pub counter_momentum: Option<u32>,
    pub news_pending: Option<u32>,
    pub low_activity: Option<u32>,
}

impl GatekeeperReport {
    /// Check every gatekeeper independently against a chosen direction
    pub fn assess(direction: Direction, features: &Features, penalties: &GatekeeperPenalties) -> Self {
        let into_level = match direction {
            Direction::Buy => features.levels.resistance,
            Direction::Sell => features.levels.support,
        };
        let against_slope = features.momentum_slope * direction.sign() < 0.0;

        Self {
            weak_candle: (features.candle == CandleBehavior::Neutral)
                .then_some(penalties.weak_candle),
            proximity_conflict: into_level.then_some(penalties.proximity_conflict),
            counter_momentum: against_slope.then_some(penalties.counter_momentum),
            news_pending: features.news_imminent.then_some(penalties.news_pending),
            low_activity: (!features.market_active).then_some(penalties.low_activity),
        }
    }

    /// Sum of all applied penalties
    pub fn total(&self) -> u32 {
        [
            self.weak_candle,
            self.proximity_conflict,
            self.counter_momentum,
            self.news_pending,
            self.low_activity,
        ]
        .iter()
        .flatten()
        .sum()
    }

    /// Human-readable notes appended to the reason
    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if let Some(p) = self.weak_candle {
            notes.push(format!("weak candle -{}", p));
        }
        if let Some(p) = self.proximity_conflict {
            notes.push(format!("into opposing level -{}", p));
        }
        if let Some(p) = self.counter_momentum {
            notes.push(format!("counter-trend momentum -{}", p));
        }
        if let Some(p) = self.news_pending {
            notes.push(format!("news pending -{}", p));
        }
        if let Some(p) = self.low_activity {
            notes.push(format!("low activity -{}", p));
        }
        notes
    }
}

/// Resolver thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Apply the count/score floors to the dominant side
    pub require_confluence: bool,
    pub min_rules: usize,
    pub min_score: u32,
    pub confidence_floor: u32,
    pub confidence_ceiling: u32,
    pub weak_setup_threshold: u32,
    /// Bonus per extra agreeing rule
    pub confluence_step: u32,
    pub penalties: GatekeeperPenalties,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            require_confluence: true,
            min_rules: 2,
            min_score: 170,
            confidence_floor: 60,
            confidence_ceiling: 99,
            weak_setup_threshold: 65,
            confluence_step: 3,
            penalties: GatekeeperPenalties::default(),
        }
    }
}

impl ResolverConfig {
    /// Bounds must nest as `floor <= threshold <= ceiling <= 99`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confidence_ceiling > 99 {
            return Err(ConfigError::CeilingTooHigh(self.confidence_ceiling));
        }
        if self.confidence_floor > self.confidence_ceiling {
            return Err(ConfigError::FloorAboveCeiling {
                floor: self.confidence_floor,
                ceiling: self.confidence_ceiling,
            });
        }
        if self.weak_setup_threshold < self.confidence_floor
            || self.weak_setup_threshold > self.confidence_ceiling
        {
            return Err(ConfigError::ThresholdOutOfRange {
                threshold: self.weak_setup_threshold,
                floor: self.confidence_floor,
                ceiling: self.confidence_ceiling,
            });
        }
        if self.require_confluence && self.min_rules == 0 {
            return Err(ConfigError::ZeroConfluenceRules);
        }
        Ok(())
    }
}

/// Resolver output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub signal: Signal,
    /// Side that won the tally, kept even when downgraded to WAIT
    pub dominant: Option<Direction>,
    pub reason: String,
    pub confidence: u32,
    pub wait_reason: Option<WaitReason>,
    pub tally: VoteTally,
    pub gatekeepers: GatekeeperReport,
    /// Post-penalty confidence before any downgrade
    pub raw_confidence: u32,
}

impl Resolution {
    fn wait(
        reason: WaitReason,
        dominant: Option<Direction>,
        tally: VoteTally,
        gatekeepers: GatekeeperReport,
        raw_confidence: u32,
    ) -> Self {
        Self {
            signal: Signal::Wait,
            dominant,
            reason: reason.to_string(),
            confidence: 0,
            wait_reason: Some(reason),
            tally,
            gatekeepers,
            raw_confidence,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceResolver {
    config: ResolverConfig,
}

impl ConfidenceResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, votes: &[Vote], features: &Features) -> Resolution {
        let tally = VoteTally::from_votes(votes);
        let no_gates = GatekeeperReport::default();

        if tally.is_empty() {
            return Resolution::wait(WaitReason::NoRuleAlignment, None, tally, no_gates, 0);
        }
        if tally.buy_score == tally.sell_score {
            return Resolution::wait(WaitReason::NoDominantSide, None, tally, no_gates, 0);
        }

        let direction = if tally.buy_score > tally.sell_score {
            Direction::Buy
        } else {
            Direction::Sell
        };
        let (score, count) = tally.side(direction);

        if self.config.require_confluence
            && (count < self.config.min_rules || score < self.config.min_score)
        {
            return Resolution::wait(
                WaitReason::InsufficientConfluence { count, score },
                Some(direction),
                tally,
                no_gates,
                0,
            );
        }

        // Highest weight on the winning side; first in catalogue order on ties
        let top = votes
            .iter()
            .filter(|v| v.direction == direction)
            .fold(None::<&Vote>, |best, v| match best {
                Some(b) if b.weight >= v.weight => Some(b),
                _ => Some(v),
            });
        let Some(top) = top else {
            return Resolution::wait(WaitReason::NoRuleAlignment, None, tally, no_gates, 0);
        };

        let ceiling = self.config.confidence_ceiling;
        let base = (top.weight + self.config.confluence_step * (count as u32 - 1)).min(ceiling);

        let gatekeepers = GatekeeperReport::assess(direction, features, &self.config.penalties);
        let confidence = base
            .saturating_sub(gatekeepers.total())
            .clamp(self.config.confidence_floor, ceiling);

        if confidence < self.config.weak_setup_threshold {
            return Resolution::wait(
                WaitReason::WeakSetup { confidence },
                Some(direction),
                tally,
                gatekeepers,
                confidence,
            );
        }

        let mut reason = top.label.clone();
        let notes = gatekeepers.notes();
        if !notes.is_empty() {
            reason = format!("{}; {}", reason, notes.join("; "));
        }

        Resolution {
            signal: Signal::from(direction),
            dominant: Some(direction),
            reason,
            confidence,
            wait_reason: None,
            tally,
            gatekeepers,
            raw_confidence: confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SupportResistance, Trend};

    fn clean_features() -> Features {
        Features {
            trend: Trend::Bullish,
            candle: CandleBehavior::Impulse,
            candle_direction: Some(Direction::Buy),
            momentum_slope: 0.0,
            ..Default::default()
        }
    }

    fn dominance(threshold: u32) -> ConfidenceResolver {
        ConfidenceResolver::new(ResolverConfig {
            require_confluence: false,
            weak_setup_threshold: threshold,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_inverted_bounds_rejected_at_construction() {
        let config = ResolverConfig {
            require_confluence: false,
            confidence_floor: 90,
            confidence_ceiling: 80,
            weak_setup_threshold: 60,
            ..Default::default()
        };
        assert_eq!(
            ConfidenceResolver::new(config).unwrap_err(),
            ConfigError::FloorAboveCeiling {
                floor: 90,
                ceiling: 80
            }
        );

        let config = ResolverConfig {
            weak_setup_threshold: 55,
            ..Default::default()
        };
        assert!(matches!(
            ConfidenceResolver::new(config),
            Err(ConfigError::ThresholdOutOfRange { threshold: 55, .. })
        ));
        assert!(ConfidenceResolver::new(ResolverConfig::default()).is_ok());
    }

    #[test]
    fn test_no_votes_wait() {
        let resolution = ConfidenceResolver::default().resolve(&[], &clean_features());
        assert_eq!(resolution.signal, Signal::Wait);
        assert_eq!(resolution.reason, "no rule alignment");
        assert_eq!(resolution.confidence, 0);
    }

    #[test]
    fn test_tie_is_wait_regardless_of_counts() {
        let votes = vec![
            Vote::new(Direction::Buy, 80, "a"),
            Vote::new(Direction::Buy, 90, "b"),
            Vote::new(Direction::Sell, 85, "c"),
            Vote::new(Direction::Sell, 85, "d"),
        ];
        let resolution = dominance(65).resolve(&votes, &clean_features());
        assert_eq!(resolution.signal, Signal::Wait);
        assert_eq!(resolution.wait_reason, Some(WaitReason::NoDominantSide));
        assert_eq!(resolution.confidence, 0);

        let votes = vec![
            Vote::new(Direction::Buy, 90, "a"),
            Vote::new(Direction::Sell, 90, "b"),
        ];
        assert_eq!(
            dominance(65).resolve(&votes, &clean_features()).signal,
            Signal::Wait
        );
    }

    #[test]
    fn test_confluence_scenario() {
        let votes = vec![
            Vote::new(Direction::Buy, 88, "A"),
            Vote::new(Direction::Buy, 85, "B"),
            Vote::new(Direction::Sell, 87, "C"),
        ];
        let resolution = ConfidenceResolver::default().resolve(&votes, &clean_features());
        assert_eq!(resolution.tally.buy_score, 173);
        assert_eq!(resolution.tally.sell_score, 87);
        assert_eq!(resolution.signal, Signal::Buy);
        assert_eq!(resolution.reason, "A");
        assert_eq!(resolution.confidence, 91);
    }

    #[test]
    fn test_confluence_floors() {
        let resolver = ConfidenceResolver::default();
        let single = vec![Vote::new(Direction::Buy, 95, "solo")];
        let resolution = resolver.resolve(&single, &clean_features());
        assert_eq!(
            resolution.wait_reason,
            Some(WaitReason::InsufficientConfluence {
                count: 1,
                score: 95
            })
        );

        // Two rules but 72 + 75 = 147 < 170
        let weak_pair = vec![
            Vote::new(Direction::Buy, 72, "x"),
            Vote::new(Direction::Buy, 75, "y"),
        ];
        assert_eq!(
            resolver.resolve(&weak_pair, &clean_features()).signal,
            Signal::Wait
        );
    }

    #[test]
    fn test_proximity_penalty_downgrades() {
        let features = Features {
            levels: SupportResistance {
                support: false,
                resistance: true,
            },
            ..clean_features()
        };
        let votes = vec![Vote::new(Direction::Buy, 90, "X")];
        let resolution = dominance(80).resolve(&votes, &features);
        assert_eq!(resolution.gatekeepers.proximity_conflict, Some(15));
        assert_eq!(resolution.raw_confidence, 75);
        assert_eq!(resolution.signal, Signal::Wait);
        assert_eq!(resolution.wait_reason, Some(WaitReason::WeakSetup { confidence: 75 }));
        assert_eq!(resolution.confidence, 0);

        // Same setup passes the looser threshold with the note attached
        let resolution = dominance(65).resolve(&votes, &features);
        assert_eq!(resolution.signal, Signal::Buy);
        assert_eq!(resolution.confidence, 75);
        assert_eq!(resolution.reason, "X; into opposing level -15");
    }

    #[test]
    fn test_penalties_stack_and_clamp() {
        let features = Features {
            candle: CandleBehavior::Neutral,
            levels: SupportResistance {
                support: true,
                resistance: false,
            },
            momentum_slope: 0.3,
            news_imminent: true,
            market_active: false,
            ..Default::default()
        };
        let votes = vec![Vote::new(Direction::Sell, 95, "S")];
        let resolution = dominance(60).resolve(&votes, &features);
        assert_eq!(resolution.gatekeepers.total(), 10 + 15 + 10 + 20 + 8);
        // 95 - 63 = 32, clamped to the floor
        assert_eq!(resolution.confidence, 60);
        assert_eq!(resolution.signal, Signal::Sell);
    }

    #[test]
    fn test_base_confidence_capped() {
        let votes: Vec<Vote> = (0..5)
            .map(|i| Vote::new(Direction::Sell, 95, format!("r{}", i)))
            .collect();
        let resolution = ConfidenceResolver::default().resolve(&votes, &clean_features());
        assert_eq!(resolution.signal, Signal::Sell);
        // clean_features has a BUY-coloured candle but slope 0, no penalties
        assert_eq!(resolution.confidence, 99);
        assert_eq!(resolution.reason, "r0");
    }
}
