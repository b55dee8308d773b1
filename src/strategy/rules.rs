//! Rule catalogue - declarative (condition, direction, weight, label) table
//!
//! A rule is a conjunction of feature matchers. Unset matchers are wildcards,
//! so a rule reads like the setup it describes:
//!
//! ```yaml
//! - id: trend_impulse_buy
//!   label: Bullish trend impulse
//!   group: trend_continuation
//!   direction: BUY
//!   weight: 88
//!   when: { trend: BULLISH, candle: IMPULSE, candle_direction: BUY }
//! ```
//!
//! Weights are fixed data in [70, 95]. Catalogue order only affects which
//! label wins a weight tie and the order reasons are listed in.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::Context;

use crate::error::ConfigError;
use crate::types::{
    CandleBehavior, Direction, Features, MarketPhase, OscillatorState, Slope, Trend,
};

pub const MIN_RULE_WEIGHT: u8 = 70;
pub const MAX_RULE_WEIGHT: u8 = 95;

/// Named rule groups; catalogues activate a subset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    TrendContinuation,
    SupportResistance,
    MeanReversion,
    MomentumAlignment,
    /// Stop-hunt / manipulation patterns (structural-liquidity variants)
    StopHunt,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 5] = [
        RuleGroup::TrendContinuation,
        RuleGroup::SupportResistance,
        RuleGroup::MeanReversion,
        RuleGroup::MomentumAlignment,
        RuleGroup::StopHunt,
    ];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "trend_continuation" | "trend" => Some(RuleGroup::TrendContinuation),
            "support_resistance" | "sr" => Some(RuleGroup::SupportResistance),
            "mean_reversion" => Some(RuleGroup::MeanReversion),
            "momentum_alignment" | "momentum" => Some(RuleGroup::MomentumAlignment),
            "stop_hunt" | "manipulation" => Some(RuleGroup::StopHunt),
            _ => None,
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleGroup::TrendContinuation => write!(f, "trend_continuation"),
            RuleGroup::SupportResistance => write!(f, "support_resistance"),
            RuleGroup::MeanReversion => write!(f, "mean_reversion"),
            RuleGroup::MomentumAlignment => write!(f, "momentum_alignment"),
            RuleGroup::StopHunt => write!(f, "stop_hunt"),
        }
    }
}

/// Conjunction of feature matchers; `None` matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candle: Option<CandleBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candle_direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oscillator: Option<OscillatorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<Slope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MarketPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<Direction>,
}

impl Condition {
    pub fn is_empty(&self) -> bool {
        *self == Condition::default()
    }

    /// True when every set matcher agrees with the features
    pub fn matches(&self, features: &Features) -> bool {
        fn check<T: PartialEq>(want: &Option<T>, have: T) -> bool {
            want.as_ref().map_or(true, |w| *w == have)
        }

        check(&self.trend, features.trend)
            && check(&self.candle, features.candle)
            && self
                .candle_direction
                .map_or(true, |d| features.candle_direction == Some(d))
            && check(&self.support, features.levels.support)
            && check(&self.resistance, features.levels.resistance)
            && check(&self.oscillator, features.oscillator)
            && self.slope.map_or(true, |s| features.slope() == Some(s))
            && check(&self.phase, features.phase)
            && self.sweep.map_or(true, |d| features.sweep == Some(d))
    }
}

/// One catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub label: String,
    pub group: RuleGroup,
    pub direction: Direction,
    pub weight: u8,
    pub when: Condition,
}

impl Rule {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RULE_WEIGHT..=MAX_RULE_WEIGHT).contains(&self.weight) {
            return Err(ConfigError::WeightOutOfRange {
                id: self.id.clone(),
                weight: self.weight,
                min: MIN_RULE_WEIGHT,
                max: MAX_RULE_WEIGHT,
            });
        }
        if self.label.trim().is_empty() {
            return Err(ConfigError::EmptyLabel(self.id.clone()));
        }
        if self.when.is_empty() {
            return Err(ConfigError::EmptyCondition(self.id.clone()));
        }
        Ok(())
    }
}

/// A matched rule's contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub direction: Direction,
    pub weight: u32,
    pub label: String,
}

impl Vote {
    pub fn new(direction: Direction, weight: u32, label: impl Into<String>) -> Self {
        Self {
            direction,
            weight,
            label: label.into(),
        }
    }
}

/// Built-in catalogue selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CataloguePreset {
    /// Multi-rule confluence with score/count floors
    Confluence,
    /// Single-rule dominance with a high weak-setup bar
    Strict,
    /// Strict plus stop-hunt rules
    Structural,
}

impl CataloguePreset {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "confluence" => Some(CataloguePreset::Confluence),
            "strict" => Some(CataloguePreset::Strict),
            "structural" | "liquidity" => Some(CataloguePreset::Structural),
            _ => None,
        }
    }

    pub fn groups(&self) -> Vec<RuleGroup> {
        match self {
            CataloguePreset::Confluence | CataloguePreset::Strict => vec![
                RuleGroup::TrendContinuation,
                RuleGroup::SupportResistance,
                RuleGroup::MeanReversion,
                RuleGroup::MomentumAlignment,
            ],
            CataloguePreset::Structural => RuleGroup::ALL.to_vec(),
        }
    }

    /// Whether the resolver applies the confluence floors
    pub fn requires_confluence(&self) -> bool {
        matches!(self, CataloguePreset::Confluence)
    }

    /// Post-penalty confidence under which a direction is downgraded to WAIT
    pub fn weak_setup_threshold(&self) -> u32 {
        match self {
            CataloguePreset::Confluence => 65,
            CataloguePreset::Strict | CataloguePreset::Structural => 80,
        }
    }
}

impl fmt::Display for CataloguePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CataloguePreset::Confluence => write!(f, "confluence"),
            CataloguePreset::Strict => write!(f, "strict"),
            CataloguePreset::Structural => write!(f, "structural"),
        }
    }
}

/// Ordered, validated rule table
#[derive(Debug, Clone, PartialEq)]
pub struct Catalogue {
    rules: Vec<Rule>,
}

impl Catalogue {
    /// Validate and wrap a rule list
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::EmptyCatalogue);
        }
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.id.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Every built-in rule, in display order
    pub fn builtin() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    /// Built-in rules restricted to a preset's groups
    pub fn preset(preset: CataloguePreset) -> Self {
        Self::builtin().with_groups(&preset.groups())
    }

    /// Keep only rules from the given groups
    pub fn with_groups(mut self, groups: &[RuleGroup]) -> Self {
        self.rules.retain(|r| groups.contains(&r.group));
        self
    }

    /// Parse a YAML rule list
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let rules: Vec<Rule> =
            serde_yaml::from_str(source).map_err(|e| ConfigError::Catalogue(e.to_string()))?;
        Self::new(rules)
    }

    /// Load a YAML rule list from disk
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalogue {}", path.display()))?;
        let catalogue = Self::from_yaml(&source)
            .with_context(|| format!("Invalid catalogue {}", path.display()))?;
        Ok(catalogue)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// One vote per matching rule. Pure.
    pub fn evaluate(&self, features: &Features) -> Vec<Vote> {
        self.rules
            .iter()
            .filter(|rule| rule.when.matches(features))
            .map(|rule| Vote::new(rule.direction, rule.weight as u32, rule.label.clone()))
            .collect()
    }
}

impl Default for Catalogue {
    fn default() -> Self {
        Self::preset(CataloguePreset::Confluence)
    }
}

fn rule(
    id: &str,
    label: &str,
    group: RuleGroup,
    direction: Direction,
    weight: u8,
    when: Condition,
) -> Rule {
    Rule {
        id: id.to_string(),
        label: label.to_string(),
        group,
        direction,
        weight,
        when,
    }
}

fn builtin_rules() -> Vec<Rule> {
    use CandleBehavior::*;
    use Direction::*;
    use RuleGroup::*;

    vec![
        // ── TREND CONTINUATION ──
        rule(
            "trend_impulse_buy",
            "Bullish trend impulse",
            TrendContinuation,
            Buy,
            88,
            Condition {
                trend: Some(Trend::Bullish),
                candle: Some(Impulse),
                candle_direction: Some(Buy),
                ..Default::default()
            },
        ),
        rule(
            "trend_impulse_sell",
            "Bearish trend impulse",
            TrendContinuation,
            Sell,
            88,
            Condition {
                trend: Some(Trend::Bearish),
                candle: Some(Impulse),
                candle_direction: Some(Sell),
                ..Default::default()
            },
        ),
        rule(
            "trend_pullback_buy",
            "Bullish pullback rejection",
            TrendContinuation,
            Buy,
            82,
            Condition {
                trend: Some(Trend::Bullish),
                candle: Some(Rejection),
                candle_direction: Some(Buy),
                ..Default::default()
            },
        ),
        rule(
            "trend_pullback_sell",
            "Bearish pullback rejection",
            TrendContinuation,
            Sell,
            82,
            Condition {
                trend: Some(Trend::Bearish),
                candle: Some(Rejection),
                candle_direction: Some(Sell),
                ..Default::default()
            },
        ),
        // ── SUPPORT / RESISTANCE ──
        rule(
            "support_rejection",
            "Rejection at support",
            SupportResistance,
            Buy,
            85,
            Condition {
                candle: Some(Rejection),
                support: Some(true),
                resistance: Some(false),
                ..Default::default()
            },
        ),
        rule(
            "resistance_rejection",
            "Rejection at resistance",
            SupportResistance,
            Sell,
            85,
            Condition {
                candle: Some(Rejection),
                support: Some(false),
                resistance: Some(true),
                ..Default::default()
            },
        ),
        rule(
            "resistance_breakout",
            "Breakout through resistance",
            SupportResistance,
            Buy,
            78,
            Condition {
                trend: Some(Trend::Bullish),
                candle: Some(Impulse),
                candle_direction: Some(Buy),
                resistance: Some(true),
                ..Default::default()
            },
        ),
        rule(
            "support_breakdown",
            "Breakdown through support",
            SupportResistance,
            Sell,
            78,
            Condition {
                trend: Some(Trend::Bearish),
                candle: Some(Impulse),
                candle_direction: Some(Sell),
                support: Some(true),
                ..Default::default()
            },
        ),
        // ── MEAN REVERSION ──
        rule(
            "range_support_bounce",
            "Range support bounce",
            MeanReversion,
            Buy,
            75,
            Condition {
                trend: Some(Trend::Range),
                support: Some(true),
                resistance: Some(false),
                slope: Some(Slope::Rising),
                ..Default::default()
            },
        ),
        rule(
            "range_resistance_fade",
            "Range resistance fade",
            MeanReversion,
            Sell,
            75,
            Condition {
                trend: Some(Trend::Range),
                support: Some(false),
                resistance: Some(true),
                slope: Some(Slope::Falling),
                ..Default::default()
            },
        ),
        // ── MOMENTUM ALIGNMENT ──
        rule(
            "momentum_aligned_buy",
            "Momentum aligned with uptrend",
            MomentumAlignment,
            Buy,
            80,
            Condition {
                trend: Some(Trend::Bullish),
                oscillator: Some(OscillatorState::Agreeing),
                slope: Some(Slope::Rising),
                ..Default::default()
            },
        ),
        rule(
            "momentum_aligned_sell",
            "Momentum aligned with downtrend",
            MomentumAlignment,
            Sell,
            80,
            Condition {
                trend: Some(Trend::Bearish),
                oscillator: Some(OscillatorState::Agreeing),
                slope: Some(Slope::Falling),
                ..Default::default()
            },
        ),
        rule(
            "stack_valid_zone_buy",
            "Average stack up, oscillator in zone",
            MomentumAlignment,
            Buy,
            72,
            Condition {
                trend: Some(Trend::Bullish),
                oscillator: Some(OscillatorState::Valid),
                slope: Some(Slope::Rising),
                ..Default::default()
            },
        ),
        rule(
            "stack_valid_zone_sell",
            "Average stack down, oscillator in zone",
            MomentumAlignment,
            Sell,
            72,
            Condition {
                trend: Some(Trend::Bearish),
                oscillator: Some(OscillatorState::Valid),
                slope: Some(Slope::Falling),
                ..Default::default()
            },
        ),
        // ── STOP HUNT ──
        rule(
            "sell_side_sweep",
            "Sell-side liquidity sweep",
            StopHunt,
            Buy,
            90,
            Condition {
                candle_direction: Some(Buy),
                phase: Some(MarketPhase::Manipulation),
                sweep: Some(Buy),
                ..Default::default()
            },
        ),
        rule(
            "buy_side_sweep",
            "Buy-side liquidity sweep",
            StopHunt,
            Sell,
            90,
            Condition {
                candle_direction: Some(Sell),
                phase: Some(MarketPhase::Manipulation),
                sweep: Some(Sell),
                ..Default::default()
            },
        ),
        rule(
            "sweep_below_support",
            "Stop hunt below support",
            StopHunt,
            Buy,
            93,
            Condition {
                support: Some(true),
                sweep: Some(Buy),
                ..Default::default()
            },
        ),
        rule(
            "sweep_above_resistance",
            "Stop hunt above resistance",
            StopHunt,
            Sell,
            93,
            Condition {
                resistance: Some(true),
                sweep: Some(Sell),
                ..Default::default()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SupportResistance;

    fn bullish_impulse() -> Features {
        Features {
            trend: Trend::Bullish,
            candle: CandleBehavior::Impulse,
            candle_direction: Some(Direction::Buy),
            oscillator: OscillatorState::Agreeing,
            momentum_slope: 0.5,
            phase: MarketPhase::Trending,
            ..Default::default()
        }
    }

    #[test]
    fn test_builtin_catalogue_is_valid() {
        let builtin = Catalogue::builtin();
        let validated = Catalogue::new(builtin.rules().to_vec()).unwrap();
        assert_eq!(validated.len(), builtin.len());
        for rule in builtin.rules() {
            assert!((MIN_RULE_WEIGHT..=MAX_RULE_WEIGHT).contains(&rule.weight));
        }
    }

    #[test]
    fn test_bullish_impulse_votes() {
        let catalogue = Catalogue::preset(CataloguePreset::Confluence);
        let votes = catalogue.evaluate(&bullish_impulse());

        let labels: Vec<&str> = votes.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Bullish trend impulse", "Momentum aligned with uptrend"]
        );
        assert!(votes.iter().all(|v| v.direction == Direction::Buy));
    }

    #[test]
    fn test_neutral_features_no_votes() {
        let catalogue = Catalogue::builtin();
        assert!(catalogue.evaluate(&Features::default()).is_empty());
    }

    #[test]
    fn test_stop_hunt_only_in_structural() {
        let features = Features {
            candle: CandleBehavior::Rejection,
            candle_direction: Some(Direction::Buy),
            levels: SupportResistance {
                support: true,
                resistance: false,
            },
            phase: MarketPhase::Manipulation,
            sweep: Some(Direction::Buy),
            ..Default::default()
        };

        let strict = Catalogue::preset(CataloguePreset::Strict).evaluate(&features);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].label, "Rejection at support");

        let structural = Catalogue::preset(CataloguePreset::Structural).evaluate(&features);
        let weights: Vec<u32> = structural.iter().map(|v| v.weight).collect();
        assert_eq!(weights, vec![85, 90, 93]);
    }

    #[test]
    fn test_validation_rejects_bad_rules() {
        let mut bad = Catalogue::builtin().rules()[0].clone();
        bad.weight = 96;
        assert!(matches!(
            Catalogue::new(vec![bad.clone()]),
            Err(ConfigError::WeightOutOfRange { weight: 96, .. })
        ));

        bad.weight = 80;
        bad.when = Condition::default();
        assert_eq!(
            Catalogue::new(vec![bad]),
            Err(ConfigError::EmptyCondition("trend_impulse_buy".to_string()))
        );

        let dup = Catalogue::builtin().rules()[0].clone();
        assert_eq!(
            Catalogue::new(vec![dup.clone(), dup]),
            Err(ConfigError::DuplicateRule("trend_impulse_buy".to_string()))
        );
        assert_eq!(Catalogue::new(vec![]), Err(ConfigError::EmptyCatalogue));
    }

    #[test]
    fn test_yaml_catalogue() {
        let yaml = r#"
- id: range_bounce
  label: Range bounce
  group: mean_reversion
  direction: BUY
  weight: 74
  when:
    trend: RANGE
    support: true
"#;
        let catalogue = Catalogue::from_yaml(yaml).unwrap();
        assert_eq!(catalogue.len(), 1);

        let features = Features {
            levels: SupportResistance {
                support: true,
                resistance: false,
            },
            ..Default::default()
        };
        let votes = catalogue.evaluate(&features);
        assert_eq!(votes, vec![Vote::new(Direction::Buy, 74, "Range bounce")]);

        let unknown = "- id: x\n  label: X\n  group: mean_reversion\n  direction: BUY\n  weight: 74\n  when: { colour: red }\n";
        assert!(matches!(
            Catalogue::from_yaml(unknown),
            Err(ConfigError::Catalogue(_))
        ));
    }
}
