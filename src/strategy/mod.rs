//! Signal Engine - rule fusion with setup gating
//!
//! One evaluation cycle:
//! 1. Feed the new-bar / structural-event notifications to the setup memory
//! 2. Evaluate the rule catalogue against the cycle's features
//! 3. Resolve the votes into (signal, reason, confidence)
//! 4. Gate directional results on the setup being READY
//! 5. Suppress repeats of the previous direction
//! 6. Fire the setup and remember the direction
//!
//! Every cycle produces exactly one `Decision`. Missing data degrades to
//! WAIT; nothing in here returns an error once the engine is built.

pub mod lock;
pub mod resolver;
pub mod rules;
pub mod setup;

pub use lock::SignalLock;
pub use resolver::{
    ConfidenceResolver, GatekeeperPenalties, GatekeeperReport, Resolution, ResolverConfig,
    VoteTally, WaitReason,
};
pub use rules::{Catalogue, CataloguePreset, Condition, Rule, RuleGroup, Vote};
pub use setup::{SetupMemory, SetupState, SetupTransition};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schedule::EntryWindow;
use crate::types::{Direction, Features, Reliability, Signal};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub preset: CataloguePreset,
    /// Restrict the preset to these groups; None keeps the preset's own
    pub groups: Option<Vec<RuleGroup>>,
    /// Closed bars after a structural event before READY
    pub confirmation_bars: u64,
    pub require_confluence: bool,
    pub min_rules_for_confluence: usize,
    pub min_score_for_confluence: u32,
    pub confidence_floor: u32,
    pub confidence_ceiling: u32,
    pub weak_setup_threshold: u32,
    /// Bonus per extra agreeing rule
    pub confluence_step: u32,
    pub penalties: GatekeeperPenalties,
    /// Diagnostic penalty shown on a suppressed repeat
    pub anti_repeat_penalty: u32,
    /// A structural event while FIRED starts a new setup
    pub rearm_on_structural_event: bool,
    /// Fire the setup inside `evaluate`; otherwise the caller calls `fire`
    pub auto_fire: bool,
}

impl EngineConfig {
    /// Defaults for a given preset
    pub fn for_preset(preset: CataloguePreset) -> Self {
        Self {
            preset,
            groups: None,
            confirmation_bars: 2,
            require_confluence: preset.requires_confluence(),
            min_rules_for_confluence: 2,
            min_score_for_confluence: 170,
            confidence_floor: 60,
            confidence_ceiling: 99,
            weak_setup_threshold: preset.weak_setup_threshold(),
            confluence_step: 3,
            penalties: GatekeeperPenalties::default(),
            anti_repeat_penalty: 10,
            rearm_on_structural_event: true,
            auto_fire: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_bars == 0 {
            return Err(ConfigError::ZeroConfirmationBars);
        }
        self.resolver_config().validate()
    }

    /// Built-in catalogue for the preset and group filter
    pub fn catalogue(&self) -> Catalogue {
        let catalogue = Catalogue::preset(self.preset);
        match &self.groups {
            Some(groups) => catalogue.with_groups(groups),
            None => catalogue,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            require_confluence: self.require_confluence,
            min_rules: self.min_rules_for_confluence,
            min_score: self.min_score_for_confluence,
            confidence_floor: self.confidence_floor,
            confidence_ceiling: self.confidence_ceiling,
            weak_setup_threshold: self.weak_setup_threshold,
            confluence_step: self.confluence_step,
            penalties: self.penalties,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_preset(CataloguePreset::Confluence)
    }
}

/// Everything one cycle needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleInput {
    pub features: Features,
    /// A bar closed since the previous cycle
    pub new_bar: bool,
    /// A structural event (fractal) was confirmed this cycle
    pub structural_event: bool,
}

impl CycleInput {
    pub fn new(features: Features) -> Self {
        Self {
            features,
            ..Default::default()
        }
    }

    pub fn with_new_bar(mut self) -> Self {
        self.new_bar = true;
        self
    }

    pub fn with_structural_event(mut self) -> Self {
        self.structural_event = true;
        self
    }
}

/// Output of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    /// 0 for WAIT, otherwise within [floor, ceiling]
    pub confidence: u32,
    pub reason: String,
    pub wait_reason: Option<WaitReason>,
    /// Side that won the tally, even if the decision is WAIT
    pub dominant: Option<Direction>,
    /// Confluence breakdown
    pub tally: VoteTally,
    pub gatekeepers: GatekeeperReport,
    pub setup_state: SetupState,
    /// What an anti-repeat WAIT would have scored
    pub suppressed_confidence: Option<u32>,
    pub reliability: Option<Reliability>,
    pub entry_time: Option<DateTime<Utc>>,
    pub expiry_time: Option<DateTime<Utc>>,
}

impl Decision {
    fn from_resolution(resolution: Resolution, setup_state: SetupState) -> Self {
        Self {
            signal: resolution.signal,
            confidence: resolution.confidence,
            reason: resolution.reason,
            wait_reason: resolution.wait_reason,
            dominant: resolution.dominant,
            tally: resolution.tally,
            gatekeepers: resolution.gatekeepers,
            setup_state,
            suppressed_confidence: None,
            reliability: None,
            entry_time: None,
            expiry_time: None,
        }
    }

    /// Downgrade to WAIT, keeping the tally for diagnostics
    fn into_wait(mut self, reason: WaitReason) -> Self {
        self.signal = Signal::Wait;
        self.confidence = 0;
        self.reason = reason.to_string();
        self.wait_reason = Some(reason);
        self
    }

    pub fn is_wait(&self) -> bool {
        self.signal.is_wait()
    }

    /// Attach the next-candle entry window to a directional decision
    pub fn scheduled(mut self, window: EntryWindow) -> Self {
        if !self.is_wait() {
            self.entry_time = Some(window.entry);
            self.expiry_time = Some(window.expiry);
        }
        self
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = Some(reliability);
        self
    }
}

/// Per-instrument decision engine
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: EngineConfig,
    catalogue: Catalogue,
    resolver: ConfidenceResolver,
    setup: SetupMemory,
    lock: SignalLock,
    last_wait_reason: Option<WaitReason>,
    evaluations: u64,
}

impl SignalEngine {
    /// Engine over the configured built-in catalogue
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let catalogue = config.catalogue();
        Self::with_catalogue(config, catalogue)
    }

    /// Engine over a caller-supplied catalogue
    pub fn with_catalogue(config: EngineConfig, catalogue: Catalogue) -> Result<Self, ConfigError> {
        config.validate()?;
        if catalogue.is_empty() {
            return Err(ConfigError::EmptyCatalogue);
        }
        Ok(Self {
            resolver: ConfidenceResolver::new(config.resolver_config())?,
            setup: SetupMemory::new(config.confirmation_bars, config.rearm_on_structural_event),
            lock: SignalLock::new(config.anti_repeat_penalty),
            catalogue,
            config,
            last_wait_reason: None,
            evaluations: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn setup(&self) -> &SetupMemory {
        &self.setup
    }

    pub fn lock(&self) -> &SignalLock {
        &self.lock
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Why the previous cycle produced WAIT, if it did
    pub fn last_wait_reason(&self) -> Option<&WaitReason> {
        self.last_wait_reason.as_ref()
    }

    /// Run one cycle
    pub fn evaluate(&mut self, input: &CycleInput) -> Decision {
        self.evaluations += 1;

        let transitions = self.setup.observe(input.new_bar, input.structural_event);
        if transitions
            .iter()
            .any(|t| t.from == SetupState::Fired && t.to == SetupState::Idle)
        {
            // A re-armed setup is a new trade idea
            self.lock.clear();
        }

        let votes = self.catalogue.evaluate(&input.features);
        let resolution = self.resolver.resolve(&votes, &input.features);

        tracing::debug!(
            buy_score = resolution.tally.buy_score,
            sell_score = resolution.tally.sell_score,
            buy_votes = resolution.tally.buy_count,
            sell_votes = resolution.tally.sell_count,
            signal = %resolution.signal,
            setup = %self.setup.state(),
            bars_until_ready = ?self.setup.bars_until_ready(),
            "Votes resolved"
        );

        let direction = resolution.signal.direction();
        let decision = Decision::from_resolution(resolution, self.setup.state());

        let Some(direction) = direction else {
            if decision
                .wait_reason
                .as_ref()
                .is_some_and(WaitReason::is_resolver_wait)
            {
                self.lock.clear();
            }
            return self.finish(decision);
        };

        match self.setup.state() {
            SetupState::Ready => {}
            SetupState::Fired => {
                return self.finish(decision.into_wait(WaitReason::SetupAlreadyFired));
            }
            state => {
                return self.finish(decision.into_wait(WaitReason::SetupNotReady(state)));
            }
        }

        if self.lock.is_repeat(direction) {
            let suppressed = self.lock.suppressed(decision.confidence);
            let mut decision = decision.into_wait(WaitReason::AwaitingConfirmation);
            decision.suppressed_confidence = Some(suppressed);
            return self.finish(decision);
        }

        let decision = if self.config.auto_fire {
            self.fire(decision)
        } else {
            decision
        };
        if let Some(direction) = decision.signal.direction() {
            self.lock.record(direction);
            tracing::info!(
                signal = %decision.signal,
                confidence = decision.confidence,
                reason = %decision.reason,
                setup = %decision.setup_state,
                "Signal emitted"
            );
        }
        self.finish(decision)
    }

    /// Commit a directional decision against the setup.
    ///
    /// A WAIT passes through untouched. Firing a setup that is not READY
    /// leaves the setup as it was and turns the decision into WAIT.
    pub fn fire(&mut self, decision: Decision) -> Decision {
        if decision.is_wait() {
            return decision;
        }
        match self.setup.fire() {
            Ok(transition) => Decision {
                setup_state: transition.to,
                ..decision
            },
            Err(e) => {
                tracing::warn!(error = %e, signal = %decision.signal, "Fire rejected");
                let state = self.setup.state();
                let mut decision = decision.into_wait(WaitReason::FireRejected(state));
                decision.setup_state = state;
                self.last_wait_reason = decision.wait_reason.clone();
                decision
            }
        }
    }

    /// Clear setup memory and the signal lock
    pub fn reset(&mut self) {
        self.setup.reset();
        self.lock.clear();
        self.last_wait_reason = None;
    }

    fn finish(&mut self, decision: Decision) -> Decision {
        self.last_wait_reason = decision.wait_reason.clone();
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandleBehavior, OscillatorState, SupportResistance, Trend};

    /// Pullback, support rejection and momentum rules all vote BUY
    fn bullish_features() -> Features {
        Features {
            trend: Trend::Bullish,
            candle: CandleBehavior::Rejection,
            candle_direction: Some(Direction::Buy),
            levels: SupportResistance {
                support: true,
                resistance: false,
            },
            oscillator: OscillatorState::Agreeing,
            momentum_slope: 0.5,
            ..Default::default()
        }
    }

    fn ready_engine() -> SignalEngine {
        armed(EngineConfig::default())
    }

    /// Structural event plus the confirmation bars, all on quiet features
    fn armed(config: EngineConfig) -> SignalEngine {
        let mut engine = SignalEngine::new(config).unwrap();
        let idle = CycleInput::new(Features::default());
        engine.evaluate(&idle.clone().with_structural_event());
        engine.evaluate(&idle.clone().with_new_bar());
        engine.evaluate(&idle.with_new_bar());
        assert_eq!(engine.setup().state(), SetupState::Ready);
        engine
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let bad = EngineConfig {
            confidence_ceiling: 100,
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::CeilingTooHigh(100)));

        let bad = EngineConfig {
            confirmation_bars: 0,
            ..Default::default()
        };
        assert!(SignalEngine::new(bad).is_err());

        let bad = EngineConfig {
            weak_setup_threshold: 50,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_empty_group_filter_rejected() {
        let config = EngineConfig {
            groups: Some(vec![RuleGroup::StopHunt]),
            ..Default::default()
        };
        // Confluence preset carries no stop-hunt rules
        assert_eq!(SignalEngine::new(config).unwrap_err(), ConfigError::EmptyCatalogue);
    }

    #[test]
    fn test_gated_until_ready() {
        let mut engine = SignalEngine::new(EngineConfig::default()).unwrap();
        let decision = engine.evaluate(&CycleInput::new(bullish_features()));
        assert_eq!(decision.signal, Signal::Wait);
        assert_eq!(decision.dominant, Some(Direction::Buy));
        assert_eq!(
            engine.last_wait_reason(),
            Some(&WaitReason::SetupNotReady(SetupState::Idle))
        );
        assert_eq!(decision.confidence, 0);
    }

    #[test]
    fn test_single_fire_per_setup() {
        let mut engine = ready_engine();
        let input = CycleInput::new(bullish_features());

        let first = engine.evaluate(&input);
        assert_eq!(first.signal, Signal::Buy);
        assert_eq!(first.confidence, 91);
        assert_eq!(first.reason, "Rejection at support");
        assert_eq!(first.tally.buy_count, 3);
        assert_eq!(first.setup_state, SetupState::Fired);

        let second = engine.evaluate(&input);
        assert_eq!(second.signal, Signal::Wait);
        assert_eq!(second.wait_reason, Some(WaitReason::SetupAlreadyFired));
    }

    #[test]
    fn test_anti_repeat_while_setup_uncommitted() {
        // Without auto-fire the setup stays READY, so only the lock holds a repeat back
        let mut engine = armed(EngineConfig {
            auto_fire: false,
            ..Default::default()
        });
        let input = CycleInput::new(bullish_features());

        let first = engine.evaluate(&input);
        assert_eq!(first.signal, Signal::Buy);

        let second = engine.evaluate(&input);
        assert_eq!(second.signal, Signal::Wait);
        assert_eq!(second.reason, "awaiting confirmation");
        assert_eq!(second.suppressed_confidence, Some(first.confidence - 10));

        // Natural WAIT releases the lock
        let quiet = engine.evaluate(&CycleInput::new(Features::default()));
        assert_eq!(quiet.signal, Signal::Wait);
        assert_eq!(engine.lock().last(), None);
        assert_eq!(engine.evaluate(&input).signal, Signal::Buy);
    }

    #[test]
    fn test_natural_wait_does_not_reopen_fired_setup() {
        let mut engine = ready_engine();
        let bullish = CycleInput::new(bullish_features());
        assert_eq!(engine.evaluate(&bullish).signal, Signal::Buy);

        // The lock is released but the setup is spent
        engine.evaluate(&CycleInput::new(Features::default()).with_new_bar());
        assert_eq!(engine.lock().last(), None);
        let decision = engine.evaluate(&bullish.clone().with_new_bar());
        assert_eq!(decision.wait_reason, Some(WaitReason::SetupAlreadyFired));
        assert_eq!(engine.setup().state(), SetupState::Fired);
    }

    #[test]
    fn test_repeat_suppression_keeps_lock() {
        let mut engine = armed(EngineConfig {
            auto_fire: false,
            ..Default::default()
        });
        let bullish = CycleInput::new(bullish_features());
        assert_eq!(engine.evaluate(&bullish).signal, Signal::Buy);

        // Repeat suppression is a WAIT too, but not one from the vote tally
        let repeat = engine.evaluate(&bullish);
        assert_eq!(repeat.wait_reason, Some(WaitReason::AwaitingConfirmation));
        assert_eq!(engine.lock().last(), Some(Direction::Buy));
    }

    #[test]
    fn test_manual_fire_rejected_when_not_ready() {
        let config = EngineConfig {
            auto_fire: false,
            ..Default::default()
        };
        let mut engine = armed(config);

        let decision = engine.evaluate(&CycleInput::new(bullish_features()));
        assert_eq!(decision.signal, Signal::Buy);
        assert_eq!(decision.setup_state, SetupState::Ready);

        let fired = engine.fire(decision.clone());
        assert_eq!(fired.signal, Signal::Buy);
        assert_eq!(engine.setup().state(), SetupState::Fired);

        // Second fire against a FIRED setup is a no-op WAIT
        let again = engine.fire(decision);
        assert_eq!(again.signal, Signal::Wait);
        assert_eq!(
            again.wait_reason,
            Some(WaitReason::FireRejected(SetupState::Fired))
        );
        assert_eq!(engine.setup().state(), SetupState::Fired);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = ready_engine();
        engine.evaluate(&CycleInput::new(bullish_features()));
        assert_eq!(engine.lock().last(), Some(Direction::Buy));

        engine.reset();
        assert_eq!(engine.setup().state(), SetupState::Idle);
        assert_eq!(engine.lock().last(), None);
        assert_eq!(engine.last_wait_reason(), None);
    }

    #[test]
    fn test_rearm_allows_next_setup() {
        let mut engine = ready_engine();
        let bullish = CycleInput::new(bullish_features());
        assert_eq!(engine.evaluate(&bullish).signal, Signal::Buy);

        engine.evaluate(&CycleInput::new(Features::default()).with_structural_event());
        assert_eq!(engine.setup().state(), SetupState::Waiting);
        engine.evaluate(&bullish.clone().with_new_bar());
        let decision = engine.evaluate(&bullish.clone().with_new_bar());
        assert_eq!(decision.signal, Signal::Buy);
    }
}
