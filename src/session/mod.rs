//! Session book - one engine per instrument
//!
//! Setup memory and the signal lock are per instrument, so every instrument
//! gets its own `SignalEngine`. The book also owns the bar-path plumbing:
//! it classifies snapshots, detects new bars by open time, and turns newly
//! confirmed fractals into structural events. Visual frames carry their own
//! new-bar and fractal flags.

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::ConfigError;
use crate::features::{
    FeatureClassifier, IndicatorSnapshot, StructureTracker, VisualClassifier, VisualConfig,
    VisualFrame,
};
use crate::schedule::next_entry_window;
use crate::strategy::{Catalogue, CycleInput, Decision, EngineConfig, SignalEngine};
use crate::types::Reliability;

/// State kept for one instrument
#[derive(Debug, Clone)]
pub struct InstrumentSession {
    engine: SignalEngine,
    structure: StructureTracker,
    reliability: Reliability,
    last_bar_time: Option<i64>,
}

impl InstrumentSession {
    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.structure.reset();
        self.last_bar_time = None;
    }
}

pub struct SessionBook {
    config: EngineConfig,
    catalogue: Catalogue,
    classifier: FeatureClassifier,
    visual: VisualClassifier,
    bar_seconds: u64,
    sessions: HashMap<String, InstrumentSession>,
}

impl SessionBook {
    pub fn new(
        config: EngineConfig,
        catalogue: Catalogue,
        classifier: FeatureClassifier,
        bar_seconds: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if catalogue.is_empty() {
            return Err(ConfigError::EmptyCatalogue);
        }
        let visual = VisualClassifier::new(VisualConfig {
            impulse_ratio: classifier.config().impulse_ratio,
            neutral_ratio: classifier.config().neutral_ratio,
            ..VisualConfig::default()
        });
        Ok(Self {
            config,
            catalogue,
            classifier,
            visual,
            bar_seconds,
            sessions: HashMap::new(),
        })
    }

    /// Replace the classifier used by `evaluate_frame`
    pub fn with_visual_classifier(mut self, visual: VisualClassifier) -> Self {
        self.visual = visual;
        self
    }

    /// Add an instrument, or update its reliability tag if already known
    pub fn register(&mut self, instrument: &str, reliability: Reliability) -> Result<(), ConfigError> {
        self.session_mut(instrument)?.reliability = reliability;
        Ok(())
    }

    pub fn get(&self, instrument: &str) -> Option<&InstrumentSession> {
        self.sessions.get(instrument)
    }

    pub fn instruments(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run one cycle with already-classified features
    pub fn evaluate(
        &mut self,
        instrument: &str,
        input: &CycleInput,
        now: DateTime<Utc>,
    ) -> Result<Decision, ConfigError> {
        let bar_seconds = self.bar_seconds;
        let session = self.session_mut(instrument)?;
        let decision = session
            .engine
            .evaluate(input)
            .with_reliability(session.reliability)
            .scheduled(next_entry_window(now, bar_seconds));

        tracing::debug!(
            instrument,
            signal = %decision.signal,
            confidence = decision.confidence,
            reason = %decision.reason,
            "Cycle evaluated"
        );
        Ok(decision)
    }

    /// Classify a snapshot, derive bar/structure notifications, then evaluate
    pub fn evaluate_snapshot(
        &mut self,
        instrument: &str,
        snapshot: &IndicatorSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Decision, ConfigError> {
        let features = self.classifier.classify(snapshot);
        let session = self.session_mut(instrument)?;

        let bar_time = snapshot.bars.last().map(|b| b.open_time);
        let new_bar = bar_time.is_some() && bar_time != session.last_bar_time;
        if new_bar {
            session.last_bar_time = bar_time;
        }

        let structural_event = match session.structure.observe(&snapshot.bars) {
            Some(fractal) => {
                tracing::debug!(
                    instrument,
                    kind = ?fractal.kind,
                    price = fractal.price,
                    "Structural event"
                );
                true
            }
            None => false,
        };

        let input = CycleInput {
            features,
            new_bar,
            structural_event,
        };
        self.evaluate(instrument, &input, now)
    }

    /// Classify a visual frame and evaluate it with the frame's own flags
    pub fn evaluate_frame(
        &mut self,
        instrument: &str,
        frame: &VisualFrame,
        now: DateTime<Utc>,
    ) -> Result<Decision, ConfigError> {
        let input = CycleInput {
            features: self.visual.classify(frame),
            new_bar: frame.new_bar,
            structural_event: frame.structure.fractal,
        };
        if input.structural_event {
            tracing::debug!(instrument, candles = frame.candles.len(), "Structural event in frame");
        }
        self.evaluate(instrument, &input, now)
    }

    /// Clear one instrument's setup, lock and structure memory
    pub fn reset(&mut self, instrument: &str) -> bool {
        match self.sessions.get_mut(instrument) {
            Some(session) => {
                session.reset();
                tracing::info!(instrument, "Session reset");
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.reset();
        }
        tracing::info!(instruments = self.sessions.len(), "All sessions reset");
    }

    fn session_mut(&mut self, instrument: &str) -> Result<&mut InstrumentSession, ConfigError> {
        let session = match self.sessions.entry(instrument.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let engine =
                    SignalEngine::with_catalogue(self.config.clone(), self.catalogue.clone())?;
                tracing::info!(instrument, rules = engine.catalogue().len(), "Session opened");
                entry.insert(InstrumentSession {
                    engine,
                    structure: StructureTracker::new(),
                    reliability: Reliability::default(),
                    last_bar_time: None,
                })
            }
        };
        Ok(session)
    }
}
