//! Error types for the decision engine
//!
//! Only two things can go wrong inside the core: a bad configuration handed
//! over at setup time, and a caller trying to fire a setup that is not ready.
//! Missing or short data is never an error.

use thiserror::Error;

use crate::strategy::SetupState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Rule '{id}' weight {weight} outside [{min}, {max}]")]
    WeightOutOfRange { id: String, weight: u8, min: u8, max: u8 },
    #[error("Rule '{0}' has an empty label")]
    EmptyLabel(String),
    #[error("Rule '{0}' has no condition and would fire on every cycle")]
    EmptyCondition(String),
    #[error("Duplicate rule id '{0}'")]
    DuplicateRule(String),
    #[error("Rule catalogue is empty")]
    EmptyCatalogue,
    #[error("Invalid rule catalogue: {0}")]
    Catalogue(String),
    #[error("Unknown catalogue preset '{0}'")]
    UnknownPreset(String),
    #[error("Unknown rule group '{0}'")]
    UnknownGroup(String),
    #[error("confirmation_bars must be at least 1")]
    ZeroConfirmationBars,
    #[error("Confidence floor {floor} above ceiling {ceiling}")]
    FloorAboveCeiling { floor: u32, ceiling: u32 },
    #[error("Confidence ceiling {0} above 99")]
    CeilingTooHigh(u32),
    #[error("Weak-setup threshold {threshold} outside [{floor}, {ceiling}]")]
    ThresholdOutOfRange { threshold: u32, floor: u32, ceiling: u32 },
    #[error("min_rules_for_confluence must be at least 1")]
    ZeroConfluenceRules,
    #[error("Invalid classifier setting: {0}")]
    Classifier(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    #[error("fire() requires READY, setup is {0}")]
    NotReady(SetupState),
}
