//! Configuration sections

use serde::Deserialize;
use std::path::Path;

use anyhow::Context;

use crate::error::ConfigError;
use crate::strategy::{
    Catalogue, CataloguePreset, EngineConfig, GatekeeperPenalties, RuleGroup,
};
use crate::types::Reliability;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Catalogue preset (confluence, strict, structural)
    pub preset: String,
    /// Rule groups to keep; empty keeps the preset's groups
    pub groups: Vec<String>,
    /// YAML rule list replacing the built-in catalogue
    #[serde(default)]
    pub catalogue_path: Option<String>,
    /// Closed bars between structural event and READY
    pub confirmation_bars: u64,
    /// Overrides the preset's confluence switch
    #[serde(default)]
    pub require_confluence: Option<bool>,
    pub min_rules_for_confluence: usize,
    pub min_score_for_confluence: u32,
    pub confidence_floor: u32,
    pub confidence_ceiling: u32,
    /// Overrides the preset's weak-setup threshold
    #[serde(default)]
    pub weak_setup_threshold: Option<u32>,
    pub confluence_step: u32,
    pub penalties: GatekeeperPenalties,
    pub anti_repeat_penalty: u32,
    pub rearm_on_structural_event: bool,
}

impl EngineSettings {
    /// Resolve names and overrides into a validated engine config
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let preset = CataloguePreset::from_str(&self.preset)
            .ok_or_else(|| ConfigError::UnknownPreset(self.preset.clone()))?;

        let groups = if self.groups.is_empty() {
            None
        } else {
            let parsed = self
                .groups
                .iter()
                .map(|g| RuleGroup::from_str(g).ok_or_else(|| ConfigError::UnknownGroup(g.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            Some(parsed)
        };

        let defaults = EngineConfig::for_preset(preset);
        let config = EngineConfig {
            preset,
            groups,
            confirmation_bars: self.confirmation_bars,
            require_confluence: self.require_confluence.unwrap_or(defaults.require_confluence),
            min_rules_for_confluence: self.min_rules_for_confluence,
            min_score_for_confluence: self.min_score_for_confluence,
            confidence_floor: self.confidence_floor,
            confidence_ceiling: self.confidence_ceiling,
            weak_setup_threshold: self
                .weak_setup_threshold
                .unwrap_or(defaults.weak_setup_threshold),
            confluence_step: self.confluence_step,
            penalties: self.penalties,
            anti_repeat_penalty: self.anti_repeat_penalty,
            rearm_on_structural_event: self.rearm_on_structural_event,
            auto_fire: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Catalogue from `catalogue_path`, or the preset's built-in rules
    pub fn load_catalogue(&self, engine: &EngineConfig) -> anyhow::Result<Catalogue> {
        let Some(path) = self.catalogue_path.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(engine.catalogue());
        };

        let catalogue = match Catalogue::from_yaml_file(Path::new(path)) {
            Ok(catalogue) => catalogue,
            Err(e) => {
                tracing::warn!(path, error = %e, "Catalogue rejected");
                return Err(e);
            }
        };
        let catalogue = match &engine.groups {
            Some(groups) => catalogue.with_groups(groups),
            None => catalogue,
        };
        if catalogue.is_empty() {
            return Err(ConfigError::EmptyCatalogue)
                .with_context(|| format!("No rules left in {} after group filter", path));
        }
        Ok(catalogue)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Instruments opened at startup
    pub instruments: Vec<String>,
    /// Instruments tagged High; anything not listed is Medium unless in `low_reliability`
    pub high_reliability: Vec<String>,
    pub low_reliability: Vec<String>,
    /// Bar length in seconds
    pub bar_seconds: u64,
    /// Polling interval of the driving loop in milliseconds
    pub poll_interval_ms: u64,
}

impl SessionConfig {
    pub fn reliability_of(&self, instrument: &str) -> Reliability {
        if self.high_reliability.iter().any(|i| i == instrument) {
            Reliability::High
        } else if self.low_reliability.iter().any(|i| i == instrument) {
            Reliability::Low
        } else {
            Reliability::Medium
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// CSV of pre-computed indicator rows
    pub input_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable CSV decision journal
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub filter: String,
}
