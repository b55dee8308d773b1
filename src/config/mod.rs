//! Configuration management for Malagna
//!
//! Loads defaults, then `config/default` and `config/local` files, then
//! `MALAGNA__*` environment variables (after reading `.env`).

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::features::ClassifierConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub classifier: ClassifierConfig,
    pub session: SessionConfig,
    pub replay: ReplayConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::load_from(Some("config/default"), Some("config/local"))
    }

    /// Load with explicit config file stems (missing files are skipped)
    pub fn load_from(default_file: Option<&str>, local_file: Option<&str>) -> Result<Self> {
        let classifier = ClassifierConfig::default();

        let mut builder = Config::builder()
            // Engine defaults
            .set_default("engine.preset", "confluence")?
            .set_default("engine.groups", Vec::<String>::new())?
            .set_default("engine.confirmation_bars", 2)?
            .set_default("engine.min_rules_for_confluence", 2)?
            .set_default("engine.min_score_for_confluence", 170)?
            .set_default("engine.confidence_floor", 60)?
            .set_default("engine.confidence_ceiling", 99)?
            .set_default("engine.confluence_step", 3)?
            .set_default("engine.penalties.weak_candle", 10)?
            .set_default("engine.penalties.proximity_conflict", 15)?
            .set_default("engine.penalties.counter_momentum", 10)?
            .set_default("engine.penalties.news_pending", 20)?
            .set_default("engine.penalties.low_activity", 8)?
            .set_default("engine.anti_repeat_penalty", 10)?
            .set_default("engine.rearm_on_structural_event", true)?
            // Classifier defaults
            .set_default("classifier.impulse_ratio", classifier.impulse_ratio)?
            .set_default("classifier.neutral_ratio", classifier.neutral_ratio)?
            .set_default("classifier.sr_tolerance", classifier.sr_tolerance)?
            .set_default("classifier.sr_lookback", classifier.sr_lookback as u64)?
            .set_default("classifier.min_trend_bars", classifier.min_trend_bars as u64)?
            .set_default("classifier.slope_horizon", classifier.slope_horizon as u64)?
            .set_default("classifier.activity_window", classifier.activity_window as u64)?
            .set_default("classifier.activity_ratio", classifier.activity_ratio)?
            .set_default("classifier.oscillator_band_low", classifier.oscillator_band_low)?
            .set_default("classifier.oscillator_band_high", classifier.oscillator_band_high)?
            .set_default(
                "classifier.oscillator_flat_epsilon",
                classifier.oscillator_flat_epsilon,
            )?
            .set_default("classifier.sweep_lookback", classifier.sweep_lookback as u64)?
            // Session defaults
            .set_default(
                "session.instruments",
                vec!["EUR/USD", "GBP/USD", "USD/JPY", "AUD/USD", "BTC/USD"],
            )?
            .set_default(
                "session.high_reliability",
                vec!["EUR/USD", "GBP/USD", "AUD/USD", "BTC/USD", "ETH/USD"],
            )?
            .set_default("session.low_reliability", Vec::<String>::new())?
            .set_default("session.bar_seconds", 60)?
            .set_default("session.poll_interval_ms", 1000)?
            // Replay defaults
            .set_default("replay.input_path", "./data/indicators.csv")?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Logging defaults
            .set_default("logging.json", false)?
            .set_default("logging.filter", "malagna=info")?;

        if let Some(path) = default_file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        if let Some(path) = local_file {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let config = builder
            // Override with environment variables (MALAGNA__*)
            .add_source(Environment::with_prefix("MALAGNA").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "preset={} confirmation_bars={} floor={} ceiling={} rearm={} instruments={:?} bar={}s",
            self.engine.preset,
            self.engine.confirmation_bars,
            self.engine.confidence_floor,
            self.engine.confidence_ceiling,
            self.engine.rearm_on_structural_event,
            self.session.instruments,
            self.session.bar_seconds
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
