//! Malagna - replay pre-computed indicator rows through the signal engine
//!
//! Usage: malagna [INPUT_CSV]
//!
//! Prints one JSON decision per line on stdout; logs go to stderr.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use malagna::config::{AppConfig, LoggingConfig};
use malagna::features::FeatureClassifier;
use malagna::persistence::DecisionJournal;
use malagna::replay::{self, Replayer};
use malagna::session::SessionBook;
use malagna::strategy::Decision;

#[derive(Serialize)]
struct OutputLine<'a> {
    instrument: &'a str,
    open_time: i64,
    decision: &'a Decision,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    let run_id = uuid::Uuid::new_v4();
    info!(%run_id, config = %config, "Starting Malagna");

    let engine_config = config
        .engine
        .to_engine_config()
        .context("Invalid engine configuration")?;
    let catalogue = config.engine.load_catalogue(&engine_config)?;
    info!(
        preset = %engine_config.preset,
        rules = catalogue.len(),
        "Catalogue loaded"
    );

    let classifier = FeatureClassifier::new(config.classifier.clone());
    let mut book = SessionBook::new(
        engine_config,
        catalogue,
        classifier,
        config.session.bar_seconds,
    )?;
    for instrument in &config.session.instruments {
        book.register(instrument, config.session.reliability_of(instrument))?;
    }

    let input = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.replay.input_path.clone());
    let rows = replay::load_rows(&input)?;
    info!(input = %input, rows = rows.len(), "Replay input loaded");

    let journal = if config.persistence.csv_enabled {
        Some(DecisionJournal::new(&config.persistence.data_dir)?)
    } else {
        None
    };

    let max_history = (config.classifier.min_trend_bars * 2).max(config.classifier.sr_lookback);
    let mut replayer = Replayer::new(book, max_history);
    let poll_interval = Duration::from_millis(config.session.poll_interval_ms);

    let run = replayer.run(&rows, poll_interval, journal.as_ref(), |row, decision| {
        let line = OutputLine {
            instrument: &row.instrument,
            open_time: row.open_time,
            decision,
        };
        match serde_json::to_string(&line) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to encode decision"),
        }
    });

    tokio::select! {
        summary = run => {
            let summary = summary?;
            info!(
                %run_id,
                cycles = summary.cycles,
                buys = summary.buys,
                sells = summary.sells,
                "Done"
            );
            if let Some(journal) = journal.as_ref() {
                let journaled = journal.load_decisions(None, 1)?;
                let fired = journaled.iter().filter(|r| r.signal != "WAIT").count();
                info!(decisions = journaled.len(), fired, "Journal for today");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(%run_id, "Interrupted, shutting down");
        }
    }

    Ok(())
}
