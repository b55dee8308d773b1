//! CSV Persistence Module
//!
//! Daily decision journal: one row per evaluated cycle, appended to
//! `<data_dir>/decisions/decisions_<YYYY-MM-DD>.csv`.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::strategy::Decision;

/// One journaled decision, flattened for CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: i64,
    pub instrument: String,
    pub signal: String,
    pub confidence: u32,
    pub reason: String,
    pub setup_state: String,
    pub buy_score: u32,
    pub sell_score: u32,
    /// Matching BUY labels joined with `|`
    pub buy_rules: String,
    pub sell_rules: String,
    pub penalty_total: u32,
    #[serde(default)]
    pub suppressed_confidence: Option<u32>,
    #[serde(default)]
    pub reliability: Option<String>,
    #[serde(default)]
    pub entry_time: Option<i64>,
    #[serde(default)]
    pub expiry_time: Option<i64>,
}

impl DecisionRecord {
    pub fn from_decision(instrument: &str, timestamp: i64, decision: &Decision) -> Self {
        Self {
            timestamp,
            instrument: instrument.to_string(),
            signal: decision.signal.to_string(),
            confidence: decision.confidence,
            reason: decision.reason.clone(),
            setup_state: decision.setup_state.to_string(),
            buy_score: decision.tally.buy_score,
            sell_score: decision.tally.sell_score,
            buy_rules: decision.tally.buy_labels.join("|"),
            sell_rules: decision.tally.sell_labels.join("|"),
            penalty_total: decision.gatekeepers.total(),
            suppressed_confidence: decision.suppressed_confidence,
            reliability: decision.reliability.map(|r| r.to_string()),
            entry_time: decision.entry_time.map(|t| t.timestamp_millis()),
            expiry_time: decision.expiry_time.map(|t| t.timestamp_millis()),
        }
    }
}

/// Append-only CSV journal
pub struct DecisionJournal {
    data_dir: PathBuf,
    writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
}

impl DecisionJournal {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        let folder = data_dir.join("decisions");
        fs::create_dir_all(&folder).context("Failed to create decisions directory")?;

        let today = Utc::now().format("%Y-%m-%d");
        let writer = Self::create_writer(&folder, &format!("decisions_{}.csv", today))?;

        info!(data_dir = %data_dir.display(), "Decision journal opened");
        Ok(Self {
            data_dir,
            writer: Arc::new(AsyncRwLock::new(writer)),
        })
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub async fn save_decision(&self, record: DecisionRecord) -> Result<()> {
        let mut writer = self.writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write decision record")?;
        writer.flush().context("Failed to flush decision writer")?;
        Ok(())
    }

    /// Decisions of the last `days` days, oldest first
    pub fn load_decisions(&self, instrument: Option<&str>, days: u32) -> Result<Vec<DecisionRecord>> {
        let mut records = Vec::new();

        for i in 0..days {
            let date = Utc::now() - chrono::Duration::days(i as i64);
            let path = self
                .data_dir
                .join("decisions")
                .join(format!("decisions_{}.csv", date.format("%Y-%m-%d")));
            if !path.exists() {
                continue;
            }

            let file = fs::File::open(&path).context("Failed to open decision file")?;
            let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
            for result in reader.deserialize() {
                let record: DecisionRecord =
                    result.context("Failed to deserialize decision record")?;
                if instrument.map_or(true, |name| record.instrument == name) {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
