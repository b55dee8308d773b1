//! Replay driver
//!
//! Feeds rows of already-computed indicators through the session book at a
//! fixed polling interval, one row per cycle. Each row is one closed bar for
//! one instrument; rows of several instruments may be interleaved.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::features::IndicatorSnapshot;
use crate::persistence::{DecisionJournal, DecisionRecord};
use crate::session::SessionBook;
use crate::strategy::Decision;
use crate::types::{Bar, Signal};

/// One CSV input row
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayRow {
    pub instrument: String,
    /// Bar open time in milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub fast_ma: Option<f64>,
    #[serde(default)]
    pub slow_ma: Option<f64>,
    #[serde(default)]
    pub long_ma: Option<f64>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub oscillator_diff: Option<f64>,
    #[serde(default)]
    pub news_imminent: Option<bool>,
}

impl ReplayRow {
    pub fn bar(&self) -> Bar {
        Bar {
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume.unwrap_or(0.0),
        }
    }
}

/// Read every row of a replay CSV
pub fn load_rows(path: impl AsRef<Path>) -> Result<Vec<ReplayRow>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open replay input {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in reader.deserialize().enumerate() {
        let row: ReplayRow =
            result.with_context(|| format!("Bad replay row {} in {}", line + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Rolling per-instrument history
#[derive(Debug, Default)]
struct History {
    bars: Vec<Bar>,
    fast_ma: Vec<f64>,
    slow_ma: Vec<f64>,
    long_ma: Vec<f64>,
}

impl History {
    fn push(&mut self, row: &ReplayRow, max_len: usize) {
        self.bars.push(row.bar());
        let len = self.bars.len();
        push_aligned(&mut self.fast_ma, row.fast_ma, len);
        push_aligned(&mut self.slow_ma, row.slow_ma, len);
        push_aligned(&mut self.long_ma, row.long_ma, len);
        for series in [&mut self.fast_ma, &mut self.slow_ma, &mut self.long_ma] {
            trim(series, max_len);
        }
        trim(&mut self.bars, max_len);
    }

    fn snapshot(&self, row: &ReplayRow) -> IndicatorSnapshot {
        IndicatorSnapshot {
            bars: self.bars.clone(),
            fast_ma: self.fast_ma.clone(),
            slow_ma: self.slow_ma.clone(),
            long_ma: self.long_ma.clone(),
            rsi: row.rsi,
            oscillator_diff: row.oscillator_diff,
            news_imminent: row.news_imminent.unwrap_or(false),
        }
    }
}

/// Keep a started series the same length as `bars`.
///
/// A series nobody has reported yet stays empty. The first value pads the
/// older slots with NaN; a missing value repeats the previous one.
fn push_aligned(series: &mut Vec<f64>, value: Option<f64>, bars_len: usize) {
    match value {
        Some(v) => {
            series.resize(bars_len.saturating_sub(1), f64::NAN);
            series.push(v);
        }
        None => {
            if let Some(&previous) = series.last() {
                series.resize(bars_len, previous);
            }
        }
    }
}

fn trim<T>(series: &mut Vec<T>, max_len: usize) {
    if series.len() > max_len {
        let excess = series.len() - max_len;
        series.drain(..excess);
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub cycles: u64,
    pub buys: u64,
    pub sells: u64,
    pub waits: u64,
}

impl ReplaySummary {
    fn record(&mut self, decision: &Decision) {
        self.cycles += 1;
        match decision.signal {
            Signal::Buy => self.buys += 1,
            Signal::Sell => self.sells += 1,
            Signal::Wait => self.waits += 1,
        }
    }
}

pub struct Replayer {
    book: SessionBook,
    histories: HashMap<String, History>,
    max_history: usize,
}

impl Replayer {
    /// `max_history` bounds the bars kept per instrument
    pub fn new(book: SessionBook, max_history: usize) -> Self {
        Self {
            book,
            histories: HashMap::new(),
            max_history: max_history.max(5),
        }
    }

    pub fn book(&self) -> &SessionBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut SessionBook {
        &mut self.book
    }

    /// Evaluate one row
    pub fn step(&mut self, row: &ReplayRow) -> Result<Decision> {
        let history = self.histories.entry(row.instrument.clone()).or_default();
        history.push(row, self.max_history);
        let snapshot = history.snapshot(row);

        let now = bar_time(row.open_time)?;
        let decision = self
            .book
            .evaluate_snapshot(&row.instrument, &snapshot, now)
            .with_context(|| format!("Failed to evaluate {}", row.instrument))?;
        Ok(decision)
    }

    /// Play every row, one per tick of `poll_interval`
    pub async fn run<F>(
        &mut self,
        rows: &[ReplayRow],
        poll_interval: Duration,
        journal: Option<&DecisionJournal>,
        mut on_decision: F,
    ) -> Result<ReplaySummary>
    where
        F: FnMut(&ReplayRow, &Decision),
    {
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        let mut summary = ReplaySummary::default();

        for row in rows {
            ticker.tick().await;
            let decision = self.step(row)?;

            if let Some(journal) = journal {
                journal
                    .save_decision(DecisionRecord::from_decision(
                        &row.instrument,
                        row.open_time,
                        &decision,
                    ))
                    .await?;
            }
            summary.record(&decision);
            on_decision(row, &decision);
        }

        tracing::info!(
            cycles = summary.cycles,
            buys = summary.buys,
            sells = summary.sells,
            waits = summary.waits,
            "Replay finished"
        );
        Ok(summary)
    }
}

fn bar_time(open_time: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(open_time)
        .single()
        .with_context(|| format!("Invalid bar time {}", open_time))
}
