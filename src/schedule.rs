//! Next-candle entry scheduling
//!
//! A decision taken during bar N is meant to be entered at the open of bar
//! N+1 and expires one bar later.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Entry and expiry for a directional decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryWindow {
    pub entry: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl EntryWindow {
    /// Seconds left before entry; zero once the entry has passed
    pub fn seconds_to_entry(&self, now: DateTime<Utc>) -> i64 {
        (self.entry - now).num_seconds().max(0)
    }
}

/// Open of the bar containing `ts_ms`
pub fn bar_start(ts_ms: i64, bar_seconds: u64) -> i64 {
    let bar_ms = bar_ms(bar_seconds);
    ts_ms - ts_ms.rem_euclid(bar_ms)
}

/// Entry at the next bar open, expiry one bar after that
pub fn next_entry_window(now: DateTime<Utc>, bar_seconds: u64) -> EntryWindow {
    let bar_ms = bar_ms(bar_seconds);
    let entry_ms = bar_start(now.timestamp_millis(), bar_seconds) + bar_ms;
    let entry = Utc
        .timestamp_millis_opt(entry_ms)
        .single()
        .unwrap_or(now);
    EntryWindow {
        entry,
        expiry: entry + Duration::milliseconds(bar_ms),
    }
}

fn bar_ms(bar_seconds: u64) -> i64 {
    (bar_seconds.max(1) as i64) * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_start_alignment() {
        // 2023-11-14 22:14:10 UTC
        let ts = 1_700_000_050_000i64;
        assert_eq!(bar_start(ts, 60), 1_700_000_040_000);
        assert_eq!(bar_start(1_700_000_040_000, 60), 1_700_000_040_000);
        assert_eq!(bar_start(ts, 900), 1_699_999_200_000);
    }

    #[test]
    fn test_next_entry_window() {
        let now = Utc.timestamp_millis_opt(1_700_000_050_000).single().unwrap();
        let window = next_entry_window(now, 60);
        assert_eq!(window.entry.timestamp_millis(), 1_700_000_100_000);
        assert_eq!(window.expiry.timestamp_millis(), 1_700_000_160_000);
        assert_eq!(window.seconds_to_entry(now), 50);
        assert_eq!(window.seconds_to_entry(window.expiry), 0);
    }

    #[test]
    fn test_exact_boundary_waits_full_bar() {
        let now = Utc.timestamp_millis_opt(1_700_000_040_000).single().unwrap();
        let window = next_entry_window(now, 60);
        assert_eq!(window.seconds_to_entry(now), 60);
    }
}
