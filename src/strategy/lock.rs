//! Signal Lock - anti-repeat memory of the last emitted direction
//!
//! A directional decision is suppressed while the lock already holds the
//! same direction. Only a resolver-level WAIT or a reset releases it.

use serde::{Deserialize, Serialize};

use crate::types::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalLock {
    last: Option<Direction>,
    /// Points removed from a suppressed decision's confidence (diagnostic only)
    penalty: u32,
}

impl SignalLock {
    pub fn new(penalty: u32) -> Self {
        Self {
            last: None,
            penalty,
        }
    }

    pub fn last(&self) -> Option<Direction> {
        self.last
    }

    pub fn penalty(&self) -> u32 {
        self.penalty
    }

    /// Would emitting `direction` repeat the previous signal?
    pub fn is_repeat(&self, direction: Direction) -> bool {
        self.last == Some(direction)
    }

    /// Confidence a suppressed decision would have carried
    pub fn suppressed(&self, confidence: u32) -> u32 {
        confidence.saturating_sub(self.penalty)
    }

    pub fn record(&mut self, direction: Direction) {
        self.last = Some(direction);
    }

    pub fn clear(&mut self) {
        if let Some(direction) = self.last.take() {
            tracing::debug!(released = %direction, "Signal lock released");
        }
    }
}

impl Default for SignalLock {
    fn default() -> Self {
        Self::new(10)
    }
}
