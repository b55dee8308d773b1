//! Setup Memory - structural event gatekeeping
//!
//! Tracks one setup from structural event to a single fired decision:
//!
//! ```text
//! IDLE --event--> WAITING --N new bars--> READY --fire()--> FIRED --reset()--> IDLE
//! ```
//!
//! The confirmation delay cannot be skipped: there is no IDLE -> READY or
//! WAITING -> FIRED edge. One instance belongs to one instrument.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetupState {
    /// No structural event pending
    Idle,
    /// Counting confirmation bars
    Waiting,
    /// Eligible to fire
    Ready,
    /// Fired for this setup
    Fired,
}

impl Default for SetupState {
    fn default() -> Self {
        SetupState::Idle
    }
}

impl fmt::Display for SetupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupState::Idle => write!(f, "IDLE"),
            SetupState::Waiting => write!(f, "WAITING"),
            SetupState::Ready => write!(f, "READY"),
            SetupState::Fired => write!(f, "FIRED"),
        }
    }
}

/// A state change, reported for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTransition {
    pub from: SetupState,
    pub to: SetupState,
    pub bar_index: u64,
}

/// Per-instrument setup state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupMemory {
    state: SetupState,
    structural_event_index: Option<u64>,
    current_bar_index: u64,
    fired: bool,
    confirmation_bars: u64,
    rearm_on_event: bool,
}

impl SetupMemory {
    /// `confirmation_bars` is validated by `EngineConfig`; zero is treated as one
    pub fn new(confirmation_bars: u64, rearm_on_event: bool) -> Self {
        Self {
            state: SetupState::Idle,
            structural_event_index: None,
            current_bar_index: 0,
            fired: false,
            confirmation_bars: confirmation_bars.max(1),
            rearm_on_event,
        }
    }

    /// Start counting bars from `start_index` (e.g. a replay offset)
    pub fn starting_at(mut self, start_index: u64) -> Self {
        self.current_bar_index = start_index;
        self
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn structural_event_index(&self) -> Option<u64> {
        self.structural_event_index
    }

    pub fn current_bar_index(&self) -> u64 {
        self.current_bar_index
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub fn is_ready(&self) -> bool {
        self.state == SetupState::Ready
    }

    /// Bars still missing before READY, if waiting
    pub fn bars_until_ready(&self) -> Option<u64> {
        match (self.state, self.structural_event_index) {
            (SetupState::Waiting, Some(idx)) => Some(
                (idx + self.confirmation_bars).saturating_sub(self.current_bar_index),
            ),
            _ => None,
        }
    }

    /// Apply one cycle's notifications; new bar first, then the event
    pub fn observe(&mut self, new_bar: bool, structural_event: bool) -> Vec<SetupTransition> {
        let mut transitions = Vec::new();
        if new_bar {
            transitions.extend(self.on_new_bar());
        }
        if structural_event {
            transitions.extend(self.on_structural_event());
        }
        transitions
    }

    /// Advance the bar counter and re-check the WAITING -> READY guard
    pub fn on_new_bar(&mut self) -> Option<SetupTransition> {
        self.current_bar_index += 1;
        self.check_ready()
    }

    /// Anchor a structural event at the current bar.
    ///
    /// WAITING and READY re-anchor on the fresher event. FIRED re-arms only
    /// when configured to, passing through IDLE.
    pub fn on_structural_event(&mut self) -> Vec<SetupTransition> {
        let mut transitions = Vec::new();

        if self.state == SetupState::Fired {
            if !self.rearm_on_event {
                tracing::debug!(
                    bar_index = self.current_bar_index,
                    "Structural event ignored while FIRED"
                );
                return transitions;
            }
            transitions.extend(self.reset());
        }

        let from = self.state;
        self.structural_event_index = Some(self.current_bar_index);
        self.state = SetupState::Waiting;
        transitions.push(self.transition(from, SetupState::Waiting));
        transitions
    }

    /// READY -> FIRED. Any other state is rejected without side effects.
    pub fn fire(&mut self) -> Result<SetupTransition, SetupError> {
        if self.state != SetupState::Ready {
            return Err(SetupError::NotReady(self.state));
        }
        self.fired = true;
        self.state = SetupState::Fired;
        Ok(self.transition(SetupState::Ready, SetupState::Fired))
    }

    /// Back to IDLE, forgetting any pending event
    pub fn reset(&mut self) -> Option<SetupTransition> {
        let from = self.state;
        self.state = SetupState::Idle;
        self.structural_event_index = None;
        self.fired = false;
        (from != SetupState::Idle).then(|| self.transition(from, SetupState::Idle))
    }

    fn check_ready(&mut self) -> Option<SetupTransition> {
        if self.state != SetupState::Waiting {
            return None;
        }
        let idx = self.structural_event_index?;
        if self.current_bar_index.saturating_sub(idx) >= self.confirmation_bars {
            self.state = SetupState::Ready;
            return Some(self.transition(SetupState::Waiting, SetupState::Ready));
        }
        None
    }

    fn transition(&self, from: SetupState, to: SetupState) -> SetupTransition {
        tracing::debug!(
            from = %from,
            to = %to,
            bar_index = self.current_bar_index,
            event_index = ?self.structural_event_index,
            "Setup transition"
        );
        SetupTransition {
            from,
            to,
            bar_index: self.current_bar_index,
        }
    }
}

impl Default for SetupMemory {
    fn default() -> Self {
        Self::new(2, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_delay_scenario() {
        let mut memory = SetupMemory::default().starting_at(5);
        memory.observe(false, true);
        assert_eq!(memory.state(), SetupState::Waiting);
        assert_eq!(memory.structural_event_index(), Some(5));

        memory.observe(true, false);
        assert_eq!(memory.current_bar_index(), 6);
        assert_eq!(memory.state(), SetupState::Waiting);
        assert_eq!(memory.bars_until_ready(), Some(1));

        memory.observe(true, false);
        assert_eq!(memory.current_bar_index(), 7);
        assert_eq!(memory.state(), SetupState::Ready);
    }

    #[test]
    fn test_ready_never_early() {
        for confirmation in 1..5u64 {
            let mut memory = SetupMemory::new(confirmation, true).starting_at(10);
            memory.on_structural_event();
            let mut bars = 0;
            while !memory.is_ready() {
                memory.on_new_bar();
                bars += 1;
            }
            assert_eq!(bars, confirmation);
            assert_eq!(memory.current_bar_index(), 10 + confirmation);
        }
    }

    #[test]
    fn test_fire_requires_ready() {
        let mut memory = SetupMemory::default();
        assert_eq!(memory.fire(), Err(SetupError::NotReady(SetupState::Idle)));

        memory.on_structural_event();
        assert_eq!(
            memory.fire(),
            Err(SetupError::NotReady(SetupState::Waiting))
        );
        assert!(!memory.fired());

        memory.on_new_bar();
        memory.on_new_bar();
        assert!(memory.fire().is_ok());
        assert!(memory.fired());
        assert_eq!(memory.state(), SetupState::Fired);
        assert_eq!(memory.fire(), Err(SetupError::NotReady(SetupState::Fired)));
    }

    #[test]
    fn test_event_reanchors_waiting() {
        let mut memory = SetupMemory::default();
        memory.on_structural_event();
        memory.on_new_bar();
        memory.observe(true, true);
        // Re-anchored at bar 2, so bar 3 is not enough
        assert_eq!(memory.structural_event_index(), Some(2));
        memory.on_new_bar();
        assert_eq!(memory.state(), SetupState::Waiting);
        memory.on_new_bar();
        assert_eq!(memory.state(), SetupState::Ready);
    }

    #[test]
    fn test_fired_rearm_policy() {
        let mut memory = SetupMemory::new(2, false);
        memory.on_structural_event();
        memory.on_new_bar();
        memory.on_new_bar();
        memory.fire().unwrap();

        assert!(memory.on_structural_event().is_empty());
        assert_eq!(memory.state(), SetupState::Fired);

        memory.reset();
        assert_eq!(memory.state(), SetupState::Idle);
        assert_eq!(memory.structural_event_index(), None);

        let mut rearming = SetupMemory::new(2, true);
        rearming.on_structural_event();
        rearming.on_new_bar();
        rearming.on_new_bar();
        rearming.fire().unwrap();
        let transitions = rearming.on_structural_event();
        let path: Vec<SetupState> = transitions.iter().map(|t| t.to).collect();
        assert_eq!(path, vec![SetupState::Idle, SetupState::Waiting]);
        assert!(!rearming.fired());
    }
}
