//! Malagna Library
//!
//! Multi-Factor Market Analysis & Signal Engine: fuses categorical market
//! features into BUY / SELL / WAIT decisions through a weighted rule
//! catalogue, a structural-event setup gate and an anti-repeat lock.

pub mod config;
pub mod error;
pub mod features;
pub mod persistence;
pub mod replay;
pub mod schedule;
pub mod session;
pub mod strategy;
pub mod types;

pub use error::{ConfigError, SetupError};
pub use strategy::{CycleInput, Decision, EngineConfig, SignalEngine};
pub use types::{Direction, Features, Signal};
