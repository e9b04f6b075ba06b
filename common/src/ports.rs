//! Collaborators the heating controller drives but does not implement.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::thermal::ThermalParameters;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("temperature sensor unavailable")]
    Unavailable,
    #[error("temperature reading is stale ({age_secs}s old)")]
    Stale { age_secs: u64 },
    #[error("temperature reading {0} is out of range")]
    OutOfRange(f32),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parameter store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parameter store encoding: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;
}

pub trait TemperatureSensor {
    fn read(&mut self) -> Result<f32, SensorError>;
}

pub trait ScheduleSource {
    fn is_active(&self, now: DateTime<FixedOffset>) -> bool;

    /// Next instant the schedule switches on, if one is known.
    fn next_activation_time(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>>;
}

/// Fire-and-forget boiler output.
pub trait Actuator {
    fn set(&mut self, on: bool);
}

pub trait ParameterStore {
    fn load(&mut self) -> Result<ThermalParameters, StoreError>;
    fn save(&mut self, params: &ThermalParameters) -> Result<(), StoreError>;
}

/// What the schedule looked like at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSnapshot {
    pub active: bool,
    pub next_activation: Option<DateTime<FixedOffset>>,
}

impl ScheduleSnapshot {
    pub fn capture<S: ScheduleSource + ?Sized>(source: &S, now: DateTime<FixedOffset>) -> Self {
        Self {
            active: source.is_active(now),
            next_activation: source.next_activation_time(now),
        }
    }
}
