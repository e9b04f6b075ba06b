use chrono::{DateTime, FixedOffset};

use crate::types::TargetMode;

/// Post-shutoff observation window used for loss and overshoot learning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleTracking {
    pub stop_temp: f32,
    pub peak: f32,
    pub peak_time: DateTime<FixedOffset>,
}

/// Burning and idle tracking are mutually exclusive; the boiler is commanded
/// on exactly while the phase is `Burning`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerPhase {
    Idle { tracking: Option<IdleTracking> },
    Burning {
        since: DateTime<FixedOffset>,
        start_temp: f32,
    },
}

impl Default for ControllerPhase {
    fn default() -> Self {
        Self::Idle { tracking: None }
    }
}

impl ControllerPhase {
    pub fn is_burning(&self) -> bool {
        matches!(self, Self::Burning { .. })
    }

    pub fn burn_started(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Burning { since, .. } => Some(*since),
            Self::Idle { .. } => None,
        }
    }

    pub fn idle_tracking(&self) -> Option<&IdleTracking> {
        match self {
            Self::Idle { tracking } => tracking.as_ref(),
            Self::Burning { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub target_mode: TargetMode,
    pub preheat_latched: bool,
    /// `None` until the first tick that saw a schedule.
    pub last_schedule_state: Option<bool>,
    pub phase: ControllerPhase,
}

impl ControllerState {
    pub fn boiler_active(&self) -> bool {
        self.phase.is_burning()
    }
}

pub(crate) fn minutes_between(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> f32 {
    (to - from).num_milliseconds() as f32 / 60_000.0
}

pub(crate) fn minutes(value: f32) -> chrono::Duration {
    chrono::Duration::milliseconds((value * 60_000.0) as i64)
}
