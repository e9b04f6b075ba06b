use chrono::{DateTime, FixedOffset};

use crate::{
    config::HeatingConfig,
    ports::ScheduleSnapshot,
    state::{minutes, ControllerState},
    thermal::ThermalParameters,
};

/// When the boiler is expected to fire next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextFire {
    Now,
    Preheating,
    At(DateTime<FixedOffset>),
    Unknown,
}

impl NextFire {
    /// `HH:MM` for today, `Ddd HH:MM` for later days.
    pub fn display(&self, now: DateTime<FixedOffset>) -> String {
        match self {
            Self::Now => "Now".to_string(),
            Self::Preheating => "Preheating".to_string(),
            Self::Unknown => "Unknown".to_string(),
            Self::At(at) if at.date_naive() == now.date_naive() => at.format("%H:%M").to_string(),
            Self::At(at) => at.format("%a %H:%M").to_string(),
        }
    }

    pub fn epoch(&self, now: DateTime<FixedOffset>) -> Option<i64> {
        match self {
            Self::Now | Self::Preheating => Some(now.timestamp()),
            Self::At(at) => Some(at.timestamp()),
            Self::Unknown => None,
        }
    }
}

/// Read-only estimate of the next firing; never touches controller state.
pub fn predict_next_fire(
    state: &ControllerState,
    config: &HeatingConfig,
    params: &ThermalParameters,
    schedule: Option<&ScheduleSnapshot>,
    current_temp: Option<f32>,
    now: DateTime<FixedOffset>,
) -> NextFire {
    if state.boiler_active() {
        return NextFire::Now;
    }
    if state.preheat_latched {
        return NextFire::Preheating;
    }

    let Some(next_on) = schedule.and_then(|snapshot| snapshot.next_activation) else {
        return NextFire::Unknown;
    };

    if !config.preheat_enabled {
        return NextFire::At(next_on);
    }

    let current = current_temp.unwrap_or(config.setback_temp);
    let time_needed = params
        .minutes_to_reach(current, config.comfort_temp)
        .min(config.max_preheat_min as f32);
    let fire_at = next_on - minutes(time_needed);

    if fire_at < now {
        NextFire::Now
    } else {
        NextFire::At(fire_at)
    }
}
