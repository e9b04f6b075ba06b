//! Turns burn/idle transitions into observations for the thermal model.
//!
//! A burn yields a heat-up rate. The idle period after it yields an overshoot
//! (peak above the shutoff temperature) and a loss rate (fall from the peak).

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::{
    config::HeatingConfig,
    hysteresis::CutoffReason,
    state::{minutes_between, ControllerPhase, IdleTracking},
    thermal::ThermalParameters,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningOutcome {
    pub heat_up: bool,
    pub heat_loss: bool,
    pub overshoot: bool,
}

impl LearningOutcome {
    pub fn changed(&self) -> bool {
        self.heat_up || self.heat_loss || self.overshoot
    }
}

pub fn on_burn_started(
    phase: &mut ControllerPhase,
    params: &mut ThermalParameters,
    config: &HeatingConfig,
    now: DateTime<FixedOffset>,
    current_temp: f32,
) -> LearningOutcome {
    let mut outcome = LearningOutcome::default();

    if let ControllerPhase::Idle {
        tracking: Some(tracking),
    } = *phase
    {
        if config.learning_enabled {
            outcome = finalize_idle(&tracking, params, now, current_temp);
        }
    }

    *phase = ControllerPhase::Burning {
        since: now,
        start_temp: current_temp,
    };
    outcome
}

pub fn on_burn_ended(
    phase: &mut ControllerPhase,
    params: &mut ThermalParameters,
    config: &HeatingConfig,
    now: DateTime<FixedOffset>,
    current_temp: f32,
    reason: CutoffReason,
) -> LearningOutcome {
    let mut outcome = LearningOutcome::default();

    if let ControllerPhase::Burning { since, start_temp } = *phase {
        if config.learning_enabled {
            outcome.heat_up = learn_heat_up(
                params,
                config,
                minutes_between(since, now),
                current_temp - start_temp,
                reason,
            );
        }
    }

    *phase = ControllerPhase::Idle {
        tracking: config.learning_enabled.then_some(IdleTracking {
            stop_temp: current_temp,
            peak: current_temp,
            peak_time: now,
        }),
    };
    outcome
}

/// Runs every idle tick: follows the post-shutoff peak and closes the window
/// once the peak is older than the tracking cap.
pub fn observe_idle(
    phase: &mut ControllerPhase,
    params: &mut ThermalParameters,
    config: &HeatingConfig,
    now: DateTime<FixedOffset>,
    current_temp: f32,
) -> LearningOutcome {
    let ControllerPhase::Idle {
        tracking: Some(tracking),
    } = phase
    else {
        return LearningOutcome::default();
    };

    if current_temp > tracking.peak {
        tracking.peak = current_temp;
        tracking.peak_time = now;
    }

    if minutes_between(tracking.peak_time, now) <= config.idle_tracking_window_min as f32 {
        return LearningOutcome::default();
    }

    let finished = *tracking;
    *phase = ControllerPhase::Idle { tracking: None };
    finalize_idle(&finished, params, now, current_temp)
}

/// Drops any tracking without learning from it.
pub fn abandon(phase: &mut ControllerPhase) {
    *phase = ControllerPhase::Idle { tracking: None };
}

fn learn_heat_up(
    params: &mut ThermalParameters,
    config: &HeatingConfig,
    burn_minutes: f32,
    temp_rise: f32,
    reason: CutoffReason,
) -> bool {
    if burn_minutes < config.min_burn_time_min as f32 {
        debug!(burn_minutes, "burn too short to learn from");
        return false;
    }
    if temp_rise < config.min_temp_rise {
        debug!(temp_rise, "temperature rise too small to learn from");
        return false;
    }
    if let Some(max_rise) = config.max_temp_rise {
        if temp_rise > max_rise {
            debug!(temp_rise, max_rise, "temperature jump looks like a sensor error");
            return false;
        }
    }

    let observed = temp_rise / burn_minutes;
    if !params.record_heat_up(observed) {
        return false;
    }
    info!(
        observed,
        heat_up_rate = params.heat_up_rate,
        reason = reason.as_str(),
        "learned heat-up rate"
    );
    true
}

fn finalize_idle(
    tracking: &IdleTracking,
    params: &mut ThermalParameters,
    now: DateTime<FixedOffset>,
    current_temp: f32,
) -> LearningOutcome {
    let mut outcome = LearningOutcome::default();

    let rise_after_stop = tracking.peak - tracking.stop_temp;
    if rise_after_stop > 0.0 && params.record_overshoot(rise_after_stop) {
        info!(
            observed = rise_after_stop,
            overshoot = params.overshoot,
            "learned overshoot"
        );
        outcome.overshoot = true;
    }

    let minutes_since_peak = minutes_between(tracking.peak_time, now);
    if minutes_since_peak > 0.0 {
        let observed = (tracking.peak - current_temp) / minutes_since_peak;
        if params.record_heat_loss(observed) {
            info!(
                observed,
                heat_loss_rate = params.heat_loss_rate,
                "learned heat-loss rate"
            );
            outcome.heat_loss = true;
        } else {
            debug!(observed, "room warmed while idle, loss sample discarded");
        }
    }

    outcome
}
