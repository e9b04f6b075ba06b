use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::{
    config::HeatingConfig,
    ports::ScheduleSnapshot,
    state::{minutes, ControllerState},
    thermal::ThermalParameters,
    types::TargetMode,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetResolution {
    pub target: f32,
    pub schedule_changed: bool,
    pub preheating: bool,
}

/// Records this tick's schedule state. A flip since the previous observation
/// drops any manual override and any preheat latch; returns whether it flipped.
pub fn observe_schedule(state: &mut ControllerState, schedule: Option<&ScheduleSnapshot>) -> bool {
    let Some(snapshot) = schedule else {
        return false;
    };

    let changed = state
        .last_schedule_state
        .is_some_and(|previous| previous != snapshot.active);
    if changed {
        info!(
            active = snapshot.active,
            "schedule changed, returning to auto mode"
        );
        state.target_mode = TargetMode::Auto;
        state.preheat_latched = false;
    }
    state.last_schedule_state = Some(snapshot.active);
    changed
}

/// Picks the target temperature for this tick from manual override, schedule
/// state and the preheat prediction.
pub fn resolve_target(
    state: &mut ControllerState,
    config: &HeatingConfig,
    schedule: Option<&ScheduleSnapshot>,
    current_temp: f32,
    now: DateTime<FixedOffset>,
    params: &ThermalParameters,
) -> TargetResolution {
    let schedule_changed = observe_schedule(state, schedule);

    let resolution = |target: f32, preheating: bool| TargetResolution {
        target,
        schedule_changed,
        preheating,
    };

    if let TargetMode::Manual(target) = state.target_mode {
        state.preheat_latched = false;
        return resolution(target, false);
    }

    let Some(snapshot) = schedule else {
        return resolution(config.setback_temp, false);
    };

    if snapshot.active {
        return resolution(config.comfort_temp, false);
    }

    if !config.preheat_enabled {
        return resolution(config.setback_temp, false);
    }

    let time_needed = params
        .minutes_to_reach(current_temp, config.comfort_temp)
        .min(config.max_preheat_min as f32);
    let due = snapshot
        .next_activation
        .is_some_and(|next_on| now + minutes(time_needed) >= next_on);

    if state.preheat_latched || due {
        if !state.preheat_latched {
            info!(
                minutes_needed = time_needed,
                "preheat latched ahead of schedule"
            );
        }
        state.preheat_latched = true;
        return resolution(config.comfort_temp, true);
    }

    debug!(minutes_needed = time_needed, "preheat not yet due");
    resolution(config.setback_temp, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, hour, minute, 0)
            .unwrap()
    }

    fn config() -> HeatingConfig {
        HeatingConfig {
            comfort_temp: 21.0,
            setback_temp: 16.0,
            ..HeatingConfig::default()
        }
    }

    fn params(rate: f32) -> ThermalParameters {
        ThermalParameters {
            heat_up_rate: rate,
            ..ThermalParameters::default()
        }
    }

    fn off_until(next_on: DateTime<FixedOffset>) -> ScheduleSnapshot {
        ScheduleSnapshot {
            active: false,
            next_activation: Some(next_on),
        }
    }

    #[test]
    fn preheat_latches_when_start_is_within_time_needed() {
        let mut state = ControllerState {
            last_schedule_state: Some(false),
            ..ControllerState::default()
        };
        let now = at(6, 0);
        let schedule = off_until(now + Duration::minutes(9));

        let resolution = resolve_target(
            &mut state,
            &config(),
            Some(&schedule),
            18.0,
            now,
            &params(0.3),
        );

        assert_eq!(resolution.target, 21.0);
        assert!(resolution.preheating);
        assert!(state.preheat_latched);
    }

    #[test]
    fn preheat_waits_when_start_is_further_than_time_needed() {
        let mut state = ControllerState::default();
        let now = at(6, 0);
        let schedule = off_until(now + Duration::minutes(11));

        let resolution = resolve_target(
            &mut state,
            &config(),
            Some(&schedule),
            18.0,
            now,
            &params(0.3),
        );

        assert_eq!(resolution.target, 16.0);
        assert!(!resolution.preheating);
        assert!(!state.preheat_latched);
    }

    #[test]
    fn latch_holds_even_after_room_warms() {
        let mut state = ControllerState {
            preheat_latched: true,
            last_schedule_state: Some(false),
            ..ControllerState::default()
        };
        let now = at(6, 0);
        let schedule = off_until(now + Duration::hours(2));

        let resolution = resolve_target(
            &mut state,
            &config(),
            Some(&schedule),
            21.5,
            now,
            &params(0.3),
        );

        assert_eq!(resolution.target, 21.0);
        assert!(resolution.preheating);
    }

    #[test]
    fn schedule_flip_clears_manual_and_latch() {
        let mut state = ControllerState {
            target_mode: TargetMode::Manual(25.0),
            preheat_latched: true,
            last_schedule_state: Some(false),
            ..ControllerState::default()
        };
        let schedule = ScheduleSnapshot {
            active: true,
            next_activation: None,
        };

        let resolution = resolve_target(
            &mut state,
            &config(),
            Some(&schedule),
            18.0,
            at(7, 0),
            &params(0.3),
        );

        assert!(resolution.schedule_changed);
        assert_eq!(resolution.target, 21.0);
        assert_eq!(state.target_mode, TargetMode::Auto);
        assert!(!state.preheat_latched);
        assert_eq!(state.last_schedule_state, Some(true));
    }

    #[test]
    fn manual_target_wins_without_schedule_change() {
        let mut state = ControllerState {
            target_mode: TargetMode::Manual(23.5),
            preheat_latched: true,
            last_schedule_state: Some(false),
            ..ControllerState::default()
        };
        let now = at(6, 0);
        let schedule = off_until(now + Duration::minutes(5));

        let resolution =
            resolve_target(&mut state, &config(), Some(&schedule), 18.0, now, &params(0.3));

        assert_eq!(resolution.target, 23.5);
        assert!(!resolution.schedule_changed);
        assert!(!state.preheat_latched);
    }

    #[test]
    fn first_observation_is_not_a_transition() {
        let mut state = ControllerState {
            target_mode: TargetMode::Manual(19.0),
            ..ControllerState::default()
        };
        let schedule = ScheduleSnapshot {
            active: true,
            next_activation: None,
        };

        let resolution = resolve_target(
            &mut state,
            &config(),
            Some(&schedule),
            18.0,
            at(8, 0),
            &params(0.3),
        );

        assert!(!resolution.schedule_changed);
        assert_eq!(resolution.target, 19.0);
    }

    #[test]
    fn observing_schedule_without_flip_keeps_override() {
        let mut state = ControllerState {
            target_mode: TargetMode::Manual(22.0),
            last_schedule_state: Some(true),
            ..ControllerState::default()
        };
        let on = ScheduleSnapshot {
            active: true,
            next_activation: None,
        };

        assert!(!observe_schedule(&mut state, Some(&on)));
        assert!(!observe_schedule(&mut state, None));
        assert_eq!(state.target_mode, TargetMode::Manual(22.0));
        assert_eq!(state.last_schedule_state, Some(true));
    }

    #[test]
    fn missing_schedule_means_setback() {
        let mut state = ControllerState::default();

        let resolution = resolve_target(&mut state, &config(), None, 10.0, at(6, 0), &params(0.3));

        assert_eq!(resolution.target, 16.0);
        assert!(!resolution.preheating);
    }

    #[test]
    fn preheat_disabled_means_setback() {
        let mut state = ControllerState::default();
        let config = HeatingConfig {
            preheat_enabled: false,
            ..config()
        };
        let now = at(6, 0);
        let schedule = off_until(now + Duration::minutes(1));

        let resolution = resolve_target(&mut state, &config, Some(&schedule), 10.0, now, &params(0.3));

        assert_eq!(resolution.target, 16.0);
    }

    #[test]
    fn zero_heat_up_rate_does_not_divide_by_zero() {
        let mut state = ControllerState::default();
        let now = at(6, 0);
        let schedule = off_until(now + Duration::minutes(200));

        let resolution =
            resolve_target(&mut state, &config(), Some(&schedule), 18.0, now, &params(0.0));

        // Floor rate of 0.01 gives 300 minutes, capped to the 180 minute preheat limit.
        assert_eq!(resolution.target, 16.0);
        assert!(!state.preheat_latched);
    }
}
