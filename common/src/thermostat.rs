use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::{
    config::{HeatingConfig, PersistedSettings},
    hysteresis::{decide, safety_cutoff_due, BurnEvent, CutoffReason, HysteresisInput},
    learning::{self, LearningOutcome},
    ports::{ScheduleSnapshot, SensorError},
    prediction::{predict_next_fire, NextFire},
    state::{minutes_between, ControllerState},
    target::{observe_schedule, resolve_target},
    thermal::ThermalParameters,
    types::{
        ControllerStatePayload, ControllerStatus, HvacAction, HvacMode, TargetMode, TickTrigger,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    BoilerOn,
    BoilerOff,
    SaveParameters(ThermalParameters),
}

/// Everything a tick observes from the outside world.
#[derive(Debug, Clone, PartialEq)]
pub struct TickInput {
    pub now: DateTime<FixedOffset>,
    pub temperature: Result<f32, SensorError>,
    pub schedule: Option<ScheduleSnapshot>,
}

#[derive(Debug, Clone)]
pub struct HeatingEngine {
    config: HeatingConfig,
    settings: PersistedSettings,
    state: ControllerState,
    params: ThermalParameters,

    current_temp: Option<f32>,
    target_temp: f32,
    preheating: bool,
    next_fire: NextFire,
    last_schedule: Option<ScheduleSnapshot>,
}

impl HeatingEngine {
    pub fn new(
        mut config: HeatingConfig,
        settings: PersistedSettings,
        mut params: ThermalParameters,
    ) -> Self {
        config.sanitize();
        params.sanitize();
        Self {
            target_temp: config.setback_temp,
            config,
            settings,
            state: ControllerState::default(),
            params,
            current_temp: None,
            preheating: false,
            next_fire: NextFire::Unknown,
            last_schedule: None,
        }
    }

    pub fn config(&self) -> &HeatingConfig {
        &self.config
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn parameters(&self) -> &ThermalParameters {
        &self.params
    }

    pub fn heat_up_rate(&self) -> f32 {
        self.params.heat_up_rate
    }

    pub fn heat_loss_rate(&self) -> f32 {
        self.params.heat_loss_rate
    }

    pub fn overshoot(&self) -> f32 {
        self.params.overshoot
    }

    pub fn next_fire(&self) -> NextFire {
        self.next_fire
    }

    pub fn current_temp(&self) -> Option<f32> {
        self.current_temp
    }

    pub fn target_temp(&self) -> f32 {
        self.target_temp
    }

    pub fn target_mode(&self) -> TargetMode {
        self.state.target_mode
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.settings.hvac_mode
    }

    pub fn is_preheating(&self) -> bool {
        self.preheating
    }

    pub fn is_boiler_active(&self) -> bool {
        self.state.boiler_active()
    }

    pub fn hvac_action(&self) -> HvacAction {
        if self.settings.hvac_mode == HvacMode::Off {
            HvacAction::Off
        } else if self.state.boiler_active() {
            HvacAction::Heating
        } else {
            HvacAction::Idle
        }
    }

    pub fn runtime_min(&self, now: DateTime<FixedOffset>) -> f32 {
        self.state
            .phase
            .burn_started()
            .map(|since| minutes_between(since, now).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn set_hvac_mode_with_actions(&mut self, mode: HvacMode) -> (bool, Vec<EngineAction>) {
        let mut actions = Vec::new();
        if self.settings.hvac_mode == mode {
            return (false, actions);
        }

        info!(mode = mode.as_str(), "hvac mode changed");
        self.settings.hvac_mode = mode;
        if mode == HvacMode::Off {
            self.force_off(&mut actions);
            self.preheating = false;
            self.next_fire = NextFire::Unknown;
        }
        (true, actions)
    }

    /// Enters manual mode; returns the clamped target actually applied.
    pub fn set_manual_target(&mut self, target: f32) -> Option<f32> {
        if !target.is_finite() {
            return None;
        }
        let clamped = self.config.clamp_target(target);
        self.state.target_mode = TargetMode::Manual(clamped);
        Some(clamped)
    }

    pub fn resume_auto(&mut self) -> bool {
        if self.state.target_mode == TargetMode::Auto {
            return false;
        }
        self.state.target_mode = TargetMode::Auto;
        true
    }

    /// Applies new tunables. Changed safety thresholds reset the controller state.
    pub fn reconfigure(&mut self, mut config: HeatingConfig) -> Vec<EngineAction> {
        config.sanitize();
        let reset = self.config.safety_thresholds_differ(&config);
        self.config = config;

        if reset {
            info!("safety thresholds changed, resetting controller state");
            self.reset()
        } else {
            Vec::new()
        }
    }

    /// Logical reset: back to auto with no tracking, boiler commanded off.
    pub fn reset(&mut self) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.force_off(&mut actions);
        self.state = ControllerState::default();
        self.preheating = false;
        self.last_schedule = None;
        actions
    }

    pub fn tick(&mut self, trigger: TickTrigger, input: TickInput) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let now = input.now;

        if self.settings.hvac_mode == HvacMode::Off {
            self.force_off(&mut actions);
            self.preheating = false;
            // Boiler logic is skipped, schedule transitions are not.
            if let Ok(temp) = input.temperature {
                self.current_temp = Some(temp);
                observe_schedule(&mut self.state, input.schedule.as_ref());
            }
            self.last_schedule = input.schedule;
            self.refresh_prediction(now);
            return actions;
        }

        let temp = match input.temperature {
            Ok(temp) => temp,
            Err(err) => {
                warn!(trigger = trigger.as_str(), "skipping tick: {err}");
                self.enforce_safety_cutoff(now, &mut actions);
                return actions;
            }
        };
        self.current_temp = Some(temp);
        self.last_schedule = input.schedule;

        let resolution = resolve_target(
            &mut self.state,
            &self.config,
            input.schedule.as_ref(),
            temp,
            now,
            &self.params,
        );
        self.target_temp = resolution.target;
        self.preheating = resolution.preheating;

        let decision = decide(&HysteresisInput {
            hvac_mode: self.settings.hvac_mode,
            target: resolution.target,
            current_temp: temp,
            boiler_active: self.state.boiler_active(),
            elapsed_runtime_min: self.runtime_min(now),
            overshoot: if self.config.overshoot_enabled {
                self.params.overshoot
            } else {
                0.0
            },
            hysteresis: self.config.hysteresis,
            safety_max_runtime_min: self.config.safety_max_runtime_min as f32,
        });

        let outcome = match decision.event {
            Some(BurnEvent::Started) => {
                info!(
                    temp,
                    target = resolution.target,
                    trigger = trigger.as_str(),
                    "demand detected, boiler on"
                );
                actions.push(EngineAction::BoilerOn);
                learning::on_burn_started(
                    &mut self.state.phase,
                    &mut self.params,
                    &self.config,
                    now,
                    temp,
                )
            }
            Some(BurnEvent::Ended { reason }) => {
                match reason {
                    CutoffReason::SafetyRuntime => warn!(
                        runtime_min = self.runtime_min(now),
                        "safety runtime exceeded, boiler forced off"
                    ),
                    CutoffReason::TargetReached => {
                        info!(temp, target = resolution.target, "target reached, boiler off")
                    }
                }
                actions.push(EngineAction::BoilerOff);
                learning::on_burn_ended(
                    &mut self.state.phase,
                    &mut self.params,
                    &self.config,
                    now,
                    temp,
                    reason,
                )
            }
            None => learning::observe_idle(
                &mut self.state.phase,
                &mut self.params,
                &self.config,
                now,
                temp,
            ),
        };
        self.push_save(outcome, &mut actions);

        self.refresh_prediction(now);
        actions
    }

    pub fn status(&self, now: DateTime<FixedOffset>, parameters_saved: bool) -> ControllerStatus {
        ControllerStatus {
            current_temp: self.current_temp,
            target_temp: self.target_temp,
            hvac_mode: self.settings.hvac_mode.as_str(),
            hvac_action: self.hvac_action().as_str(),
            target_mode: self.state.target_mode.as_str(),
            manual_target: self.state.target_mode.manual_target(),
            preheating: self.preheating,
            boiler_active: self.state.boiler_active(),
            runtime_min: self.runtime_min(now) as u64,
            hysteresis: self.config.hysteresis,
            heat_up_rate: round_to(self.params.heat_up_rate, 4),
            heat_loss_rate: round_to(self.params.heat_loss_rate, 4),
            overshoot: round_to(self.params.overshoot, 2),
            next_fire: self.next_fire.display(now),
            next_fire_epoch: self.next_fire.epoch(now),
            parameters_saved,
        }
    }

    pub fn state_payload(&self, now: DateTime<FixedOffset>) -> ControllerStatePayload {
        ControllerStatePayload {
            temp: self.current_temp,
            target: self.target_temp,
            mode: self.settings.hvac_mode.as_str(),
            action: self.hvac_action().as_str(),
            boiler: self.state.boiler_active(),
            heat_up_rate: round_to(self.params.heat_up_rate, 4),
            heat_loss_rate: round_to(self.params.heat_loss_rate, 4),
            overshoot: round_to(self.params.overshoot, 2),
            next_fire: self.next_fire.display(now),
        }
    }

    fn force_off(&mut self, actions: &mut Vec<EngineAction>) {
        if self.state.boiler_active() {
            actions.push(EngineAction::BoilerOff);
        }
        learning::abandon(&mut self.state.phase);
    }

    fn enforce_safety_cutoff(
        &mut self,
        now: DateTime<FixedOffset>,
        actions: &mut Vec<EngineAction>,
    ) {
        if !self.state.boiler_active() {
            return;
        }
        let runtime_min = self.runtime_min(now);
        if safety_cutoff_due(runtime_min, self.config.safety_max_runtime_min as f32) {
            warn!(
                runtime_min,
                "safety runtime exceeded without sensor data, boiler forced off"
            );
            actions.push(EngineAction::BoilerOff);
            learning::abandon(&mut self.state.phase);
        }
    }

    fn push_save(&self, outcome: LearningOutcome, actions: &mut Vec<EngineAction>) {
        if outcome.changed() {
            actions.push(EngineAction::SaveParameters(self.params));
        }
    }

    fn refresh_prediction(&mut self, now: DateTime<FixedOffset>) {
        if self.settings.hvac_mode == HvacMode::Off {
            self.next_fire = NextFire::Unknown;
            return;
        }
        self.next_fire = predict_next_fire(
            &self.state,
            &self.config,
            &self.params,
            self.last_schedule.as_ref(),
            self.current_temp,
            now,
        );
    }
}

fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}
