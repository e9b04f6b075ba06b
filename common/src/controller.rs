use tracing::{debug, warn};

use crate::{
    config::{HeatingConfig, PersistedSettings},
    ports::{Actuator, Clock, ParameterStore, ScheduleSnapshot, ScheduleSource, TemperatureSensor},
    thermal::ThermalParameters,
    thermostat::{EngineAction, HeatingEngine, TickInput},
    types::{ControllerStatePayload, ControllerStatus, HvacMode, TickTrigger},
};

/// Binds a [`HeatingEngine`] to its clock, sensor, schedule, boiler and
/// parameter store. Every mutation runs to completion before returning, so
/// callers serialize ticks simply by holding `&mut self`.
pub struct HeatingController<C, T, S, A, P> {
    engine: HeatingEngine,
    clock: C,
    sensor: T,
    schedule: Option<S>,
    actuator: A,
    store: P,
    save_pending: bool,
}

impl<C, T, S, A, P> HeatingController<C, T, S, A, P>
where
    C: Clock,
    T: TemperatureSensor,
    S: ScheduleSource,
    A: Actuator,
    P: ParameterStore,
{
    pub fn new(
        config: HeatingConfig,
        settings: PersistedSettings,
        clock: C,
        sensor: T,
        schedule: Option<S>,
        actuator: A,
        mut store: P,
    ) -> Self {
        let params = store.load().unwrap_or_else(|err| {
            warn!("failed to load thermal parameters, using defaults: {err}");
            ThermalParameters::with_overshoot_seed(config.overshoot_seed)
        });

        Self {
            engine: HeatingEngine::new(config, settings, params),
            clock,
            sensor,
            schedule,
            actuator,
            store,
            save_pending: false,
        }
    }

    pub fn engine(&self) -> &HeatingEngine {
        &self.engine
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn sensor_mut(&mut self) -> &mut T {
        &mut self.sensor
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn has_schedule(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn is_save_pending(&self) -> bool {
        self.save_pending
    }

    pub fn tick(&mut self, trigger: TickTrigger) -> Vec<EngineAction> {
        let now = self.clock.now();
        let input = TickInput {
            now,
            temperature: self.sensor.read(),
            schedule: self
                .schedule
                .as_ref()
                .map(|source| ScheduleSnapshot::capture(source, now)),
        };

        debug!(trigger = trigger.as_str(), "control tick");
        let actions = self.engine.tick(trigger, input);
        self.dispatch(&actions);

        // A burn just completed without new learning; retry an earlier failed save.
        if self.save_pending
            && actions.contains(&EngineAction::BoilerOff)
            && !actions
                .iter()
                .any(|action| matches!(action, EngineAction::SaveParameters(_)))
        {
            let params = *self.engine.parameters();
            self.save(&params);
        }
        actions
    }

    /// Sends the commanded boiler state again, whether or not it changed.
    /// Output adapters that may drop commands rely on this to converge.
    pub fn reassert_actuator(&mut self) {
        let on = self.engine.is_boiler_active();
        self.actuator.set(on);
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) -> bool {
        let (changed, actions) = self.engine.set_hvac_mode_with_actions(mode);
        self.dispatch(&actions);
        if changed {
            self.tick(TickTrigger::ManualCommand);
        }
        changed
    }

    pub fn set_manual_target(&mut self, target: f32) -> Option<f32> {
        let applied = self.engine.set_manual_target(target)?;
        self.tick(TickTrigger::ManualCommand);
        Some(applied)
    }

    pub fn resume_auto(&mut self) -> bool {
        let changed = self.engine.resume_auto();
        if changed {
            self.tick(TickTrigger::ManualCommand);
        }
        changed
    }

    pub fn reconfigure(&mut self, config: HeatingConfig) {
        let actions = self.engine.reconfigure(config);
        self.dispatch(&actions);
        self.tick(TickTrigger::Reconfigured);
    }

    pub fn attach_schedule(&mut self, schedule: S) {
        self.schedule = Some(schedule);
        self.tick(TickTrigger::ScheduleChange);
    }

    /// Removing the schedule resets the controller; preheat is off from then on.
    pub fn detach_schedule(&mut self) -> Option<S> {
        let removed = self.schedule.take();
        if removed.is_some() {
            let actions = self.engine.reset();
            self.dispatch(&actions);
        }
        removed
    }

    pub fn status(&self) -> ControllerStatus {
        self.engine.status(self.clock.now(), !self.save_pending)
    }

    pub fn state_payload(&self) -> ControllerStatePayload {
        self.engine.state_payload(self.clock.now())
    }

    fn dispatch(&mut self, actions: &[EngineAction]) {
        for action in actions {
            match action {
                EngineAction::BoilerOn => self.actuator.set(true),
                EngineAction::BoilerOff => self.actuator.set(false),
                EngineAction::SaveParameters(params) => self.save(params),
            }
        }
    }

    fn save(&mut self, params: &ThermalParameters) {
        match self.store.save(params) {
            Ok(()) => self.save_pending = false,
            Err(err) => {
                warn!("failed to save thermal parameters, will retry: {err}");
                self.save_pending = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ports::{SensorError, StoreError},
        schedule::{DayOfWeek, Schedule, ScheduleEntry},
        types::TargetMode,
    };
    use chrono::{DateTime, Duration, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    struct FakeClock(DateTime<FixedOffset>);

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<FixedOffset> {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeSensor {
        readings: VecDeque<Result<f32, SensorError>>,
        last: Option<f32>,
    }

    impl TemperatureSensor for FakeSensor {
        fn read(&mut self) -> Result<f32, SensorError> {
            match self.readings.pop_front() {
                Some(Ok(temp)) => {
                    self.last = Some(temp);
                    Ok(temp)
                }
                Some(Err(err)) => Err(err),
                None => self.last.ok_or(SensorError::Unavailable),
            }
        }
    }

    #[derive(Default)]
    struct FakeBoiler {
        commands: Vec<bool>,
    }

    impl Actuator for FakeBoiler {
        fn set(&mut self, on: bool) {
            self.commands.push(on);
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stored: Option<ThermalParameters>,
        fail_saves: bool,
        saves: Vec<ThermalParameters>,
    }

    impl ParameterStore for FakeStore {
        fn load(&mut self) -> Result<ThermalParameters, StoreError> {
            self.stored.ok_or_else(|| {
                StoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "empty"))
            })
        }

        fn save(&mut self, params: &ThermalParameters) -> Result<(), StoreError> {
            if self.fail_saves {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.saves.push(*params);
            self.stored = Some(*params);
            Ok(())
        }
    }

    type TestController = HeatingController<FakeClock, FakeSensor, Schedule, FakeBoiler, FakeStore>;

    fn start() -> DateTime<FixedOffset> {
        // Monday.
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 5, 0, 0)
            .unwrap()
    }

    fn morning_schedule() -> Schedule {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![
                ScheduleEntry {
                    day: DayOfWeek::Mon,
                    start_minutes: 7 * 60,
                    active: true,
                },
                ScheduleEntry {
                    day: DayOfWeek::Mon,
                    start_minutes: 9 * 60,
                    active: false,
                },
            ],
        };
        schedule.normalize();
        schedule
    }

    fn controller(store: FakeStore, schedule: Option<Schedule>) -> TestController {
        let config = HeatingConfig {
            comfort_temp: 21.0,
            setback_temp: 16.0,
            hysteresis: 0.5,
            ..HeatingConfig::default()
        };
        HeatingController::new(
            config,
            PersistedSettings {
                hvac_mode: HvacMode::Heat,
            },
            FakeClock(start()),
            FakeSensor::default(),
            schedule,
            FakeBoiler::default(),
            store,
        )
    }

    fn advance(controller: &mut TestController, minutes: i64, temp: f32) -> Vec<EngineAction> {
        let now = controller.clock_mut().0 + Duration::minutes(minutes);
        controller.clock_mut().0 = now;
        controller.sensor_mut().readings.push_back(Ok(temp));
        controller.tick(TickTrigger::SensorUpdate)
    }

    #[test]
    fn load_failure_falls_back_to_defaults() {
        let controller = controller(FakeStore::default(), None);

        assert_eq!(controller.engine().parameters(), &ThermalParameters::default());
    }

    #[test]
    fn stored_parameters_are_restored() {
        let stored = ThermalParameters {
            heat_up_rate: 0.12,
            heat_loss_rate: 0.02,
            overshoot: 0.3,
        };
        let controller = controller(
            FakeStore {
                stored: Some(stored),
                ..FakeStore::default()
            },
            None,
        );

        assert_eq!(controller.engine().parameters(), &stored);
    }

    #[test]
    fn preheat_fires_ahead_of_schedule_and_learning_is_saved() {
        let mut controller = controller(FakeStore::default(), Some(morning_schedule()));

        // 05:00, 18 degrees: 3 degrees at 0.3/min needs 10 minutes, start is 2h away.
        assert!(advance(&mut controller, 0, 18.0).is_empty());
        assert_eq!(controller.engine().target_temp(), 16.0);
        assert_eq!(controller.status().next_fire, "06:50");

        // 06:51 is within the preheat window.
        assert_eq!(advance(&mut controller, 111, 18.0), vec![EngineAction::BoilerOn]);
        assert!(controller.engine().is_preheating());
        assert_eq!(controller.status().next_fire, "Now");

        // 12 minutes later the room hit comfort: 3 degrees in 12 minutes.
        let actions = advance(&mut controller, 12, 21.0);
        assert_eq!(actions.first(), Some(&EngineAction::BoilerOff));
        assert_eq!(controller.actuator().commands, vec![true, false]);
        assert_eq!(controller.store().saves.len(), 1);
        assert!((controller.store().saves[0].heat_up_rate - 0.29).abs() < 1e-5);
        assert!(!controller.is_save_pending());
    }

    #[test]
    fn manual_override_survives_until_schedule_flips() {
        let mut controller = controller(FakeStore::default(), Some(morning_schedule()));
        advance(&mut controller, 0, 20.0);

        controller.sensor_mut().readings.push_back(Ok(20.0));
        assert_eq!(controller.set_manual_target(23.0), Some(23.0));
        assert_eq!(controller.engine().target_mode(), TargetMode::Manual(23.0));
        assert!(controller.engine().is_boiler_active());

        // 07:00 the schedule turns on and the override is released.
        advance(&mut controller, 120, 22.0);
        assert_eq!(controller.engine().target_mode(), TargetMode::Auto);
        assert_eq!(controller.engine().target_temp(), 21.0);
        assert!(!controller.engine().is_boiler_active());
    }

    #[test]
    fn failed_save_is_retried_on_next_completed_cycle() {
        let mut controller = controller(
            FakeStore {
                fail_saves: true,
                ..FakeStore::default()
            },
            None,
        );

        // No schedule: setback target of 16 with a 0.5 band.
        advance(&mut controller, 0, 15.0);
        advance(&mut controller, 20, 16.0);
        assert!(controller.is_save_pending());
        assert!(!controller.status().parameters_saved);

        controller.store.fail_saves = false;
        // A short manual burn right at the peak learns nothing, yet its
        // shutoff flushes the pending save.
        assert_eq!(controller.set_manual_target(25.0), Some(25.0));
        assert!(controller.is_save_pending());
        advance(&mut controller, 2, 25.0);

        assert!(!controller.is_save_pending());
        assert_eq!(controller.store().saves.len(), 1);
    }

    #[test]
    fn sensor_failure_skips_tick() {
        let mut controller = controller(FakeStore::default(), None);
        advance(&mut controller, 0, 15.0);
        assert_eq!(controller.actuator().commands, vec![true]);

        controller
            .sensor_mut()
            .readings
            .push_back(Err(SensorError::OutOfRange(99.0)));
        let now = controller.clock_mut().0 + Duration::minutes(1);
        controller.clock_mut().0 = now;

        assert!(controller.tick(TickTrigger::Timer).is_empty());
        assert_eq!(controller.actuator().commands, vec![true]);
        assert!(controller.engine().is_boiler_active());
    }

    #[test]
    fn hvac_off_turns_boiler_off_immediately() {
        let mut controller = controller(FakeStore::default(), None);
        advance(&mut controller, 0, 15.0);

        assert!(controller.set_hvac_mode(HvacMode::Off));
        assert_eq!(controller.actuator().commands, vec![true, false]);

        advance(&mut controller, 1, 5.0);
        assert_eq!(controller.actuator().commands, vec![true, false]);
    }

    #[test]
    fn reassert_repeats_the_commanded_state() {
        let mut controller = controller(FakeStore::default(), None);
        controller.reassert_actuator();
        assert_eq!(controller.actuator().commands, vec![false]);

        advance(&mut controller, 0, 15.0);
        controller.reassert_actuator();
        assert_eq!(controller.actuator().commands, vec![false, true, true]);
    }

    #[test]
    fn detaching_schedule_resets_state() {
        let mut controller = controller(FakeStore::default(), Some(morning_schedule()));
        advance(&mut controller, 115, 18.0);
        assert!(controller.engine().state().preheat_latched);

        assert!(controller.detach_schedule().is_some());
        assert!(!controller.has_schedule());
        assert!(!controller.engine().state().preheat_latched);
        assert_eq!(controller.actuator().commands, vec![true, false]);
    }
}
