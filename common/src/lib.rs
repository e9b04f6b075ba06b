pub mod config;
pub mod controller;
pub mod hysteresis;
pub mod learning;
pub mod ports;
pub mod prediction;
pub mod schedule;
pub mod state;
pub mod target;
pub mod thermal;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{HeatingConfig, MqttConfig, PersistedSettings, RuntimeConfig};
pub use controller::HeatingController;
pub use ports::{
    Actuator, Clock, ParameterStore, ScheduleSnapshot, ScheduleSource, SensorError, StoreError,
    TemperatureSensor,
};
pub use prediction::NextFire;
pub use schedule::{DayOfWeek, Schedule, ScheduleEntry};
pub use thermal::ThermalParameters;
pub use thermostat::{EngineAction, HeatingEngine, TickInput};
pub use topics::*;
pub use types::{
    ControllerStatePayload, ControllerStatus, HvacAction, HvacMode, TargetMode, TickTrigger,
};
