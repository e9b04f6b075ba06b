use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HvacMode {
    Off,
    Heat,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OFF" => Some(Self::Off),
            "HEAT" => Some(Self::Heat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
        }
    }
}

/// Where the target temperature comes from. A manual target only exists
/// while the mode is manual.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TargetMode {
    #[default]
    Auto,
    Manual(f32),
}

impl TargetMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual(_) => "MANUAL",
        }
    }

    pub fn manual_target(self) -> Option<f32> {
        match self {
            Self::Auto => None,
            Self::Manual(target) => Some(target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTrigger {
    Timer,
    SensorUpdate,
    ScheduleChange,
    ManualCommand,
    Reconfigured,
}

impl TickTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::SensorUpdate => "sensor",
            Self::ScheduleChange => "schedule",
            Self::ManualCommand => "command",
            Self::Reconfigured => "reconfigured",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    #[serde(rename = "hvacMode")]
    pub hvac_mode: &'static str,
    #[serde(rename = "hvacAction")]
    pub hvac_action: &'static str,
    #[serde(rename = "targetMode")]
    pub target_mode: &'static str,
    #[serde(rename = "manualTarget")]
    pub manual_target: Option<f32>,
    pub preheating: bool,
    #[serde(rename = "boilerActive")]
    pub boiler_active: bool,
    #[serde(rename = "runtimeMin")]
    pub runtime_min: u64,
    pub hysteresis: f32,
    #[serde(rename = "heatUpRate")]
    pub heat_up_rate: f32,
    #[serde(rename = "heatLossRate")]
    pub heat_loss_rate: f32,
    pub overshoot: f32,
    #[serde(rename = "nextFire")]
    pub next_fire: String,
    #[serde(rename = "nextFireEpoch")]
    pub next_fire_epoch: Option<i64>,
    #[serde(rename = "parametersSaved")]
    pub parameters_saved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatePayload {
    pub temp: Option<f32>,
    pub target: f32,
    pub mode: &'static str,
    pub action: &'static str,
    pub boiler: bool,
    #[serde(rename = "heatUpRate")]
    pub heat_up_rate: f32,
    #[serde(rename = "heatLossRate")]
    pub heat_loss_rate: f32,
    pub overshoot: f32,
    #[serde(rename = "nextFire")]
    pub next_fire: String,
}
