use serde::{Deserialize, Serialize};

use crate::types::HvacMode;

/// Tunables for one heating zone. Temperatures are in °C, rates in °C/min.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatingConfig {
    pub comfort_temp: f32,
    pub setback_temp: f32,
    pub hysteresis: f32,
    pub overshoot_seed: f32,
    pub safety_max_runtime_min: u32,
    pub min_burn_time_min: u32,
    pub min_temp_rise: f32,
    /// Burns rising more than this are treated as sensor glitches.
    pub max_temp_rise: Option<f32>,
    pub preheat_enabled: bool,
    pub max_preheat_min: u32,
    pub learning_enabled: bool,
    pub overshoot_enabled: bool,
    pub idle_tracking_window_min: u32,
    pub min_temp: f32,
    pub max_temp: f32,
}

impl Default for HeatingConfig {
    fn default() -> Self {
        Self {
            comfort_temp: 20.0,
            setback_temp: 15.0,
            hysteresis: 0.2,
            overshoot_seed: 0.0,
            safety_max_runtime_min: 300,
            min_burn_time_min: 10,
            min_temp_rise: 0.2,
            max_temp_rise: None,
            preheat_enabled: true,
            max_preheat_min: 180,
            learning_enabled: true,
            overshoot_enabled: true,
            idle_tracking_window_min: 30,
            min_temp: 5.0,
            max_temp: 30.0,
        }
    }
}

impl HeatingConfig {
    pub fn sanitize(&mut self) {
        if !self.min_temp.is_finite() || !self.max_temp.is_finite() || self.min_temp >= self.max_temp
        {
            self.min_temp = 5.0;
            self.max_temp = 30.0;
        }

        self.comfort_temp = finite_or(self.comfort_temp, 20.0).clamp(self.min_temp, self.max_temp);
        self.setback_temp = finite_or(self.setback_temp, 15.0).clamp(self.min_temp, self.max_temp);
        self.hysteresis = finite_or(self.hysteresis, 0.2).clamp(0.05, 5.0);
        self.overshoot_seed = finite_or(self.overshoot_seed, 0.0).clamp(0.0, 1.0);
        self.min_temp_rise = finite_or(self.min_temp_rise, 0.2).max(0.0);
        self.max_temp_rise = self
            .max_temp_rise
            .filter(|rise| rise.is_finite() && *rise > self.min_temp_rise);

        self.safety_max_runtime_min = self.safety_max_runtime_min.clamp(1, 24 * 60);
        self.max_preheat_min = self.max_preheat_min.min(24 * 60);
        self.idle_tracking_window_min = self.idle_tracking_window_min.clamp(1, 24 * 60);
    }

    /// Changing any of these invalidates in-flight burn and idle tracking.
    pub fn safety_thresholds_differ(&self, other: &Self) -> bool {
        self.safety_max_runtime_min != other.safety_max_runtime_min
            || self.min_burn_time_min != other.min_burn_time_min
            || (self.min_temp_rise - other.min_temp_rise).abs() > f32::EPSILON
    }

    pub fn clamp_target(&self, target: f32) -> f32 {
        target.clamp(self.min_temp, self.max_temp)
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub hvac_mode: HvacMode,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            hvac_mode: HvacMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub heating: HeatingConfig,
    #[serde(default)]
    pub settings: PersistedSettings,
    pub timezone: String,
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Readings older than this make the sensor count as unavailable.
    #[serde(default = "default_sensor_stale_secs")]
    pub sensor_stale_secs: u64,
}

fn default_sensor_stale_secs() -> u64 {
    600
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heating: HeatingConfig::default(),
            settings: PersistedSettings::default(),
            timezone: "Europe/London".to_string(),
            mqtt: MqttConfig::default(),
            sensor_stale_secs: default_sensor_stale_secs(),
        }
    }
}
