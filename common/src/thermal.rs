//! Learned thermal behaviour of the heated space.
//!
//! All three parameters are exponential moving averages: each accepted
//! observation contributes [`NEW_WEIGHT`] and the prior estimate the rest.

use serde::{Deserialize, Serialize};

pub const NEW_WEIGHT: f32 = 0.2;

pub const MIN_HEAT_UP_RATE: f32 = 0.01;
pub const MAX_HEAT_UP_RATE: f32 = 1.0;
pub const MAX_OVERSHOOT: f32 = 1.0;

pub const DEFAULT_HEAT_UP_RATE: f32 = 0.3;
pub const DEFAULT_HEAT_LOSS_RATE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalParameters {
    /// °C per minute while the boiler burns. Always positive.
    pub heat_up_rate: f32,
    /// °C per minute lost while idle. Never negative.
    pub heat_loss_rate: f32,
    /// °C the room keeps rising after shutoff.
    pub overshoot: f32,
}

impl Default for ThermalParameters {
    fn default() -> Self {
        Self {
            heat_up_rate: DEFAULT_HEAT_UP_RATE,
            heat_loss_rate: DEFAULT_HEAT_LOSS_RATE,
            overshoot: 0.0,
        }
    }
}

impl ThermalParameters {
    pub fn with_overshoot_seed(seed: f32) -> Self {
        Self {
            overshoot: seed.clamp(0.0, MAX_OVERSHOOT),
            ..Self::default()
        }
    }

    /// Repairs values restored from storage so the invariants hold.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.heat_up_rate = if self.heat_up_rate.is_finite() && self.heat_up_rate > 0.0 {
            self.heat_up_rate.clamp(MIN_HEAT_UP_RATE, MAX_HEAT_UP_RATE)
        } else {
            defaults.heat_up_rate
        };
        self.heat_loss_rate = if self.heat_loss_rate.is_finite() {
            self.heat_loss_rate.max(0.0)
        } else {
            defaults.heat_loss_rate
        };
        self.overshoot = if self.overshoot.is_finite() {
            self.overshoot.clamp(0.0, MAX_OVERSHOOT)
        } else {
            0.0
        };
    }

    /// Heat-up rate safe to divide by.
    pub fn effective_heat_up_rate(&self) -> f32 {
        if self.heat_up_rate.is_finite() && self.heat_up_rate > 0.0 {
            self.heat_up_rate.max(MIN_HEAT_UP_RATE)
        } else {
            MIN_HEAT_UP_RATE
        }
    }

    /// Minutes of burning needed to lift `current` up to `goal`, never negative.
    pub fn minutes_to_reach(&self, current: f32, goal: f32) -> f32 {
        (goal - current).max(0.0) / self.effective_heat_up_rate()
    }

    /// Returns false when the observation is not usable.
    pub fn record_heat_up(&mut self, observed_rate: f32) -> bool {
        if !observed_rate.is_finite() || observed_rate <= 0.0 {
            return false;
        }
        self.heat_up_rate =
            blend(self.heat_up_rate, observed_rate).clamp(MIN_HEAT_UP_RATE, MAX_HEAT_UP_RATE);
        true
    }

    pub fn record_heat_loss(&mut self, observed_rate: f32) -> bool {
        if !observed_rate.is_finite() || observed_rate < 0.0 {
            return false;
        }
        self.heat_loss_rate = blend(self.heat_loss_rate, observed_rate).max(0.0);
        true
    }

    pub fn record_overshoot(&mut self, observed: f32) -> bool {
        if !observed.is_finite() || observed <= 0.0 {
            return false;
        }
        self.overshoot = blend(self.overshoot, observed).clamp(0.0, MAX_OVERSHOOT);
        true
    }
}

fn blend(previous: f32, observed: f32) -> f32 {
    previous * (1.0 - NEW_WEIGHT) + observed * NEW_WEIGHT
}
