use crate::types::HvacMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffReason {
    TargetReached,
    SafetyRuntime,
}

impl CutoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetReached => "target_reached",
            Self::SafetyRuntime => "safety_runtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnEvent {
    Started,
    Ended { reason: CutoffReason },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisInput {
    pub hvac_mode: HvacMode,
    pub target: f32,
    pub current_temp: f32,
    pub boiler_active: bool,
    /// Minutes since the current burn started; zero while idle.
    pub elapsed_runtime_min: f32,
    pub overshoot: f32,
    pub hysteresis: f32,
    pub safety_max_runtime_min: f32,
}

impl HysteresisInput {
    pub fn on_point(&self) -> f32 {
        self.target - self.hysteresis
    }

    pub fn off_point(&self) -> f32 {
        self.target - self.overshoot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub boiler_on: bool,
    pub event: Option<BurnEvent>,
}

impl Decision {
    fn hold(boiler_on: bool) -> Self {
        Self {
            boiler_on,
            event: None,
        }
    }
}

pub fn safety_cutoff_due(elapsed_runtime_min: f32, safety_max_runtime_min: f32) -> bool {
    elapsed_runtime_min > safety_max_runtime_min
}

/// Two-state on/off decision. HVAC off forces the boiler off without an
/// event; the safety runtime cutoff beats every temperature condition.
pub fn decide(input: &HysteresisInput) -> Decision {
    if input.hvac_mode == HvacMode::Off {
        return Decision::hold(false);
    }

    if input.boiler_active {
        if safety_cutoff_due(input.elapsed_runtime_min, input.safety_max_runtime_min) {
            return Decision {
                boiler_on: false,
                event: Some(BurnEvent::Ended {
                    reason: CutoffReason::SafetyRuntime,
                }),
            };
        }
        if input.current_temp >= input.off_point() {
            return Decision {
                boiler_on: false,
                event: Some(BurnEvent::Ended {
                    reason: CutoffReason::TargetReached,
                }),
            };
        }
        return Decision::hold(true);
    }

    if input.current_temp <= input.on_point() {
        return Decision {
            boiler_on: true,
            event: Some(BurnEvent::Started),
        };
    }

    Decision::hold(false)
}
