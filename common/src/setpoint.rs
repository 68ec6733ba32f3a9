use serde::{Deserialize, Serialize};

pub const MIN_SETPOINT_C: f32 = 10.0;
pub const MAX_SETPOINT_C: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetpointSource {
    Override,
    Schedule,
    Manual,
}

impl SetpointSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "OVERRIDE",
            Self::Schedule => "SCHEDULE",
            Self::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveSetpoint {
    pub value: f32,
    pub source: SetpointSource,
}

pub fn clamp_setpoint(value: f32) -> f32 {
    value.clamp(MIN_SETPOINT_C, MAX_SETPOINT_C)
}

/// Picks the setpoint for this cycle: a physical override outranks the
/// schedule, which outranks the manual setpoint.
pub fn select_with_source(
    use_schedule: bool,
    scheduled: f32,
    manual: f32,
    override_active: bool,
    override_setpoint: Option<f32>,
) -> EffectiveSetpoint {
    let (value, source) = match override_setpoint {
        Some(value) if override_active => (value, SetpointSource::Override),
        _ if use_schedule => (scheduled, SetpointSource::Schedule),
        _ => (manual, SetpointSource::Manual),
    };

    EffectiveSetpoint {
        value: clamp_setpoint(value),
        source,
    }
}

pub fn select(
    use_schedule: bool,
    scheduled: f32,
    manual: f32,
    override_active: bool,
    override_setpoint: Option<f32>,
) -> f32 {
    select_with_source(
        use_schedule,
        scheduled,
        manual,
        override_active,
        override_setpoint,
    )
    .value
}
