use chrono::NaiveDateTime;

use crate::{
    config::ThermostatConfig,
    control::ControlState,
    readings::SensorReading,
    schedule,
    setpoint::{self, EffectiveSetpoint},
    types::{AirQuality, ControllerStatus, ThermostatMode, ThermostatState},
};

pub const DEFAULT_HYSTERESIS_C: f32 = 0.3;

/// Full PWM duty of the cooling fan driver.
const FAN_PWM_MAX: f32 = 255.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClimateCall {
    pub heat_call: bool,
    pub cool_call: bool,
}

/// Hysteresis decision for one cycle. Stateless: the band keeps the relay
/// from chattering while the temperature sits near the setpoint.
pub fn evaluate(mode: ThermostatMode, current_temp: f32, setpoint: f32, band: f32) -> ClimateCall {
    if !mode.is_active() {
        return ClimateCall::default();
    }

    // A negative band would let both calls assert at once.
    let band = band.max(0.0);

    ClimateCall {
        heat_call: current_temp < setpoint - band,
        cool_call: current_temp > setpoint + band,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    pub scheduled: f32,
    pub setpoint: EffectiveSetpoint,
    pub call: ClimateCall,
}

impl ControlDecision {
    pub fn thermostat_state(&self, mode: ThermostatMode) -> ThermostatState {
        if !mode.is_active() {
            ThermostatState::Off
        } else if self.call.heat_call {
            ThermostatState::Heating
        } else if self.call.cool_call {
            ThermostatState::Cooling
        } else {
            ThermostatState::Holding
        }
    }
}

/// Schedule, setpoint selection and hysteresis for one evaluation.
pub fn decide(
    state: &ControlState,
    current_temp: f32,
    now_minutes: u16,
    band: f32,
) -> ControlDecision {
    let scheduled = schedule::resolve(&state.schedule, now_minutes, state.manual_setpoint);
    let setpoint = setpoint::select_with_source(
        state.use_schedule,
        scheduled,
        state.manual_setpoint,
        state.override_active,
        state.override_setpoint,
    );
    let call = evaluate(state.mode, current_temp, setpoint.value, band);

    ControlDecision {
        scheduled,
        setpoint,
        call,
    }
}

/// Status view for `now`. Without a fresh temperature the decision is made
/// against the setpoint itself, so no call asserts.
pub fn status(
    config: &ThermostatConfig,
    state: &ControlState,
    reading: Option<&SensorReading>,
    now: NaiveDateTime,
) -> ControllerStatus {
    let now_minutes = schedule::minutes_of_day(&now);
    let sensor_valid = reading.is_some_and(|reading| {
        reading.temperature().is_some() && reading.is_fresh(now, config.sensor_stale_timeout_ms)
    });
    let current_temp = reading.and_then(SensorReading::temperature);

    let decision = match current_temp.filter(|_| sensor_valid) {
        Some(temp) => decide(state, temp, now_minutes, config.hysteresis_c),
        None => {
            let mut decision = decide(state, 0.0, now_minutes, config.hysteresis_c);
            decision.call = ClimateCall::default();
            decision
        }
    };
    let co2 = reading.and_then(|reading| reading.scd_co2);

    ControllerStatus {
        current_temp,
        current_humidity: reading.and_then(SensorReading::humidity),
        co2,
        air_quality: co2.map(AirQuality::from_co2),
        reading_timestamp: reading.map(|reading| reading.timestamp.clone()),
        sensor_valid,
        mode: state.mode.as_str(),
        state: decision.thermostat_state(state.mode).as_str(),
        scheduled_setpoint: decision.scheduled,
        effective_setpoint: decision.setpoint.value,
        setpoint_source: decision.setpoint.source.as_str(),
        heat_call: decision.call.heat_call,
        cool_call: decision.call.cool_call,
        hysteresis: config.hysteresis_c,
        override_active: state.override_active,
        heater_on: state.heater_command,
        next_schedule_change_minutes: schedule::next_change(&state.schedule, now_minutes),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorPlan {
    pub heater: bool,
    pub fan_level: u8,
    pub humidifier: bool,
    /// Humidity hysteresis alone, without the operator's demand. Feed this
    /// back as `auto_humidifier_was_on` on the next cycle.
    pub auto_humidifier: bool,
    pub led: bool,
}

/// What the device should drive this cycle.
///
/// `decision` is `None` when there is no fresh temperature; the heater then
/// stays off. Operator fan and humidifier demands combine with the
/// automatic cooling duty and humidity hysteresis, taking whichever asks for
/// more. `auto_humidifier_was_on` is the previous cycle's
/// [`ActuatorPlan::auto_humidifier`], never the combined output.
pub fn plan_actuators(
    config: &ThermostatConfig,
    state: &ControlState,
    decision: Option<&ControlDecision>,
    current_temp: Option<f32>,
    humidity: Option<f32>,
    auto_humidifier_was_on: bool,
) -> ActuatorPlan {
    if !state.mode.is_active() {
        return ActuatorPlan {
            led: state.led_command,
            ..ActuatorPlan::default()
        };
    }

    let heater = decision.is_some_and(|decision| decision.call.heat_call);

    let auto_fan = match (decision, current_temp) {
        (Some(decision), Some(temp)) if decision.call.cool_call => {
            cooling_duty(config, temp - decision.setpoint.value)
        }
        _ => 0,
    };

    let auto_humidifier = match humidity {
        Some(humidity) if humidity < config.humidifier_on_below => true,
        Some(humidity) if humidity > config.humidifier_off_above => false,
        Some(_) => auto_humidifier_was_on,
        None => false,
    };

    ActuatorPlan {
        heater,
        fan_level: state.fan_level.max(auto_fan),
        humidifier: state.humidifier_command || auto_humidifier,
        auto_humidifier,
        led: state.led_command,
    }
}

/// Proportional fan duty in percent once the room is past the fan offset.
fn cooling_duty(config: &ThermostatConfig, excess_c: f32) -> u8 {
    if excess_c <= config.fan_start_offset_c {
        return 0;
    }
    let pwm = (excess_c * config.fan_pwm_per_c).min(FAN_PWM_MAX).floor();
    (pwm * 100.0 / FAN_PWM_MAX).round() as u8
}
