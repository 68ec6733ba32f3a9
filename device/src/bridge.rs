//! Device-side logic: the serial line protocol, physical override buttons,
//! and the per-cycle actuator plan. Everything here is pure; `host` does
//! the I/O.

use chrono::NaiveDateTime;
use climate_common::{
    schedule, setpoint::clamp_setpoint, thermostat, ActuatorPlan, ControlPatch, ControlState,
    SensorReading, ThermostatConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideCommand {
    Engage,
    Release,
    StepUp,
    StepDown,
    HeaterOn,
    HeaterOff,
    FanOn,
    FanOff,
}

impl OverrideCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "O1" => Some(Self::Engage),
            "O0" => Some(Self::Release),
            "SP+" => Some(Self::StepUp),
            "SP-" => Some(Self::StepDown),
            "H" => Some(Self::HeaterOn),
            "h" => Some(Self::HeaterOff),
            "F" => Some(Self::FanOn),
            "f" => Some(Self::FanOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SerialLine {
    Command(OverrideCommand),
    Reading(SensorReading),
    Ignored,
}

/// Classifies one line from the sensor board. `timestamp` stamps readings.
pub fn parse_line(line: &str, timestamp: String) -> SerialLine {
    let line = line.trim();
    if line.is_empty() {
        return SerialLine::Ignored;
    }
    if let Some(command) = OverrideCommand::parse(line) {
        return SerialLine::Command(command);
    }

    let reading = parse_sensor_fields(line, timestamp);
    if reading.is_empty() {
        SerialLine::Ignored
    } else {
        SerialLine::Reading(reading)
    }
}

/// Parses `key: value` pairs separated by commas. Keys are case-insensitive;
/// unknown keys and unparsable values are skipped.
pub fn parse_sensor_fields(line: &str, timestamp: String) -> SensorReading {
    let mut reading = SensorReading {
        timestamp,
        ..SensorReading::default()
    };

    for part in line.split(',') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "bme_temp" => reading.bme_temp = parse_float(value),
            "bme_hum" => reading.bme_humidity = parse_float(value),
            "bme_press" => reading.bme_pressure = parse_float(value),
            "bme_gas" => reading.bme_gas = parse_float(value),
            "scd_co2" => reading.scd_co2 = parse_int(value),
            "scd_hum" => reading.scd_humidity = parse_float(value),
            _ => {}
        }
    }

    reading
}

fn parse_float(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_int(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| parse_float(value).map(|value| value.round() as i64))
}

/// Device patch for a physical button press, given the current record.
///
/// The heater and fan buttons are momentary reports: the next actuator cycle
/// reports the planned state again and replaces them.
pub fn override_patch(command: OverrideCommand, state: &ControlState, step: f32) -> ControlPatch {
    let base = state.active_override().unwrap_or(state.manual_setpoint);

    match command {
        OverrideCommand::Engage => engage(base),
        OverrideCommand::StepUp => engage(clamp_setpoint(base + step)),
        OverrideCommand::StepDown => engage(clamp_setpoint(base - step)),
        OverrideCommand::Release => ControlPatch {
            override_active: Some(false),
            override_setpoint: Some(None),
            ..ControlPatch::default()
        },
        OverrideCommand::HeaterOn | OverrideCommand::HeaterOff => ControlPatch {
            heater_command: Some(command == OverrideCommand::HeaterOn),
            ..ControlPatch::default()
        },
        OverrideCommand::FanOn | OverrideCommand::FanOff => ControlPatch {
            reported_fan_level: Some(if command == OverrideCommand::FanOn { 100 } else { 0 }),
            ..ControlPatch::default()
        },
    }
}

fn engage(setpoint: f32) -> ControlPatch {
    ControlPatch {
        override_active: Some(true),
        override_setpoint: Some(Some(setpoint)),
        ..ControlPatch::default()
    }
}

/// Actuator plan for this cycle. A missing or stale reading leaves no
/// decision, which keeps the heater off.
pub fn plan_cycle(
    config: &ThermostatConfig,
    state: &ControlState,
    reading: Option<&SensorReading>,
    now: NaiveDateTime,
    auto_humidifier_was_on: bool,
) -> ActuatorPlan {
    let fresh = reading.filter(|reading| reading.is_fresh(now, config.sensor_stale_timeout_ms));
    let current_temp = fresh.and_then(SensorReading::temperature);
    let humidity = fresh.and_then(SensorReading::humidity);

    let decision = current_temp.map(|temp| {
        thermostat::decide(
            state,
            temp,
            schedule::minutes_of_day(&now),
            config.hysteresis_c,
        )
    });

    thermostat::plan_actuators(
        config,
        state,
        decision.as_ref(),
        current_temp,
        humidity,
        auto_humidifier_was_on,
    )
}

/// Hysteresis state to resume from when the bridge starts: the last
/// reported humidifier, unless the operator's own demand explains it.
pub fn resumed_auto_humidifier(state: &ControlState) -> bool {
    state.reported_humidifier == Some(true) && !state.humidifier_command
}

/// Report of the realized actuators, limited to what differs from `state`.
pub fn actuation_patch(plan: &ActuatorPlan, state: &ControlState) -> ControlPatch {
    ControlPatch {
        heater_command: Some(plan.heater).filter(|heater| *heater != state.heater_command),
        reported_fan_level: Some(plan.fan_level)
            .filter(|level| state.reported_fan_level != Some(*level)),
        reported_humidifier: Some(plan.humidifier)
            .filter(|on| state.reported_humidifier != Some(*on)),
        ..ControlPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::{readings::TIMESTAMP_FORMAT, ControlRole, ScheduleEntry, ThermostatMode};
    use pretty_assertions::assert_eq;

    fn at(timestamp: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).unwrap()
    }

    fn reading(timestamp: &str, temp: f64, humidity: f64) -> SensorReading {
        SensorReading {
            timestamp: timestamp.to_string(),
            bme_temp: Some(temp),
            scd_humidity: Some(humidity),
            ..SensorReading::default()
        }
    }

    #[test]
    fn recognizes_override_commands() {
        for (line, command) in [
            ("O1", OverrideCommand::Engage),
            ("O0", OverrideCommand::Release),
            ("SP+", OverrideCommand::StepUp),
            ("SP-", OverrideCommand::StepDown),
            ("H", OverrideCommand::HeaterOn),
            ("h", OverrideCommand::HeaterOff),
            ("F", OverrideCommand::FanOn),
            ("f", OverrideCommand::FanOff),
        ] {
            assert_eq!(
                parse_line(&format!(" {line}\r"), String::new()),
                SerialLine::Command(command)
            );
        }
        assert_eq!(OverrideCommand::parse("o1"), None);
    }

    #[test]
    fn parses_sensor_line() {
        let line = "BME_Temp: 21.5, bme_hum: 40.25, bme_press: 1012.8, \
                    bme_gas: 55012, SCD_CO2: 640, scd_hum: 38.5";

        let timestamp = "2026-01-05 08:00:00".to_string();
        let SerialLine::Reading(reading) = parse_line(line, timestamp) else {
            panic!("expected a reading");
        };

        assert_eq!(
            reading,
            SensorReading {
                timestamp: "2026-01-05 08:00:00".to_string(),
                bme_temp: Some(21.5),
                bme_humidity: Some(40.25),
                bme_pressure: Some(1012.8),
                bme_gas: Some(55012.0),
                scd_co2: Some(640),
                scd_humidity: Some(38.5),
            }
        );
    }

    #[test]
    fn skips_bad_values_and_unknown_keys() {
        let reading =
            parse_sensor_fields("bme_temp: warm, scd_co2: 701.6, lux: 300, noise", String::new());

        assert_eq!(reading.bme_temp, None);
        assert_eq!(reading.scd_co2, Some(702));
        assert_eq!(parse_line("lux: 300", String::new()), SerialLine::Ignored);
        assert_eq!(parse_line("   ", String::new()), SerialLine::Ignored);
    }

    #[test]
    fn engage_seeds_from_manual_setpoint() {
        let state = ControlState {
            manual_setpoint: 21.0,
            ..ControlState::default()
        };

        let patch = override_patch(OverrideCommand::Engage, &state, 0.5);

        assert_eq!(patch.override_active, Some(true));
        assert_eq!(patch.override_setpoint, Some(Some(21.0)));
        assert!(patch.check(ControlRole::Device).is_ok());
    }

    #[test]
    fn steps_from_current_override_and_clamps() {
        let mut state = ControlState::default();
        state
            .apply(
                ControlRole::Device,
                &ControlPatch {
                    override_active: Some(true),
                    override_setpoint: Some(Some(19.0)),
                    ..ControlPatch::default()
                },
            )
            .unwrap();

        let up = override_patch(OverrideCommand::StepUp, &state, 0.5);
        let down = override_patch(OverrideCommand::StepDown, &state, 0.5);
        assert_eq!(up.override_setpoint, Some(Some(19.5)));
        assert_eq!(down.override_setpoint, Some(Some(18.5)));

        state.override_setpoint = Some(30.0);
        let capped = override_patch(OverrideCommand::StepUp, &state, 0.5);
        assert_eq!(capped.override_setpoint, Some(Some(30.0)));
    }

    #[test]
    fn release_clears_override() {
        let mut state = ControlState::default();
        state
            .apply(
                ControlRole::Device,
                &override_patch(OverrideCommand::Engage, &ControlState::default(), 0.5),
            )
            .unwrap();
        assert_eq!(state.active_override(), Some(22.0));

        let release = override_patch(OverrideCommand::Release, &state, 0.5);
        state.apply(ControlRole::Device, &release).unwrap();

        assert!(!state.override_active);
        assert_eq!(state.override_setpoint, None);
    }

    #[test]
    fn heater_and_fan_buttons_report_realized_state() {
        let state = ControlState::default();

        assert_eq!(
            override_patch(OverrideCommand::HeaterOn, &state, 0.5).heater_command,
            Some(true)
        );
        assert_eq!(
            override_patch(OverrideCommand::HeaterOff, &state, 0.5).heater_command,
            Some(false)
        );
        assert_eq!(
            override_patch(OverrideCommand::FanOn, &state, 0.5).reported_fan_level,
            Some(100)
        );
        assert_eq!(
            override_patch(OverrideCommand::FanOff, &state, 0.5).reported_fan_level,
            Some(0)
        );
    }

    #[test]
    fn cold_room_heats() {
        let config = ThermostatConfig::default();
        let state = ControlState::default();
        let now = at("2026-01-05 08:00:30");

        let plan = plan_cycle(
            &config,
            &state,
            Some(&reading("2026-01-05 08:00:00", 19.0, 40.0)),
            now,
            false,
        );

        assert!(plan.heater);
        assert_eq!(plan.fan_level, 0);
        assert!(!plan.humidifier);
    }

    #[test]
    fn stale_reading_keeps_heater_off() {
        let config = ThermostatConfig::default();
        let state = ControlState::default();
        let now = at("2026-01-05 09:00:00");

        let plan = plan_cycle(
            &config,
            &state,
            Some(&reading("2026-01-05 08:00:00", 12.0, 10.0)),
            now,
            true,
        );

        assert!(!plan.heater);
        assert!(!plan.humidifier);
        assert_eq!(plan_cycle(&config, &state, None, now, false), ActuatorPlan::default());
    }

    #[test]
    fn follows_schedule_when_enabled() {
        let config = ThermostatConfig::default();
        let state = ControlState {
            use_schedule: true,
            schedule: vec![ScheduleEntry::new(360, 18.0), ScheduleEntry::new(480, 23.0)],
            ..ControlState::default()
        };

        let early = plan_cycle(
            &config,
            &state,
            Some(&reading("2026-01-05 07:00:00", 20.0, 40.0)),
            at("2026-01-05 07:00:10"),
            false,
        );
        let later = plan_cycle(
            &config,
            &state,
            Some(&reading("2026-01-05 08:30:00", 20.0, 40.0)),
            at("2026-01-05 08:30:10"),
            false,
        );

        assert!(!early.heater);
        assert!(later.heater);
    }

    #[test]
    fn off_mode_only_keeps_led() {
        let config = ThermostatConfig::default();
        let state = ControlState {
            mode: ThermostatMode::Off,
            fan_level: 80,
            led_command: true,
            ..ControlState::default()
        };

        let plan = plan_cycle(
            &config,
            &state,
            Some(&reading("2026-01-05 08:00:00", 12.0, 10.0)),
            at("2026-01-05 08:00:10"),
            false,
        );

        assert_eq!(
            plan,
            ActuatorPlan {
                led: true,
                ..ActuatorPlan::default()
            }
        );
    }

    #[test]
    fn humidifier_follows_operator_off_across_cycles() {
        let config = ThermostatConfig::default();
        let now = at("2026-01-05 08:00:10");
        let humid = reading("2026-01-05 08:00:00", 21.0, 20.0);
        let mut state = ControlState {
            humidifier_command: true,
            ..ControlState::default()
        };

        let on = plan_cycle(&config, &state, Some(&humid), now, false);
        assert!(on.humidifier);

        state.humidifier_command = false;
        state.reported_humidifier = Some(on.humidifier);
        let off = plan_cycle(&config, &state, Some(&humid), now, on.auto_humidifier);

        assert!(!off.humidifier);
        assert_eq!(actuation_patch(&off, &state).reported_humidifier, Some(false));
    }

    #[test]
    fn heater_button_is_replaced_by_next_cycle() {
        let mut state = ControlState::default();
        let press = override_patch(OverrideCommand::HeaterOn, &state, 0.5);
        state.apply(ControlRole::Device, &press).unwrap();
        assert!(state.heater_command);

        // Warm room: the plan keeps the heater off and reports it.
        let plan = plan_cycle(
            &ThermostatConfig::default(),
            &state,
            Some(&reading("2026-01-05 08:00:00", 23.0, 40.0)),
            at("2026-01-05 08:00:10"),
            false,
        );

        assert_eq!(actuation_patch(&plan, &state).heater_command, Some(false));
    }

    #[test]
    fn resumes_hysteresis_from_reported_state() {
        let mut state = ControlState {
            reported_humidifier: Some(true),
            ..ControlState::default()
        };
        assert!(resumed_auto_humidifier(&state));

        state.humidifier_command = true;
        assert!(!resumed_auto_humidifier(&state));

        assert!(!resumed_auto_humidifier(&ControlState::default()));
    }

    #[test]
    fn actuation_patch_reports_only_changes() {
        let plan = ActuatorPlan {
            heater: true,
            fan_level: 0,
            humidifier: false,
            auto_humidifier: false,
            led: false,
        };
        let mut state = ControlState::default();

        let first = actuation_patch(&plan, &state);
        assert_eq!(first.heater_command, Some(true));
        assert_eq!(first.reported_fan_level, Some(0));
        assert_eq!(first.reported_humidifier, Some(false));
        assert!(first.check(ControlRole::Device).is_ok());

        state.apply(ControlRole::Device, &first).unwrap();
        assert!(actuation_patch(&plan, &state).is_empty());
    }
}
