//! The shared command record and the rules for patching it.
//!
//! Two writers patch the same [`ControlState`]: the operator surface
//! (intent) and the device (override and realized actuator state). Every
//! field belongs to exactly one of them, so a patch never clobbers the
//! other writer's fields. Within one writer, last write wins.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::ControlError,
    schedule::ScheduleEntry,
    setpoint::clamp_setpoint,
    types::ThermostatMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlRole {
    Operator,
    Device,
}

impl fmt::Display for ControlRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => f.write_str("operator"),
            Self::Device => f.write_str("device"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub mode: ThermostatMode,
    pub manual_setpoint: f32,
    pub use_schedule: bool,
    pub schedule: Vec<ScheduleEntry>,
    pub fan_level: u8,
    pub humidifier_command: bool,
    pub led_command: bool,
    pub override_active: bool,
    pub override_setpoint: Option<f32>,
    pub heater_command: bool,
    pub reported_fan_level: Option<u8>,
    pub reported_humidifier: Option<bool>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: ThermostatMode::Heat,
            manual_setpoint: 22.0,
            use_schedule: false,
            schedule: Vec::new(),
            fan_level: 0,
            humidifier_command: false,
            led_command: false,
            override_active: false,
            override_setpoint: None,
            heater_command: false,
            reported_fan_level: None,
            reported_humidifier: None,
        }
    }
}

impl ControlState {
    /// The override setpoint, only while the override is engaged.
    pub fn active_override(&self) -> Option<f32> {
        self.override_setpoint.filter(|_| self.override_active)
    }

    /// Merges the fields present in `patch`. Ownership and schedule checks
    /// run before anything is written, so a rejected patch leaves the state
    /// untouched.
    pub fn apply(&mut self, role: ControlRole, patch: &ControlPatch) -> Result<(), ControlError> {
        patch.check(role)?;

        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(setpoint) = patch.manual_setpoint {
            self.manual_setpoint = clamp_setpoint(setpoint);
        }
        if let Some(use_schedule) = patch.use_schedule {
            self.use_schedule = use_schedule;
        }
        if let Some(schedule) = &patch.schedule {
            self.schedule = schedule
                .iter()
                .map(|entry| ScheduleEntry {
                    at_minutes_of_day: entry.at_minutes_of_day,
                    target_temperature: clamp_setpoint(entry.target_temperature),
                })
                .collect();
        }
        if let Some(level) = patch.fan_level {
            self.fan_level = level;
        }
        if let Some(humidifier) = patch.humidifier_command {
            self.humidifier_command = humidifier;
        }
        if let Some(led) = patch.led_command {
            self.led_command = led;
        }
        if let Some(active) = patch.override_active {
            self.override_active = active;
        }
        if let Some(setpoint) = patch.override_setpoint {
            self.override_setpoint = setpoint.map(clamp_setpoint);
        }
        if !self.override_active {
            self.override_setpoint = None;
        }
        if let Some(heater) = patch.heater_command {
            self.heater_command = heater;
        }
        if let Some(level) = patch.reported_fan_level {
            self.reported_fan_level = Some(level);
        }
        if let Some(humidifier) = patch.reported_humidifier {
            self.reported_humidifier = Some(humidifier);
        }

        Ok(())
    }
}

/// A sparse update: `None` means "leave as is". `override_setpoint` is
/// doubly optional so an explicit `null` can clear it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThermostatMode>,
    #[serde(alias = "setpoint", skip_serializing_if = "Option::is_none")]
    pub manual_setpoint: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_schedule: Option<bool>,
    #[serde(
        deserialize_with = "null_as_empty_schedule",
        skip_serializing_if = "Option::is_none"
    )]
    pub schedule: Option<Vec<ScheduleEntry>>,
    #[serde(
        alias = "fan",
        deserialize_with = "fan_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub fan_level: Option<u8>,
    #[serde(alias = "humidifier", skip_serializing_if = "Option::is_none")]
    pub humidifier_command: Option<bool>,
    #[serde(alias = "led", skip_serializing_if = "Option::is_none")]
    pub led_command: Option<bool>,
    #[serde(alias = "overrideMode", skip_serializing_if = "Option::is_none")]
    pub override_active: Option<bool>,
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub override_setpoint: Option<Option<f32>>,
    #[serde(alias = "heater", skip_serializing_if = "Option::is_none")]
    pub heater_command: Option<bool>,
    #[serde(deserialize_with = "fan_level", skip_serializing_if = "Option::is_none")]
    pub reported_fan_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_humidifier: Option<bool>,
}

impl ControlPatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Wire names of the fields this patch touches, with their owner.
    pub fn fields(&self) -> Vec<(&'static str, ControlRole)> {
        use ControlRole::{Device, Operator};

        let present = [
            ("mode", Operator, self.mode.is_some()),
            ("manualSetpoint", Operator, self.manual_setpoint.is_some()),
            ("useSchedule", Operator, self.use_schedule.is_some()),
            ("schedule", Operator, self.schedule.is_some()),
            ("fanLevel", Operator, self.fan_level.is_some()),
            ("humidifierCommand", Operator, self.humidifier_command.is_some()),
            ("ledCommand", Operator, self.led_command.is_some()),
            ("overrideActive", Device, self.override_active.is_some()),
            ("overrideSetpoint", Device, self.override_setpoint.is_some()),
            ("heaterCommand", Device, self.heater_command.is_some()),
            ("reportedFanLevel", Device, self.reported_fan_level.is_some()),
            ("reportedHumidifier", Device, self.reported_humidifier.is_some()),
        ];

        present
            .into_iter()
            .filter(|(_, _, present)| *present)
            .map(|(name, owner, _)| (name, owner))
            .collect()
    }

    pub fn check(&self, role: ControlRole) -> Result<(), ControlError> {
        if let Some((field, owner)) = self.fields().into_iter().find(|(_, owner)| *owner != role) {
            return Err(ControlError::FieldNotOwned { field, owner, role });
        }

        if let Some(entry) = self
            .schedule
            .iter()
            .flatten()
            .find(|entry| !entry.validate())
        {
            return Err(ControlError::ScheduleOutOfRange(entry.at_minutes_of_day));
        }

        Ok(())
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn null_as_empty_schedule<'de, D>(deserializer: D) -> Result<Option<Vec<ScheduleEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(
        Option::<Vec<ScheduleEntry>>::deserialize(deserializer)?.unwrap_or_default(),
    ))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FanLevelInput {
    Flag(bool),
    Percent(f64),
}

/// Accepts a percentage or an on/off flag and clamps into 0..=100.
fn fan_level<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let level = match Option::<FanLevelInput>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(FanLevelInput::Flag(true)) => 100,
        Some(FanLevelInput::Flag(false)) => 0,
        Some(FanLevelInput::Percent(percent)) => percent.round().clamp(0.0, 100.0) as u8,
    };
    Ok(Some(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> ControlPatch {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn empty_patch_leaves_state_unchanged() {
        let mut state = ControlState {
            manual_setpoint: 19.5,
            schedule: vec![ScheduleEntry::new(360, 21.0)],
            ..ControlState::default()
        };
        let before = state.clone();

        let patch = parse("{}");
        assert!(patch.is_empty());
        state.apply(ControlRole::Operator, &patch).unwrap();
        state.apply(ControlRole::Device, &patch).unwrap();

        assert_eq!(state, before);
    }

    #[test]
    fn sparse_patches_do_not_overwrite_each_other() {
        let mut state = ControlState::default();

        state
            .apply(ControlRole::Operator, &parse(r#"{"fanLevel": 40}"#))
            .unwrap();
        state
            .apply(ControlRole::Operator, &parse(r#"{"humidifier": true}"#))
            .unwrap();

        assert_eq!(state.fan_level, 40);
        assert!(state.humidifier_command);
        assert_eq!(state.mode, ThermostatMode::Heat);
    }

    #[test]
    fn patched_fields_read_back_and_others_stay() {
        let mut state = ControlState::default();
        let before = state.clone();
        let patch = parse(
            r#"{"mode": "OFF", "setpoint": 19.5, "useSchedule": true,
                "schedule": [{"atMinutesOfDay": 360, "targetTemperature": 22.0}]}"#,
        );

        state.apply(ControlRole::Operator, &patch).unwrap();

        assert_eq!(
            state,
            ControlState {
                mode: ThermostatMode::Off,
                manual_setpoint: 19.5,
                use_schedule: true,
                schedule: vec![ScheduleEntry::new(360, 22.0)],
                ..before
            }
        );
    }

    #[test]
    fn operator_cannot_write_device_fields() {
        let mut state = ControlState::default();
        let before = state.clone();
        let patch = parse(r#"{"mode": "OFF", "overrideActive": true}"#);

        let err = state.apply(ControlRole::Operator, &patch).unwrap_err();

        assert_eq!(
            err,
            ControlError::FieldNotOwned {
                field: "overrideActive",
                owner: ControlRole::Device,
                role: ControlRole::Operator,
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn device_cannot_write_operator_fields() {
        let mut state = ControlState::default();
        let patch = parse(r#"{"heater": true, "fan": 100}"#);

        let err = state.apply(ControlRole::Device, &patch).unwrap_err();

        assert!(matches!(
            err,
            ControlError::FieldNotOwned {
                field: "fanLevel",
                ..
            }
        ));
        assert!(!state.heater_command);
    }

    #[test]
    fn override_setpoint_cleared_when_override_inactive() {
        let mut state = ControlState::default();

        let engage = parse(r#"{"overrideMode": true, "overrideSetpoint": 18.0}"#);
        state.apply(ControlRole::Device, &engage).unwrap();
        assert_eq!(state.active_override(), Some(18.0));

        let release = parse(r#"{"overrideActive": false}"#);
        state.apply(ControlRole::Device, &release).unwrap();
        assert_eq!(state.override_setpoint, None);

        // A setpoint without an engaged override is dropped.
        let stray = parse(r#"{"overrideSetpoint": 25.0}"#);
        state.apply(ControlRole::Device, &stray).unwrap();
        assert_eq!(state.override_setpoint, None);
    }

    #[test]
    fn explicit_null_clears_override_setpoint() {
        let patch = parse(r#"{"overrideSetpoint": null}"#);
        assert_eq!(patch.override_setpoint, Some(None));
        assert_eq!(parse("{}").override_setpoint, None);

        let mut state = ControlState {
            override_active: true,
            override_setpoint: Some(21.0),
            ..ControlState::default()
        };
        state.apply(ControlRole::Device, &patch).unwrap();
        assert!(state.override_active);
        assert_eq!(state.override_setpoint, None);
    }

    #[test]
    fn fan_level_coercion() {
        assert_eq!(parse(r#"{"fanLevel": -5}"#).fan_level, Some(0));
        assert_eq!(parse(r#"{"fanLevel": 250}"#).fan_level, Some(100));
        assert_eq!(parse(r#"{"fan": true}"#).fan_level, Some(100));
        assert_eq!(parse(r#"{"fan": false}"#).fan_level, Some(0));
        assert_eq!(parse(r#"{"fanLevel": 40.4}"#).fan_level, Some(40));
        assert!(serde_json::from_str::<ControlPatch>(r#"{"fanLevel": "high"}"#).is_err());
    }

    #[test]
    fn setpoints_are_clamped_on_write() {
        let mut state = ControlState::default();
        let patch = parse(r#"{"manualSetpoint": 45.0, "schedule": [{"at": 60, "temp": 2.0}]}"#);

        state.apply(ControlRole::Operator, &patch).unwrap();

        assert_eq!(state.manual_setpoint, 30.0);
        assert_eq!(state.schedule, vec![ScheduleEntry::new(60, 10.0)]);
    }

    #[test]
    fn null_schedule_means_empty() {
        let mut state = ControlState {
            schedule: vec![ScheduleEntry::new(360, 22.0)],
            ..ControlState::default()
        };

        state
            .apply(ControlRole::Operator, &parse(r#"{"schedule": null}"#))
            .unwrap();

        assert!(state.schedule.is_empty());
    }

    #[test]
    fn schedule_outside_the_day_is_rejected() {
        let mut state = ControlState::default();
        let patch = parse(r#"{"schedule": [{"at": 1440, "temp": 20.0}]}"#);

        let err = state.apply(ControlRole::Operator, &patch).unwrap_err();

        assert_eq!(err, ControlError::ScheduleOutOfRange(1440));
        assert!(state.schedule.is_empty());
    }

    #[test]
    fn wrong_types_fail_to_parse() {
        assert!(serde_json::from_str::<ControlPatch>(r#"{"mode": "COOL"}"#).is_err());
        assert!(serde_json::from_str::<ControlPatch>(r#"{"useSchedule": "yes"}"#).is_err());
        assert!(serde_json::from_str::<ControlPatch>("[1, 2]").is_err());
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = ControlPatch {
            override_active: Some(true),
            override_setpoint: Some(None),
            ..ControlPatch::default()
        };

        let json = serde_json::to_value(&patch).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"overrideActive": true, "overrideSetpoint": null})
        );
    }

    #[test]
    fn state_uses_camel_case_wire_names() {
        let json = serde_json::to_value(ControlState::default()).unwrap();

        assert_eq!(json["mode"], "HEAT");
        assert_eq!(json["manualSetpoint"], 22.0);
        assert_eq!(json["overrideSetpoint"], serde_json::Value::Null);
        assert_eq!(json["reportedFanLevel"], serde_json::Value::Null);
    }
}
