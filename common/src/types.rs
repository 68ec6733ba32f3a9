use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    #[serde(alias = "off")]
    Off,
    #[default]
    #[serde(alias = "heat")]
    Heat,
    /// Alias of `Heat`: both modes evaluate heat and cool calls.
    #[serde(alias = "auto")]
    Auto,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Auto => "AUTO",
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermostatState {
    Off,
    Heating,
    Cooling,
    Holding,
}

impl ThermostatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::Holding => "HOLDING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AirQuality {
    Good,
    Moderate,
    Poor,
}

impl AirQuality {
    pub fn from_co2(ppm: i64) -> Self {
        if ppm >= 1200 {
            Self::Poor
        } else if ppm >= 800 {
            Self::Moderate
        } else {
            Self::Good
        }
    }
}

/// Snapshot served by the status endpoint: the latest reading plus the
/// decision the control core would take right now.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f32>,
    pub co2: Option<i64>,
    #[serde(rename = "airQuality")]
    pub air_quality: Option<AirQuality>,
    #[serde(rename = "readingTimestamp")]
    pub reading_timestamp: Option<String>,
    #[serde(rename = "sensorValid")]
    pub sensor_valid: bool,
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(rename = "scheduledSetpoint")]
    pub scheduled_setpoint: f32,
    #[serde(rename = "effectiveSetpoint")]
    pub effective_setpoint: f32,
    #[serde(rename = "setpointSource")]
    pub setpoint_source: &'static str,
    #[serde(rename = "heatCall")]
    pub heat_call: bool,
    #[serde(rename = "coolCall")]
    pub cool_call: bool,
    pub hysteresis: f32,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
    #[serde(rename = "nextScheduleChangeMinutes")]
    pub next_schedule_change_minutes: Option<u16>,
}
