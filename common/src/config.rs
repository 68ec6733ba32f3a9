use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermostatConfig {
    pub hysteresis_c: f32,
    pub sensor_stale_timeout_ms: u64,
    pub fan_start_offset_c: f32,
    pub fan_pwm_per_c: f32,
    pub humidifier_on_below: f32,
    pub humidifier_off_above: f32,
    pub override_step_c: f32,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            hysteresis_c: 0.3,
            sensor_stale_timeout_ms: 300_000,
            fan_start_offset_c: 1.0,
            fan_pwm_per_c: 50.0,
            humidifier_on_below: 15.0,
            humidifier_off_above: 25.0,
            override_step_c: 0.5,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.hysteresis_c.is_finite() || self.hysteresis_c < 0.0 {
            self.hysteresis_c = defaults.hysteresis_c;
        }
        if !self.fan_start_offset_c.is_finite() || self.fan_start_offset_c < 0.0 {
            self.fan_start_offset_c = defaults.fan_start_offset_c;
        }
        if !self.fan_pwm_per_c.is_finite() || self.fan_pwm_per_c <= 0.0 {
            self.fan_pwm_per_c = defaults.fan_pwm_per_c;
        }
        if !(self.humidifier_on_below < self.humidifier_off_above) {
            self.humidifier_on_below = defaults.humidifier_on_below;
            self.humidifier_off_above = defaults.humidifier_off_above;
        }
        if !self.override_step_c.is_finite() || self.override_step_c <= 0.0 {
            self.override_step_c = defaults.override_step_c;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Directory for the persisted control state. `None` keeps it in memory only.
    pub data_dir: Option<PathBuf>,
    pub readings_db: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            data_dir: Some(PathBuf::from("./.climate")),
            readings_db: PathBuf::from("./.climate/sensor_data.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub controller_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub readings_db: PathBuf,
    /// Line source for the sensor board; stdin when unset.
    pub serial_path: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://127.0.0.1:8080".to_string(),
            poll_interval_ms: 1_000,
            request_timeout_ms: 1_000,
            readings_db: PathBuf::from("./.climate/sensor_data.db"),
            serial_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    pub server: ServerConfig,
    pub device: DeviceConfig,
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.thermostat.sanitize();
        Ok(config)
    }

    /// Loads the file named by `CLIMATE_CONFIG` (defaults when unset) and
    /// applies the environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CLIMATE_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("CONTROLLER_HTTP_PORT").and_then(|value| value.parse().ok()) {
            self.server.http_port = port;
        }
        if let Some(dir) = lookup("CLIMATE_DATA_DIR") {
            self.server.data_dir = if dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }
        if let Some(db) = lookup("CLIMATE_READINGS_DB") {
            self.server.readings_db = PathBuf::from(&db);
            self.device.readings_db = PathBuf::from(db);
        }
        if let Some(url) = lookup("CONTROLLER_URL") {
            self.device.controller_url = url;
        }
        if let Some(path) = lookup("DEVICE_SERIAL_PATH") {
            self.device.serial_path = Some(PathBuf::from(path));
        }
    }
}
