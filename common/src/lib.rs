pub mod config;
pub mod control;
pub mod error;
pub mod readings;
pub mod routes;
pub mod schedule;
pub mod setpoint;
pub mod thermostat;
pub mod types;

pub use config::{DeviceConfig, RuntimeConfig, ServerConfig, ThermostatConfig};
pub use control::{ControlPatch, ControlRole, ControlState};
pub use error::{ConfigError, ControlError, StoreError};
pub use readings::{SensorReading, SensorStore, READINGS_LIMIT};
pub use routes::*;
pub use schedule::ScheduleEntry;
pub use setpoint::{EffectiveSetpoint, SetpointSource};
pub use thermostat::{ActuatorPlan, ClimateCall, ControlDecision};
pub use types::{AirQuality, ControllerStatus, ThermostatMode, ThermostatState};
