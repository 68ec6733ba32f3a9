pub const API_CONTROL: &str = "/api/control";
pub const API_DEVICE_CONTROL: &str = "/api/control/device";
pub const API_READINGS: &str = "/api/readings";
pub const API_STATUS: &str = "/api/status";
pub const API_RELAY: &str = "/api/ws";
