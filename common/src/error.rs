use std::path::PathBuf;

use thiserror::Error;

use crate::control::ControlRole;

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("field `{field}` is owned by the {owner} and cannot be written by the {role}")]
    FieldNotOwned {
        field: &'static str,
        owner: ControlRole,
        role: ControlRole,
    },
    #[error("schedule entry at minute {0} is outside the day (0..1440)")]
    ScheduleOutOfRange(u16),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sensor database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
