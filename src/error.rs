//! Error types for Synheart Pulse

use thiserror::Error;

/// Errors produced while decoding a Heart Rate Measurement packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty heart rate measurement packet")]
    Empty,

    #[error("Truncated packet: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
}

/// Errors that can occur while running the telemetry engine
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("Failed to decode packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("Cannot start a workout with no registered devices")]
    NoDevices,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Replay error: {0}")]
    Replay(String),
}
