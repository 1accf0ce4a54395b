//! Core types for the Synheart Pulse engine
//!
//! This module defines the data structures that flow through the engine:
//! decoded heart rate samples, per-device views, workout states and the
//! derived workout metrics handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor contact status reported in flags bits 1-2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    /// The sensor does not report skin contact
    #[default]
    NotSupported,
    /// Contact is supported but not detected
    NotDetected,
    /// Contact is supported and detected
    Detected,
}

/// One decoded Heart Rate Measurement reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Originating peripheral
    pub device_id: String,
    /// Human label of the peripheral, if the transport supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Heart rate (bpm)
    pub heart_rate: u16,
    /// Whether the packet carried the heart rate as a 16-bit value
    pub wide_heart_rate: bool,
    /// Skin contact status
    pub sensor_contact: SensorContact,
    /// Cumulative energy expended (kJ), present only when flagged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_expended: Option<u16>,
    /// RR intervals (ms), present only when flagged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rr_intervals: Option<Vec<f64>>,
    /// Receipt instant, assigned at decode time
    pub timestamp: DateTime<Utc>,
}

/// Milliseconds per RR interval wire unit (1/1024 s)
const RR_UNIT_MS: f64 = 1000.0 / 1024.0;

/// Convert an RR interval from wire units to milliseconds (exact in `f64`)
pub fn rr_wire_to_ms(raw: u16) -> f64 {
    f64::from(raw) * RR_UNIT_MS
}

/// Convert an RR interval in milliseconds to the nearest wire unit
pub fn rr_ms_to_wire(ms: f64) -> u16 {
    (ms / RR_UNIT_MS).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

impl HeartRateSample {
    /// RR intervals in wire units (1/1024 s)
    pub fn rr_intervals_raw(&self) -> Vec<u16> {
        self.rr_intervals
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|&ms| rr_ms_to_wire(ms))
            .collect()
    }
}

/// Read-only view of one registered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Latest heart rate, `None` when unknown
    pub current_heart_rate: Option<u16>,
    pub last_sample_at: Option<DateTime<Utc>>,
    /// Samples held in the current workout history
    pub sample_count: usize,
}

/// Why a workout is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    SignalLost,
}

/// Workout lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum WorkoutState {
    Idle,
    Active,
    Paused(PauseReason),
    Ended,
}

impl WorkoutState {
    pub fn is_active(&self) -> bool {
        matches!(self, WorkoutState::Active)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, WorkoutState::Paused(_))
    }
}

impl fmt::Display for WorkoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkoutState::Idle => write!(f, "idle"),
            WorkoutState::Active => write!(f, "active"),
            WorkoutState::Paused(PauseReason::Manual) => write!(f, "paused (manual)"),
            WorkoutState::Paused(PauseReason::SignalLost) => write!(f, "paused (signal lost)"),
            WorkoutState::Ended => write!(f, "ended"),
        }
    }
}

/// Heart rate training zone (1-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum HrZone {
    Zone1 = 1,
    Zone2 = 2,
    Zone3 = 3,
    Zone4 = 4,
    Zone5 = 5,
}

impl HrZone {
    /// Classify a heart rate as a fraction of the assumed maximum
    ///
    /// <60% → 1, <70% → 2, <80% → 3, <90% → 4, otherwise 5.
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction < 0.6 {
            HrZone::Zone1
        } else if fraction < 0.7 {
            HrZone::Zone2
        } else if fraction < 0.8 {
            HrZone::Zone3
        } else if fraction < 0.9 {
            HrZone::Zone4
        } else {
            HrZone::Zone5
        }
    }

    pub fn number(&self) -> u8 {
        *self as u8
    }
}

impl From<HrZone> for u8 {
    fn from(zone: HrZone) -> Self {
        zone.number()
    }
}

impl TryFrom<u8> for HrZone {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HrZone::Zone1),
            2 => Ok(HrZone::Zone2),
            3 => Ok(HrZone::Zone3),
            4 => Ok(HrZone::Zone4),
            5 => Ok(HrZone::Zone5),
            other => Err(format!("heart rate zone out of range: {other}")),
        }
    }
}

/// Derived workout metrics snapshot
///
/// Never stored as mutable state; always recomputed from the device
/// histories and the workout clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutMetrics {
    /// Active (unpaused) duration in whole seconds
    pub duration_seconds: u64,
    /// Mean of valid readings (bpm), rounded
    pub average_heart_rate: u16,
    pub max_heart_rate: u16,
    pub min_heart_rate: u16,
    /// Linear calorie proxy, rounded
    pub calories_estimate: u64,
    pub zone: HrZone,
}
