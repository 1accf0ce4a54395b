//! Workout summary encoding
//!
//! This module encodes a finished (or in-progress) workout into the JSON
//! payload handed to persistence and summarisation callers.

use crate::error::PulseError;
use crate::session::WorkoutSession;
use crate::types::{WorkoutMetrics, WorkoutState};
use crate::{PRODUCER_NAME, PULSE_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current summary schema version
pub const SUMMARY_VERSION: &str = "1.0.0";

/// Producer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Per-device contribution to the workout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub sample_count: usize,
    pub last_sample_at_utc: Option<String>,
}

/// Complete workout summary payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutSummary {
    pub summary_version: String,
    pub producer: SummaryProducer,
    pub workout_id: String,
    pub state: WorkoutState,
    pub started_at_utc: Option<String>,
    pub ended_at_utc: Option<String>,
    pub computed_at_utc: String,
    pub devices: Vec<DeviceSummary>,
    /// `null` when no valid heart rate reading arrived
    pub metrics: Option<WorkoutMetrics>,
}

/// Encoder for workout summaries
pub struct SummaryEncoder {
    instance_id: String,
}

impl Default for SummaryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Summarise a workout.
    ///
    /// Device sample counts reflect the registry at call time, so take the
    /// summary before `end()` when per-device counts matter; `metrics` is
    /// passed in so the final result of `end()` can be recorded.
    pub fn encode(&self, session: &WorkoutSession, metrics: Option<WorkoutMetrics>) -> WorkoutSummary {
        let devices = session
            .registry()
            .devices()
            .into_iter()
            .map(|device| DeviceSummary {
                device_id: device.device_id,
                display_name: device.display_name,
                sample_count: device.sample_count,
                last_sample_at_utc: device.last_sample_at.map(rfc3339),
            })
            .collect();

        WorkoutSummary {
            summary_version: SUMMARY_VERSION.to_string(),
            producer: SummaryProducer {
                name: PRODUCER_NAME.to_string(),
                version: PULSE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            workout_id: session.id().to_string(),
            state: session.state(),
            started_at_utc: session.started_at().map(rfc3339),
            ended_at_utc: session.ended_at().map(rfc3339),
            computed_at_utc: rfc3339(Utc::now()),
            devices,
            metrics,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(
        &self,
        session: &WorkoutSession,
        metrics: Option<WorkoutMetrics>,
    ) -> Result<String, PulseError> {
        let summary = self.encode(session, metrics);
        serde_json::to_string_pretty(&summary).map_err(PulseError::Json)
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339()
}
