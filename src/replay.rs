//! Recorded packet logs and deterministic replay
//!
//! A packet log is newline-delimited JSON, one record per line, each record
//! carrying its offset from the start of the recording:
//!
//! ```text
//! {"kind":"connect","offset_ms":0,"device_id":"h10","device_name":"Polar H10"}
//! {"kind":"start","offset_ms":0}
//! {"kind":"packet","offset_ms":1000,"device_id":"h10","payload_hex":"0048"}
//! {"kind":"end","offset_ms":60000}
//! ```
//!
//! Replay drives a hub and workout on manual time, running the watchdog at
//! the configured poll interval between records.

use crate::clock::ManualTimeSource;
use crate::config::PulseConfig;
use crate::decoder::encode_measurement;
use crate::error::PulseError;
use crate::pipeline::PulseHub;
use crate::types::{HeartRateSample, WorkoutMetrics, WorkoutState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One line of a packet log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayRecord {
    Connect {
        offset_ms: u64,
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
    },
    Disconnect {
        offset_ms: u64,
        device_id: String,
    },
    Packet {
        offset_ms: u64,
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
        /// Raw characteristic value, hex encoded
        payload_hex: String,
    },
    Start {
        offset_ms: u64,
    },
    Pause {
        offset_ms: u64,
    },
    Resume {
        offset_ms: u64,
    },
    End {
        offset_ms: u64,
    },
}

impl ReplayRecord {
    pub fn offset_ms(&self) -> u64 {
        match self {
            ReplayRecord::Connect { offset_ms, .. }
            | ReplayRecord::Disconnect { offset_ms, .. }
            | ReplayRecord::Packet { offset_ms, .. }
            | ReplayRecord::Start { offset_ms }
            | ReplayRecord::Pause { offset_ms }
            | ReplayRecord::Resume { offset_ms }
            | ReplayRecord::End { offset_ms } => *offset_ms,
        }
    }

    /// Packet record carrying the wire encoding of `sample`
    pub fn from_sample(offset_ms: u64, sample: &HeartRateSample) -> Self {
        ReplayRecord::Packet {
            offset_ms,
            device_id: sample.device_id.clone(),
            device_name: sample.device_name.clone(),
            payload_hex: hex::encode(encode_measurement(sample)),
        }
    }
}

/// Parse a newline-delimited packet log; blank lines are skipped
pub fn parse_ndjson(input: &str) -> Result<Vec<ReplayRecord>, PulseError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line.trim())
                .map_err(|e| PulseError::Replay(format!("line {}: {e}", index + 1)))
        })
        .collect()
}

/// Longest recording accepted for replay (7 days)
pub const MAX_REPLAY_OFFSET_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Check that offsets never go backwards or past [`MAX_REPLAY_OFFSET_MS`]
/// and that payloads are valid hex
pub fn validate_records(records: &[ReplayRecord]) -> Result<(), PulseError> {
    let mut previous = 0;
    for (index, record) in records.iter().enumerate() {
        let offset = record.offset_ms();
        if offset > MAX_REPLAY_OFFSET_MS {
            return Err(PulseError::Replay(format!(
                "record {index}: offset {offset}ms exceeds the {MAX_REPLAY_OFFSET_MS}ms limit"
            )));
        }
        if offset < previous {
            return Err(PulseError::Replay(format!(
                "record {index}: offset {offset}ms is before previous offset {previous}ms"
            )));
        }
        previous = offset;

        if let ReplayRecord::Packet { payload_hex, .. } = record {
            hex::decode(payload_hex).map_err(|e| {
                PulseError::Replay(format!("record {index}: invalid payload_hex: {e}"))
            })?;
        }
    }
    Ok(())
}

/// A workout state change observed during replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTransition {
    pub offset_ms: u64,
    pub state: WorkoutState,
}

/// Outcome of replaying a packet log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub packets_total: usize,
    pub packets_accepted: usize,
    pub packets_dropped: usize,
    pub transitions: Vec<ReplayTransition>,
    pub final_state: WorkoutState,
    /// Final metrics if the log ended the workout, live metrics otherwise
    pub metrics: Option<WorkoutMetrics>,
}

/// Replay `records` through a fresh hub and workout
pub fn replay(
    records: &[ReplayRecord],
    config: PulseConfig,
    origin: DateTime<Utc>,
) -> Result<ReplayReport, PulseError> {
    validate_records(records)?;

    let time = Arc::new(ManualTimeSource::new(origin));
    let poll_ms = (config.watchdog_poll_interval().as_millis() as u64).max(1);
    let hub = PulseHub::with_time_source(config, time.clone())?;
    let mut workout = hub.new_workout();

    let mut report = ReplayReport {
        packets_total: 0,
        packets_accepted: 0,
        packets_dropped: 0,
        transitions: Vec::new(),
        final_state: WorkoutState::Idle,
        metrics: None,
    };
    let mut final_metrics = None;
    let mut next_poll_ms = poll_ms;

    for record in records {
        let offset = record.offset_ms();

        while next_poll_ms <= offset {
            // Ticks before the signal deadline cannot change anything
            let Some(deadline) = workout.signal_deadline() else {
                next_poll_ms = first_tick_after(offset, poll_ms);
                break;
            };
            let deadline_ms = (deadline - origin).num_milliseconds();
            let due_ms = u64::try_from(deadline_ms).map_or(0, |ms| first_tick_after(ms, poll_ms));
            next_poll_ms = next_poll_ms.max(due_ms);
            if next_poll_ms > offset {
                break;
            }

            time.set(instant_at(origin, next_poll_ms)?);
            if workout.check_signal() {
                report.transitions.push(ReplayTransition {
                    offset_ms: next_poll_ms,
                    state: workout.state(),
                });
            }
            next_poll_ms = next_poll_ms.saturating_add(poll_ms);
        }
        time.set(instant_at(origin, offset)?);

        let before = workout.state();
        match record {
            ReplayRecord::Connect {
                device_id,
                device_name,
                ..
            } => {
                hub.connect(device_id, device_name.as_deref());
            }
            ReplayRecord::Disconnect { device_id, .. } => {
                hub.disconnect(device_id);
            }
            ReplayRecord::Packet {
                device_id,
                device_name,
                payload_hex,
                ..
            } => {
                report.packets_total += 1;
                let bytes = hex::decode(payload_hex)
                    .map_err(|e| PulseError::Replay(format!("invalid payload_hex: {e}")))?;
                match hub.process_packet(device_id, device_name.as_deref(), &bytes) {
                    Ok(_) => report.packets_accepted += 1,
                    Err(e) => {
                        log::debug!("replay dropped packet at {offset}ms: {e}");
                        report.packets_dropped += 1;
                    }
                }
            }
            ReplayRecord::Start { .. } => workout.start()?,
            ReplayRecord::Pause { .. } => workout.pause()?,
            ReplayRecord::Resume { .. } => workout.resume()?,
            ReplayRecord::End { .. } => final_metrics = Some(workout.end()?),
        }

        if workout.state() != before {
            report.transitions.push(ReplayTransition {
                offset_ms: offset,
                state: workout.state(),
            });
        }
    }

    report.final_state = workout.state();
    report.metrics = match final_metrics {
        Some(metrics) => metrics,
        None => workout.metrics(),
    };
    Ok(report)
}

/// First multiple of `poll_ms` strictly after `ms`
fn first_tick_after(ms: u64, poll_ms: u64) -> u64 {
    (ms / poll_ms).saturating_add(1).saturating_mul(poll_ms)
}

fn instant_at(origin: DateTime<Utc>, offset_ms: u64) -> Result<DateTime<Utc>, PulseError> {
    i64::try_from(offset_ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|delta| origin.checked_add_signed(delta))
        .ok_or_else(|| {
            PulseError::Replay(format!("offset {offset_ms}ms is out of range for origin {origin}"))
        })
}

/// Replay with the system clock's current instant as origin
pub fn replay_now(records: &[ReplayRecord], config: PulseConfig) -> Result<ReplayReport, PulseError> {
    replay(records, config, Utc::now())
}

/// Total span covered by a log
pub fn recording_span(records: &[ReplayRecord]) -> Duration {
    Duration::from_millis(records.last().map(ReplayRecord::offset_ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PauseReason;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn packet(offset_ms: u64, device_id: &str, payload_hex: &str) -> ReplayRecord {
        ReplayRecord::Packet {
            offset_ms,
            device_id: device_id.to_string(),
            device_name: None,
            payload_hex: payload_hex.to_string(),
        }
    }

    fn connect(offset_ms: u64, device_id: &str) -> ReplayRecord {
        ReplayRecord::Connect {
            offset_ms,
            device_id: device_id.to_string(),
            device_name: None,
        }
    }

    #[test]
    fn test_parse_ndjson() {
        let input = r#"
{"kind":"connect","offset_ms":0,"device_id":"h10","device_name":"Polar H10"}
{"kind":"start","offset_ms":0}

{"kind":"packet","offset_ms":1000,"device_id":"h10","payload_hex":"0048"}
{"kind":"end","offset_ms":60000}
"#;
        let records = parse_ndjson(input).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[2], packet(1000, "h10", "0048"));
        assert_eq!(recording_span(&records), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let input = "{\"kind\":\"start\",\"offset_ms\":0}\n{\"kind\":\"jump\"}";
        let err = parse_ndjson(input).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_validate_rejects_out_of_order_and_bad_hex() {
        let records = vec![ReplayRecord::Start { offset_ms: 10 }, ReplayRecord::End { offset_ms: 5 }];
        assert!(validate_records(&records).is_err());

        let records = vec![packet(0, "a", "zz")];
        assert!(validate_records(&records).is_err());
    }

    #[test]
    fn test_replay_two_devices() {
        let mut records = vec![
            connect(0, "A"),
            connect(0, "B"),
            ReplayRecord::Start { offset_ms: 0 },
        ];
        for i in 0..20u64 {
            // A averages 140, B averages 160
            let (a, b) = if i % 2 == 0 { (130u8, 150u8) } else { (150, 170) };
            records.push(packet(i * 3_000 + 1_000, "A", &format!("00{a:02x}")));
            records.push(packet(i * 3_000 + 1_000, "B", &format!("00{b:02x}")));
        }
        records.push(ReplayRecord::End { offset_ms: 60_000 });

        let report = replay(&records, PulseConfig::default(), origin()).unwrap();

        assert_eq!(report.packets_total, 40);
        assert_eq!(report.packets_accepted, 40);
        assert_eq!(report.final_state, WorkoutState::Ended);
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.duration_seconds, 60);
        assert_eq!(metrics.average_heart_rate, 150);
        assert_eq!(metrics.calories_estimate, 15);
    }

    #[test]
    fn test_replay_signal_loss_and_resume() {
        let records = vec![
            connect(0, "A"),
            ReplayRecord::Start { offset_ms: 0 },
            packet(1_000, "A", "0078"),
            packet(2_000, "A", "0078"),
            // silent until 20s; watchdog fires at the 8s tick
            packet(20_000, "A", "0078"),
            ReplayRecord::Resume { offset_ms: 20_000 },
            packet(21_000, "A", "0078"),
            packet(24_000, "A", "0078"),
            packet(27_000, "A", "0078"),
            ReplayRecord::End { offset_ms: 30_000 },
        ];

        let report = replay(&records, PulseConfig::default(), origin()).unwrap();

        assert_eq!(
            report.transitions,
            vec![
                ReplayTransition {
                    offset_ms: 0,
                    state: WorkoutState::Active
                },
                ReplayTransition {
                    offset_ms: 8_000,
                    state: WorkoutState::Paused(PauseReason::SignalLost)
                },
                ReplayTransition {
                    offset_ms: 20_000,
                    state: WorkoutState::Active
                },
                ReplayTransition {
                    offset_ms: 30_000,
                    state: WorkoutState::Ended
                },
            ]
        );
        // 2s before the backdated pause + 10s after resume
        assert_eq!(report.metrics.unwrap().duration_seconds, 12);
    }

    #[test]
    fn test_offsets_past_limit_rejected() {
        let records = vec![ReplayRecord::Start {
            offset_ms: u64::MAX / 2 + 10,
        }];
        let config = PulseConfig {
            watchdog_poll_interval_seconds: 1e12,
            ..PulseConfig::default()
        };

        assert!(matches!(validate_records(&records), Err(PulseError::Replay(_))));
        assert!(matches!(
            replay(&records, config, origin()),
            Err(PulseError::Replay(_))
        ));

        let at_limit = vec![connect(MAX_REPLAY_OFFSET_MS, "A")];
        assert!(validate_records(&at_limit).is_ok());
        assert!(instant_at(origin(), u64::MAX).is_err());
    }

    #[test]
    fn test_replay_long_silence_skips_idle_ticks() {
        let six_days = 6 * 24 * 60 * 60 * 1000;
        let records = vec![
            connect(0, "A"),
            ReplayRecord::Start { offset_ms: 0 },
            packet(1_000, "A", "0078"),
            ReplayRecord::End {
                offset_ms: six_days,
            },
        ];
        let config = PulseConfig::default()
            .with_watchdog(Duration::from_secs(5), Duration::from_millis(1));

        let report = replay(&records, config, origin()).unwrap();

        assert_eq!(
            report.transitions,
            vec![
                ReplayTransition {
                    offset_ms: 0,
                    state: WorkoutState::Active
                },
                ReplayTransition {
                    offset_ms: 6_001,
                    state: WorkoutState::Paused(PauseReason::SignalLost)
                },
                ReplayTransition {
                    offset_ms: six_days,
                    state: WorkoutState::Ended
                },
            ]
        );
        assert_eq!(report.metrics.unwrap().duration_seconds, 1);
    }

    #[test]
    fn test_replay_now_runs_on_current_time() {
        let records = vec![
            connect(0, "A"),
            ReplayRecord::Start { offset_ms: 0 },
            packet(1_000, "A", "0050"),
            packet(3_000, "A", "0050"),
        ];

        let report = replay_now(&records, PulseConfig::default()).unwrap();

        assert_eq!(report.packets_accepted, 2);
        assert_eq!(report.final_state, WorkoutState::Active);
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.duration_seconds, 3);
        assert_eq!(metrics.average_heart_rate, 80);
    }

    #[test]
    fn test_replay_counts_dropped_packets() {
        let records = vec![
            connect(0, "A"),
            packet(0, "A", "01"),
            packet(0, "ghost", "0050"),
            packet(0, "A", "0050"),
        ];

        let report = replay(&records, PulseConfig::default(), origin()).unwrap();

        assert_eq!(report.packets_total, 3);
        assert_eq!(report.packets_accepted, 1);
        assert_eq!(report.packets_dropped, 2);
        assert_eq!(report.final_state, WorkoutState::Idle);
        assert_eq!(report.metrics, None);
    }

    #[test]
    fn test_replay_start_without_devices() {
        let records = vec![ReplayRecord::Start { offset_ms: 0 }];
        assert!(matches!(
            replay(&records, PulseConfig::default(), origin()),
            Err(PulseError::NoDevices)
        ));
    }

    #[test]
    fn test_from_sample_encodes_payload() {
        let sample = crate::decoder::PacketDecoder::decode(
            &[0x09, 0x4B, 0x00, 0x0A, 0x00],
            "h10",
            Some("Polar H10"),
            origin(),
        )
        .unwrap();

        let record = ReplayRecord::from_sample(500, &sample);
        assert_eq!(
            record,
            ReplayRecord::Packet {
                offset_ms: 500,
                device_id: "h10".to_string(),
                device_name: Some("Polar H10".to_string()),
                payload_hex: "094b000a00".to_string(),
            }
        );
    }
}
