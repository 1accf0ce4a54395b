//! Synheart Pulse - Live heart-rate telemetry and multi-device workout engine
//!
//! Pulse turns raw Bluetooth Low Energy Heart Rate Measurement notifications
//! from one or more connected peripherals into live readings and workout
//! metrics: packet decoding → per-device registry → workout state machine
//! with a pause-aware clock and signal-loss watchdog → metric aggregation.
//!
//! ## Modules
//!
//! - **Ingress**: [`PulseHub`] decodes notifications and feeds the [`DeviceRegistry`]
//! - **Workout**: [`WorkoutSession`] drives the [`WorkoutClock`] and computes [`WorkoutMetrics`]
//! - **Runtime** (feature `runtime`): tokio watchdog task and per-device feeds
//! - **Replay**: deterministic playback of recorded packet logs

pub mod clock;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod replay;
#[cfg(feature = "runtime")]
pub mod runtime;
pub mod session;
pub mod subscription;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource, WorkoutClock};
pub use config::PulseConfig;
pub use decoder::{encode_measurement, PacketDecoder};
pub use encoder::{SummaryEncoder, WorkoutSummary};
pub use error::{DecodeError, PulseError};
pub use metrics::MetricsAggregator;
pub use pipeline::{decode_to_json, PulseHub};
pub use registry::DeviceRegistry;
pub use replay::{parse_ndjson, replay, ReplayRecord, ReplayReport};
pub use session::WorkoutSession;
pub use subscription::Subscription;
pub use types::{
    DeviceView, HeartRateSample, HrZone, PauseReason, SensorContact, WorkoutMetrics,
    WorkoutState,
};

/// Pulse version embedded in workout summaries
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for workout summaries
pub const PRODUCER_NAME: &str = "synheart-pulse";
