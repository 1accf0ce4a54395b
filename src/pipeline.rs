//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Pulse. Raw notifications
//! flow: transport → [`PulseHub::on_raw_packet`] → `PacketDecoder` →
//! `DeviceRegistry` → subscribers, while a [`WorkoutSession`] built from the
//! same hub reads the registry for timing and metrics.

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::PulseConfig;
use crate::decoder::PacketDecoder;
use crate::error::PulseError;
use crate::registry::DeviceRegistry;
use crate::session::WorkoutSession;
use crate::subscription::Subscription;
use crate::types::{DeviceView, HeartRateSample};
use chrono::Utc;
use std::sync::Arc;

/// Decode one Heart Rate Measurement packet to a JSON sample (stateless).
///
/// # Arguments
/// * `raw` - Packet bytes as delivered by the characteristic notification
/// * `device_id` - Identifier of the notifying peripheral
///
/// # Example
/// ```ignore
/// let json = decode_to_json(&[0x00, 0x4B], "polar-h10")?;
/// ```
pub fn decode_to_json(raw: &[u8], device_id: &str) -> Result<String, PulseError> {
    let sample = PacketDecoder::decode(raw, device_id, None, Utc::now())?;
    Ok(serde_json::to_string(&sample)?)
}

/// Ingress point for device notifications and factory for workouts.
///
/// Cheap to share: wrap in an `Arc` and hand clones to every device callback.
pub struct PulseHub {
    registry: Arc<DeviceRegistry>,
    time: Arc<dyn TimeSource>,
    config: PulseConfig,
}

impl Default for PulseHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseHub {
    /// Hub with default settings and the system clock
    pub fn new() -> Self {
        Self::build(PulseConfig::default(), Arc::new(SystemTimeSource::new()))
    }

    /// Hub with a validated configuration and the system clock
    pub fn with_config(config: PulseConfig) -> Result<Self, PulseError> {
        Self::with_time_source(config, Arc::new(SystemTimeSource::new()))
    }

    /// Hub with a validated configuration and an injected time source
    pub fn with_time_source(
        config: PulseConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self::build(config, time))
    }

    fn build(config: PulseConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            registry: Arc::new(DeviceRegistry::with_history_capacity(
                config.history_capacity,
            )),
            time,
            config,
        }
    }

    /// Transport reports a peripheral as connected
    pub fn connect(&self, device_id: &str, display_name: Option<&str>) -> bool {
        self.registry.register(device_id, display_name)
    }

    /// Transport reports a peripheral as gone
    pub fn disconnect(&self, device_id: &str) -> bool {
        self.registry.unregister(device_id)
    }

    /// Handle one raw notification.
    ///
    /// Malformed packets and packets from unregistered devices are logged and
    /// dropped; they never interrupt ingestion for other packets or devices.
    pub fn on_raw_packet(&self, device_id: &str, display_name: Option<&str>, bytes: &[u8]) {
        if let Err(e) = self.process_packet(device_id, display_name, bytes) {
            log::warn!("{device_id}: {e}");
        }
    }

    /// Strict variant of [`on_raw_packet`](Self::on_raw_packet) that reports
    /// why a packet was dropped
    pub fn process_packet(
        &self,
        device_id: &str,
        display_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<HeartRateSample, PulseError> {
        let sample = PacketDecoder::decode(bytes, device_id, display_name, self.time.now())?;
        self.registry.try_ingest(sample.clone())?;
        Ok(sample)
    }

    /// Receive every accepted sample
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HeartRateSample) + Send + Sync + 'static,
    {
        self.registry.subscribe(listener)
    }

    /// `(device_id, current_heart_rate)` for live display
    pub fn snapshot(&self) -> Vec<(String, Option<u16>)> {
        self.registry.snapshot()
    }

    pub fn devices(&self) -> Vec<DeviceView> {
        self.registry.devices()
    }

    /// A new idle workout over this hub's devices
    pub fn new_workout(&self) -> WorkoutSession {
        WorkoutSession::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.time),
            self.config.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn time(&self) -> &Arc<dyn TimeSource> {
        &self.time
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }
}
