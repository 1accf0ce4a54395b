//! Connected device registry
//!
//! The registry is the single source of truth for which peripherals are
//! connected and what each one last reported. Each device's state sits
//! behind its own lock, so ingestion from different devices never contends;
//! the outer map lock is only held long enough to look a device up.

use crate::error::PulseError;
use crate::subscription::{Subscribers, Subscription};
use crate::types::{DeviceView, HeartRateSample};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// One connected peripheral's accumulated state
#[derive(Debug)]
struct DeviceSession {
    device_id: String,
    display_name: Option<String>,
    current_heart_rate: Option<u16>,
    last_sample_at: Option<DateTime<Utc>>,
    /// Samples for the current workout, in arrival order
    history: VecDeque<HeartRateSample>,
}

impl DeviceSession {
    fn new(device_id: &str, display_name: Option<&str>) -> Self {
        Self {
            device_id: device_id.to_string(),
            display_name: display_name.map(str::to_string),
            current_heart_rate: None,
            last_sample_at: None,
            history: VecDeque::new(),
        }
    }

    fn view(&self) -> DeviceView {
        DeviceView {
            device_id: self.device_id.clone(),
            display_name: self.display_name.clone(),
            current_heart_rate: self.current_heart_rate,
            last_sample_at: self.last_sample_at,
            sample_count: self.history.len(),
        }
    }
}

/// Per-device locks. `delivery` is held across append and notify so
/// listeners observe each device's samples in history order.
#[derive(Debug)]
struct DeviceSlot {
    session: Mutex<DeviceSession>,
    delivery: Mutex<()>,
}

type SessionSlot = Arc<DeviceSlot>;

/// Registry of connected devices and their sample histories
#[derive(Default)]
pub struct DeviceRegistry {
    sessions: RwLock<BTreeMap<String, SessionSlot>>,
    subscribers: Subscribers,
    history_capacity: Option<usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose per-device histories keep at most `capacity` samples
    pub fn with_history_capacity(capacity: Option<usize>) -> Self {
        Self {
            history_capacity: capacity,
            ..Self::default()
        }
    }

    /// Create an empty session for `device_id`. Returns `false` if it was
    /// already registered, in which case nothing changes.
    pub fn register(&self, device_id: &str, display_name: Option<&str>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(device_id) {
            return false;
        }
        sessions.insert(
            device_id.to_string(),
            Arc::new(DeviceSlot {
                session: Mutex::new(DeviceSession::new(device_id, display_name)),
                delivery: Mutex::new(()),
            }),
        );
        log::info!("registered device {device_id}");
        true
    }

    /// Remove a device and its history. Returns `false` if it was unknown.
    pub fn unregister(&self, device_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
            .is_some();
        if removed {
            log::info!("unregistered device {device_id}");
        }
        removed
    }

    /// Append a sample to its device, then notify subscribers.
    ///
    /// Listeners for one device are called in history order, with that
    /// device's delivery lock held; a listener must not ingest for the same
    /// device. Reads such as [`snapshot`](Self::snapshot) are fine.
    pub fn try_ingest(&self, sample: HeartRateSample) -> Result<(), PulseError> {
        let slot = self
            .slot(&sample.device_id)
            .ok_or_else(|| PulseError::UnknownDevice(sample.device_id.clone()))?;

        let _delivery = slot.delivery.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut session = slot.session.lock().unwrap_or_else(|e| e.into_inner());
            session.current_heart_rate = Some(sample.heart_rate);
            session.last_sample_at = Some(sample.timestamp);
            if let Some(capacity) = self.history_capacity {
                while session.history.len() >= capacity {
                    session.history.pop_front();
                }
            }
            session.history.push_back(sample.clone());
        }

        self.subscribers.notify(&sample);
        Ok(())
    }

    /// Like [`try_ingest`](Self::try_ingest), but a sample for an
    /// unregistered device is logged and dropped.
    pub fn ingest(&self, sample: HeartRateSample) -> bool {
        match self.try_ingest(sample) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("dropping sample: {e}");
                false
            }
        }
    }

    /// `(device_id, current_heart_rate)` for every device, ordered by id
    pub fn snapshot(&self) -> Vec<(String, Option<u16>)> {
        self.slots()
            .into_iter()
            .map(|slot| {
                let session = slot.session.lock().unwrap_or_else(|e| e.into_inner());
                (session.device_id.clone(), session.current_heart_rate)
            })
            .collect()
    }

    /// Full read-only view of every device, ordered by id
    pub fn devices(&self) -> Vec<DeviceView> {
        self.slots()
            .into_iter()
            .map(|slot| slot.session.lock().unwrap_or_else(|e| e.into_inner()).view())
            .collect()
    }

    /// View of one device
    pub fn device(&self, device_id: &str) -> Option<DeviceView> {
        self.slot(device_id)
            .map(|slot| slot.session.lock().unwrap_or_else(|e| e.into_inner()).view())
    }

    /// Copy of every device's history, ordered by device id
    pub fn histories(&self) -> Vec<Vec<HeartRateSample>> {
        self.slots()
            .into_iter()
            .map(|slot| {
                let session = slot.session.lock().unwrap_or_else(|e| e.into_inner());
                session.history.iter().cloned().collect()
            })
            .collect()
    }

    /// Empty every history while keeping registrations
    pub fn clear_histories(&self) {
        for slot in self.slots() {
            slot.session.lock().unwrap_or_else(|e| e.into_inner()).history.clear();
        }
    }

    /// Mark every device's displayed heart rate as unknown
    pub fn clear_current_heart_rates(&self) {
        for slot in self.slots() {
            slot.session.lock()
                .unwrap_or_else(|e| e.into_inner())
                .current_heart_rate = None;
        }
    }

    /// Most recent sample instant across all devices
    pub fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.slots()
            .into_iter()
            .filter_map(|slot| slot.session.lock().unwrap_or_else(|e| e.into_inner()).last_sample_at)
            .max()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every sample accepted from now on
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HeartRateSample) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(listener)
    }

    fn slot(&self, device_id: &str) -> Option<SessionSlot> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
    }

    fn slots(&self) -> Vec<SessionSlot> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
