//! Tokio drivers for the engine
//!
//! The core types are runtime-agnostic; this module wires them to tokio:
//! - a periodic watchdog task that calls [`WorkoutSession::check_signal`]
//! - one feed task per device that forwards notifications in arrival order

use crate::pipeline::PulseHub;
use crate::session::WorkoutSession;
use crate::types::WorkoutState;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A workout shared between the controller and the watchdog
pub type SharedWorkout = Arc<Mutex<WorkoutSession>>;

/// Running watchdog; aborted when dropped
pub struct WatchdogHandle {
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stop checking
    pub fn stop(self) {
        self.task.abort();
    }

    /// `true` once the workout has ended and the task exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the signal-loss watchdog for `workout`.
///
/// Ticks every `watchdog_poll_interval_seconds`; a tick only checks while
/// the workout is active and the task exits once the workout has ended.
pub fn spawn_watchdog(workout: SharedWorkout) -> WatchdogHandle {
    let poll_interval = workout
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .config()
        .watchdog_poll_interval();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let mut session = match workout.lock() {
                Ok(session) => session,
                Err(_) => {
                    log::error!("watchdog stopping: workout lock poisoned");
                    break;
                }
            };
            match session.state() {
                WorkoutState::Ended => break,
                WorkoutState::Active => {
                    session.check_signal();
                }
                WorkoutState::Idle | WorkoutState::Paused(_) => {}
            }
        }
        log::debug!("watchdog exited");
    });

    WatchdogHandle { task }
}

/// Forward one device's notification stream into the hub.
///
/// Packets are handled strictly in the order the channel yields them. The
/// task ends when every sender is dropped; it does not unregister the device.
pub fn spawn_device_feed(
    hub: Arc<PulseHub>,
    device_id: String,
    display_name: Option<String>,
    mut packets: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = packets.recv().await {
            hub.on_raw_packet(&device_id, display_name.as_deref(), &bytes);
        }
        log::debug!("{device_id}: notification stream closed");
    })
}
