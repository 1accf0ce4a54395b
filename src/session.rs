//! Workout lifecycle state machine
//!
//! ```text
//! Idle --start--> Active --pause / signal lost--> Paused --resume--> Active
//!                   |                               |
//!                   +-------------end---------------+--> Ended
//! ```
//!
//! The session owns the [`WorkoutClock`] and shares the [`DeviceRegistry`]
//! with the ingress path. Device callbacks only ever ingest samples; every
//! clock mutation happens here, driven by the workout controller or by
//! [`WorkoutSession::check_signal`].

use crate::clock::{span, to_chrono, TimeSource, WorkoutClock};
use crate::config::PulseConfig;
use crate::error::PulseError;
use crate::metrics::MetricsAggregator;
use crate::registry::DeviceRegistry;
use crate::types::{PauseReason, WorkoutMetrics, WorkoutState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One workout, from `start()` to `end()`
pub struct WorkoutSession {
    id: Uuid,
    state: WorkoutState,
    clock: WorkoutClock,
    registry: Arc<DeviceRegistry>,
    time: Arc<dyn TimeSource>,
    config: PulseConfig,
    /// Watchdog baseline, reset on start and resume
    signal_baseline: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        time: Arc<dyn TimeSource>,
        config: PulseConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: WorkoutState::Idle,
            clock: WorkoutClock::new(Arc::clone(&time)),
            registry,
            time,
            config,
            signal_baseline: None,
            ended_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkoutState {
        self.state
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.clock.started_at()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Active duration so far
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Idle → Active. Clears stale samples and starts the clock.
    pub fn start(&mut self) -> Result<(), PulseError> {
        if self.state != WorkoutState::Idle {
            return Err(self.invalid("start"));
        }
        if self.registry.is_empty() {
            return Err(PulseError::NoDevices);
        }

        self.registry.clear_histories();
        self.clock.start();
        self.signal_baseline = self.clock.started_at();
        self.transition(WorkoutState::Active);
        Ok(())
    }

    /// Active → Paused(Manual). No-op when already paused.
    pub fn pause(&mut self) -> Result<(), PulseError> {
        match self.state {
            WorkoutState::Active => {
                self.clock.pause(None);
                self.transition(WorkoutState::Paused(PauseReason::Manual));
                Ok(())
            }
            WorkoutState::Paused(_) => Ok(()),
            WorkoutState::Idle | WorkoutState::Ended => Err(self.invalid("pause")),
        }
    }

    /// Paused → Active, whatever the pause reason. No-op when already active.
    pub fn resume(&mut self) -> Result<(), PulseError> {
        match self.state {
            WorkoutState::Paused(_) => {
                self.clock.resume();
                self.signal_baseline = Some(self.time.now());
                self.transition(WorkoutState::Active);
                Ok(())
            }
            WorkoutState::Active => Ok(()),
            WorkoutState::Idle | WorkoutState::Ended => Err(self.invalid("resume")),
        }
    }

    /// Active | Paused → Ended. Returns the final metrics, or `None` when no
    /// valid reading arrived during the workout. The session cannot be
    /// reused afterwards.
    pub fn end(&mut self) -> Result<Option<WorkoutMetrics>, PulseError> {
        if !matches!(self.state, WorkoutState::Active | WorkoutState::Paused(_)) {
            return Err(self.invalid("end"));
        }

        let duration = self.clock.finalize();
        let metrics =
            MetricsAggregator::compute(&self.registry.histories(), duration, &self.config);
        self.registry.clear_histories();
        self.ended_at = Some(self.time.now());
        self.signal_baseline = None;
        self.transition(WorkoutState::Ended);

        match &metrics {
            Some(m) => log::info!(
                "workout {} ended: {}s, avg {} bpm, zone {}",
                self.id,
                m.duration_seconds,
                m.average_heart_rate,
                m.zone.number()
            ),
            None => log::info!("workout {} ended without valid heart rate data", self.id),
        }
        Ok(metrics)
    }

    /// Live metrics, `None` until a valid reading has arrived
    pub fn metrics(&self) -> Option<WorkoutMetrics> {
        if matches!(self.state, WorkoutState::Idle | WorkoutState::Ended) {
            return None;
        }
        MetricsAggregator::compute(&self.registry.histories(), self.clock.elapsed(), &self.config)
    }

    /// One watchdog tick.
    ///
    /// While active with at least one device registered, demotes the workout
    /// to `Paused(SignalLost)` once no device has reported for longer than
    /// the configured threshold. The pause is backdated to the last instant
    /// signal was seen and every displayed heart rate is cleared. Returns
    /// `true` when the transition happened.
    pub fn check_signal(&mut self) -> bool {
        if !self.state.is_active() || self.registry.is_empty() {
            return false;
        }

        let Some(last_seen) = self.last_signal_at() else {
            return false;
        };
        let silence = span(last_seen, self.time.now());
        if silence <= self.config.signal_loss_threshold() {
            return false;
        }

        log::warn!(
            "workout {}: no heart rate data for {:.1}s, pausing",
            self.id,
            silence.as_secs_f64()
        );
        self.clock.pause(Some(last_seen));
        self.registry.clear_current_heart_rates();
        self.transition(WorkoutState::Paused(PauseReason::SignalLost));
        true
    }

    /// Instant after which [`check_signal`](Self::check_signal) pauses the
    /// workout; `None` while it cannot fire (not active, or no devices)
    pub fn signal_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.state.is_active() || self.registry.is_empty() {
            return None;
        }
        self.last_signal_at()?
            .checked_add_signed(to_chrono(self.config.signal_loss_threshold()))
    }

    /// Latest of the newest sample and the watchdog baseline
    fn last_signal_at(&self) -> Option<DateTime<Utc>> {
        match (self.registry.last_sample_at(), self.signal_baseline) {
            (Some(sample), Some(baseline)) => Some(sample.max(baseline)),
            (sample, baseline) => sample.or(baseline),
        }
    }

    fn transition(&mut self, next: WorkoutState) {
        log::info!("workout {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    fn invalid(&self, action: &'static str) -> PulseError {
        PulseError::InvalidTransition {
            from: self.state.to_string(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::types::{HeartRateSample, HrZone, SensorContact};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    struct Fixture {
        time: Arc<ManualTimeSource>,
        registry: Arc<DeviceRegistry>,
        session: WorkoutSession,
    }

    fn fixture(devices: &[&str]) -> Fixture {
        let time = Arc::new(ManualTimeSource::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 18, 0, 0).unwrap(),
        ));
        let registry = Arc::new(DeviceRegistry::new());
        for id in devices {
            registry.register(id, None);
        }
        let session = WorkoutSession::new(
            Arc::clone(&registry),
            time.clone(),
            PulseConfig::default(),
        );
        Fixture {
            time,
            registry,
            session,
        }
    }

    impl Fixture {
        fn advance(&self, secs: u64) {
            self.time.advance(Duration::from_secs(secs));
        }

        fn beat(&self, device_id: &str, hr: u16) {
            self.registry.ingest(HeartRateSample {
                device_id: device_id.to_string(),
                device_name: None,
                heart_rate: hr,
                wide_heart_rate: false,
                sensor_contact: SensorContact::Detected,
                energy_expended: None,
                rr_intervals: None,
                timestamp: self.time.now(),
            });
        }
    }

    #[test]
    fn test_start_requires_devices() {
        let mut f = fixture(&[]);
        assert!(matches!(f.session.start(), Err(PulseError::NoDevices)));
        assert_eq!(f.session.state(), WorkoutState::Idle);
    }

    #[test]
    fn test_start_clears_stale_samples() {
        let mut f = fixture(&["a"]);
        f.beat("a", 200);
        f.session.start().unwrap();

        assert_eq!(f.session.state(), WorkoutState::Active);
        assert_eq!(f.registry.device("a").unwrap().sample_count, 0);
        assert_eq!(f.session.metrics(), None);
    }

    #[test]
    fn test_pause_resume_end_duration() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();

        f.advance(100);
        f.session.pause().unwrap();
        assert_eq!(f.session.state(), WorkoutState::Paused(PauseReason::Manual));

        f.advance(30);
        f.session.resume().unwrap();
        f.beat("a", 120);

        f.advance(20);
        let metrics = f.session.end().unwrap().unwrap();

        assert_eq!(metrics.duration_seconds, 120);
        assert_eq!(f.session.state(), WorkoutState::Ended);
        assert_eq!(f.registry.device("a").unwrap().sample_count, 0);
    }

    #[test]
    fn test_repeated_pause_and_resume_are_noops() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();

        assert!(f.session.resume().is_ok());
        f.session.pause().unwrap();
        f.advance(10);
        assert!(f.session.pause().is_ok());
        assert_eq!(f.session.state(), WorkoutState::Paused(PauseReason::Manual));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut f = fixture(&["a"]);

        assert!(matches!(
            f.session.pause(),
            Err(PulseError::InvalidTransition { action: "pause", .. })
        ));
        assert!(f.session.resume().is_err());
        assert!(f.session.end().is_err());

        f.session.start().unwrap();
        assert!(f.session.start().is_err());
        f.session.end().unwrap();

        for result in [f.session.start(), f.session.pause(), f.session.resume()] {
            assert!(matches!(result, Err(PulseError::InvalidTransition { .. })));
        }
        assert!(matches!(
            f.session.end(),
            Err(PulseError::InvalidTransition { action: "end", .. })
        ));
    }

    #[test]
    fn test_end_while_paused_closes_pause() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();
        f.beat("a", 100);

        f.advance(50);
        f.session.pause().unwrap();
        f.advance(25);

        let metrics = f.session.end().unwrap().unwrap();
        assert_eq!(metrics.duration_seconds, 50);
    }

    #[test]
    fn test_end_without_data_is_not_ready() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();
        f.beat("a", 0);
        f.advance(60);

        assert_eq!(f.session.end().unwrap(), None);
        assert_eq!(f.session.state(), WorkoutState::Ended);
    }

    #[test]
    fn test_watchdog_pauses_on_silence() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();
        f.beat("a", 140);
        let last_seen = f.time.now();

        f.advance(2);
        assert!(!f.session.check_signal());
        f.advance(2);
        assert!(!f.session.check_signal());
        f.advance(2);
        assert!(f.session.check_signal());

        assert_eq!(
            f.session.state(),
            WorkoutState::Paused(PauseReason::SignalLost)
        );
        assert_eq!(f.registry.snapshot(), vec![("a".to_string(), None)]);
        // Backdated to the last sample, not the tick that fired
        assert_eq!(f.session.elapsed(), Duration::ZERO);
        assert_eq!(f.session.clock.pause_started_at(), Some(last_seen));
    }

    #[test]
    fn test_watchdog_uses_start_when_no_samples() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();

        f.advance(6);
        assert!(f.session.check_signal());
        assert_eq!(
            f.session.state(),
            WorkoutState::Paused(PauseReason::SignalLost)
        );
    }

    #[test]
    fn test_watchdog_backdates_active_time() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();
        for _ in 0..30 {
            f.advance(1);
            f.beat("a", 150);
        }

        f.advance(6);
        assert!(f.session.check_signal());
        f.advance(60);
        f.beat("a", 150);
        f.session.resume().unwrap();
        f.advance(10);

        let metrics = f.session.end().unwrap().unwrap();
        assert_eq!(metrics.duration_seconds, 40);
        assert_eq!(metrics.zone, HrZone::Zone3);
    }

    #[test]
    fn test_resume_resets_watchdog_baseline() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();

        f.advance(6);
        assert!(f.session.check_signal());
        f.advance(60);
        f.session.resume().unwrap();

        f.advance(2);
        assert!(!f.session.check_signal());
        assert_eq!(f.session.state(), WorkoutState::Active);
    }

    #[test]
    fn test_signal_deadline_tracks_last_signal() {
        let mut f = fixture(&["a"]);
        assert_eq!(f.session.signal_deadline(), None);

        f.session.start().unwrap();
        let started = f.time.now();
        assert_eq!(
            f.session.signal_deadline(),
            Some(started + chrono::Duration::seconds(5))
        );

        f.advance(3);
        f.beat("a", 120);
        assert_eq!(
            f.session.signal_deadline(),
            Some(f.time.now() + chrono::Duration::seconds(5))
        );

        f.session.pause().unwrap();
        assert_eq!(f.session.signal_deadline(), None);
    }

    #[test]
    fn test_watchdog_idle_when_not_active() {
        let mut f = fixture(&["a"]);
        f.advance(60);
        assert!(!f.session.check_signal());

        f.session.start().unwrap();
        f.session.pause().unwrap();
        f.advance(60);
        assert!(!f.session.check_signal());
        assert_eq!(f.session.state(), WorkoutState::Paused(PauseReason::Manual));
    }

    #[test]
    fn test_watchdog_silent_without_devices() {
        let mut f = fixture(&["a"]);
        f.session.start().unwrap();
        f.registry.unregister("a");

        f.advance(60);
        assert!(!f.session.check_signal());
        // Losing the last device does not change state by itself
        assert_eq!(f.session.state(), WorkoutState::Active);
    }

    #[test]
    fn test_live_metrics_track_clock() {
        let mut f = fixture(&["a", "b"]);
        f.session.start().unwrap();
        f.beat("a", 140);
        f.beat("b", 160);
        f.advance(60);

        let live = f.session.metrics().unwrap();
        assert_eq!(live.duration_seconds, 60);
        assert_eq!(live.average_heart_rate, 150);
        assert_eq!(live.calories_estimate, 15);
    }
}
