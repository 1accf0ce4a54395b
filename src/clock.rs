//! Time sources and pause-aware workout timing
//!
//! All "now" lookups go through a [`TimeSource`] so that pause/resume and
//! signal-loss behaviour can be driven deterministically in tests.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Capability that yields the current instant
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time that never runs backwards.
///
/// The wall clock is read once at construction; later readings add the
/// monotonic time elapsed since then.
#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.anchor_utc + to_chrono(self.anchor.elapsed())
    }
}

/// Manually advanced time for tests and replays
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += to_chrono(by);
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = instant;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert a std duration to a chrono one, saturating on overflow
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `later - earlier`, clamped at zero
pub(crate) fn span(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Pause-aware elapsed-time accumulator
///
/// `elapsed = now - started_at - accumulated_pause - open_pause`
pub struct WorkoutClock {
    time: Arc<dyn TimeSource>,
    started_at: Option<DateTime<Utc>>,
    accumulated_pause: Duration,
    pause_started_at: Option<DateTime<Utc>>,
}

impl WorkoutClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            started_at: None,
            accumulated_pause: Duration::ZERO,
            pause_started_at: None,
        }
    }

    /// Start (or restart) timing from now
    pub fn start(&mut self) {
        self.started_at = Some(self.time.now());
        self.accumulated_pause = Duration::ZERO;
        self.pause_started_at = None;
    }

    /// Open a pause at `at` (or now). No-op if already paused or not started.
    ///
    /// A backdated `at` is clamped into `[started_at, now]`.
    pub fn pause(&mut self, at: Option<DateTime<Utc>>) {
        let Some(started_at) = self.started_at else {
            return;
        };
        if self.pause_started_at.is_some() {
            return;
        }
        let now = self.time.now();
        let at = at.unwrap_or(now).clamp(started_at, now.max(started_at));
        self.pause_started_at = Some(at);
    }

    /// Close the open pause, if any
    pub fn resume(&mut self) {
        if let Some(paused_at) = self.pause_started_at.take() {
            self.accumulated_pause += span(paused_at, self.time.now());
        }
    }

    /// Active time so far; frozen while paused
    pub fn elapsed(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let until = self.pause_started_at.unwrap_or_else(|| self.time.now());
        span(started_at, until).saturating_sub(self.accumulated_pause)
    }

    /// Fold any open pause in and return the closed duration
    pub fn finalize(&mut self) -> Duration {
        self.resume();
        self.elapsed()
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn accumulated_pause(&self) -> Duration {
        self.accumulated_pause
    }

    pub fn pause_started_at(&self) -> Option<DateTime<Utc>> {
        self.pause_started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manual() -> Arc<ManualTimeSource> {
        Arc::new(ManualTimeSource::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap(),
        ))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_elapsed_without_pauses() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        assert_eq!(clock.elapsed(), Duration::ZERO);

        clock.start();
        time.advance(secs(42));
        assert_eq!(clock.elapsed(), secs(42));
    }

    #[test]
    fn test_pause_freezes_elapsed() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();

        time.advance(secs(100));
        clock.pause(None);
        time.advance(secs(30));
        assert_eq!(clock.elapsed(), secs(100));

        clock.resume();
        time.advance(secs(20));
        assert_eq!(clock.elapsed(), secs(120));
        assert_eq!(clock.accumulated_pause(), secs(30));
    }

    #[test]
    fn test_many_pause_cycles() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();

        let mut paused_total = 0;
        for i in 1..=5u64 {
            time.advance(secs(10 * i));
            clock.pause(None);
            time.advance(secs(i));
            paused_total += i;
            clock.resume();
        }
        time.advance(secs(7));

        let wall = 10 * (1 + 2 + 3 + 4 + 5) + paused_total + 7;
        assert_eq!(clock.elapsed(), secs(wall - paused_total));
    }

    #[test]
    fn test_repeated_pause_keeps_first_start() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();

        time.advance(secs(10));
        clock.pause(None);
        time.advance(secs(5));
        clock.pause(None);
        time.advance(secs(5));
        clock.resume();

        assert_eq!(clock.accumulated_pause(), secs(10));
        assert_eq!(clock.elapsed(), secs(10));
    }

    #[test]
    fn test_backdated_pause() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();
        let start = time.now();

        time.advance(secs(60));
        let last_seen = time.now();
        time.advance(secs(6));
        clock.pause(Some(last_seen));

        assert_eq!(clock.elapsed(), secs(60));

        // Backdating before the start is clamped
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();
        clock.pause(Some(start));
        assert_eq!(clock.pause_started_at(), Some(time.now()));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_finalize_closes_open_pause() {
        let time = manual();
        let mut clock = WorkoutClock::new(time.clone());
        clock.start();

        time.advance(secs(100));
        clock.pause(None);
        time.advance(secs(30));
        clock.resume();
        time.advance(secs(20));
        clock.pause(None);
        time.advance(secs(15));

        assert_eq!(clock.finalize(), secs(120));
        assert!(!clock.is_paused());
        assert_eq!(clock.accumulated_pause(), secs(45));
    }

    #[test]
    fn test_system_time_is_monotonic() {
        let time = SystemTimeSource::new();
        let a = time.now();
        let b = time.now();
        assert!(b >= a);
    }
}
