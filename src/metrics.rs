//! Workout metrics aggregation
//!
//! Metrics are derived from the union of every device's sample history and
//! the active workout duration:
//! - Average, maximum and minimum heart rate over valid readings
//! - A linear calorie proxy
//! - The heart rate training zone
//!
//! The formulas are a compatibility surface and are reproduced exactly.

use crate::config::PulseConfig;
use crate::types::{HeartRateSample, HrZone, WorkoutMetrics};
use std::time::Duration;

/// Aggregator for live and final workout metrics
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Compute metrics, or `None` when there are no valid readings yet
    pub fn compute(
        histories: &[Vec<HeartRateSample>],
        duration: Duration,
        config: &PulseConfig,
    ) -> Option<WorkoutMetrics> {
        let valid: Vec<u16> = histories
            .iter()
            .flatten()
            .map(|sample| sample.heart_rate)
            .filter(|&hr| is_valid_heart_rate(hr, config.min_valid_heart_rate))
            .collect();

        let max_heart_rate = *valid.iter().max()?;
        let min_heart_rate = *valid.iter().min()?;

        let sum: u64 = valid.iter().map(|&hr| u64::from(hr)).sum();
        let mean = sum as f64 / valid.len() as f64;
        let average_heart_rate = mean.round() as u16;

        let duration_seconds = duration.as_secs();

        Some(WorkoutMetrics {
            duration_seconds,
            average_heart_rate,
            max_heart_rate,
            min_heart_rate,
            calories_estimate: estimate_calories(
                average_heart_rate,
                duration_seconds,
                config.calorie_coefficient,
            ),
            zone: compute_zone(average_heart_rate, config.assumed_max_heart_rate),
        })
    }
}

/// Sensor dropouts report zero or implausibly low values
fn is_valid_heart_rate(heart_rate: u16, min_valid: u16) -> bool {
    heart_rate > 0 && heart_rate >= min_valid
}

/// round(average × seconds × coefficient)
fn estimate_calories(average_heart_rate: u16, duration_seconds: u64, coefficient: f64) -> u64 {
    let calories = f64::from(average_heart_rate) * duration_seconds as f64 * coefficient;
    calories.round().max(0.0) as u64
}

/// Zone from average heart rate as a fraction of the assumed maximum
fn compute_zone(average_heart_rate: u16, assumed_max_heart_rate: u16) -> HrZone {
    let fraction = f64::from(average_heart_rate) / f64::from(assumed_max_heart_rate.max(1));
    HrZone::from_fraction(fraction)
}
