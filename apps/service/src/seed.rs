//! Synthetic check history for demos of the uptime window.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::database::CheckLog;
use crate::monitoring::CheckOutcome;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedPlan {
    pub hours: u32,
    /// Probability in `[0, 1]` that a sample is down
    pub failure_rate: f64,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self { hours: 24, failure_rate: 0.05 }
    }
}

/// One log per minute for the `plan.hours` hours ending at `now`, oldest first.
///
/// Up samples take 50-200ms and answer 200. Down samples carry a 503 and no
/// latency.
pub fn generate<R: Rng + ?Sized>(monitor_uuid: Uuid, now: DateTime<Utc>, plan: SeedPlan, rng: &mut R) -> Vec<CheckLog> {
    let minutes = i64::from(plan.hours) * 60;
    let failure_rate = plan.failure_rate.clamp(0.0, 1.0);

    (0..minutes)
        .rev()
        .map(|ago| {
            let timestamp = now - Duration::minutes(ago);
            if rng.gen_bool(failure_rate) {
                CheckLog {
                    id: None,
                    monitor_uuid,
                    timestamp,
                    outcome: CheckOutcome::Down,
                    latency_ms: 0,
                    response_code: Some(503),
                    message: Some("Unexpected status code: 503".into()),
                }
            } else {
                CheckLog {
                    id: None,
                    monitor_uuid,
                    timestamp,
                    outcome: CheckOutcome::Up,
                    latency_ms: rng.gen_range(50..=200),
                    response_code: Some(200),
                    message: Some("OK".into()),
                }
            }
        })
        .collect()
}
