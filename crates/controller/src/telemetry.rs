//! Water-level telemetry: decides once per loop iteration whether the current
//! reading goes out on the water topic.
//!
//! ```text
//! check interval not elapsed ─▶ nothing (sensor not sampled)
//! sample ≠ last reported     ─▶ publish
//! send interval elapsed      ─▶ publish (heartbeat)
//! otherwise                  ─▶ nothing
//! ```
//!
//! A failed publish still advances `last_report_time` but leaves
//! `last_reported_value` alone, so the next check retries it.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sensor::WaterSensor;

/// Outbound side of the telemetry channel.
pub(crate) trait Publisher {
    /// Queue `payload` on `topic` without blocking.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// Wire payload for a water reading.
pub(crate) fn water_payload(water_present: bool) -> &'static str {
    if water_present {
        "1"
    } else {
        "0"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReportingState {
    pub(crate) last_reported_value: Option<bool>,
    pub(crate) last_check_time: Instant,
    pub(crate) last_report_time: Instant,
}

/// Result of one `maybe_report` evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Report {
    /// Check interval not elapsed; the sensor was not sampled.
    Skipped,
    /// Sampled, same as last reported, heartbeat not due.
    Unchanged { water_present: bool },
    Published { water_present: bool, heartbeat: bool },
    Failed { water_present: bool },
}

pub(crate) struct Reporter {
    topic: String,
    check_interval: Duration,
    send_interval: Duration,
    state: ReportingState,
}

impl Reporter {
    /// Both timers start at `now`: the first check happens one check interval
    /// later, the first heartbeat one send interval later.
    pub(crate) fn new(
        topic: String,
        check_interval: Duration,
        send_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            topic,
            check_interval,
            send_interval,
            state: ReportingState {
                last_reported_value: None,
                last_check_time: now,
                last_report_time: now,
            },
        }
    }

    pub(crate) fn state(&self) -> &ReportingState {
        &self.state
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn maybe_report<P: Publisher>(
        &mut self,
        now: Instant,
        sensor: &mut WaterSensor,
        publisher: &mut P,
    ) -> Report {
        if now.saturating_duration_since(self.state.last_check_time) < self.check_interval {
            return Report::Skipped;
        }

        let reading = sensor.sample();
        self.state.last_check_time = now;
        let water_present = reading.water_present;

        let changed = self.state.last_reported_value != Some(water_present);
        if !changed
            && now.saturating_duration_since(self.state.last_report_time) < self.send_interval
        {
            debug!(water_present, "water level unchanged");
            return Report::Unchanged { water_present };
        }

        let payload = water_payload(water_present);
        let outcome = match publisher.publish(&self.topic, payload) {
            Ok(()) => {
                self.state.last_reported_value = Some(water_present);
                info!(
                    topic = %self.topic,
                    payload,
                    heartbeat = !changed,
                    sampled_at = ?reading.sampled_at,
                    "water level published"
                );
                Report::Published {
                    water_present,
                    heartbeat: !changed,
                }
            }
            Err(e) => {
                warn!(topic = %self.topic, payload, "water level publish failed: {e:#}");
                Report::Failed { water_present }
            }
        };
        self.state.last_report_time = now;

        outcome
    }
}

// ===========================================================================
// Tests
// ===========================================================================
