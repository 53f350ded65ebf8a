//! The control loop: one owner for the relays, the sensor, the reporting
//! timers and the event log.
//!
//! ```text
//! CONNECTING ──▶ RUNNING ──[transport lost]──▶ SHUTDOWN
//!                  │ ▲
//!                  └─┘  inbound command (if any) → dispatch → maybe_report
//! ```
//!
//! Connecting and shutting the session down live in `main`; this module runs
//! the RUNNING state against any [`Transport`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{parse_command, Command};
use crate::config::Config;
use crate::mqtt::{Inbound, Transport};
use crate::sensor::WaterSensor;
use crate::sequencer::RelaySequencer;
use crate::state::EventLog;
use crate::telemetry::{water_payload, Publisher, Report, Reporter};

/// Number of events dumped to the log on shutdown.
const SHUTDOWN_HISTORY: usize = 20;

/// What a dispatched command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Started,
    /// `ON` while the sensor reported no water.
    Refused,
    Stopped,
    Ignored,
}

pub(crate) struct Controller {
    command_topic: String,
    poll_interval: Duration,
    sequencer: RelaySequencer,
    sensor: WaterSensor,
    reporter: Reporter,
    events: EventLog,
}

impl Controller {
    pub(crate) fn new(
        config: &Config,
        sequencer: RelaySequencer,
        sensor: WaterSensor,
        now: Instant,
    ) -> Self {
        let reporter = Reporter::new(
            config.topics.water_topic(),
            config.timing.water_check_interval(),
            config.timing.water_send_interval(),
            now,
        );

        let mut events = EventLog::new();
        events.record_system("controller started".to_string());

        Self {
            command_topic: config.topics.command_topic(),
            poll_interval: config.timing.poll_interval(),
            sequencer,
            sensor,
            reporter,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------------

    /// Parse and act on one inbound message.
    pub(crate) async fn on_message(&mut self, topic: &str, payload: &[u8]) -> Command {
        let command = parse_command(&self.command_topic, topic, payload);
        info!(topic, %command, "command received");
        self.dispatch(&command).await;
        command
    }

    /// Each dispatch records exactly one event.
    pub(crate) async fn dispatch(&mut self, command: &Command) -> Dispatch {
        match command {
            Command::PowerOn => {
                if !self.sensor.sample().water_present {
                    warn!("power on refused: no water");
                    self.events
                        .record_error("ON refused: no water detected".to_string());
                    return Dispatch::Refused;
                }
                self.sequencer.start_sequence().await;
                self.events.record_relay("machine started".to_string());
                Dispatch::Started
            }
            Command::PowerOff => {
                self.sequencer.stop_sequence();
                self.events.record_relay("machine powered off".to_string());
                Dispatch::Stopped
            }
            Command::Unrecognized(_) => {
                warn!(%command, "unknown message ignored");
                self.events.record_command(format!("ignored {command}"));
                Dispatch::Ignored
            }
        }
    }

    // -----------------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------------

    pub(crate) fn tick<P: Publisher>(&mut self, now: Instant, publisher: &mut P) -> Report {
        let report = self
            .reporter
            .maybe_report(now, &mut self.sensor, publisher);

        match report {
            Report::Published {
                water_present,
                heartbeat,
            } => self.events.record_report(format!(
                "{} <- {}{}",
                self.reporter.topic(),
                water_payload(water_present),
                if heartbeat { " (heartbeat)" } else { "" }
            )),
            Report::Failed { water_present } => self.events.record_error(format!(
                "publish {} to {} failed",
                water_payload(water_present),
                self.reporter.topic()
            )),
            Report::Unchanged { water_present } => {
                debug!(water_present, "no report due");
            }
            Report::Skipped => {}
        }

        report
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// RUNNING: handle at most one inbound message, then evaluate telemetry,
    /// forever. Returns the transport error that ended the loop.
    pub(crate) async fn run<T: Transport>(&mut self, transport: &mut T) -> anyhow::Error {
        self.events.record_system("running".to_string());
        info!(
            command_topic = %self.command_topic,
            water_topic = %self.reporter.topic(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "control loop running"
        );

        loop {
            match transport.next_inbound(self.poll_interval).await {
                Inbound::Message { topic, payload } => {
                    self.on_message(&topic, &payload).await;
                }
                Inbound::Idle => {}
                Inbound::Lost(e) => {
                    self.events.record_error(format!("transport lost: {e:#}"));
                    return e;
                }
            }

            self.tick(Instant::now(), &mut *transport);
        }
    }

    /// SHUTDOWN: release every relay and dump recent history.
    pub(crate) fn shutdown(&mut self) {
        let was_powered = self.sequencer.is_powered();
        self.sequencer.stop_sequence();
        info!(
            was_powered,
            relays = ?self.sequencer.board().energized(),
            "relays released"
        );
        self.events.record_system("shutdown".to_string());

        info!(
            events = self.events.len(),
            "recent controller history (oldest first)"
        );
        for ev in self.events.recent(SHUTDOWN_HISTORY) {
            info!(ts = %ev.timestamp(), kind = ev.kind.as_str(), "{}", ev.detail);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
