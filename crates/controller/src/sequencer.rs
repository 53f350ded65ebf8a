//! Power-on / power-off procedures for the appliance relay board.
//!
//! ```text
//! power_a ─500ms─▶ power_b ─1000ms─▶ pump_a ─500ms─▶ pump_b ─5000ms─▶ pumps released
//! ```
//!
//! The delays are hardware timing: the relay board needs settling time between
//! adjacent actuations, and the machine needs a priming interval with the pump
//! running before the pump/solenoid circuit is opened again. The start
//! sequence (7 s in total) is awaited inline by the control loop and cannot be
//! cancelled.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

use crate::relay::{Relay, RelayBoard};

/// Between closing the two general power relays.
const POWER_SETTLE: Duration = Duration::from_millis(500);
/// Machine powered before the pump circuit closes.
const MACHINE_WARMUP: Duration = Duration::from_millis(1000);
/// Between closing the two pump/solenoid relays.
const PUMP_SETTLE: Duration = Duration::from_millis(500);
/// Pump runs to fill the machine.
const PRIME: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Energize(Relay),
    Wait(Duration),
    Release(Relay),
}

pub(crate) const START_SEQUENCE: [Step; 10] = [
    Step::Energize(Relay::PowerA),
    Step::Wait(POWER_SETTLE),
    Step::Energize(Relay::PowerB),
    Step::Wait(MACHINE_WARMUP),
    Step::Energize(Relay::PumpA),
    Step::Wait(PUMP_SETTLE),
    Step::Energize(Relay::PumpB),
    Step::Wait(PRIME),
    Step::Release(Relay::PumpA),
    Step::Release(Relay::PumpB),
];

/// Sole owner of the relay board.
pub(crate) struct RelaySequencer {
    board: RelayBoard,
}

impl RelaySequencer {
    pub(crate) fn new(board: RelayBoard) -> Self {
        Self { board }
    }

    /// Run the full power-on procedure. The caller checks for water first.
    pub(crate) async fn start_sequence(&mut self) {
        info!("starting machine");
        let started = Instant::now();

        for step in START_SEQUENCE {
            match step {
                Step::Energize(relay) => self.board.set(relay, true),
                Step::Wait(delay) => sleep(delay).await,
                Step::Release(relay) => self.board.set(relay, false),
            }
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "machine started"
        );
    }

    /// Release every relay. Pumps go first so they are never closed without
    /// main power, even momentarily; no delays needed since the relay springs
    /// open the contacts.
    pub(crate) fn stop_sequence(&mut self) {
        let pumps_first = Relay::ALL
            .into_iter()
            .filter(|r| r.is_pump())
            .chain(Relay::ALL.into_iter().filter(|r| !r.is_pump()));

        for relay in pumps_first {
            self.board.set(relay, false);
        }
        info!("machine powered off");
    }

    /// True while main power is on.
    pub(crate) fn is_powered(&self) -> bool {
        self.board.is_energized(Relay::PowerA) || self.board.is_energized(Relay::PowerB)
    }

    pub(crate) fn board(&self) -> &RelayBoard {
        &self.board
    }
}

// ===========================================================================
// Tests
// ===========================================================================
