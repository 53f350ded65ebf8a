//! Relay outputs via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, an in-memory board logs state changes instead.

use anyhow::Result;
use std::fmt;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::config::PinConfig;

// ---------------------------------------------------------------------------
// Relay addressing
// ---------------------------------------------------------------------------

/// The four channels of the relay board, in board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relay {
    PowerA,
    PowerB,
    PumpA,
    PumpB,
}

impl Relay {
    pub(crate) const ALL: [Relay; 4] = [Relay::PowerA, Relay::PowerB, Relay::PumpA, Relay::PumpB];

    fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn is_pump(self) -> bool {
        matches!(self, Relay::PumpA | Relay::PumpB)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerA => write!(f, "power_a"),
            Self::PowerB => write!(f, "power_b"),
            Self::PumpA => write!(f, "pump_a"),
            Self::PumpB => write!(f, "pump_b"),
        }
    }
}

/// Output level for a relay state. Active-low boards energize on LOW;
/// active-high boards are the reverse.
fn pin_high(active_low: bool, energized: bool) -> bool {
    energized != active_low
}

fn level_str(high: bool) -> &'static str {
    if high {
        "HIGH"
    } else {
        "LOW"
    }
}

fn state_str(energized: bool) -> &'static str {
    if energized {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Real GPIO relay board (requires the gpio feature and Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct RelayBoard {
    pins: [OutputPin; 4],
    energized: [bool; 4],
    active_low: bool, // most relay boards are active-low
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub(crate) fn new(config: &PinConfig) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;

        let open = |relay: Relay| -> Result<OutputPin> {
            let pin_num = config.relay_pin(relay);
            let mut pin = gpio
                .get(pin_num)
                .with_context(|| format!("failed to claim gpio {pin_num} for {relay}"))?
                .into_output();
            // Fail-safe: released at startup
            drive(&mut pin, config.active_low, false);
            Ok(pin)
        };

        let pins = [
            open(Relay::PowerA)?,
            open(Relay::PowerB)?,
            open(Relay::PumpA)?,
            open(Relay::PumpB)?,
        ];

        tracing::info!(active_low = config.active_low, "relay board initialised");

        Ok(Self {
            pins,
            energized: [false; 4],
            active_low: config.active_low,
        })
    }

    pub(crate) fn set(&mut self, relay: Relay, energized: bool) {
        drive(&mut self.pins[relay.index()], self.active_low, energized);
        self.energized[relay.index()] = energized;
        tracing::debug!(
            %relay,
            state = state_str(energized),
            level = level_str(pin_high(self.active_low, energized)),
            "relay set"
        );
    }
}

#[cfg(feature = "gpio")]
fn drive(pin: &mut OutputPin, active_low: bool, energized: bool) {
    if pin_high(active_low, energized) {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

// ---------------------------------------------------------------------------
// In-memory relay board (no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct RelayBoard {
    energized: [bool; 4],
    active_low: bool,
    #[cfg(test)]
    pub(crate) history: Vec<Actuation>,
}

/// One recorded relay write, stamped with the (possibly paused) tokio clock.
#[cfg(all(test, not(feature = "gpio")))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Actuation {
    pub(crate) relay: Relay,
    pub(crate) energized: bool,
    pub(crate) at: tokio::time::Instant,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub(crate) fn new(config: &PinConfig) -> Result<Self> {
        for relay in Relay::ALL {
            tracing::info!(
                %relay,
                gpio = config.relay_pin(relay),
                "[mock-gpio] registered relay (not wired)"
            );
        }
        Ok(Self {
            energized: [false; 4],
            active_low: config.active_low,
            #[cfg(test)]
            history: Vec::new(),
        })
    }

    pub(crate) fn set(&mut self, relay: Relay, energized: bool) {
        self.energized[relay.index()] = energized;
        #[cfg(test)]
        self.history.push(Actuation {
            relay,
            energized,
            at: tokio::time::Instant::now(),
        });
        tracing::debug!(
            %relay,
            state = state_str(energized),
            level = level_str(pin_high(self.active_low, energized)),
            "[mock-gpio] relay set"
        );
    }

    /// Pin levels the real board would be driving, in board order.
    #[cfg(test)]
    pub(crate) fn levels(&self) -> [bool; 4] {
        self.energized.map(|e| pin_high(self.active_low, e))
    }
}

// ---------------------------------------------------------------------------
// Shared accessors
// ---------------------------------------------------------------------------

impl RelayBoard {
    pub(crate) fn is_energized(&self, relay: Relay) -> bool {
        self.energized[relay.index()]
    }

    /// Energized flags in board order: power_a, power_b, pump_a, pump_b.
    pub(crate) fn energized(&self) -> [bool; 4] {
        self.energized
    }
}

// ===========================================================================
// Tests
// ===========================================================================
