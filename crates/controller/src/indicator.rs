//! Connectivity status light: an optional common-cathode RGB LED that shows
//! where the controller is in its lifecycle.
//!
//! ```text
//! Offline ──▶ NetworkUp ──▶ Online ──▶ Stopped
//! dim red     gold          dim green  dim blue
//! ```
//!
//! A plain digital LED cannot dim, so each channel is simply on when its
//! colour component is non-zero.

use anyhow::Result;
use std::fmt;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::config::PinConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// No network and no broker session yet.
    Offline,
    /// Broker host reachable, session not yet established.
    NetworkUp,
    Online,
    /// Session lost or never established; the process is exiting.
    Stopped,
}

impl Status {
    /// 0xRRGGBB colour for this status.
    pub(crate) fn color(self) -> u32 {
        match self {
            Self::Offline => 0x110000,
            Self::NetworkUp => 0xffd700,
            Self::Online => 0x001100,
            Self::Stopped => 0x000011,
        }
    }

    /// Red, green, blue channel states.
    pub(crate) fn channels(self) -> [bool; 3] {
        let c = self.color();
        [(c >> 16) & 0xff != 0, (c >> 8) & 0xff != 0, c & 0xff != 0]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::NetworkUp => write!(f, "network up"),
            Self::Online => write!(f, "online"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Real GPIO status light
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct StatusLight {
    pins: Option<[OutputPin; 3]>,
}

#[cfg(feature = "gpio")]
impl StatusLight {
    pub(crate) fn new(config: &PinConfig) -> Result<Self> {
        let Some(rgb) = config.status_led else {
            tracing::info!("no status light configured");
            return Ok(Self { pins: None });
        };

        let gpio = Gpio::new().context("failed to open GPIO")?;
        let open = |pin_num: u8, channel: &str| -> Result<OutputPin> {
            Ok(gpio
                .get(pin_num)
                .with_context(|| format!("failed to claim gpio {pin_num} for status {channel}"))?
                .into_output_low())
        };
        let pins = [
            open(rgb.red, "red")?,
            open(rgb.green, "green")?,
            open(rgb.blue, "blue")?,
        ];

        tracing::info!(red = rgb.red, green = rgb.green, blue = rgb.blue, "status light initialised");
        Ok(Self { pins: Some(pins) })
    }

    pub(crate) fn set(&mut self, status: Status) {
        if let Some(pins) = self.pins.as_mut() {
            for (pin, on) in pins.iter_mut().zip(status.channels()) {
                if on {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        }
        tracing::info!(%status, color = format!("{:06x}", status.color()), "status light");
    }
}

// ---------------------------------------------------------------------------
// In-memory status light
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct StatusLight {
    wired: bool,
    #[cfg(test)]
    pub(crate) history: Vec<Status>,
}

#[cfg(not(feature = "gpio"))]
impl StatusLight {
    pub(crate) fn new(config: &PinConfig) -> Result<Self> {
        if let Some(rgb) = config.status_led {
            tracing::info!(
                red = rgb.red,
                green = rgb.green,
                blue = rgb.blue,
                "[mock-gpio] status light registered (not wired)"
            );
        }
        Ok(Self {
            wired: config.status_led.is_some(),
            #[cfg(test)]
            history: Vec::new(),
        })
    }

    pub(crate) fn set(&mut self, status: Status) {
        #[cfg(test)]
        self.history.push(status);
        tracing::info!(
            %status,
            color = format!("{:06x}", status.color()),
            wired = self.wired,
            "[mock-gpio] status light"
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
