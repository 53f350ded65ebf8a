//! Water-level sensor input. A logical high means water is present.
//!
//! The `gpio` feature reads a real rppal input pin; without it the level is
//! held in memory and defaults to water-present (safe default for bench runs).

use anyhow::Result;
use tokio::time::Instant;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SensorReading {
    pub(crate) water_present: bool,
    pub(crate) sampled_at: Instant,
}

impl SensorReading {
    fn now(water_present: bool) -> Self {
        Self {
            water_present,
            sampled_at: Instant::now(),
        }
    }
}

#[cfg(feature = "gpio")]
pub(crate) struct WaterSensor {
    pin: InputPin,
}

#[cfg(feature = "gpio")]
impl WaterSensor {
    pub(crate) fn new(pin_num: u8) -> Result<Self> {
        let pin = Gpio::new()
            .context("failed to open GPIO")?
            .get(pin_num)
            .with_context(|| format!("failed to claim gpio {pin_num} for water sensor"))?
            .into_input();
        tracing::info!(gpio = pin_num, "water sensor initialised");
        Ok(Self { pin })
    }

    /// Single instantaneous read; never blocks, never fails.
    pub(crate) fn sample(&mut self) -> SensorReading {
        let reading = SensorReading::now(self.pin.is_high());
        tracing::trace!(water_present = reading.water_present, "water sensor sampled");
        reading
    }
}

#[cfg(not(feature = "gpio"))]
pub(crate) struct WaterSensor {
    level: bool,
    #[cfg(test)]
    pub(crate) samples: usize,
}

#[cfg(not(feature = "gpio"))]
impl WaterSensor {
    pub(crate) fn new(pin_num: u8) -> Result<Self> {
        tracing::info!(
            gpio = pin_num,
            "[mock-gpio] water sensor registered (not wired, reporting water present)"
        );
        Ok(Self {
            level: true,
            #[cfg(test)]
            samples: 0,
        })
    }

    pub(crate) fn sample(&mut self) -> SensorReading {
        #[cfg(test)]
        {
            self.samples += 1;
        }
        let reading = SensorReading::now(self.level);
        tracing::trace!(
            water_present = reading.water_present,
            "[mock-gpio] water sensor sampled"
        );
        reading
    }

    #[cfg(test)]
    pub(crate) fn set_level(&mut self, water_present: bool) {
        self.level = water_present;
    }
}
