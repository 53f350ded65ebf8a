//! TOML config file loading, environment overrides, and validation for the
//! broker session, topics, loop timing and GPIO wiring.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::relay::Relay;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub pins: PinConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub client_id: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_keep_alive_sec")]
    pub keep_alive_sec: u64,
    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
}

/// Feed names. `command` / `water` override the `<namespace>/feeds/...`
/// defaults when set.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    pub namespace: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub water: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_water_check_interval_ms")]
    pub water_check_interval_ms: u64,
    #[serde(default = "default_water_send_interval_ms")]
    pub water_send_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// BCM pin numbers for the relay board, the water-level sensor and the
/// optional status light.
#[derive(Debug, Clone, Deserialize)]
pub struct PinConfig {
    #[serde(default = "default_power_a")]
    pub power_a: u8,
    #[serde(default = "default_power_b")]
    pub power_b: u8,
    #[serde(default = "default_pump_a")]
    pub pump_a: u8,
    #[serde(default = "default_pump_b")]
    pub pump_b: u8,
    #[serde(default = "default_water_sensor")]
    pub water_sensor: u8,
    #[serde(default = "default_active_low")]
    pub active_low: bool,
    /// Common-cathode RGB LED showing connectivity. Absent means no light.
    #[serde(default)]
    pub status_led: Option<RgbPins>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RgbPins {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

fn default_port() -> u16 {
    1883
}
fn default_keep_alive_sec() -> u64 {
    30
}
fn default_connect_timeout_sec() -> u64 {
    5
}
fn default_water_check_interval_ms() -> u64 {
    1000
}
fn default_water_send_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_power_a() -> u8 {
    20
}
fn default_power_b() -> u8 {
    21
}
fn default_pump_a() -> u8 {
    22
}
fn default_pump_b() -> u8 {
    23
}
fn default_water_sensor() -> u8 {
    16
}
fn default_active_low() -> bool {
    true
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            water_check_interval_ms: default_water_check_interval_ms(),
            water_send_interval_ms: default_water_send_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            power_a: default_power_a(),
            power_b: default_power_b(),
            pump_a: default_pump_a(),
            pump_b: default_pump_b(),
            water_sensor: default_water_sensor(),
            active_low: default_active_low(),
            status_led: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl TopicConfig {
    /// Topic carrying `ON` / `OFF` commands.
    pub fn command_topic(&self) -> String {
        self.command
            .clone()
            .unwrap_or_else(|| format!("{}/feeds/poweron", self.namespace))
    }

    /// Topic the water level is published on.
    pub fn water_topic(&self) -> String {
        self.water
            .clone()
            .unwrap_or_else(|| format!("{}/feeds/water", self.namespace))
    }
}

impl TimingConfig {
    pub fn water_check_interval(&self) -> Duration {
        Duration::from_millis(self.water_check_interval_ms)
    }

    pub fn water_send_interval(&self) -> Duration {
        Duration::from_millis(self.water_send_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl PinConfig {
    pub(crate) fn relay_pin(&self, relay: Relay) -> u8 {
        match relay {
            Relay::PowerA => self.power_a,
            Relay::PowerB => self.power_b,
            Relay::PumpA => self.pump_a,
            Relay::PumpB => self.pump_b,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_*` overrides. `lookup` returns the value of an environment
    /// variable, or `None` when unset.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.broker.port = port
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a valid port: {port:?}"))?;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.broker.client_id = client_id;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.broker.username = username;
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.broker.password = password;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the 40-pin header available for general use. GPIO 0-1
/// are reserved for the ID EEPROM; GPIO 28+ are not exposed.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole config. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_broker(&mut errors);
        self.validate_topics(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_broker(&self, errors: &mut Vec<String>) {
        let b = &self.broker;
        if b.host.trim().is_empty() {
            errors.push("broker: host is empty".to_string());
        }
        if b.port == 0 {
            errors.push("broker: port must be non-zero".to_string());
        }
        if b.client_id.trim().is_empty() {
            errors.push("broker: client_id is empty".to_string());
        }
        if b.username.trim().is_empty() {
            errors.push("broker: username is empty".to_string());
        }
        if b.keep_alive_sec == 0 {
            errors.push("broker: keep_alive_sec must be positive".to_string());
        } else if b.keep_alive_sec > u64::from(u16::MAX) {
            errors.push(format!(
                "broker: keep_alive_sec {} exceeds the MQTT maximum of {}",
                b.keep_alive_sec,
                u16::MAX
            ));
        }
        if b.connect_timeout_sec == 0 {
            errors.push("broker: connect_timeout_sec must be positive".to_string());
        }
    }

    fn validate_topics(&self, errors: &mut Vec<String>) {
        if self.topics.namespace.trim().is_empty() {
            errors.push("topics: namespace is empty".to_string());
        }

        for (name, topic) in [
            ("command", self.topics.command_topic()),
            ("water", self.topics.water_topic()),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("topics: {name} topic is empty"));
            } else if topic.contains(['+', '#']) {
                errors.push(format!(
                    "topics: {name} topic '{topic}' must not contain MQTT wildcards"
                ));
            }
        }

        if self.topics.command_topic() == self.topics.water_topic() {
            errors.push("topics: command and water topics must differ".to_string());
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        if t.water_check_interval_ms == 0 {
            errors.push("timing: water_check_interval_ms must be positive".to_string());
        }
        if t.water_send_interval_ms == 0 {
            errors.push("timing: water_send_interval_ms must be positive".to_string());
        }
        if t.poll_interval_ms == 0 {
            errors.push("timing: poll_interval_ms must be positive".to_string());
        }
        if t.water_send_interval_ms < t.water_check_interval_ms {
            errors.push(format!(
                "timing: water_send_interval_ms ({}) is shorter than water_check_interval_ms ({})",
                t.water_send_interval_ms, t.water_check_interval_ms
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let mut seen: HashSet<u8> = HashSet::new();

        let mut named = vec![
            ("power_a", p.power_a),
            ("power_b", p.power_b),
            ("pump_a", p.pump_a),
            ("pump_b", p.pump_b),
            ("water_sensor", p.water_sensor),
        ];
        if let Some(led) = p.status_led {
            named.extend([
                ("status_led.red", led.red),
                ("status_led.green", led.green),
                ("status_led.blue", led.blue),
            ]);
        }

        for (name, pin) in named {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {name} gpio {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("pins: {name} gpio {pin} is already in use"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, apply environment overrides, and
/// validate the result.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        path,
        host = %config.broker.host,
        port = config.broker.port,
        command_topic = %config.topics.command_topic(),
        water_topic = %config.topics.water_topic(),
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
