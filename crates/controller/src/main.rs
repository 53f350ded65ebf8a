mod command;
mod config;
mod controller;
mod indicator;
mod mqtt;
mod relay;
mod sensor;
mod sequencer;
mod state;
mod telemetry;

#[cfg(all(test, not(feature = "gpio")))]
mod test_support;

use anyhow::Result;
use std::env;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use controller::Controller;
use indicator::{Status, StatusLight};
use relay::RelayBoard;
use sensor::WaterSensor;
use sequencer::RelaySequencer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Hardware ────────────────────────────────────────────────────
    let mut light = StatusLight::new(&cfg.pins)?;
    light.set(Status::Offline);
    // Relays come up released; the machine stays off until an ON command.
    let board = RelayBoard::new(&cfg.pins)?;
    let mut sensor = WaterSensor::new(cfg.pins.water_sensor)?;
    info!(
        water_present = sensor.sample().water_present,
        "hardware ready"
    );

    // ── CONNECTING ──────────────────────────────────────────────────
    let command_topic = cfg.topics.command_topic();
    info!(host = %cfg.broker.host, port = cfg.broker.port, "connecting");
    mqtt::wait_for_network(&cfg.broker.host, cfg.broker.port).await;
    light.set(Status::NetworkUp);
    let mut link = match mqtt::connect(&cfg.broker, &command_topic).await {
        Ok(link) => link,
        Err(e) => {
            light.set(Status::Stopped);
            return Err(e);
        }
    };

    // ── RUNNING ─────────────────────────────────────────────────────
    light.set(Status::Online);
    let mut controller = Controller::new(&cfg, RelaySequencer::new(board), sensor, Instant::now());
    let fatal = controller.run(&mut link).await;
    error!("transport failed: {fatal:#}");

    // ── SHUTDOWN ────────────────────────────────────────────────────
    controller.shutdown();
    link.close().await;
    light.set(Status::Stopped);
    info!("network released, exiting");

    Err(fatal.context("controller stopped"))
}
