//! In-memory stand-ins for the broker session, shared by unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::Config;
use crate::mqtt::{Inbound, Transport};
use crate::telemetry::Publisher;

pub(crate) fn test_config() -> Config {
    toml::from_str(
        r#"
[broker]
host = "127.0.0.1"
client_id = "brewer-test"
username = "alice"

[topics]
namespace = "alice"
"#,
    )
    .unwrap()
}

/// Records every publish; fails all of them while `fail` is set.
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    pub(crate) sent: Vec<(String, String)>,
    pub(crate) fail: bool,
}

impl RecordingPublisher {
    pub(crate) fn payloads(&self) -> Vec<&str> {
        self.sent.iter().map(|(_, p)| p.as_str()).collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("request queue full"));
        }
        self.sent.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Replays a fixed inbound script, then reports the session lost.
pub(crate) struct ScriptedTransport {
    script: VecDeque<Inbound>,
    pub(crate) publisher: RecordingPublisher,
    pub(crate) polls: usize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Inbound>) -> Self {
        Self {
            script: script.into(),
            publisher: RecordingPublisher::default(),
            polls: 0,
        }
    }
}

impl Publisher for ScriptedTransport {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.publisher.publish(topic, payload)
    }
}

impl Transport for ScriptedTransport {
    async fn next_inbound(&mut self, wait: Duration) -> Inbound {
        self.polls += 1;
        match self.script.pop_front() {
            Some(Inbound::Idle) => {
                tokio::time::sleep(wait).await;
                Inbound::Idle
            }
            Some(inbound) => inbound,
            None => Inbound::Lost(anyhow!("script exhausted")),
        }
    }
}
