//! MQTT link: network wait, session establishment, inbound forwarding and
//! publishing.
//!
//! The rumqttc event loop runs as a task on the same current-thread runtime
//! as the control loop. It owns no controller state; it only forwards inbound
//! publishes (and the first fatal error) through a bounded channel, which the
//! control loop drains one message per iteration.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::telemetry::Publisher;

/// Capacity of rumqttc's outgoing request queue.
const REQUEST_CAPACITY: usize = 16;
/// Inbound messages buffered while the control loop is busy (e.g. during the
/// start sequence).
const INBOUND_CAPACITY: usize = 16;
const NETWORK_RETRY: Duration = Duration::from_millis(500);
/// Log every Nth failed network probe so a long outage doesn't flood the log.
const NETWORK_LOG_EVERY: u64 = 20;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Inbound {
    Message { topic: String, payload: Vec<u8> },
    /// Nothing arrived within the wait.
    Idle,
    /// Unrecoverable transport failure.
    Lost(anyhow::Error),
}

/// What the control loop needs from the pub/sub session.
pub(crate) trait Transport: Publisher {
    /// Wait at most `wait` for one inbound message.
    async fn next_inbound(&mut self, wait: Duration) -> Inbound;
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

pub(crate) struct Link {
    client: AsyncClient,
    inbound: mpsc::Receiver<Inbound>,
    driver: JoinHandle<()>,
}

/// Block until the broker host resolves. Retries forever; there is no overall
/// bound on how long the network may take to come up.
pub(crate) async fn wait_for_network(host: &str, port: u16) {
    let mut attempts: u64 = 0;
    loop {
        match lookup_host((host, port)).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    info!(%addr, attempts, "network ready");
                    return;
                }
            }
            Err(e) => {
                if attempts % NETWORK_LOG_EVERY == 0 {
                    warn!(host, attempts, "waiting for network: {e}");
                }
            }
        }
        attempts += 1;
        sleep(NETWORK_RETRY).await;
    }
}

/// Open the MQTT session and subscribe to `command_topic`. Any failure here
/// is fatal; the session is not retried. Call after [`wait_for_network`].
pub(crate) async fn connect(broker: &BrokerConfig, command_topic: &str) -> Result<Link> {
    let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_sec));
    options.set_credentials(&broker.username, &broker.password);

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    client
        .subscribe(command_topic, QoS::AtLeastOnce)
        .await
        .context("failed to queue subscribe")?;

    let limit = Duration::from_secs(broker.connect_timeout_sec);
    timeout(limit, establish(&mut eventloop))
        .await
        .with_context(|| {
            format!(
                "no session with {}:{} within {}s",
                broker.host, broker.port, broker.connect_timeout_sec
            )
        })??;

    info!(
        host = %broker.host,
        port = broker.port,
        client_id = %broker.client_id,
        topic = command_topic,
        "mqtt connected and subscribed"
    );

    let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
    let driver = tokio::spawn(drive(eventloop, tx));

    Ok(Link {
        client,
        inbound,
        driver,
    })
}

/// Poll until the broker has acknowledged both the connection and the
/// subscription.
async fn establish(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await.context("mqtt session failed")? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!(code = ?ack.code, "connack");
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure))
                {
                    bail!("broker rejected the command subscription");
                }
                return Ok(());
            }
            _ => {}
        }
    }
}

/// Forward inbound publishes until the connection fails or the receiver is
/// dropped.
async fn drive(mut eventloop: EventLoop, tx: mpsc::Sender<Inbound>) {
    loop {
        let inbound = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => Inbound::Message {
                topic: p.topic,
                payload: p.payload.to_vec(),
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                Inbound::Lost(anyhow!("broker closed the session"))
            }
            Ok(_) => continue,
            Err(e) => Inbound::Lost(anyhow::Error::new(e).context("mqtt connection lost")),
        };

        let fatal = matches!(inbound, Inbound::Lost(_));
        if tx.send(inbound).await.is_err() || fatal {
            return;
        }
    }
}

impl Link {
    /// Close the session: send DISCONNECT if the event loop is still running,
    /// then stop it.
    pub(crate) async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect not sent: {e}");
        }
        if !self.driver.is_finished() {
            // Give the event loop a moment to flush the DISCONNECT.
            let _ = timeout(Duration::from_millis(500), recv_until_closed(self.inbound)).await;
        }
        self.driver.abort();
        info!("mqtt session closed");
    }
}

async fn recv_until_closed(mut inbound: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = inbound.recv().await {
        if let Inbound::Lost(_) = inbound {
            return;
        }
    }
}

impl Publisher for Link {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .context("publish not queued")
    }
}

impl Transport for Link {
    async fn next_inbound(&mut self, wait: Duration) -> Inbound {
        match timeout(wait, self.inbound.recv()).await {
            Err(_) => Inbound::Idle,
            Ok(Some(inbound)) => inbound,
            Ok(None) => Inbound::Lost(anyhow!("mqtt event loop stopped")),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const COMMAND_TOPIC: &str = "alice/feeds/poweron";

    /// A link whose event loop is never polled: publishes accumulate in the
    /// request queue, inbound messages come from the returned sender.
    fn test_link(capacity: usize) -> (Link, mpsc::Sender<Inbound>, EventLoop) {
        let opts = MqttOptions::new("test-link", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(opts, capacity);
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let driver = tokio::spawn(async {});
        (
            Link {
                client,
                inbound,
                driver,
            },
            tx,
            eventloop,
        )
    }

    // -- next_inbound -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn next_inbound_idle_after_wait() {
        let (mut link, _tx, _el) = test_link(4);
        let before = tokio::time::Instant::now();
        let inbound = link.next_inbound(Duration::from_millis(50)).await;
        assert!(matches!(inbound, Inbound::Idle));
        assert!(before.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn next_inbound_returns_forwarded_message() {
        let (mut link, tx, _el) = test_link(4);
        tx.send(Inbound::Message {
            topic: "alice/feeds/poweron".into(),
            payload: b"ON".to_vec(),
        })
        .await
        .unwrap();

        match link.next_inbound(Duration::from_millis(50)).await {
            Inbound::Message { topic, payload } => {
                assert_eq!(topic, "alice/feeds/poweron");
                assert_eq!(payload, b"ON");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_inbound_lost_when_event_loop_gone() {
        let (mut link, tx, _el) = test_link(4);
        drop(tx);
        let inbound = link.next_inbound(Duration::from_millis(50)).await;
        assert!(matches!(inbound, Inbound::Lost(_)));
    }

    #[tokio::test]
    async fn next_inbound_passes_fatal_error_through() {
        let (mut link, tx, _el) = test_link(4);
        tx.send(Inbound::Lost(anyhow!("boom"))).await.unwrap();
        match link.next_inbound(Duration::from_millis(50)).await {
            Inbound::Lost(e) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected lost, got {other:?}"),
        }
    }

    // -- publish --------------------------------------------------------------

    #[tokio::test]
    async fn publish_queues_without_blocking() {
        let (mut link, _tx, _el) = test_link(4);
        link.publish("alice/feeds/water", "1").unwrap();
    }

    #[tokio::test]
    async fn publish_fails_when_queue_full() {
        let (mut link, _tx, _el) = test_link(2);
        link.publish("alice/feeds/water", "1").unwrap();
        link.publish("alice/feeds/water", "0").unwrap();
        assert!(link.publish("alice/feeds/water", "1").is_err());
    }

    // -- Local broker ---------------------------------------------------------

    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;
    const DISCONNECT: u8 = 14;
    const SUBACK_QOS1: u8 = 0x01;
    const SUBACK_FAILURE: u8 = 0x80;

    fn local_broker(port: u16, connect_timeout_sec: u64) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".into(),
            port,
            client_id: "brewer-test".into(),
            username: "alice".into(),
            password: "secret".into(),
            keep_alive_sec: 30,
            connect_timeout_sec,
        }
    }

    async fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Read one MQTT control packet; returns its type and variable part.
    async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();
        (header >> 4, body)
    }

    /// CONNECT → CONNACK(`connack_code`), then SUBSCRIBE → SUBACK(`suback_code`).
    async fn handshake(stream: &mut TcpStream, connack_code: u8, suback_code: u8) {
        let (kind, _) = read_packet(stream).await;
        assert_eq!(kind, CONNECT);
        stream
            .write_all(&[0x20, 0x02, 0x00, connack_code])
            .await
            .unwrap();
        if connack_code != 0 {
            return;
        }
        let (kind, body) = read_packet(stream).await;
        assert_eq!(kind, SUBSCRIBE);
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], suback_code])
            .await
            .unwrap();
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    // -- Session --------------------------------------------------------------

    #[tokio::test]
    async fn connect_then_forward_command() {
        let (listener, port) = listen().await;
        let (done_tx, done_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            handshake(&mut stream, 0x00, SUBACK_QOS1).await;
            stream
                .write_all(&publish_packet(COMMAND_TOPIC, b"ON"))
                .await
                .unwrap();
            let _ = done_rx.await;
        });

        let mut link = connect(&local_broker(port, 5), COMMAND_TOPIC).await.unwrap();

        match link.next_inbound(Duration::from_secs(5)).await {
            Inbound::Message { topic, payload } => {
                assert_eq!(topic, COMMAND_TOPIC);
                assert_eq!(payload, b"ON");
            }
            other => panic!("expected message, got {other:?}"),
        }
        drop(done_tx);
    }

    #[tokio::test]
    async fn broker_dropping_socket_is_fatal() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            handshake(&mut stream, 0x00, SUBACK_QOS1).await;
        });

        let mut link = connect(&local_broker(port, 5), COMMAND_TOPIC).await.unwrap();

        match link.next_inbound(Duration::from_secs(5)).await {
            Inbound::Lost(e) => assert!(format!("{e:#}").contains("mqtt connection lost")),
            other => panic!("expected lost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drive_forwards_lost_when_socket_closes() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let opts = MqttOptions::new("brewer-test", "127.0.0.1", port);
        let (_client, eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);

        timeout(Duration::from_secs(5), drive(eventloop, tx))
            .await
            .expect("drive should return once the connection fails");

        assert!(matches!(rx.recv().await, Some(Inbound::Lost(_))));
        assert!(rx.recv().await.is_none(), "nothing forwarded after loss");
    }

    #[tokio::test]
    async fn connect_times_out_without_connack() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(30)).await;
        });

        let started = Instant::now();
        let Err(err) = connect(&local_broker(port, 1), COMMAND_TOPIC).await else {
            panic!("connect succeeded without a CONNACK");
        };

        assert!(
            format!("{err:#}").contains("within 1s"),
            "unexpected error: {err:#}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn connect_fails_when_broker_refuses_login() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // 0x05: not authorized
            handshake(&mut stream, 0x05, SUBACK_QOS1).await;
        });

        let Err(err) = connect(&local_broker(port, 5), COMMAND_TOPIC).await else {
            panic!("connect succeeded with a refused CONNACK");
        };
        assert!(format!("{err:#}").contains("mqtt session failed"), "{err:#}");
    }

    #[tokio::test]
    async fn connect_fails_when_subscription_rejected() {
        let (listener, port) = listen().await;
        let (done_tx, done_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            handshake(&mut stream, 0x00, SUBACK_FAILURE).await;
            let _ = done_rx.await;
        });

        let Err(err) = connect(&local_broker(port, 5), COMMAND_TOPIC).await else {
            panic!("connect succeeded with a failed SUBACK");
        };
        assert!(format!("{err:#}").contains("rejected the command subscription"));
        drop(done_tx);
    }

    #[tokio::test]
    async fn close_sends_disconnect() {
        let (listener, port) = listen().await;
        let (seen_tx, seen_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            handshake(&mut stream, 0x00, SUBACK_QOS1).await;
            let (kind, _) = read_packet(&mut stream).await;
            let _ = seen_tx.send(kind);
        });

        let link = connect(&local_broker(port, 5), COMMAND_TOPIC).await.unwrap();
        link.close().await;

        let kind = timeout(Duration::from_secs(5), seen_rx).await.unwrap().unwrap();
        assert_eq!(kind, DISCONNECT);
    }

    // -- network wait ---------------------------------------------------------

    #[tokio::test]
    async fn wait_for_network_returns_for_literal_address() {
        timeout(Duration::from_secs(5), wait_for_network("127.0.0.1", 1883))
            .await
            .expect("loopback address should resolve immediately");
    }
}
