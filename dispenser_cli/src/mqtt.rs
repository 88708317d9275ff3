//! MQTT implementation of the core `Channel` over the rumqttc sync client.
//!
//! The sync `Connection` only makes progress while it is iterated, so every
//! `poll()` also flushes queued publishes and keep-alive pings.

use std::time::{Duration, Instant};

use dispenser_config::MqttCfg;
use dispenser_core::DispenserError;
use dispenser_traits::{BoxError, Channel, InboundMessage};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError,
};
use tracing::{debug, info, trace};

/// Wait per `recv_timeout` inside `poll()`; keeps a drain to a few ms.
const POLL_WAIT: Duration = Duration::from_millis(5);
/// Requests buffered between the client handle and the event loop.
const REQUEST_CAP: usize = 32;

pub struct MqttChannel {
    client: Client,
    connection: Connection,
}

impl MqttChannel {
    /// Connect, subscribe to `command_topic` and wait for the broker's
    /// CONNACK. Any failure within `connect_timeout_ms` is a transport error.
    pub fn connect(cfg: &MqttCfg, command_topic: &str) -> Result<Self, DispenserError> {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.broker.clone(), cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_s));
        let (client, mut connection) = Client::new(opts, REQUEST_CAP);

        client
            .subscribe(command_topic, QoS::AtMostOnce)
            .map_err(|e| DispenserError::Transport(format!("subscribe {command_topic}: {e}")))?;

        let deadline = Instant::now() + Duration::from_millis(cfg.connect_timeout_ms);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(DispenserError::Transport(format!(
                    "no CONNACK from {}:{} within {} ms",
                    cfg.broker, cfg.port, cfg.connect_timeout_ms
                )));
            }
            match connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(DispenserError::Transport(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    info!(broker = %cfg.broker, port = cfg.port, topic = command_topic, "mqtt connected");
                    return Ok(Self { client, connection });
                }
                Ok(Ok(ev)) => trace!(?ev, "mqtt event before connack"),
                Ok(Err(e)) => {
                    return Err(DispenserError::Transport(format!(
                        "connect {}:{}: {e}",
                        cfg.broker, cfg.port
                    )));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispenserError::Transport("mqtt event loop stopped".into()));
                }
            }
        }
    }
}

impl Channel for MqttChannel {
    fn poll(&mut self) -> Result<Option<InboundMessage>, BoxError> {
        loop {
            match self.connection.recv_timeout(POLL_WAIT) {
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => {
                    debug!(topic = %p.topic, bytes = p.payload.len(), "mqtt message");
                    return Ok(Some(InboundMessage {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    }));
                }
                Ok(Ok(ev)) => trace!(?ev, "mqtt event"),
                Ok(Err(e)) => return Err(Box::new(e)),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err("mqtt event loop stopped".into());
                }
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BoxError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| Box::new(e) as BoxError)
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.client
            .disconnect()
            .map_err(|e| Box::new(e) as BoxError)?;
        // let the DISCONNECT go out
        let _ = self.connection.recv_timeout(POLL_WAIT);
        info!("mqtt disconnected");
        Ok(())
    }
}
