use crate::config::Config;
use crate::reading::Reading;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("not connected to broker")]
    NotConnected,
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(#[source] rumqttc::ClientError),
    #[error("subscribe failed: {0}")]
    Subscribe(#[source] rumqttc::ClientError),
}

/// A message delivered by the broker, pushed onto a channel the consumer
/// side drains. Callbacks never run against caller state directly.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe channel selected once at startup. The simulated
/// variant is always logically connected and moves nothing over the
/// network; the device loop hands readings to the consumer itself.
pub enum Transport {
    Simulated,
    Mqtt(MqttTransport),
}

impl Transport {
    pub fn is_simulated(&self) -> bool {
        matches!(self, Transport::Simulated)
    }

    pub async fn publish(
        &self,
        topic: &str,
        reading: &Reading,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        match self {
            Transport::Simulated => Ok(()),
            Transport::Mqtt(transport) => transport.publish(topic, reading, qos, retain).await,
        }
    }

    pub async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), TransportError> {
        match self {
            Transport::Simulated => Ok(()),
            Transport::Mqtt(transport) => transport.subscribe(filter, qos).await,
        }
    }

    pub async fn disconnect(&mut self) {
        if let Transport::Mqtt(transport) = self {
            transport.disconnect().await;
        }
    }
}

/// Broker-backed transport: a rumqttc client plus a spawned poller that
/// drains the event loop, maintains the shared connected flag and forwards
/// incoming publishes to the inbound channel.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    poller: JoinHandle<()>,
}

impl MqttTransport {
    pub fn new(config: &Config, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(config.mqtt_keepalive);
        if let Some(username) = &config.mqtt_username {
            options.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();

        let poller = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            flag.store(true, Ordering::SeqCst);
                            tracing::info!("broker connection acknowledged");
                        } else {
                            flag.store(false, Ordering::SeqCst);
                            tracing::warn!(code = ?ack.code, "broker refused connection");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        flag.store(false, Ordering::SeqCst);
                        tracing::warn!("broker disconnected");
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if inbound_tx.send(message).await.is_err() {
                            // Receiver gone; nothing left to deliver to.
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        flag.store(false, Ordering::SeqCst);
                        tracing::debug!(error = %err, "mqtt event loop error");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            connected,
            poller,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Wait for the asynchronous ConnAck by polling the shared flag in
    /// short steps, bounded by `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let started = tokio::time::Instant::now();
        while !self.is_connected() {
            if started.elapsed() >= timeout {
                return Err(TransportError::ConnectTimeout(timeout));
            }
            sleep(CONNECT_POLL_INTERVAL).await;
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        reading: &Reading,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let payload = reading.encode()?;
        self.client
            .publish(topic, qos_from_level(qos), retain, payload)
            .await
            .map_err(TransportError::Publish)
    }

    pub async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .subscribe(filter, qos_from_level(qos))
            .await
            .map_err(TransportError::Subscribe)
    }

    /// Idempotent; safe to call when the connection never came up.
    pub async fn disconnect(&mut self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.client.disconnect().await;
        }
        self.poller.abort();
    }
}

/// Connect the broker-backed transport, surfacing a timeout as a failure
/// the orchestrator can fall back on.
pub async fn connect_mqtt(
    config: &Config,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Result<MqttTransport, TransportError> {
    tracing::info!(host = %config.mqtt_host, port = config.mqtt_port, "connecting to broker");
    let mut transport = MqttTransport::new(config, inbound_tx);
    if let Err(err) = transport.wait_connected(config.connect_timeout).await {
        transport.disconnect().await;
        return Err(err);
    }
    Ok(transport)
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}
