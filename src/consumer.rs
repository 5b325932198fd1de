use crate::reading::{topic_matches, Reading};
use crate::transport::InboundMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A consumer registered behind a lock so the same type serves both the
/// inline hand-off in simulated mode and the dispatcher in networked mode.
/// Delivery is single-threaded per run either way.
pub type SharedConsumer = Arc<Mutex<Consumer>>;

/// Running aggregate for one device as seen from the application layer,
/// created lazily on the first message for that device and never removed.
#[derive(Debug, Clone)]
pub struct DeviceAggregate {
    pub message_count: u64,
    pub total_power: f64,
    pub max_power: f64,
    pub min_power: f64,
}

impl DeviceAggregate {
    fn new() -> Self {
        Self {
            message_count: 0,
            total_power: 0.0,
            max_power: 0.0,
            min_power: f64::INFINITY,
        }
    }

    pub fn avg_power(&self) -> f64 {
        if self.message_count == 0 {
            0.0
        } else {
            self.total_power / self.message_count as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub topic: String,
    pub reading: Reading,
}

/// Application layer: decodes transported messages and folds them into
/// per-device aggregates plus an append-only received log.
#[derive(Debug)]
pub struct Consumer {
    topic_filter: String,
    processed_count: u64,
    device_stats: HashMap<String, DeviceAggregate>,
    received: Vec<ReceivedMessage>,
}

impl Consumer {
    pub fn new(topic_filter: impl Into<String>) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            processed_count: 0,
            device_stats: HashMap::new(),
            received: Vec::new(),
        }
    }

    pub fn shared(topic_filter: impl Into<String>) -> SharedConsumer {
        Arc::new(Mutex::new(Self::new(topic_filter)))
    }

    pub fn process_message(&mut self, topic: &str, reading: Reading) {
        let stats = self
            .device_stats
            .entry(reading.device_id.clone())
            .or_insert_with(DeviceAggregate::new);
        stats.message_count += 1;
        stats.total_power += reading.power;
        stats.max_power = stats.max_power.max(reading.power);
        stats.min_power = stats.min_power.min(reading.power);

        self.received.push(ReceivedMessage {
            topic: topic.to_string(),
            reading,
        });
        self.processed_count += 1;
    }

    /// Entry point for raw transported bytes. Non-matching topics are
    /// ignored; malformed payloads are logged and dropped, never fatal.
    pub fn handle_payload(&mut self, topic: &str, payload: &[u8]) {
        if !topic_matches(&self.topic_filter, topic) {
            return;
        }
        match Reading::decode(payload) {
            Ok(reading) => self.process_message(topic, reading),
            Err(err) => {
                tracing::warn!(error = %err, topic, "failed to decode payload; dropping message");
            }
        }
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    pub fn device_stats(&self) -> &HashMap<String, DeviceAggregate> {
        &self.device_stats
    }

    pub fn stats_for(&self, device_id: &str) -> Option<DeviceAggregate> {
        self.device_stats.get(device_id).cloned()
    }

    pub fn received_messages(&self) -> &[ReceivedMessage] {
        &self.received
    }
}

/// Drain the transport's inbound channel and fan every message out to the
/// registered consumers; each consumer applies its own topic filter. Exits
/// when the transport side closes the channel.
pub fn spawn_dispatcher(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    consumers: Arc<Mutex<Vec<SharedConsumer>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound_rx.recv().await {
            let targets: Vec<SharedConsumer> = match consumers.lock() {
                Ok(guard) => guard.clone(),
                Err(_) => break,
            };
            for consumer in targets {
                if let Ok(mut guard) = consumer.lock() {
                    guard.handle_payload(&message.topic, &message.payload);
                }
            }
        }
        tracing::debug!("inbound channel closed; dispatcher exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::power_topic;
    use chrono::Utc;

    fn reading(device_id: &str, power: f64) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            timestamp: Utc::now(),
            power,
        }
    }

    #[test]
    fn aggregates_per_device() {
        let mut consumer = Consumer::new("home/appliance/+/power");
        let topic = power_topic("home/appliance", "fridge_207");
        for power in [100.0, 150.0, 50.0] {
            consumer.process_message(&topic, reading("fridge_207", power));
        }
        consumer.process_message(
            &power_topic("home/appliance", "vacuum_254"),
            reading("vacuum_254", 700.0),
        );

        assert_eq!(consumer.processed_count(), 4);
        assert_eq!(consumer.received_messages().len(), 4);

        let fridge = consumer.stats_for("fridge_207").expect("fridge stats");
        assert_eq!(fridge.message_count, 3);
        assert_eq!(fridge.max_power, 150.0);
        assert_eq!(fridge.min_power, 50.0);
        assert_eq!(fridge.avg_power(), 100.0);

        let vacuum = consumer.stats_for("vacuum_254").expect("vacuum stats");
        assert_eq!(vacuum.message_count, 1);
    }

    #[test]
    fn malformed_payload_dropped() {
        let mut consumer = Consumer::new("home/appliance/+/power");
        consumer.handle_payload("home/appliance/fridge_207/power", b"{not json");
        assert_eq!(consumer.processed_count(), 0);
        assert!(consumer.stats_for("fridge_207").is_none());
    }

    #[test]
    fn non_matching_topic_ignored() {
        let mut consumer = Consumer::new("home/appliance/+/power");
        let payload = reading("fridge_207", 10.0).encode().unwrap();
        consumer.handle_payload("home/appliance/fridge_207/status/power", &payload);
        assert_eq!(consumer.processed_count(), 0);
    }

    #[tokio::test]
    async fn dispatcher_routes_to_registered_consumers() {
        let (tx, rx) = mpsc::channel(8);
        let consumers = Arc::new(Mutex::new(Vec::new()));
        let consumer = Consumer::shared("home/appliance/+/power");
        consumers.lock().unwrap().push(consumer.clone());

        let handle = spawn_dispatcher(rx, consumers);

        let topic = power_topic("home/appliance", "fridge_207");
        let payload = reading("fridge_207", 42.0).encode().unwrap();
        tx.send(InboundMessage {
            topic: topic.clone(),
            payload,
        })
        .await
        .unwrap();
        tx.send(InboundMessage {
            topic: "home/appliance/fridge_207/status".to_string(),
            payload: b"online".to_vec(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let guard = consumer.lock().unwrap();
        assert_eq!(guard.processed_count(), 1);
        assert_eq!(guard.received_messages()[0].topic, topic);
    }

    #[tokio::test]
    async fn dispatcher_skips_deregistered_consumers() {
        let (tx, rx) = mpsc::channel(8);
        let consumers = Arc::new(Mutex::new(Vec::new()));
        let consumer = Consumer::shared("home/appliance/+/power");
        consumers.lock().unwrap().push(consumer.clone());

        let handle = spawn_dispatcher(rx, consumers.clone());

        tx.send(InboundMessage {
            topic: power_topic("home/appliance", "fridge_207"),
            payload: reading("fridge_207", 1.0).encode().unwrap(),
        })
        .await
        .unwrap();
        while consumer.lock().unwrap().processed_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        consumers
            .lock()
            .unwrap()
            .retain(|registered| !Arc::ptr_eq(registered, &consumer));
        tx.send(InboundMessage {
            topic: power_topic("home/appliance", "vacuum_254"),
            payload: reading("vacuum_254", 700.0).encode().unwrap(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        // Only the message delivered while registered was recorded.
        assert_eq!(consumer.lock().unwrap().processed_count(), 1);
    }
}
