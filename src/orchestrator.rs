use crate::config::{Config, TransportMode};
use crate::consumer::{spawn_dispatcher, Consumer, DeviceAggregate, SharedConsumer};
use crate::device::{DeviceSimulator, ReplayOutcome, ReplaySummary};
use crate::report::Reporter;
use crate::source::load_records;
use crate::transport::{connect_mqtt, Transport};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const INBOUND_CHANNEL_CAPACITY: usize = 1024;
/// Broker delivery is asynchronous; after a replay finishes we give
/// in-flight messages this long to reach the consumer before snapshotting.
const NETWORK_DRAIN_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct DeviceReport {
    pub summary: ReplaySummary,
    pub processed_count: u64,
    pub aggregate: Option<DeviceAggregate>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<DeviceReport>,
    pub total_processed: u64,
    pub interrupted: bool,
}

/// Run the whole pipeline: pick the transport once, then replay each
/// configured device in sequence against its own consumer and collect the
/// cross-device summary. Cancellation mid-run still reports everything
/// gathered so far.
pub async fn run(
    config: &Config,
    cancel: tokio_util::sync::CancellationToken,
    reporter: &Reporter,
) -> Result<RunSummary> {
    let consumers: Arc<Mutex<Vec<SharedConsumer>>> = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = None;

    let mut transport = match config.transport_mode {
        TransportMode::Simulated => {
            tracing::info!("using simulated transport");
            Transport::Simulated
        }
        TransportMode::Mqtt => {
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
            match connect_mqtt(config, inbound_tx).await {
                Ok(mqtt) => {
                    dispatcher = Some(spawn_dispatcher(inbound_rx, consumers.clone()));
                    Transport::Mqtt(mqtt)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "broker unavailable; falling back to simulated transport");
                    Transport::Simulated
                }
            }
        }
    };

    let mut reports = Vec::new();
    for device in &config.devices {
        if cancel.is_cancelled() {
            break;
        }

        let records = match load_records(&device.data_file, config.sample_size) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, device = %device.device_id, "skipping device");
                continue;
            }
        };

        let filter = format!("{}/+/power", device.topic_prefix);
        let consumer = Consumer::shared(filter.clone());
        if !transport.is_simulated() {
            if let Err(err) = transport.subscribe(&filter, config.qos).await {
                tracing::warn!(error = %err, filter = %filter, "subscribe failed; continuing without broker delivery");
            }
            if let Ok(mut guard) = consumers.lock() {
                guard.push(consumer.clone());
            }
        }

        let simulator = DeviceSimulator::new(device.clone(), config.publish_rate, config.qos);
        let summary = simulator
            .run(&records, &transport, &consumer, reporter, &cancel)
            .await;

        if !transport.is_simulated() {
            tokio::time::sleep(NETWORK_DRAIN_WAIT).await;
        }

        reporter.device_summary(&summary);
        let (processed_count, aggregate) = match consumer.lock() {
            Ok(guard) => {
                tracing::debug!(
                    device = %device.device_id,
                    devices_seen = guard.device_stats().len(),
                    received = guard.received_messages().len(),
                    "consumer snapshot"
                );
                if let Some(last) = guard.received_messages().last() {
                    tracing::debug!(topic = %last.topic, power = last.reading.power, "last received message");
                }
                (guard.processed_count(), guard.stats_for(&device.device_id))
            }
            Err(_) => (0, None),
        };
        if !transport.is_simulated() {
            // This device's replay is over; stop feeding its consumer so
            // later devices' traffic does not grow its received log.
            if let Ok(mut guard) = consumers.lock() {
                guard.retain(|registered| !Arc::ptr_eq(registered, &consumer));
            }
        }
        reports.push(DeviceReport {
            summary,
            processed_count,
            aggregate,
        });
    }

    transport.disconnect().await;
    if let Some(handle) = dispatcher {
        handle.abort();
    }

    let total_processed = reports.iter().map(|report| report.processed_count).sum();
    let interrupted = cancel.is_cancelled()
        || reports
            .iter()
            .any(|report| report.summary.outcome == ReplayOutcome::Interrupted);

    Ok(RunSummary {
        reports,
        total_processed,
        interrupted,
    })
}
