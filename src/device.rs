use crate::config::DeviceConfig;
use crate::consumer::SharedConsumer;
use crate::reading::{power_topic, Reading};
use crate::report::Reporter;
use crate::source::SourceRecord;
use crate::stats::{LiveStats, StatsSnapshot};
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    /// Cancelled between iterations; the statistics collected so far are
    /// valid and carried in the summary.
    Interrupted,
}

#[derive(Debug)]
pub struct ReplaySummary {
    pub device_id: String,
    pub device_name: String,
    pub records: usize,
    pub outcome: ReplayOutcome,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
}

/// Replays one device's recorded readings at a target rate, publishing each
/// over the transport and, in simulated mode, handing it straight to the
/// application layer.
pub struct DeviceSimulator {
    device: DeviceConfig,
    publish_rate: f64,
    qos: u8,
}

impl DeviceSimulator {
    /// `publish_rate` must be > 0; config parsing rejects anything else
    /// before a simulator is built.
    pub fn new(device: DeviceConfig, publish_rate: f64, qos: u8) -> Self {
        Self {
            device,
            publish_rate,
            qos,
        }
    }

    pub async fn run(
        &self,
        records: &[SourceRecord],
        transport: &Transport,
        consumer: &SharedConsumer,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> ReplaySummary {
        let total = records.len();
        let topic = power_topic(&self.device.topic_prefix, &self.device.device_id);
        let delay = Duration::from_secs_f64(1.0 / self.publish_rate);
        let mut stats = LiveStats::new(&self.device.device_id, &self.device.name);
        let mut outcome = ReplayOutcome::Completed;
        let started = Instant::now();

        tracing::info!(
            device = %self.device.device_id,
            records = total,
            rate = self.publish_rate,
            topic = %topic,
            "starting replay"
        );

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome = ReplayOutcome::Interrupted;
                break;
            }

            let reading = Reading {
                device_id: self.device.device_id.clone(),
                timestamp: record.timestamp,
                power: record.power,
            };
            stats.add_data(record.power);

            if let Err(err) = transport.publish(&topic, &reading, self.qos, false).await {
                tracing::warn!(error = %err, topic = %topic, "publish failed");
            }

            if transport.is_simulated() {
                // No broker delivery to wait for in this mode; hand the
                // reading to the application layer directly.
                if let Ok(mut guard) = consumer.lock() {
                    guard.process_message(&topic, reading);
                }
            }

            let sent = index + 1;
            if sent % reporter.report_every() == 0 || sent == total {
                reporter.progress(sent, total, &stats.snapshot());
            }

            // Rate throttle: the only intentional suspension in the loop.
            tokio::select! {
                _ = cancel.cancelled() => {
                    outcome = ReplayOutcome::Interrupted;
                    break;
                }
                _ = sleep(delay) => {}
            }
        }

        ReplaySummary {
            device_id: self.device.device_id.clone(),
            device_name: self.device.name.clone(),
            records: total,
            outcome,
            stats: stats.snapshot(),
            elapsed: started.elapsed(),
        }
    }
}
