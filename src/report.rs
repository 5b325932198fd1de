use crate::device::ReplaySummary;
use crate::orchestrator::RunSummary;
use crate::stats::StatsSnapshot;

/// Presentation sink for snapshots and summaries. Emits through `tracing`
/// only; cadence is explicit configuration, not module state.
pub struct Reporter {
    report_every: usize,
}

impl Reporter {
    pub fn new(report_every: usize) -> Self {
        Self {
            report_every: report_every.max(1),
        }
    }

    pub fn report_every(&self) -> usize {
        self.report_every
    }

    pub fn progress(&self, sent: usize, total: usize, stats: &StatsSnapshot) {
        let percent = if total == 0 {
            100.0
        } else {
            sent as f64 / total as f64 * 100.0
        };
        tracing::info!(
            device = %stats.device_id,
            name = %stats.device_name,
            sent,
            total,
            progress_percent = percent,
            current_w = stats.current_power,
            avg_w = stats.avg_power,
            load = stats.power_ratio,
            window = stats.recent_powers.len(),
            "replay progress"
        );
    }

    pub fn device_summary(&self, summary: &ReplaySummary) {
        tracing::info!(
            device = %summary.device_id,
            name = %summary.device_name,
            records = summary.records,
            messages = summary.stats.message_count,
            avg_w = summary.stats.avg_power,
            max_w = summary.stats.max_power,
            min_w = summary.stats.min_power,
            elapsed_s = summary.elapsed.as_secs_f64(),
            outcome = ?summary.outcome,
            "device replay finished"
        );
    }

    pub fn run_summary(&self, summary: &RunSummary) {
        tracing::info!(
            devices = summary.reports.len(),
            total_processed = summary.total_processed,
            interrupted = summary.interrupted,
            "simulation complete"
        );
        for report in &summary.reports {
            let Some(aggregate) = &report.aggregate else {
                tracing::info!(
                    device = %report.summary.device_id,
                    processed = report.processed_count,
                    "device totals (no messages reached the application layer)"
                );
                continue;
            };
            tracing::info!(
                device = %report.summary.device_id,
                messages = aggregate.message_count,
                avg_w = aggregate.avg_power(),
                max_w = aggregate.max_power,
                min_w = aggregate.min_power,
                "device totals"
            );
        }
    }
}
