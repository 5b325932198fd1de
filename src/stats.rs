use std::collections::VecDeque;

/// Sliding window of the most recent power values kept for visualization.
pub const RECENT_WINDOW: usize = 20;

/// Running statistics for one device's replay. Mutated only through
/// `add_data`; readable at any time.
#[derive(Debug)]
pub struct LiveStats {
    device_id: String,
    device_name: String,
    message_count: u64,
    total_power: f64,
    max_power: f64,
    min_power: f64,
    current_power: f64,
    recent_powers: VecDeque<f64>,
}

impl LiveStats {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            message_count: 0,
            total_power: 0.0,
            max_power: 0.0,
            // +inf so the first reading always becomes the minimum.
            min_power: f64::INFINITY,
            current_power: 0.0,
            recent_powers: VecDeque::with_capacity(RECENT_WINDOW),
        }
    }

    pub fn add_data(&mut self, power: f64) {
        self.message_count += 1;
        self.total_power += power;
        self.max_power = self.max_power.max(power);
        self.min_power = self.min_power.min(power);
        self.current_power = power;
        if self.recent_powers.len() == RECENT_WINDOW {
            self.recent_powers.pop_front();
        }
        self.recent_powers.push_back(power);
    }

    pub fn avg_power(&self) -> f64 {
        if self.message_count == 0 {
            0.0
        } else {
            self.total_power / self.message_count as f64
        }
    }

    /// Ratio of current to max power in [0, 1]; the presentation layer
    /// renders this as a bar.
    pub fn power_ratio(&self) -> f64 {
        if self.max_power == 0.0 {
            return 0.0;
        }
        (self.current_power / self.max_power).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            message_count: self.message_count,
            avg_power: self.avg_power(),
            max_power: self.max_power,
            min_power: self.min_power,
            current_power: self.current_power,
            power_ratio: self.power_ratio(),
            recent_powers: self.recent_powers.iter().copied().collect(),
        }
    }
}

/// Plain-data copy of the aggregate state handed to reporting collaborators.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub device_id: String,
    pub device_name: String,
    pub message_count: u64,
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    pub current_power: f64,
    pub power_ratio: f64,
    pub recent_powers: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_match_sequence() {
        let mut stats = LiveStats::new("fridge_207", "Fridge");
        for power in [100.0, 150.0, 50.0] {
            stats.add_data(power);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.message_count, 3);
        assert_eq!(snap.max_power, 150.0);
        assert_eq!(snap.min_power, 50.0);
        assert_eq!(snap.current_power, 50.0);
        assert_eq!(snap.avg_power, 100.0);
    }

    #[test]
    fn empty_stats_report_zero_average() {
        let stats = LiveStats::new("fridge_207", "Fridge");
        assert_eq!(stats.avg_power(), 0.0);
        assert_eq!(stats.snapshot().message_count, 0);
        assert_eq!(stats.power_ratio(), 0.0);
    }

    #[test]
    fn min_le_current_le_max() {
        let mut stats = LiveStats::new("dev", "dev");
        for power in [3.0, -2.0, 7.5, 0.0, 7.5] {
            stats.add_data(power);
            let snap = stats.snapshot();
            assert!(snap.min_power <= snap.current_power);
            assert!(snap.current_power <= snap.max_power);
        }
    }

    #[test]
    fn recent_window_is_bounded_and_ordered() {
        let mut stats = LiveStats::new("dev", "dev");
        for i in 0..50 {
            stats.add_data(i as f64);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.recent_powers.len(), RECENT_WINDOW);
        let expected: Vec<f64> = (30..50).map(|i| i as f64).collect();
        assert_eq!(snap.recent_powers, expected);
    }

    #[test]
    fn recent_window_keeps_all_when_short() {
        let mut stats = LiveStats::new("dev", "dev");
        for power in [1.0, 2.0, 3.0] {
            stats.add_data(power);
        }
        assert_eq!(stats.snapshot().recent_powers, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn power_ratio_clamped() {
        let mut stats = LiveStats::new("dev", "dev");
        stats.add_data(-5.0);
        // max stays 0 for an all-negative sequence
        assert_eq!(stats.power_ratio(), 0.0);
        stats.add_data(10.0);
        assert_eq!(stats.power_ratio(), 1.0);
        stats.add_data(5.0);
        assert_eq!(stats.power_ratio(), 0.5);
    }
}
