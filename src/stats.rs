use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::reading::ReceivedReading;
use crate::sequence::{loss_percentage, GapReport, RegressionPolicy, SequenceTracker};

/// Default number of latency samples kept per source
pub const DEFAULT_LATENCY_WINDOW: usize = 1000;

/// Most recent latency samples with a running sum. Once full, the oldest
/// sample is evicted, so the average follows the last `capacity` readings.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<i64>,
    capacity: usize,
    sum: i128,
    min: Option<i64>,
    max: Option<i64>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_LATENCY_WINDOW)),
            capacity,
            sum: 0,
            min: None,
            max: None,
        }
    }

    pub fn push(&mut self, latency_ms: i64) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= i128::from(evicted);
            }
        }
        self.samples.push_back(latency_ms);
        self.sum += i128::from(latency_ms);
        self.min = Some(self.min.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max = Some(self.max.map_or(latency_ms, |m| m.max(latency_ms)));
    }

    /// Mean of the samples in the window, 0 when empty
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum as f64 / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lowest latency ever recorded, not just within the window
    pub fn min(&self) -> Option<i64> {
        self.min
    }

    /// Highest latency ever recorded, not just within the window
    pub fn max(&self) -> Option<i64> {
        self.max
    }
}

/// Everything known about one source
#[derive(Debug, Clone)]
pub struct SourceState {
    pub sequence: SequenceTracker,
    pub latency: LatencyWindow,
    pub latest_value: f64,
    pub latest_sequence: u32,
    pub latest_latency: i64,
    pub latest_timestamp: i64,
}

impl SourceState {
    fn new(policy: RegressionPolicy, latency_window: usize) -> Self {
        Self {
            sequence: SequenceTracker::new(policy),
            latency: LatencyWindow::new(latency_window),
            latest_value: 0.0,
            latest_sequence: 0,
            latest_latency: 0,
            latest_timestamp: 0,
        }
    }

    fn row(&self, source_id: &str) -> SourceRow {
        SourceRow {
            source_id: source_id.to_string(),
            latest_value: self.latest_value,
            latest_sequence: self.latest_sequence,
            latest_latency: self.latest_latency,
            latest_timestamp: self.latest_timestamp,
            average_latency: self.latency.average(),
            min_latency: self.latency.min(),
            max_latency: self.latency.max(),
            loss_rate: self.sequence.loss_rate(),
            received: self.sequence.total_received(),
            expected: self.sequence.total_expected(),
            lost: self.sequence.gaps(),
            duplicates: self.sequence.duplicates(),
            regressions: self.sequence.regressions(),
        }
    }
}

/// Per-source gap tracking and latency statistics. Written by a single
/// thread; per-source state is created on first sighting and never removed.
#[derive(Debug, Clone)]
pub struct TelemetryStats {
    sources: HashMap<String, SourceState>,
    policy: RegressionPolicy,
    latency_window: usize,
}

impl TelemetryStats {
    pub fn new(policy: RegressionPolicy, latency_window: usize) -> Self {
        Self {
            sources: HashMap::new(),
            policy,
            latency_window,
        }
    }

    fn source_mut(&mut self, source_id: &str) -> &mut SourceState {
        let (policy, window) = (self.policy, self.latency_window);
        self.sources.entry(source_id.to_string()).or_insert_with(|| {
            debug!("First reading from source {}", source_id);
            SourceState::new(policy, window)
        })
    }

    /// Feed one sequence number through the source's gap tracker
    pub fn observe(&mut self, source_id: &str, sequence_num: u32) -> GapReport {
        let report = self.source_mut(source_id).sequence.observe(sequence_num);
        if report.is_gap() {
            debug!("Source {} sequence gap: {} missing before {}", source_id, report.gap, sequence_num);
        }
        report
    }

    /// Record latency and the latest-value snapshot for a source
    pub fn record(&mut self, source_id: &str, latency_ms: i64, value: f64, sequence_num: u32) {
        let state = self.source_mut(source_id);
        state.latency.push(latency_ms);
        state.latest_value = value;
        state.latest_sequence = sequence_num;
        state.latest_latency = latency_ms;
    }

    /// Observe and record a delivered reading in one step
    pub fn process(&mut self, received: &ReceivedReading) -> GapReport {
        let reading = received.reading();
        let report = self.observe(reading.source_id(), reading.sequence_num());
        self.record(
            reading.source_id(),
            received.latency_ms(),
            reading.value(),
            reading.sequence_num(),
        );
        self.source_mut(reading.source_id()).latest_timestamp = reading.origin_timestamp();
        report
    }

    pub fn average_latency(&self, source_id: &str) -> f64 {
        self.sources
            .get(source_id)
            .map_or(0.0, |state| state.latency.average())
    }

    pub fn loss_rate(&self, source_id: &str) -> f64 {
        self.sources
            .get(source_id)
            .map_or(0.0, |state| state.sequence.loss_rate())
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceState> {
        self.sources.get(source_id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn overall_totals(&self) -> OverallTotals {
        let mut totals = OverallTotals::default();
        for state in self.sources.values() {
            totals.received += state.sequence.total_received();
            totals.expected += state.sequence.total_expected();
            totals.lost += state.sequence.gaps();
        }
        totals.loss_rate = loss_percentage(totals.lost, totals.expected);
        totals
    }

    /// Point-in-time copy of every source, sorted by source id
    pub fn snapshot(&self) -> DashboardSnapshot {
        let mut rows: Vec<SourceRow> = self
            .sources
            .iter()
            .map(|(id, state)| state.row(id))
            .collect();
        rows.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        DashboardSnapshot {
            rows,
            overall: self.overall_totals(),
        }
    }
}

impl Default for TelemetryStats {
    fn default() -> Self {
        Self::new(RegressionPolicy::default(), DEFAULT_LATENCY_WINDOW)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallTotals {
    pub received: u64,
    pub expected: i64,
    pub lost: i64,
    pub loss_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub source_id: String,
    pub latest_value: f64,
    pub latest_sequence: u32,
    pub latest_latency: i64,
    pub latest_timestamp: i64,
    pub average_latency: f64,
    pub min_latency: Option<i64>,
    pub max_latency: Option<i64>,
    pub loss_rate: f64,
    pub received: u64,
    pub expected: i64,
    pub lost: i64,
    pub duplicates: u64,
    pub regressions: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub rows: Vec<SourceRow>,
    pub overall: OverallTotals,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use approx::assert_relative_eq;

    #[test]
    fn test_latency_window_average() {
        let mut window = LatencyWindow::new(3);
        assert_eq!(window.average(), 0.0);
        assert!(window.is_empty());

        window.push(10);
        window.push(20);
        window.push(30);
        assert_relative_eq!(window.average(), 20.0);

        // 10 is evicted
        window.push(-30);
        assert_eq!(window.len(), 3);
        assert_relative_eq!(window.average(), 20.0 / 3.0);
        assert_eq!(window.min(), Some(-30));
        assert_eq!(window.max(), Some(30));
    }

    #[test]
    fn test_unknown_source_defaults() {
        let stats = TelemetryStats::default();
        assert_eq!(stats.average_latency("nope"), 0.0);
        assert_eq!(stats.loss_rate("nope"), 0.0);
        assert_eq!(stats.overall_totals(), OverallTotals::default());
        assert!(stats.snapshot().rows.is_empty());
    }

    #[test]
    fn test_record_updates_latest_fields() {
        let mut stats = TelemetryStats::default();
        stats.observe("Temp-Sensor", 0);
        stats.record("Temp-Sensor", 12, 42.0, 0);
        stats.observe("Temp-Sensor", 1);
        stats.record("Temp-Sensor", 18, 43.5, 1);

        let state = stats.source("Temp-Sensor").unwrap();
        assert_eq!(state.latest_value, 43.5);
        assert_eq!(state.latest_sequence, 1);
        assert_eq!(state.latest_latency, 18);
        assert_relative_eq!(stats.average_latency("Temp-Sensor"), 15.0);
    }

    #[test]
    fn test_process_out_of_order_source() {
        let mut stats = TelemetryStats::default();
        for (seq, rs) in [(0u32, 1010), (1, 1120), (3, 1330)] {
            let reading = Reading::new("Flow-Sensor", 600.0, 1000 + i64::from(seq) * 100, seq);
            stats.process(&ReceivedReading::new(reading, rs));
        }

        let state = stats.source("Flow-Sensor").unwrap();
        assert_eq!(state.sequence.gaps(), 1);
        assert_eq!(state.sequence.total_expected(), 4);
        assert_eq!(state.sequence.total_received(), 3);
        assert_eq!(state.latest_sequence, 3);
        assert_relative_eq!(stats.loss_rate("Flow-Sensor"), 25.0, epsilon = 1e-9);
        assert_relative_eq!(stats.average_latency("Flow-Sensor"), 20.0);
    }

    #[test]
    fn test_overall_totals_across_sources() {
        let mut stats = TelemetryStats::default();
        for seq in 0..5 {
            stats.observe("A", seq);
        }
        for seq in [0, 1, 3, 4] {
            stats.observe("B", seq);
        }

        let totals = stats.overall_totals();
        assert_eq!(totals.received, 9);
        assert_eq!(totals.expected, 10);
        assert_eq!(totals.lost, 1);
        assert_relative_eq!(totals.loss_rate, 10.0);
        assert_eq!(stats.source_count(), 2);
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let mut stats = TelemetryStats::default();
        stats.observe("Temp-Sensor", 0);
        stats.observe("Flow-Sensor", 0);
        stats.observe("Press-Sensor", 0);

        let snapshot = stats.snapshot();
        let ids: Vec<_> = snapshot.rows.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, ["Flow-Sensor", "Press-Sensor", "Temp-Sensor"]);

        // Later updates do not leak into an existing snapshot
        stats.observe("Temp-Sensor", 5);
        assert_eq!(snapshot.overall.lost, 0);
        assert_eq!(stats.snapshot().overall.lost, 4);
    }
}
