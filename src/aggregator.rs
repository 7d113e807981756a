use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::monitor::Scoreboard;
use crate::queue::SensorQueue;
use crate::reading::{ReceivedReading, Reading};
use crate::sink::ReadingSink;
use crate::stats::TelemetryStats;

const BACKLOG_WARN_THRESHOLD: usize = 10_000;

/// Take the next batch out of `pool`: every reading whose origin timestamp is
/// within `tolerance_ms` of the first reading's. Readings left behind keep
/// their relative order.
pub fn carve_batch(pool: &mut Vec<ReceivedReading>, tolerance_ms: u64) -> Vec<ReceivedReading> {
    let Some(reference) = pool.first().map(|r| r.reading().origin_timestamp()) else {
        return Vec::new();
    };

    let (batch, rest): (Vec<_>, Vec<_>) = pool
        .drain(..)
        .partition(|r| r.reading().origin_timestamp().abs_diff(reference) <= tolerance_ms);
    *pool = rest;
    batch
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub cycles: u64,
    pub drained: u64,
    pub batches: u64,
    pub emitted: u64,
    pub sink_failures: u64,
    pub largest_batch: usize,
}

#[derive(Debug, Clone)]
pub struct AggregatorReport {
    pub stats: AggregatorStats,
    pub telemetry: TelemetryStats,
    pub processed: u64,
}

/// Drains every source queue, groups readings into tolerance windows and
/// forwards them to the sink. Readings are stamped with their receive time as
/// they leave the queue. Each delivered reading is scored right after the sink
/// accepts it; rejected readings are dropped without scoring.
pub struct WindowedAggregator<S: ReadingSink> {
    queues: Vec<Arc<SensorQueue>>,
    sink: S,
    scoreboard: Scoreboard,
    pending: Vec<ReceivedReading>,
    tolerance_ms: u64,
    drain_cap: usize,
    cycle_delay: Duration,
    stats: AggregatorStats,
}

impl<S: ReadingSink> WindowedAggregator<S> {
    pub fn new(queues: Vec<Arc<SensorQueue>>, sink: S, scoreboard: Scoreboard, config: &PipelineConfig) -> Self {
        Self {
            queues,
            sink,
            scoreboard,
            pending: Vec::new(),
            tolerance_ms: config.tolerance_ms,
            drain_cap: config.drain_cap.max(1),
            cycle_delay: config.cycle_delay,
            stats: AggregatorStats::default(),
        }
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Move up to `drain_cap` readings from each queue into the pending pool
    pub fn drain_queues(&mut self) -> usize {
        let mut drained = 0;
        for queue in &self.queues {
            let mut taken = 0;
            while taken < self.drain_cap {
                match queue.try_dequeue() {
                    Some(reading) => {
                        self.pending.push(ReceivedReading::stamp(reading));
                        taken += 1;
                    }
                    None => break,
                }
            }

            let backlog = queue.len();
            if backlog > BACKLOG_WARN_THRESHOLD {
                warn!("Queue backlog for {}: approx {} readings", queue.source_id(), backlog);
            }
            drained += taken;
        }
        self.stats.drained += drained as u64;
        drained
    }

    /// One drain/batch/emit pass. Returns how many readings the sink accepted.
    pub fn run_cycle(&mut self) -> u64 {
        self.stats.cycles += 1;
        self.drain_queues();

        let emitted_before = self.stats.emitted;
        while !self.pending.is_empty() {
            let batch = carve_batch(&mut self.pending, self.tolerance_ms);
            self.stats.batches += 1;
            self.stats.largest_batch = self.stats.largest_batch.max(batch.len());
            debug!(
                "Emitting batch of {} readings (reference ts {})",
                batch.len(),
                batch[0].reading().origin_timestamp()
            );

            for reading in batch {
                self.emit(reading);
            }
        }
        self.stats.emitted - emitted_before
    }

    fn emit(&mut self, received: ReceivedReading) {
        let reading = received.reading();
        if let Err(e) = self.sink.emit(reading) {
            self.stats.sink_failures += 1;
            warn!(
                "Sink {} dropped reading {}#{}: {}",
                self.sink.name(),
                reading.source_id(),
                reading.sequence_num(),
                e
            );
            return;
        }
        self.stats.emitted += 1;
        self.scoreboard.score(&received);
    }

    /// Run cycles until cancelled, then one last cycle so readings already
    /// queued are not left behind.
    pub fn run(mut self, cancel: CancellationToken) -> AggregatorReport {
        info!(
            "Aggregator started: {} queues, tolerance {} ms, sink {}",
            self.queues.len(),
            self.tolerance_ms,
            self.sink.name()
        );

        while !cancel.is_cancelled() {
            self.run_cycle();
            thread::sleep(self.cycle_delay);
        }
        self.run_cycle();

        info!(
            "Aggregator stopped: {} emitted in {} batches, {} sink failures",
            self.stats.emitted, self.stats.batches, self.stats.sink_failures
        );
        self.into_report()
    }

    pub fn into_report(self) -> AggregatorReport {
        AggregatorReport {
            processed: self.scoreboard.processed(),
            telemetry: self.scoreboard.into_stats(),
            stats: self.stats,
        }
    }
}

impl<S: ReadingSink + 'static> WindowedAggregator<S> {
    pub fn spawn(self, cancel: CancellationToken) -> io::Result<thread::JoinHandle<AggregatorReport>> {
        thread::Builder::new()
            .name("aggregator".to_string())
            .spawn(move || self.run(cancel))
    }
}
