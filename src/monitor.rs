use std::io::{self, Write};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::codec;
use crate::dashboard::Dashboard;
use crate::error::CodecError;
use crate::reading::ReceivedReading;
use crate::sequence::GapReport;
use crate::stats::TelemetryStats;
use crate::transport::UdpReceiver;

/// Scores delivered readings: gap tracking, latency statistics, one
/// structured log line per reading and the dashboard cadence.
pub struct Scoreboard {
    stats: TelemetryStats,
    dashboard: Dashboard,
    output: Box<dyn Write + Send>,
    processed: u64,
    refreshes: u64,
}

impl Scoreboard {
    /// Dashboard refreshes go to stdout
    pub fn new(stats: TelemetryStats, dashboard: Dashboard) -> Self {
        Self {
            stats,
            dashboard,
            output: Box::new(io::stdout()),
            processed: 0,
            refreshes: 0,
        }
    }

    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn score(&mut self, received: &ReceivedReading) -> GapReport {
        let report = self.stats.process(received);
        let reading = received.reading();
        info!(
            target: "telemetry",
            sensor = reading.source_id(),
            value = reading.value(),
            ts = reading.origin_timestamp(),
            rs = received.receive_timestamp(),
            seq = reading.sequence_num(),
            latency_ms = received.latency_ms(),
            "reading processed"
        );

        self.processed += 1;
        if self.dashboard.is_due(self.processed) {
            match self.dashboard.refresh(&mut self.output, &self.stats.snapshot()) {
                Ok(()) => self.refreshes += 1,
                Err(e) => warn!("Dashboard refresh failed: {}", e),
            }
        }
        report
    }

    pub fn stats(&self) -> &TelemetryStats {
        &self.stats
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    pub fn into_stats(self) -> TelemetryStats {
        self.stats
    }
}

/// Receiving side: decodes transport payloads and scores them
pub struct TelemetryMonitor {
    scoreboard: Scoreboard,
    decode_failures: u64,
    receive_errors: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub stats: TelemetryStats,
    pub processed: u64,
    pub decode_failures: u64,
    pub receive_errors: u64,
}

impl TelemetryMonitor {
    pub fn new(scoreboard: Scoreboard) -> Self {
        Self {
            scoreboard,
            decode_failures: 0,
            receive_errors: 0,
        }
    }

    /// Decode and score one payload. Malformed payloads are counted and
    /// discarded before they reach the statistics.
    pub fn ingest(&mut self, payload: &[u8], received_at: i64) -> Result<GapReport, CodecError> {
        match codec::decode(payload) {
            Ok(reading) => Ok(self.scoreboard.score(&ReceivedReading::new(reading, received_at))),
            Err(e) => {
                self.decode_failures += 1;
                warn!("Discarding malformed payload ({} bytes): {}", payload.len(), e);
                Err(e)
            }
        }
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    /// Receive until cancelled. The receiver's read timeout bounds how long
    /// shutdown can take to be noticed.
    pub fn run(mut self, mut receiver: UdpReceiver, cancel: CancellationToken) -> MonitorReport {
        info!("Monitor started");

        while !cancel.is_cancelled() {
            match receiver.recv() {
                Ok(Some(payload)) => {
                    let received_at = crate::reading::now_millis();
                    // Already logged and counted
                    let _ = self.ingest(payload, received_at);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.receive_errors += 1;
                    error!("Error receiving telemetry: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        info!("Monitor shutting down after {} readings", self.scoreboard.processed());
        self.into_report()
    }

    pub fn into_report(self) -> MonitorReport {
        MonitorReport {
            processed: self.scoreboard.processed(),
            stats: self.scoreboard.into_stats(),
            decode_failures: self.decode_failures,
            receive_errors: self.receive_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use crate::sequence::SequenceStatus;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn monitor() -> TelemetryMonitor {
        TelemetryMonitor::new(Scoreboard::new(
            TelemetryStats::default(),
            Dashboard::disabled("TELEMETRY MONITOR DASHBOARD"),
        ))
    }

    #[test]
    fn test_ingest_scores_valid_payloads() {
        let mut monitor = monitor();
        for seq in [0u32, 1, 3] {
            let frame = codec::encode(&Reading::new("Temp-Sensor", 50.0, 1000, seq)).unwrap();
            monitor.ingest(&frame, 1025).unwrap();
        }

        let stats = monitor.scoreboard().stats();
        assert_eq!(stats.loss_rate("Temp-Sensor"), 25.0);
        assert_eq!(stats.average_latency("Temp-Sensor"), 25.0);
        assert_eq!(monitor.scoreboard().processed(), 3);
    }

    #[test]
    fn test_ingest_discards_malformed_payloads() {
        let mut monitor = monitor();
        assert!(monitor.ingest(&[1, 2, 3], 0).is_err());

        let frame = codec::encode(&Reading::new("Flow-Sensor", 1.0, 1, 0)).unwrap();
        let report = monitor.ingest(&frame, 1).unwrap();
        assert_eq!(report.status, SequenceStatus::First);

        let report = monitor.into_report();
        assert_eq!(report.decode_failures, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.stats.source_count(), 1);
    }

    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<Vec<u8>>>);

    impl Write for Screen {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_score_redraws_every_k_readings() {
        let screen = Screen::default();
        let mut scoreboard = Scoreboard::new(TelemetryStats::default(), Dashboard::new("CADENCE", 3))
            .with_output(screen.clone());

        for seq in 0..7u32 {
            scoreboard.score(&ReceivedReading::new(Reading::new("Temp-Sensor", 1.0, 1000, seq), 1001));
            let expected = u64::from(seq + 1) / 3;
            assert_eq!(scoreboard.refreshes(), expected, "after {} readings", seq + 1);
        }

        let text = String::from_utf8(screen.0.lock().clone()).unwrap();
        assert_eq!(text.matches(" CADENCE ").count(), 2);
        // The second draw reflects six processed readings
        assert!(text.contains("OVERALL: Received: 6 | Expected: 6"));
        assert!(!text.contains("Received: 7"));
    }

    #[test]
    fn test_disabled_dashboard_never_draws() {
        let screen = Screen::default();
        let mut scoreboard =
            Scoreboard::new(TelemetryStats::default(), Dashboard::disabled("QUIET")).with_output(screen.clone());
        for seq in 0..20u32 {
            scoreboard.score(&ReceivedReading::new(Reading::new("Flow-Sensor", 1.0, 1000, seq), 1000));
        }
        assert_eq!(scoreboard.refreshes(), 0);
        assert!(screen.0.lock().is_empty());
    }

    #[test]
    fn test_run_stops_on_cancel() {
        let receiver =
            UdpReceiver::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(10)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = monitor().run(receiver, cancel);
        assert_eq!(report.processed, 0);
    }
}
