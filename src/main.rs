use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sensor_telemetry::aggregator::{AggregatorReport, WindowedAggregator};
use sensor_telemetry::config::{FileConfig, MonitorConfig, PipelineConfig};
use sensor_telemetry::dashboard::{Dashboard, Layout};
use sensor_telemetry::logging::init_logging;
use sensor_telemetry::monitor::{MonitorReport, Scoreboard, TelemetryMonitor};
use sensor_telemetry::producer::{ProducerStats, SensorProducer};
use sensor_telemetry::queue::{QueueStats, SensorQueue};
use sensor_telemetry::sequence::RegressionPolicy;
use sensor_telemetry::stats::TelemetryStats;
use sensor_telemetry::transport::{UdpReceiver, UdpSink};

#[derive(Parser, Debug)]
#[command(name = "sensor-telemetry")]
#[command(about = "Multi-sensor telemetry pipeline - publish time-aligned readings and monitor delivery quality")]
#[command(version = "1.0.0")]
struct Args {
    /// Enable verbose console logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs, including one line per processed reading, to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// TOML file overriding the built-in defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate the sensors, batch their readings and forward them over UDP
    Publish {
        /// Monitor address to send readings to
        #[arg(short, long, default_value = "127.0.0.1:5400")]
        target: SocketAddr,

        /// Seconds to run, 0 runs until Ctrl+C
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Batch tolerance window in milliseconds
        #[arg(long)]
        tolerance_ms: Option<u64>,

        /// Refresh the dashboard every N readings
        #[arg(long)]
        dashboard_every: Option<u64>,

        /// How backwards-moving sequence numbers are counted
        #[arg(long, value_enum)]
        regression_policy: Option<RegressionPolicy>,

        /// Do not draw the dashboard while running
        #[arg(long)]
        no_dashboard: bool,
    },
    /// Receive readings over UDP and track gaps, loss and latency per sensor
    Monitor {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:5400")]
        bind: SocketAddr,

        /// Seconds to run, 0 runs until Ctrl+C
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Refresh the dashboard every N readings
        #[arg(long)]
        dashboard_every: Option<u64>,

        /// How backwards-moving sequence numbers are counted
        #[arg(long, value_enum)]
        regression_policy: Option<RegressionPolicy>,

        /// Do not draw the dashboard while running
        #[arg(long)]
        no_dashboard: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_file.as_deref())?;

    let file_config = match &args.config {
        Some(path) => FileConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FileConfig::default(),
    };

    match args.command {
        Commands::Publish {
            target,
            duration,
            tolerance_ms,
            dashboard_every,
            regression_policy,
            no_dashboard,
        } => {
            let mut config = PipelineConfig::default();
            file_config.apply_pipeline(&mut config);
            if let Some(v) = tolerance_ms {
                config.tolerance_ms = v;
            }
            if let Some(v) = dashboard_every {
                config.dashboard_every = v;
            }
            if let Some(v) = regression_policy {
                config.regression_policy = v;
            }
            if no_dashboard {
                config.dashboard_every = 0;
            }
            config.validate().context("Invalid publisher configuration")?;

            run_publisher(config, target, duration).await
        }
        Commands::Monitor {
            bind,
            duration,
            dashboard_every,
            regression_policy,
            no_dashboard,
        } => {
            let mut config = MonitorConfig::default();
            file_config.apply_monitor(&mut config);
            if let Some(v) = dashboard_every {
                config.dashboard_every = v;
            }
            if let Some(v) = regression_policy {
                config.regression_policy = v;
            }
            if no_dashboard {
                config.dashboard_every = 0;
            }
            config.validate().context("Invalid monitor configuration")?;

            run_monitor(config, bind, duration).await
        }
    }
}

/// Cancel on Ctrl+C, or once `duration` seconds have passed when non-zero
fn spawn_shutdown(cancel: CancellationToken, duration: u64) {
    tokio::spawn(async move {
        let deadline = async {
            if duration > 0 {
                tokio::time::sleep(Duration::from_secs(duration)).await;
                info!("Run duration ({} seconds) completed", duration);
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, shutting down...");
            }
            _ = deadline => {}
        }
        cancel.cancel();
    });
}

async fn run_publisher(config: PipelineConfig, target: SocketAddr, duration: u64) -> Result<()> {
    info!(
        "Starting publisher: {} sensors, tolerance {} ms, target {}",
        config.sensors.len(),
        config.tolerance_ms,
        target
    );

    let cancel = CancellationToken::new();
    let sink = UdpSink::new(target).with_context(|| format!("Failed to create UDP sink for {}", target))?;

    let queues: Vec<Arc<SensorQueue>> = config
        .sensors
        .iter()
        .map(|spec| {
            Arc::new(match config.queue_capacity {
                Some(capacity) => SensorQueue::bounded(spec.id.clone(), capacity),
                None => SensorQueue::unbounded(spec.id.clone()),
            })
        })
        .collect();

    let scoreboard = Scoreboard::new(
        TelemetryStats::new(config.regression_policy, config.latency_window),
        Dashboard::new("TELEMETRY PUBLISHER DASHBOARD", config.dashboard_every).with_layout(Layout::Publisher),
    );
    // Stopped only after every producer has been joined, so its final cycle sees their last readings
    let aggregator_cancel = CancellationToken::new();
    let aggregator = WindowedAggregator::new(queues.clone(), sink, scoreboard, &config);
    let aggregator_handle = aggregator
        .spawn(aggregator_cancel.clone())
        .context("Failed to start aggregator thread")?;

    let mut producer_handles = Vec::with_capacity(config.sensors.len());
    for (spec, queue) in config.sensors.iter().zip(&queues) {
        let producer = SensorProducer::new(spec.clone(), Arc::clone(queue));
        match producer.spawn(cancel.clone()) {
            Ok(handle) => producer_handles.push((spec.id.clone(), handle)),
            Err(e) => {
                cancel.cancel();
                aggregator_cancel.cancel();
                return Err(e).with_context(|| format!("Failed to start producer {}", spec.id));
            }
        }
    }

    let start_time = Instant::now();
    spawn_shutdown(cancel.clone(), duration);
    cancel.cancelled().await;

    let mut producer_stats = Vec::with_capacity(producer_handles.len());
    for (id, handle) in producer_handles {
        match handle.join() {
            Ok(stats) => producer_stats.push((id, stats)),
            Err(e) => warn!("Error joining producer thread {}: {:?}", id, e),
        }
    }
    aggregator_cancel.cancel();

    match aggregator_handle.join() {
        Ok(report) => {
            let queue_stats: Vec<QueueStats> = queues.iter().map(|q| q.get_stats()).collect();
            print_publisher_summary(&report, &producer_stats, &queue_stats, start_time.elapsed())
        }
        Err(e) => warn!("Error joining aggregator thread: {:?}", e),
    }
    Ok(())
}

async fn run_monitor(config: MonitorConfig, bind: SocketAddr, duration: u64) -> Result<()> {
    info!("Starting monitor on {}", bind);

    let cancel = CancellationToken::new();
    let receiver =
        UdpReceiver::bind(bind, config.read_timeout).with_context(|| format!("Failed to bind UDP socket on {}", bind))?;

    let monitor = TelemetryMonitor::new(Scoreboard::new(
        TelemetryStats::new(config.regression_policy, config.latency_window),
        Dashboard::new("TELEMETRY MONITOR DASHBOARD", config.dashboard_every),
    ));

    let worker_cancel = cancel.clone();
    let monitor_handle = std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || monitor.run(receiver, worker_cancel))
        .context("Failed to start monitor thread")?;

    let start_time = Instant::now();
    spawn_shutdown(cancel.clone(), duration);
    cancel.cancelled().await;

    match monitor_handle.join() {
        Ok(report) => print_monitor_summary(&report, start_time.elapsed()),
        Err(e) => warn!("Error joining monitor thread: {:?}", e),
    }
    Ok(())
}

fn print_publisher_summary(
    report: &AggregatorReport,
    producers: &[(String, ProducerStats)],
    queues: &[QueueStats],
    elapsed: Duration,
) {
    let snapshot = report.telemetry.snapshot();
    let published = Dashboard::disabled("FINAL PUBLISHER STATISTICS").with_layout(Layout::Publisher);
    println!("\n{}", published.render(&snapshot));
    println!("{}", Dashboard::disabled("QUEUE TO SINK LATENCY AND GAPS").render(&snapshot));

    let stats = &report.stats;
    println!("Run time: {:.1} seconds", elapsed.as_secs_f64());
    println!(
        "Aggregator: {} cycles, {} batches (largest {}), {} emitted, {} sink failures",
        stats.cycles, stats.batches, stats.largest_batch, stats.emitted, stats.sink_failures
    );
    for (id, producer) in producers {
        println!("  {:<20} produced {:>8}  rejected {:>6}", id, producer.produced, producer.rejected);
    }
    for queue in queues.iter().filter(|q| q.depth > 0 || q.rejected > 0) {
        warn!(
            "Queue {} ended with {} readings left, {} rejected",
            queue.source_id, queue.depth, queue.rejected
        );
    }
}

fn print_monitor_summary(report: &MonitorReport, elapsed: Duration) {
    let dashboard = Dashboard::disabled("FINAL MONITOR STATISTICS");
    println!("\n{}", dashboard.render(&report.stats.snapshot()));

    println!("Run time: {:.1} seconds", elapsed.as_secs_f64());
    println!(
        "Processed {} readings, {} malformed payloads, {} receive errors",
        report.processed, report.decode_failures, report.receive_errors
    );
}
