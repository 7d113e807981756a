//! Multi-sensor telemetry pipeline.
//!
//! Sensor producers push [`Reading`]s into per-source [`SensorQueue`]s. The
//! [`WindowedAggregator`] drains them, groups readings whose timestamps fall
//! within a tolerance window and forwards them to a [`ReadingSink`]. Every
//! delivered reading is scored for sequence gaps, loss and latency, and a
//! [`Dashboard`] renders the per-source picture.

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod producer;
pub mod queue;
pub mod reading;
pub mod sequence;
pub mod sink;
pub mod stats;
pub mod transport;

pub use aggregator::{AggregatorReport, AggregatorStats, WindowedAggregator};
pub use config::{FileConfig, MonitorConfig, PipelineConfig};
pub use dashboard::{Dashboard, Layout};
pub use error::{CodecError, PipelineError, SinkError};
pub use monitor::{MonitorReport, Scoreboard, TelemetryMonitor};
pub use producer::{SensorProducer, SensorSpec};
pub use queue::SensorQueue;
pub use reading::{ReceivedReading, Reading};
pub use sequence::{GapReport, RegressionPolicy, SequenceStatus, SequenceTracker};
pub use sink::{MemorySink, ReadingSink};
pub use stats::{DashboardSnapshot, TelemetryStats};
pub use transport::{UdpReceiver, UdpSink};
