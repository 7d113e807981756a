use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::producer::{default_sensors, SensorSpec};
use crate::sequence::RegressionPolicy;
use crate::stats::DEFAULT_LATENCY_WINDOW;

/// Settings for the publishing side: producers and the aggregator
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Readings within this many ms of a batch's reference timestamp join it
    pub tolerance_ms: u64,
    /// Max readings taken from one queue per aggregation cycle
    pub drain_cap: usize,
    /// Idle wait between aggregation cycles
    pub cycle_delay: Duration,
    /// Refresh the dashboard every N emitted readings, 0 disables it
    pub dashboard_every: u64,
    /// `None` for unbounded source queues
    pub queue_capacity: Option<usize>,
    pub latency_window: usize,
    pub regression_policy: RegressionPolicy,
    pub sensors: Vec<SensorSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 1000,
            drain_cap: 256,
            cycle_delay: Duration::from_millis(10),
            dashboard_every: 5,
            queue_capacity: None,
            latency_window: DEFAULT_LATENCY_WINDOW,
            regression_policy: RegressionPolicy::Signed,
            sensors: default_sensors(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.drain_cap == 0 {
            return Err(PipelineError::InvalidConfig("drain_cap must be > 0".into()));
        }
        if self.latency_window == 0 {
            return Err(PipelineError::InvalidConfig("latency_window must be > 0".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::InvalidConfig("queue_capacity must be > 0".into()));
        }
        if self.sensors.is_empty() {
            return Err(PipelineError::InvalidConfig("at least one sensor must be configured".into()));
        }
        for (i, sensor) in self.sensors.iter().enumerate() {
            sensor.validate()?;
            if self.sensors[..i].iter().any(|other| other.id == sensor.id) {
                return Err(PipelineError::InvalidConfig(format!("duplicate sensor id {}", sensor.id)));
            }
        }
        Ok(())
    }
}

/// Settings for the receiving side
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub dashboard_every: u64,
    /// Receive timeout; bounds how long shutdown takes to be noticed
    pub read_timeout: Duration,
    pub latency_window: usize,
    pub regression_policy: RegressionPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dashboard_every: 10,
            read_timeout: Duration::from_millis(100),
            latency_window: DEFAULT_LATENCY_WINDOW,
            regression_policy: RegressionPolicy::Signed,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.latency_window == 0 {
            return Err(PipelineError::InvalidConfig("latency_window must be > 0".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig("read_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub tolerance_ms: Option<u64>,
    pub drain_cap: Option<usize>,
    pub cycle_delay_ms: Option<u64>,
    pub dashboard_every: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsSection {
    pub latency_window: Option<usize>,
    pub regression_policy: Option<RegressionPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorSection {
    pub dashboard_every: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

/// Optional TOML overrides. Anything left out keeps its default.
///
/// ```toml
/// [pipeline]
/// tolerance_ms = 1000
///
/// [statistics]
/// regression_policy = "reset"
///
/// [[sensors]]
/// id = "Temp-Sensor"
/// min = 20.0
/// max = 100.0
/// interval_ms = 100
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub statistics: StatisticsSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PipelineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_pipeline(&self, config: &mut PipelineConfig) {
        let section = &self.pipeline;
        if let Some(v) = section.tolerance_ms {
            config.tolerance_ms = v;
        }
        if let Some(v) = section.drain_cap {
            config.drain_cap = v;
        }
        if let Some(v) = section.cycle_delay_ms {
            config.cycle_delay = Duration::from_millis(v);
        }
        if let Some(v) = section.dashboard_every {
            config.dashboard_every = v;
        }
        if section.queue_capacity.is_some() {
            config.queue_capacity = section.queue_capacity;
        }
        if let Some(v) = self.statistics.latency_window {
            config.latency_window = v;
        }
        if let Some(v) = self.statistics.regression_policy {
            config.regression_policy = v;
        }
        if !self.sensors.is_empty() {
            config.sensors = self.sensors.clone();
        }
    }

    pub fn apply_monitor(&self, config: &mut MonitorConfig) {
        if let Some(v) = self.monitor.dashboard_every {
            config.dashboard_every = v;
        }
        if let Some(v) = self.monitor.read_timeout_ms {
            config.read_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.statistics.latency_window {
            config.latency_window = v;
        }
        if let Some(v) = self.statistics.regression_policy {
            config.regression_policy = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let pipeline = PipelineConfig::default();
        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.tolerance_ms, 1000);
        assert_eq!(pipeline.sensors.len(), 3);
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_file_overrides() {
        let file = FileConfig::parse(
            r#"
            [pipeline]
            tolerance_ms = 250
            cycle_delay_ms = 50
            queue_capacity = 64

            [statistics]
            latency_window = 10
            regression_policy = "reset"

            [monitor]
            dashboard_every = 3

            [[sensors]]
            id = "Humidity"
            min = 0.0
            max = 100.0
            "#,
        )
        .unwrap();

        let mut pipeline = PipelineConfig::default();
        file.apply_pipeline(&mut pipeline);
        assert_eq!(pipeline.tolerance_ms, 250);
        assert_eq!(pipeline.cycle_delay, Duration::from_millis(50));
        assert_eq!(pipeline.queue_capacity, Some(64));
        assert_eq!(pipeline.drain_cap, 256);
        assert_eq!(pipeline.latency_window, 10);
        assert_eq!(pipeline.regression_policy, RegressionPolicy::Reset);
        assert_eq!(pipeline.sensors, vec![SensorSpec::new("Humidity", 0.0, 100.0, 100)]);
        assert!(pipeline.validate().is_ok());

        let mut monitor = MonitorConfig::default();
        file.apply_monitor(&mut monitor);
        assert_eq!(monitor.dashboard_every, 3);
        assert_eq!(monitor.latency_window, 10);
        assert_eq!(monitor.read_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_files() {
        assert!(matches!(
            FileConfig::parse("[pipeline]\ntolerance = 5\n"),
            Err(PipelineError::ConfigParse(_))
        ));
        assert!(FileConfig::parse("[statistics]\nregression_policy = \"clamp\"\n").is_err());

        let err = FileConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigRead { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\ndrain_cap = 8").unwrap();

        let loaded = FileConfig::load(file.path()).unwrap();
        let mut pipeline = PipelineConfig::default();
        loaded.apply_pipeline(&mut pipeline);
        assert_eq!(pipeline.drain_cap, 8);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig {
            drain_cap: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        config.drain_cap = 1;
        config.sensors.push(config.sensors[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate sensor id"));

        config.sensors.clear();
        assert!(config.validate().is_err());

        let monitor = MonitorConfig {
            read_timeout: Duration::ZERO,
            ..MonitorConfig::default()
        };
        assert!(monitor.validate().is_err());
    }
}
