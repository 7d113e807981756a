use rand::prelude::*;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::queue::SensorQueue;
use crate::reading::{now_millis, Reading};

fn default_interval_ms() -> u64 {
    100
}

/// One simulated sensor: id, value range and publishing cadence
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorSpec {
    pub id: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl SensorSpec {
    pub fn new(id: impl Into<String>, min: f64, max: f64, interval_ms: u64) -> Self {
        Self {
            id: id.into(),
            min,
            max,
            interval_ms,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PipelineError::InvalidConfig("sensor id must not be empty".into()));
        }
        if self.id.len() > crate::codec::MAX_SOURCE_ID_LEN {
            return Err(PipelineError::InvalidConfig(format!("sensor id too long: {} bytes", self.id.len())));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(PipelineError::InvalidConfig(format!(
                "sensor {}: range [{}, {}) is empty or not finite",
                self.id, self.min, self.max
            )));
        }
        if self.interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(format!("sensor {}: interval_ms must be > 0", self.id)));
        }
        Ok(())
    }
}

/// Sensors the publisher simulates when none are configured
pub fn default_sensors() -> Vec<SensorSpec> {
    vec![
        SensorSpec::new("Temp-Sensor", 20.0, 100.0, 100),
        SensorSpec::new("Press-Sensor", 220.0, 350.0, 100),
        SensorSpec::new("Flow-Sensor", 500.0, 1000.0, 100),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub produced: u64,
    pub rejected: u64,
}

/// Generates readings for one sensor into its queue. Sequence numbers start
/// at 0 and increase by one per reading, wrapping at `u32::MAX`.
pub struct SensorProducer {
    spec: SensorSpec,
    queue: Arc<SensorQueue>,
    next_sequence: u32,
}

impl SensorProducer {
    pub fn new(spec: SensorSpec, queue: Arc<SensorQueue>) -> Self {
        Self {
            spec,
            queue,
            next_sequence: 0,
        }
    }

    pub fn spec(&self) -> &SensorSpec {
        &self.spec
    }

    /// Sample a value and stamp it with the next sequence number
    pub fn next_reading<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Reading {
        let value = rng.gen_range(self.spec.min..self.spec.max);
        let reading = Reading::new(self.spec.id.clone(), value, now_millis(), self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        reading
    }

    /// Produce until cancelled, one reading per interval
    pub fn run(mut self, cancel: CancellationToken) -> ProducerStats {
        let mut rng = thread_rng();
        let interval = Duration::from_millis(self.spec.interval_ms);
        let mut stats = ProducerStats::default();

        info!("Sensor {} producing every {} ms", self.spec.id, self.spec.interval_ms);

        while !cancel.is_cancelled() {
            let reading = self.next_reading(&mut rng);
            match self.queue.enqueue(reading) {
                Ok(()) => stats.produced += 1,
                Err(PipelineError::QueueFull { reading, capacity, .. }) => {
                    stats.rejected += 1;
                    warn!(
                        "Sensor {} dropped reading #{}: queue full (capacity {})",
                        self.spec.id,
                        reading.sequence_num(),
                        capacity
                    );
                }
                Err(e) => {
                    stats.rejected += 1;
                    warn!("Sensor {} dropped a reading: {}", self.spec.id, e);
                }
            }
            thread::sleep(interval);
        }

        debug!("Sensor {} shutting down after {} readings", self.spec.id, stats.produced);
        stats
    }

    pub fn spawn(self, cancel: CancellationToken) -> io::Result<thread::JoinHandle<ProducerStats>> {
        thread::Builder::new()
            .name(format!("sensor-{}", self.spec.id))
            .spawn(move || self.run(cancel))
    }
}
