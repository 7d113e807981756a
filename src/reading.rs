use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, read from the wall clock.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A single sensor sample as produced at the source
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    source_id: String,
    value: f64,
    origin_timestamp: i64,
    sequence_num: u32,
}

impl Reading {
    pub fn new(source_id: impl Into<String>, value: f64, origin_timestamp: i64, sequence_num: u32) -> Self {
        Self {
            source_id: source_id.into(),
            value,
            origin_timestamp,
            sequence_num,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Milliseconds since epoch at which the producer sampled the value
    pub fn origin_timestamp(&self) -> i64 {
        self.origin_timestamp
    }

    pub fn sequence_num(&self) -> u32 {
        self.sequence_num
    }
}

/// A reading together with the moment the consuming side pulled it off a
/// queue or the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedReading {
    reading: Reading,
    receive_timestamp: i64,
}

impl ReceivedReading {
    pub fn new(reading: Reading, receive_timestamp: i64) -> Self {
        Self {
            reading,
            receive_timestamp,
        }
    }

    /// Stamp a reading with the current wall-clock time
    pub fn stamp(reading: Reading) -> Self {
        Self::new(reading, now_millis())
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub fn receive_timestamp(&self) -> i64 {
        self.receive_timestamp
    }

    /// Receive time minus origin time. Negative when the producer clock runs
    /// ahead of ours; this is reported as-is.
    pub fn latency_ms(&self) -> i64 {
        self.receive_timestamp - self.reading.origin_timestamp
    }

    pub fn into_reading(self) -> Reading {
        self.reading
    }
}
