use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::SinkError;
use crate::reading::Reading;

/// Downstream consumer of aggregated readings.
///
/// Delivery is best effort: a failed `emit` is logged by the caller and the
/// reading is dropped, never retried.
pub trait ReadingSink: Send {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Forward a single reading.
    fn emit(&mut self, reading: &Reading) -> Result<(), SinkError>;
}

impl<S: ReadingSink + ?Sized> ReadingSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn emit(&mut self, reading: &Reading) -> Result<(), SinkError> {
        (**self).emit(reading)
    }
}

/// Keeps every emitted reading in memory, in emit order. Clones share the
/// same buffer, so one handle can be given to the aggregator and another
/// kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    readings: Arc<Mutex<Vec<Reading>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }

    /// Copy of everything emitted so far
    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }
}

impl ReadingSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn emit(&mut self, reading: &Reading) -> Result<(), SinkError> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut boxed: Box<dyn ReadingSink> = Box::new(sink.clone());
        assert_eq!(boxed.name(), "memory");

        boxed.emit(&Reading::new("a", 1.0, 1, 0)).unwrap();
        boxed.emit(&Reading::new("b", 2.0, 2, 0)).unwrap();

        assert_eq!(sink.len(), 2);
        let ids: Vec<_> = sink.readings().iter().map(|r| r.source_id().to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
