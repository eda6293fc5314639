//! Buffered event writer

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::TrackingEvent;
use crate::backend::RECORDS_KIND;
use crate::object::Object;
use crate::store::{ObjectStore, PutOptions};
use crate::{Error, Result};

/// In-process event buffer in front of an experiment's event log.
///
/// Events keep program order. The buffer is written as a single bulk insert
/// once it holds more than `max_buffer` events, or when flushed explicitly.
pub struct EventSink {
    datasets: Arc<dyn ObjectStore>,
    dataset: String,
    max_buffer: usize,
    buffer: Mutex<Vec<TrackingEvent>>,
}

impl EventSink {
    /// Sink writing to `dataset` in the datasets store.
    #[must_use]
    pub fn new(datasets: Arc<dyn ObjectStore>, dataset: impl Into<String>, max_buffer: usize) -> Self {
        Self {
            datasets,
            dataset: dataset.into(),
            max_buffer,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Name of the event log dataset.
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Flush threshold.
    #[must_use]
    pub const fn max_buffer(&self) -> usize {
        self.max_buffer
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<TrackingEvent>>> {
        self.buffer.lock().map_err(|_| Error::LockPoisoned("event buffer"))
    }

    /// Buffer an event, flushing if the threshold is exceeded.
    ///
    /// # Errors
    ///
    /// Returns an error if a triggered flush fails; the events stay buffered.
    pub fn push(&self, event: TrackingEvent) -> Result<()> {
        let mut buffer = self.lock()?;
        buffer.push(event);
        if buffer.len() > self.max_buffer {
            self.write(&mut buffer)?;
        }
        Ok(())
    }

    /// Write every buffered event. Returns how many were written.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the events stay buffered.
    pub fn flush(&self) -> Result<usize> {
        let mut buffer = self.lock()?;
        self.write(&mut buffer)
    }

    fn write(&self, buffer: &mut Vec<TrackingEvent>) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let docs = buffer
            .iter()
            .map(TrackingEvent::to_document)
            .collect::<Result<Vec<_>>>()?;
        let opts = PutOptions::new().kind(RECORDS_KIND).noversion().append(true);
        self.datasets.put(&Object::Records(docs), &self.dataset, &opts)?;
        let written = buffer.len();
        buffer.clear();
        debug!(dataset = %self.dataset, events = written, "flushed event buffer");
        Ok(written)
    }

    /// Snapshot of the events not yet written.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn buffered(&self) -> Result<Vec<TrackingEvent>> {
        Ok(self.lock()?.clone())
    }

    /// Discard the events not yet written.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("dataset", &self.dataset)
            .field("max_buffer", &self.max_buffer)
            .finish_non_exhaustive()
    }
}
