//! Draining the queue into a sink.
//!
//! The persistence backend is pluggable through [`ReadingSink`]. The
//! [`DeliveryWorker`] pops the oldest reading, hands it to the sink and
//! reports every attempt to the [`StatsAggregator`], which is where the
//! success-rate and latency metrics come from.

use crate::data::TimedQueue;
use crate::error::{LoggerError, LoggerResult};
use crate::pipeline::stats::StatsAggregator;
use crate::reading::Reading;
use crate::shutdown::ShutdownSignal;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default pause after a failed delivery before the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Destination for delivered readings.
pub trait ReadingSink: Send {
    /// Persist one reading. Returns the number of elements written.
    fn deliver(&mut self, reading: &Reading) -> LoggerResult<u64>;

    /// Flush buffered output.
    fn flush(&mut self) -> LoggerResult<()> {
        Ok(())
    }
}

impl<S: ReadingSink + ?Sized> ReadingSink for Box<S> {
    fn deliver(&mut self, reading: &Reading) -> LoggerResult<u64> {
        (**self).deliver(reading)
    }

    fn flush(&mut self) -> LoggerResult<()> {
        (**self).flush()
    }
}

/// Writes one JSON object per line: `{"timestamp":..,"kind":..,"value":..}`.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap any writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Append to `path`, creating it if needed.
    pub fn append_to(path: &Path) -> LoggerResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> ReadingSink for JsonLinesSink<W> {
    fn deliver(&mut self, reading: &Reading) -> LoggerResult<u64> {
        let mut line =
            serde_json::to_vec(reading).map_err(|e| LoggerError::Delivery(e.to_string()))?;
        line.push(b'\n');
        // One write per record so concurrent workers sharing stdout don't interleave
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        Ok(1)
    }

    fn flush(&mut self) -> LoggerResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Counts of a worker's lifetime, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Readings accepted by the sink
    pub delivered: u64,
    /// Failed attempts (requeued while running, dropped during shutdown)
    pub failed: u64,
}

/// Blocking consumer: pop oldest, deliver, report.
pub struct DeliveryWorker<S: ReadingSink> {
    queue: Arc<TimedQueue>,
    stats: Arc<StatsAggregator>,
    sink: S,
    shutdown: ShutdownSignal,
    retry_delay: Duration,
}

impl<S: ReadingSink> DeliveryWorker<S> {
    /// Create a worker draining `queue` into `sink`.
    pub fn new(queue: Arc<TimedQueue>, stats: Arc<StatsAggregator>, sink: S) -> Self {
        Self {
            queue,
            stats,
            sink,
            shutdown: ShutdownSignal::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Signal that cuts retry pauses short.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Pause after a failed attempt.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Attempt delivery of one reading and record the outcome.
    ///
    /// A failed reading goes back into the queue unless shutdown has been
    /// requested or the queue is closed; then it is dropped.
    pub fn deliver_one(&mut self, reading: Reading) -> bool {
        let started = Instant::now();
        match self.sink.deliver(&reading) {
            Ok(elements) => {
                self.stats
                    .record_delivery_outcome(true, Some(started.elapsed()), elements);
                true
            }
            Err(e) => {
                self.stats.record_delivery_outcome(false, None, 0);
                if self.queue.is_closed() || self.shutdown.is_triggered() {
                    error!(kind = reading.kind(), error = %e, "Delivery failed during shutdown, dropping reading");
                } else {
                    warn!(kind = reading.kind(), error = %e, "Delivery failed, requeueing");
                    self.queue.push(reading);
                }
                false
            }
        }
    }

    /// Run until the queue is closed and empty. Blocks the calling thread.
    pub fn run(mut self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        info!("Delivery worker started");
        while let Some(reading) = self.queue.pop_oldest() {
            if self.deliver_one(reading) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                if !self.queue.is_closed() && !self.shutdown.is_triggered() {
                    self.shutdown.wait_timeout(self.retry_delay);
                }
            }
        }
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "Failed to flush sink");
        }
        debug!(?report, "Delivery worker stopped");
        report
    }
}
