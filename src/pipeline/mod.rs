//! The acquisition pipeline: device reader, scraper, statistics and delivery.
//!
//! ```text
//! device ─▶ ReadingSource ─▶ ScraperLoop ─┐
//!                                         ├─▶ TimedQueue ─▶ DeliveryWorker(s) ─▶ sink
//!            StatsAggregator ─▶ StatsEmitter ┘
//! ```
//!
//! [`Pipeline::spawn`] wires everything from a [`LoggerConfig`] and must be
//! called from within a tokio runtime. [`Pipeline::shutdown`] stops the
//! periodic tasks first, then closes the queue so the consumers drain what is
//! left while the device reader winds down.

mod periodic;

pub mod delivery;
pub mod scraper;
pub mod stats;

pub use delivery::{DeliveryReport, DeliveryWorker, JsonLinesSink, ReadingSink};
pub use scraper::{ScrapeOutcome, ScraperLoop};
pub use stats::{metric_names, CommRates, StatsAggregator, StatsEmitter, StatsSnapshot, MIN_SAMPLES};

use crate::config::LoggerConfig;
use crate::data::TimedQueue;
use crate::error::LoggerResult;
use crate::hardware::{CommCounters, DeviceStream, ReadingSource};
use crate::shutdown::ShutdownSignal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Totals reported once the pipeline has stopped.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownSummary {
    /// Readings accepted by the sinks
    pub delivered: u64,
    /// Failed delivery attempts
    pub failed: u64,
    /// Readings still queued after the consumers exited
    pub remaining: usize,
    /// Whether the device reader exited within its grace period
    pub reader_stopped: bool,
    /// Final statistics
    pub stats: StatsSnapshot,
}

/// Running pipeline handle.
pub struct Pipeline {
    shutdown: ShutdownSignal,
    source: Arc<ReadingSource>,
    queue: Arc<TimedQueue>,
    stats: Arc<StatsAggregator>,
    producers: Vec<JoinHandle<()>>,
    consumers: Vec<JoinHandle<DeliveryReport>>,
}

impl Pipeline {
    /// Start every component.
    ///
    /// `make_sink` is called once per consumer with the consumer index.
    pub fn spawn<S, F>(
        config: &LoggerConfig,
        device: Arc<dyn DeviceStream>,
        mut make_sink: F,
    ) -> LoggerResult<Self>
    where
        S: ReadingSink + 'static,
        F: FnMut(usize) -> LoggerResult<S>,
    {
        let shutdown = ShutdownSignal::new();
        let queue = Arc::new(TimedQueue::new());
        let stats = Arc::new(StatsAggregator::new());
        let source = Arc::new(
            ReadingSource::new(device, config.device.reader_backoff)
                .with_shutdown(shutdown.clone()),
        );

        // Sinks are created before anything runs so a bad output path fails fast
        let sinks = (0..config.pipeline.consumers)
            .map(&mut make_sink)
            .collect::<LoggerResult<Vec<S>>>()?;

        source.start()?;

        let scraper = ScraperLoop::new(source.clone(), queue.clone(), stats.clone(), config);
        let counters: Arc<dyn CommCounters> = source.clone();
        let emitter = StatsEmitter::new(
            stats.clone(),
            queue.clone(),
            counters,
            config.naming.clone(),
            &config.pipeline,
        );
        let producers = vec![
            tokio::spawn(scraper.run(shutdown.clone())),
            tokio::spawn(emitter.run(shutdown.clone())),
        ];

        let consumers = sinks
            .into_iter()
            .map(|sink| {
                let worker = DeliveryWorker::new(queue.clone(), stats.clone(), sink)
                    .with_shutdown(shutdown.clone());
                tokio::task::spawn_blocking(move || worker.run())
            })
            .collect();

        info!(
            consumers = config.pipeline.consumers,
            sensors = config.sensors.len(),
            "Pipeline started"
        );

        Ok(Self {
            shutdown,
            source,
            queue,
            stats,
            producers,
            consumers,
        })
    }

    /// The shared queue.
    pub fn queue(&self) -> &Arc<TimedQueue> {
        &self.queue
    }

    /// The shared statistics.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// The device reading source.
    pub fn source(&self) -> &Arc<ReadingSource> {
        &self.source
    }

    /// Signal observed by every component.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop producers, drain the queue and wait for the consumers.
    pub async fn shutdown(self) -> ShutdownSummary {
        info!("Shutting down pipeline");
        self.shutdown.trigger();

        for producer in self.producers {
            if let Err(e) = producer.await {
                warn!(error = %e, "Periodic task ended abnormally");
            }
        }
        self.queue.close();

        // The reader may sit in a blocking device read for its whole grace period
        let source = self.source.clone();
        let reader = tokio::task::spawn_blocking(move || source.stop());

        let mut delivered = 0;
        let mut failed = 0;
        for consumer in self.consumers {
            match consumer.await {
                Ok(report) => {
                    delivered += report.delivered;
                    failed += report.failed;
                }
                Err(e) => warn!(error = %e, "Delivery worker ended abnormally"),
            }
        }
        let reader_stopped = reader.await.unwrap_or(false);

        let summary = ShutdownSummary {
            delivered,
            failed,
            remaining: self.queue.size(),
            reader_stopped,
            stats: self.stats.snapshot(),
        };
        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            remaining = summary.remaining,
            "Pipeline stopped"
        );
        summary
    }
}
