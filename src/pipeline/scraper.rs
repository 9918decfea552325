//! Periodic sampling of the reading source into the queue.
//!
//! Each cycle reads the latest value of every configured sensor and enqueues
//! the ones that changed since they were last forwarded. When the queue has
//! reached `max_queue_size` the whole cycle is dropped; this is the only thing
//! bounding memory while delivery is stalled.

use crate::config::{LoggerConfig, NamingConfig};
use crate::data::TimedQueue;
use crate::error::LoggerResult;
use crate::hardware::ReadingSource;
use crate::pipeline::periodic::run_periodic;
use crate::pipeline::stats::StatsAggregator;
use crate::shutdown::ShutdownSignal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Result of a single scrape cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// Readings inserted into the queue
    pub enqueued: usize,
    /// The cycle was dropped because the queue was full
    pub skipped_full: bool,
}

/// Samples [`ReadingSource`] on a fixed period and feeds [`TimedQueue`].
pub struct ScraperLoop {
    source: Arc<ReadingSource>,
    queue: Arc<TimedQueue>,
    stats: Arc<StatsAggregator>,
    sensors: BTreeMap<String, String>,
    naming: NamingConfig,
    max_queue_size: usize,
    interval: Duration,
    cooldown: Duration,
    /// device name -> wall-clock time of the last enqueue for it
    last_forwarded: HashMap<String, DateTime<Utc>>,
    cycles_dropped: u64,
}

impl ScraperLoop {
    /// Create a scraper using the sensor map, naming and pipeline settings of `config`.
    pub fn new(
        source: Arc<ReadingSource>,
        queue: Arc<TimedQueue>,
        stats: Arc<StatsAggregator>,
        config: &LoggerConfig,
    ) -> Self {
        Self {
            source,
            queue,
            stats,
            sensors: config.sensors.clone(),
            naming: config.naming.clone(),
            max_queue_size: config.pipeline.max_queue_size,
            interval: config.pipeline.scrape_interval,
            cooldown: config.pipeline.scrape_cooldown,
            last_forwarded: HashMap::new(),
            cycles_dropped: 0,
        }
    }

    /// Run one cycle.
    pub fn scrape_once(&mut self) -> LoggerResult<ScrapeOutcome> {
        self.source.start()?;

        let size = self.queue.size();
        if size >= self.max_queue_size {
            self.cycles_dropped += 1;
            debug!(
                size,
                max = self.max_queue_size,
                dropped = self.cycles_dropped,
                "Queue full, dropping scrape cycle"
            );
            return Ok(ScrapeOutcome {
                enqueued: 0,
                skipped_full: true,
            });
        }

        let mut enqueued = 0;
        for (device_name, canonical) in &self.sensors {
            let Some(latest) = self.source.latest(device_name) else {
                continue;
            };
            if let Some(forwarded) = self.last_forwarded.get(device_name) {
                if latest.timestamp <= *forwarded {
                    trace!(sensor = %device_name, "Unchanged since last forward");
                    continue;
                }
            }

            self.queue.insert(
                latest.timestamp,
                self.naming.reading_kind(canonical),
                latest.value,
            );
            self.stats.register_new_reading();
            self.last_forwarded.insert(device_name.clone(), Utc::now());
            enqueued += 1;
        }

        debug!(enqueued, queue_size = size + enqueued, "Scrape cycle complete");
        Ok(ScrapeOutcome {
            enqueued,
            skipped_full: false,
        })
    }

    /// When a reading for `device_name` was last enqueued.
    pub fn last_forwarded(&self, device_name: &str) -> Option<DateTime<Utc>> {
        self.last_forwarded.get(device_name).copied()
    }

    /// Cycles dropped because the queue was full.
    pub fn cycles_dropped(&self) -> u64 {
        self.cycles_dropped
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        let (interval, cooldown) = (self.interval, self.cooldown);
        run_periodic("scraper", interval, cooldown, &shutdown, || {
            self.scrape_once().map(|_| ())
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DeviceStream;
    use std::io::{self, BufRead};

    /// Device that never opens; keeps the reader thread in backoff.
    struct Unplugged;

    impl DeviceStream for Unplugged {
        fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "unplugged"))
        }
        fn describe(&self) -> String {
            "unplugged".to_string()
        }
    }

    fn fixture(max_queue_size: usize) -> (ScraperLoop, Arc<ReadingSource>, Arc<TimedQueue>, Arc<StatsAggregator>) {
        let mut config = LoggerConfig::default();
        config.pipeline.max_queue_size = max_queue_size;
        config.naming.instance_prefix = "test:".to_string();

        let source = Arc::new(ReadingSource::new(Arc::new(Unplugged), Duration::from_secs(3600)));
        let queue = Arc::new(TimedQueue::new());
        let stats = Arc::new(StatsAggregator::new());
        let scraper = ScraperLoop::new(source.clone(), queue.clone(), stats.clone(), &config);
        (scraper, source, queue, stats)
    }

    #[test]
    fn forwards_new_readings_with_full_kind() {
        let (mut scraper, source, queue, stats) = fixture(100);
        source.ingest_line("Humidity: 40.0");
        let observed = source.latest("Humidity").unwrap();

        let outcome = scraper.scrape_once().unwrap();
        assert_eq!(outcome, ScrapeOutcome { enqueued: 1, skipped_full: false });

        let reading = queue.pop_oldest_nowait().unwrap();
        assert_eq!(reading.kind(), "test:reading:humidity");
        assert_eq!(reading.value(), 40.0);
        assert_eq!(reading.timestamp(), observed.timestamp);
        assert_eq!(stats.number_of_new_readings(), 1);
        assert!(scraper.last_forwarded("Humidity").unwrap() >= observed.timestamp);
        source.stop();
    }

    #[test]
    fn unchanged_reading_is_not_forwarded_twice() {
        let (mut scraper, source, queue, _stats) = fixture(100);
        source.ingest_line("Humidity: 40.0");

        assert_eq!(scraper.scrape_once().unwrap().enqueued, 1);
        assert_eq!(scraper.scrape_once().unwrap().enqueued, 0);
        assert_eq!(queue.size(), 1);

        std::thread::sleep(Duration::from_millis(5));
        source.ingest_line("Humidity: 42.0");
        assert_eq!(scraper.scrape_once().unwrap().enqueued, 1);
        assert_eq!(queue.pop_youngest_nowait().unwrap().value(), 42.0);
        source.stop();
    }

    #[test]
    fn unmapped_and_missing_sensors_are_ignored() {
        let (mut scraper, source, queue, _stats) = fixture(100);
        source.ingest_line("Wind speed: 3.0");

        assert_eq!(scraper.scrape_once().unwrap().enqueued, 0);
        assert!(queue.is_empty());
        source.stop();
    }

    #[test]
    fn full_queue_drops_whole_cycle() {
        let (mut scraper, source, queue, stats) = fixture(2);
        queue.insert(Utc::now(), "x", 1.0);
        queue.insert(Utc::now(), "y", 2.0);
        source.ingest_line("Temperature: 21.5");
        source.ingest_line("Pressure: 1013.2");

        let outcome = scraper.scrape_once().unwrap();
        assert!(outcome.skipped_full);
        assert_eq!(outcome.enqueued, 0);
        assert_eq!(queue.size(), 2);
        assert_eq!(scraper.cycles_dropped(), 1);
        assert_eq!(stats.number_of_new_readings(), 0);

        // once drained, the still-fresh values go through
        queue.pop_oldest_nowait();
        queue.pop_oldest_nowait();
        assert_eq!(scraper.scrape_once().unwrap().enqueued, 2);
        source.stop();
    }

    #[test]
    fn scrape_starts_the_reader() {
        let (mut scraper, source, _queue, _stats) = fixture(100);
        scraper.scrape_once().unwrap();
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
    }
}
