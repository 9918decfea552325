//! Link-health statistics.
//!
//! [`StatsAggregator`] keeps every counter behind a single lock. Delivery
//! workers report each attempt through
//! [`record_delivery_outcome`](StatsAggregator::record_delivery_outcome); the
//! scraper counts new readings. [`StatsEmitter`] periodically turns the
//! windowed outcome buffers and the device traffic counters into
//! connection-quality readings and pushes them through the same queue as
//! sensor data.
//!
//! Success rate and average latency are read-and-clear: each emission covers
//! only the attempts since the previous one, and is suppressed until at least
//! [`MIN_SAMPLES`] attempts have accumulated.

use crate::config::NamingConfig;
use crate::data::TimedQueue;
use crate::error::LoggerResult;
use crate::hardware::CommCounters;
use crate::pipeline::periodic::run_periodic;
use crate::shutdown::ShutdownSignal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum outcomes before a success rate or latency is reported.
pub const MIN_SAMPLES: usize = 5;

/// Metric names, appended to the connection category prefix.
pub mod metric_names {
    /// Fraction of successful delivery attempts
    pub const SUCCESS_RATE: &str = "cloud_db_write_success_rate";
    /// Mean delivery latency in seconds
    pub const WRITE_LATENCY: &str = "cloud_db_write_latency";
    /// Device bytes per second (name kept for existing dashboards)
    pub const DEVICE_BPS: &str = "arduino_comm_bps";
    /// Device lines per second (name kept for existing dashboards)
    pub const DEVICE_LPS: &str = "arduino_comm_lps";
}

/// Device traffic rates derived from two counter samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommRates {
    /// Bytes per second since the previous sample
    pub bytes_per_second: Option<f64>,
    /// Lines per second since the previous sample
    pub lines_per_second: Option<f64>,
}

/// Point-in-time view of the cumulative statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Readings enqueued by the scraper
    pub new_readings: u64,
    /// Elements reported written by delivery
    pub elements_written: u64,
    /// Outcomes recorded since the last success-rate emission
    pub pending_outcomes: usize,
    /// Seconds since the last successful delivery
    pub seconds_since_success: Option<f64>,
    /// Seconds since the last failed delivery
    pub seconds_since_failure: Option<f64>,
    /// Seconds since the aggregator was created
    pub seconds_running: f64,
}

#[derive(Debug, Clone, Copy)]
struct CommSample {
    at: Instant,
    lines: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct StatsState {
    outcomes: Vec<bool>,
    latencies: Vec<Duration>,
    elements_written: u64,
    new_readings: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    previous_comm: Option<CommSample>,
}

/// Thread-safe statistics shared by the scraper, delivery and emission task.
#[derive(Debug)]
pub struct StatsAggregator {
    state: Mutex<StatsState>,
    started: DateTime<Utc>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_since(at: Option<DateTime<Utc>>) -> Option<Duration> {
    at.map(|at| (Utc::now() - at).to_std().unwrap_or_default())
}

impl StatsAggregator {
    /// Create an aggregator; `time_running` counts from now.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatsState::default()),
            started: Utc::now(),
        }
    }

    /// Record one delivery attempt.
    ///
    /// Successful attempts carry the write latency (if measured) and the number
    /// of elements written; failures only stamp the failure time.
    pub fn record_delivery_outcome(&self, success: bool, latency: Option<Duration>, elements: u64) {
        let mut state = self.state.lock();
        state.outcomes.push(success);
        if success {
            if let Some(latency) = latency {
                state.latencies.push(latency);
            }
            state.elements_written += elements;
            state.last_success = Some(Utc::now());
        } else {
            state.last_failure = Some(Utc::now());
        }
    }

    /// Count one reading enqueued by the scraper.
    pub fn register_new_reading(&self) {
        self.state.lock().new_readings += 1;
    }

    /// Total readings enqueued by the scraper.
    pub fn number_of_new_readings(&self) -> u64 {
        self.state.lock().new_readings
    }

    /// Total elements reported written by delivery.
    pub fn elements_written(&self) -> u64 {
        self.state.lock().elements_written
    }

    /// Time since the last successful delivery, if any.
    pub fn time_since_last_success(&self) -> Option<Duration> {
        elapsed_since(self.state.lock().last_success)
    }

    /// Time since the last failed delivery, if any.
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        elapsed_since(self.state.lock().last_failure)
    }

    /// Time since the aggregator was created.
    pub fn time_running(&self) -> Duration {
        elapsed_since(Some(self.started)).unwrap_or_default()
    }

    /// Success fraction since the last call, then clear the window.
    ///
    /// `None` (and nothing cleared) while fewer than [`MIN_SAMPLES`] outcomes
    /// have been recorded.
    pub fn take_success_rate(&self) -> Option<f64> {
        let mut state = self.state.lock();
        if state.outcomes.len() < MIN_SAMPLES {
            return None;
        }
        let successes = state.outcomes.iter().filter(|&&ok| ok).count();
        let rate = successes as f64 / state.outcomes.len() as f64;
        state.outcomes.clear();
        Some(rate)
    }

    /// Mean latency in seconds since the last call, then clear the window.
    ///
    /// Same [`MIN_SAMPLES`] floor as [`take_success_rate`](Self::take_success_rate).
    pub fn take_average_latency(&self) -> Option<f64> {
        let mut state = self.state.lock();
        if state.latencies.len() < MIN_SAMPLES {
            return None;
        }
        let total: Duration = state.latencies.iter().sum();
        let average = total.as_secs_f64() / state.latencies.len() as f64;
        state.latencies.clear();
        Some(average)
    }

    /// Rates since the previous sample of the cumulative device counters.
    ///
    /// The first call only records the sample and returns no rates.
    pub fn sample_comm_rates(&self, total_lines: u64, total_bytes: u64) -> CommRates {
        let now = Instant::now();
        let mut state = self.state.lock();
        let rates = match state.previous_comm {
            Some(previous) => {
                let seconds = now.duration_since(previous.at).as_secs_f64();
                if seconds > 0.0 {
                    CommRates {
                        bytes_per_second: Some(
                            total_bytes.saturating_sub(previous.bytes) as f64 / seconds,
                        ),
                        lines_per_second: Some(
                            total_lines.saturating_sub(previous.lines) as f64 / seconds,
                        ),
                    }
                } else {
                    CommRates::default()
                }
            }
            None => CommRates::default(),
        };
        state.previous_comm = Some(CommSample {
            at: now,
            lines: total_lines,
            bytes: total_bytes,
        });
        rates
    }

    /// Compute every metric that is currently available, clearing the windows.
    pub fn collect_metrics(&self, counters: &dyn CommCounters) -> Vec<(&'static str, f64)> {
        let success_rate = self.take_success_rate();
        let latency = self.take_average_latency();
        let rates = self.sample_comm_rates(counters.total_lines_read(), counters.total_bytes_read());

        [
            (metric_names::SUCCESS_RATE, success_rate),
            (metric_names::WRITE_LATENCY, latency),
            (metric_names::DEVICE_BPS, rates.bytes_per_second),
            (metric_names::DEVICE_LPS, rates.lines_per_second),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect()
    }

    /// Collect metrics and insert each as a connection-quality reading.
    ///
    /// Returns the number of readings inserted.
    pub fn emit_once(
        &self,
        queue: &TimedQueue,
        counters: &dyn CommCounters,
        naming: &NamingConfig,
    ) -> usize {
        let metrics = self.collect_metrics(counters);
        for (name, value) in &metrics {
            queue.insert(Utc::now(), naming.connection_kind(name), *value);
        }
        metrics.len()
    }

    /// Snapshot of the cumulative counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.lock();
        StatsSnapshot {
            new_readings: state.new_readings,
            elements_written: state.elements_written,
            pending_outcomes: state.outcomes.len(),
            seconds_since_success: elapsed_since(state.last_success).map(|d| d.as_secs_f64()),
            seconds_since_failure: elapsed_since(state.last_failure).map(|d| d.as_secs_f64()),
            seconds_running: elapsed_since(Some(self.started))
                .unwrap_or_default()
                .as_secs_f64(),
        }
    }
}

/// Periodic task writing statistics into the queue.
pub struct StatsEmitter {
    stats: Arc<StatsAggregator>,
    queue: Arc<TimedQueue>,
    counters: Arc<dyn CommCounters>,
    naming: NamingConfig,
    max_queue_size: usize,
    interval: Duration,
    cooldown: Duration,
}

impl StatsEmitter {
    /// Create an emitter. Timing and capacity come from the pipeline config.
    pub fn new(
        stats: Arc<StatsAggregator>,
        queue: Arc<TimedQueue>,
        counters: Arc<dyn CommCounters>,
        naming: NamingConfig,
        pipeline: &crate::config::PipelineConfig,
    ) -> Self {
        Self {
            stats,
            queue,
            counters,
            naming,
            max_queue_size: pipeline.max_queue_size,
            interval: pipeline.stats_interval,
            cooldown: pipeline.stats_cooldown,
        }
    }

    /// One emission cycle. Skipped entirely when the queue is at capacity.
    pub fn emit_cycle(&self) -> LoggerResult<usize> {
        let size = self.queue.size();
        if size >= self.max_queue_size {
            debug!(size, max = self.max_queue_size, "Queue full, dropping statistics");
            return Ok(0);
        }
        let emitted = self
            .stats
            .emit_once(&self.queue, self.counters.as_ref(), &self.naming);
        debug!(emitted, "Statistics emitted");
        Ok(emitted)
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, shutdown: ShutdownSignal) {
        run_periodic("stats", self.interval, self.cooldown, &shutdown, || {
            self.emit_cycle().map(|_| ())
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeCounters {
        lines: AtomicU64,
        bytes: AtomicU64,
    }

    impl CommCounters for FakeCounters {
        fn total_lines_read(&self) -> u64 {
            self.lines.load(Ordering::SeqCst)
        }
        fn total_bytes_read(&self) -> u64 {
            self.bytes.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn success_rate_needs_five_outcomes() {
        let stats = StatsAggregator::new();
        for _ in 0..4 {
            stats.record_delivery_outcome(true, Some(Duration::from_millis(100)), 1);
        }
        assert_eq!(stats.take_success_rate(), None);
        assert_eq!(stats.take_average_latency(), None);

        stats.record_delivery_outcome(false, None, 0);
        let rate = stats.take_success_rate().unwrap();
        assert!((rate - 0.8).abs() < 1e-9);

        // window cleared
        assert_eq!(stats.take_success_rate(), None);
        // only four latencies were recorded (failures carry none)
        assert_eq!(stats.take_average_latency(), None);
        assert_eq!(stats.elements_written(), 4);
    }

    #[test]
    fn average_latency_over_window() {
        let stats = StatsAggregator::new();
        for ms in [100, 200, 300, 400, 500] {
            stats.record_delivery_outcome(true, Some(Duration::from_millis(ms)), 2);
        }
        let average = stats.take_average_latency().unwrap();
        assert!((average - 0.3).abs() < 1e-9);
        assert_eq!(stats.take_average_latency(), None);
        assert_eq!(stats.elements_written(), 10);
    }

    #[test]
    fn comm_rates_absent_on_first_sample() {
        let stats = StatsAggregator::new();
        assert_eq!(stats.sample_comm_rates(10, 100), CommRates::default());

        std::thread::sleep(Duration::from_millis(50));
        let rates = stats.sample_comm_rates(20, 600);
        let bps = rates.bytes_per_second.unwrap();
        let lps = rates.lines_per_second.unwrap();
        assert!(bps > 0.0 && bps <= 500.0 / 0.05);
        assert!(lps > 0.0 && lps <= 10.0 / 0.05);
        // lines and bytes are tracked independently
        assert!(bps / lps > 40.0);
    }

    #[test]
    fn failure_and_success_times_tracked() {
        let stats = StatsAggregator::new();
        assert!(stats.time_since_last_success().is_none());
        assert!(stats.time_since_last_failure().is_none());

        stats.record_delivery_outcome(false, None, 0);
        assert!(stats.time_since_last_failure().is_some());
        assert!(stats.time_since_last_success().is_none());

        stats.register_new_reading();
        stats.register_new_reading();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.new_readings, 2);
        assert_eq!(snapshot.pending_outcomes, 1);
        assert!(snapshot.seconds_since_failure.is_some());
        assert_eq!(stats.number_of_new_readings(), 2);
    }

    #[test]
    fn emit_once_writes_connection_readings() {
        let stats = StatsAggregator::new();
        let queue = TimedQueue::new();
        let counters = FakeCounters::default();
        let naming = NamingConfig {
            instance_prefix: "roof:".into(),
            ..Default::default()
        };

        for _ in 0..5 {
            stats.record_delivery_outcome(true, Some(Duration::from_millis(10)), 1);
        }
        // first emission: success rate + latency, no rates yet
        assert_eq!(stats.emit_once(&queue, &counters, &naming), 2);

        counters.lines.store(3, Ordering::SeqCst);
        counters.bytes.store(60, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        // second emission: only the rates
        assert_eq!(stats.emit_once(&queue, &counters, &naming), 2);

        let mut kinds: Vec<String> = std::iter::from_fn(|| queue.pop_oldest_nowait())
            .map(|r| r.kind().to_string())
            .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                "roof:connection:arduino_comm_bps",
                "roof:connection:arduino_comm_lps",
                "roof:connection:cloud_db_write_latency",
                "roof:connection:cloud_db_write_success_rate",
            ]
        );
    }

    #[test]
    fn emitter_skips_when_queue_full() {
        let stats = Arc::new(StatsAggregator::new());
        let queue = Arc::new(TimedQueue::new());
        let pipeline = PipelineConfig {
            max_queue_size: 1,
            ..Default::default()
        };
        let emitter = StatsEmitter::new(
            stats.clone(),
            queue.clone(),
            Arc::new(FakeCounters::default()),
            NamingConfig::default(),
            &pipeline,
        );

        for _ in 0..5 {
            stats.record_delivery_outcome(true, Some(Duration::from_millis(1)), 1);
        }
        queue.insert(Utc::now(), "reading:temperature", 1.0);

        assert_eq!(emitter.emit_cycle().unwrap(), 0);
        assert_eq!(queue.size(), 1);
        // window untouched by the skipped cycle
        assert!(stats.take_success_rate().is_some());
    }
}
