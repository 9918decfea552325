//! Latest-value cache fed by a background device reader.
//!
//! The reader thread walks the state machine
//! `Closed -> Opening -> Streaming -> (failure) -> Backoff -> Opening` until the
//! source is stopped. Each nonblank line is counted; lines matching
//! `<name>: <number>` overwrite the cached value for `<name>` together with the
//! wall-clock time at which the line was read. History is never kept.
//!
//! # Example
//! ```
//! use sensor_logger::hardware::{FileDevice, ReadingSource};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let source = ReadingSource::new(Arc::new(FileDevice::new("/dev/ttyUSB0")), Duration::from_secs(30));
//! source.ingest_line("Temperature: 21.5");
//! assert_eq!(source.latest("Temperature").map(|v| v.value), Some(21.5));
//! ```

use crate::error::{LoggerError, LoggerResult};
use crate::hardware::device::DeviceStream;
use crate::shutdown::ShutdownSignal;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::io::{BufRead, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How long [`ReadingSource::stop`] waits for the reader thread.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

#[allow(clippy::expect_used)]
static LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+): (-?[0-9.]+)$").expect("Invalid line regex"));

/// Most recent value of one sensor and when it was read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestValue {
    /// Parsed value
    pub value: f64,
    /// Wall-clock time the line was read
    pub timestamp: DateTime<Utc>,
}

/// Reader thread lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Not started, or stopped
    Closed,
    /// Opening the device
    Opening,
    /// Reading lines
    Streaming,
    /// Waiting before reopening after a stream failure
    Backoff,
}

/// Classification of one raw device line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Empty after trimming; not counted
    Blank,
    /// Counted, but carries no usable value
    Damaged,
    /// A `name: value` record
    Reading {
        /// Sensor name as sent by the device
        name: String,
        /// Parsed value
        value: f64,
    },
}

/// Parse one device line (surrounding whitespace is ignored).
pub fn parse_line(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }
    let Some(captures) = LINE_PATTERN.captures(line) else {
        return LineKind::Damaged;
    };
    // "1.2.3" matches the pattern but is not a float
    match captures[2].parse::<f64>() {
        Ok(value) => LineKind::Reading {
            name: captures[1].to_string(),
            value,
        },
        Err(_) => LineKind::Damaged,
    }
}

/// Cumulative device traffic counters.
///
/// Implemented by [`ReadingSource`]; the statistics task diffs successive
/// samples to derive rates.
pub trait CommCounters: Send + Sync {
    /// Nonblank lines read since start.
    fn total_lines_read(&self) -> u64;
    /// Bytes of nonblank (trimmed) lines read since start.
    fn total_bytes_read(&self) -> u64;
}

#[derive(Debug)]
struct Shared {
    readings: RwLock<HashMap<String, LatestValue>>,
    lines_read: AtomicU64,
    parsed_lines: AtomicU64,
    bytes_read: AtomicU64,
    state: Mutex<SourceState>,
    /// Set by the reader thread as its last action
    reader_exited: Mutex<bool>,
    reader_exit: Condvar,
}

impl Shared {
    fn ingest(&self, raw: &str) -> LineKind {
        let kind = parse_line(raw);
        match &kind {
            LineKind::Blank => {}
            LineKind::Damaged => {
                self.count_line(raw);
                trace!(line = raw.trim(), "Discarding damaged line");
            }
            LineKind::Reading { name, value } => {
                self.count_line(raw);
                self.parsed_lines.fetch_add(1, Ordering::Relaxed);
                let latest = LatestValue {
                    value: *value,
                    timestamp: Utc::now(),
                };
                self.readings.write().insert(name.clone(), latest);
            }
        }
        kind
    }

    fn count_line(&self, raw: &str) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read
            .fetch_add(raw.trim().len() as u64, Ordering::Relaxed);
    }

    fn set_state(&self, state: SourceState) {
        *self.state.lock() = state;
    }

    /// Wait until the reader thread has exited or `deadline` passes.
    fn wait_reader_exit(&self, deadline: Instant) -> bool {
        let mut exited = self.reader_exited.lock();
        while !*exited {
            if self.reader_exit.wait_until(&mut exited, deadline).timed_out() {
                break;
            }
        }
        *exited
    }
}

/// Marks the reader as exited when dropped, including on panic.
struct ExitNotice<'a>(&'a Shared);

impl Drop for ExitNotice<'_> {
    fn drop(&mut self) {
        *self.0.reader_exited.lock() = true;
        self.0.reader_exit.notify_all();
    }
}

/// Owns the device reader thread and the per-name latest-value cache.
///
/// Construct one per device and share it with `Arc`. All read accessors are
/// callable from any thread.
pub struct ReadingSource {
    device: Arc<dyn DeviceStream>,
    backoff: Duration,
    shared: Arc<Shared>,
    shutdown: ShutdownSignal,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingSource")
            .field("device", &self.device.describe())
            .field("backoff", &self.backoff)
            .field("state", &self.state())
            .finish()
    }
}

impl ReadingSource {
    /// Create a source for `device`. Nothing is opened until [`start`](Self::start).
    pub fn new(device: Arc<dyn DeviceStream>, backoff: Duration) -> Self {
        Self {
            device,
            backoff,
            shared: Arc::new(Shared {
                readings: RwLock::new(HashMap::new()),
                lines_read: AtomicU64::new(0),
                parsed_lines: AtomicU64::new(0),
                bytes_read: AtomicU64::new(0),
                state: Mutex::new(SourceState::Closed),
                reader_exited: Mutex::new(true),
                reader_exit: Condvar::new(),
            }),
            shutdown: ShutdownSignal::new(),
            reader: Mutex::new(None),
        }
    }

    /// Use an externally owned shutdown signal instead of a private one.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Spawn the reader thread. A no-op while a reader is already running.
    pub fn start(&self) -> LoggerResult<()> {
        let mut reader = self.reader.lock();
        if reader.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if self.shutdown.is_triggered() {
            debug!("Reading source is shut down; not starting reader");
            return Ok(());
        }

        let shared = self.shared.clone();
        let device = self.device.clone();
        let shutdown = self.shutdown.clone();
        let backoff = self.backoff;
        *self.shared.reader_exited.lock() = false;
        let spawned = std::thread::Builder::new()
            .name("device-reader".to_string())
            .spawn(move || {
                let _notice = ExitNotice(&shared);
                reader_loop(&shared, device.as_ref(), backoff, &shutdown);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *self.shared.reader_exited.lock() = true;
                return Err(e.into());
            }
        };
        *reader = Some(handle);
        Ok(())
    }

    /// Signal the reader to stop and wait up to [`STOP_GRACE`] for it.
    ///
    /// Returns `false` if the reader is still blocked inside a device read;
    /// it is then detached and exits once the device yields or closes.
    pub fn stop(&self) -> bool {
        self.stop_timeout(STOP_GRACE)
    }

    /// [`stop`](Self::stop) with an explicit grace period.
    pub fn stop_timeout(&self, grace: Duration) -> bool {
        self.shutdown.trigger();
        let Some(handle) = self.reader.lock().take() else {
            return true;
        };
        if !self.shared.wait_reader_exit(Instant::now() + grace) {
            warn!(device = %self.device.describe(), "Device reader still blocked in read, detaching");
            return false;
        }
        if handle.join().is_err() {
            warn!("Device reader thread panicked");
        }
        self.shared.set_state(SourceState::Closed);
        true
    }

    /// Whether the reader thread is alive.
    pub fn is_running(&self) -> bool {
        self.reader
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Current reader state.
    pub fn state(&self) -> SourceState {
        *self.shared.state.lock()
    }

    /// Feed one raw line through the parser, as the reader thread does.
    pub fn ingest_line(&self, line: &str) -> LineKind {
        self.shared.ingest(line)
    }

    /// Most recent value and timestamp for `name`, if any was ever parsed.
    pub fn latest(&self, name: &str) -> Option<LatestValue> {
        self.shared.readings.read().get(name).copied()
    }

    /// Names with a cached value, sorted.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.readings.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Nonblank lines read, whether or not they parsed.
    pub fn total_lines_read(&self) -> u64 {
        self.shared.lines_read.load(Ordering::Relaxed)
    }

    /// Lines that produced a value.
    pub fn total_parsed_lines(&self) -> u64 {
        self.shared.parsed_lines.load(Ordering::Relaxed)
    }

    /// Bytes of nonblank lines read (line terminators and padding excluded).
    pub fn total_bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Relaxed)
    }
}

impl CommCounters for ReadingSource {
    fn total_lines_read(&self) -> u64 {
        ReadingSource::total_lines_read(self)
    }

    fn total_bytes_read(&self) -> u64 {
        ReadingSource::total_bytes_read(self)
    }
}

impl Drop for ReadingSource {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn reader_loop(
    shared: &Shared,
    device: &dyn DeviceStream,
    backoff: Duration,
    shutdown: &ShutdownSignal,
) {
    while !shutdown.is_triggered() {
        if let Err(e) = stream_reader(shared, device, shutdown) {
            warn!(device = %device.describe(), error = %e, "Problem while reading device");
        }
        if shutdown.is_triggered() {
            break;
        }
        shared.set_state(SourceState::Backoff);
        if shutdown.wait_timeout(backoff) {
            break;
        }
        info!(device = %device.describe(), "Re-starting device stream reader");
    }
    shared.set_state(SourceState::Closed);
    debug!(device = %device.describe(), "Device reader stopped");
}

/// Read one stream instance until it fails. `Ok` only on shutdown.
fn stream_reader(
    shared: &Shared,
    device: &dyn DeviceStream,
    shutdown: &ShutdownSignal,
) -> LoggerResult<()> {
    shared.set_state(SourceState::Opening);
    info!(device = %device.describe(), "Opening device");
    let mut stream = device.open()?;
    info!(device = %device.describe(), "Opened device");
    shared.set_state(SourceState::Streaming);

    let mut buf = Vec::new();
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        match stream.read_until(b'\n', &mut buf) {
            Ok(0) => return Err(LoggerError::StreamClosed(device.describe())),
            Ok(_) => {
                shared.ingest(&String::from_utf8_lossy(&buf));
                buf.clear();
            }
            // Partial line stays in `buf` and is completed by the next read
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e.into()),
        }
    }
}
