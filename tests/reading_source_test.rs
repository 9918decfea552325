//! Integration tests for the background device reader.

use sensor_logger::hardware::{DeviceStream, FileDevice, ReadingSource, SourceState};
use std::io::{self, BufRead, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses.
fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Serves a fixed script of lines per open, counting opens.
struct ScriptedDevice {
    script: Vec<&'static str>,
    opens: AtomicUsize,
}

impl DeviceStream for ScriptedDevice {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let body = self.script.join("\n") + "\n";
        Ok(Box::new(Cursor::new(body.into_bytes())))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[test]
fn test_reads_file_and_reconnects_after_eof() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Temperature: 21.5").unwrap();
    writeln!(file, "Humidity: 40.0").unwrap();
    file.flush().unwrap();

    let source = ReadingSource::new(
        Arc::new(FileDevice::new(file.path())),
        Duration::from_millis(50),
    );
    source.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || source
        .latest("Humidity")
        .is_some()));
    assert_eq!(source.latest("Temperature").unwrap().value, 21.5);

    // EOF ends the stream; after the backoff the file is reopened from the start
    writeln!(file, "Temperature: 23.0").unwrap();
    file.flush().unwrap();
    assert!(wait_for(Duration::from_secs(5), || source
        .latest("Temperature")
        .map(|v| v.value)
        == Some(23.0)));

    assert!(source.stop());
    assert!(!source.is_running());
    assert_eq!(source.state(), SourceState::Closed);
}

#[test]
fn test_damaged_and_blank_lines_are_handled() {
    let device = Arc::new(ScriptedDevice {
        script: vec!["Pressure: 1013.2", "", "noise without colon", "Pressure: x", "  "],
        opens: AtomicUsize::new(0),
    });
    let source = ReadingSource::new(device.clone(), Duration::from_secs(3600));
    source.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || source.state() == SourceState::Backoff));
    assert_eq!(source.latest("Pressure").unwrap().value, 1013.2);
    assert_eq!(source.total_lines_read(), 3);
    assert_eq!(source.total_parsed_lines(), 1);
    assert_eq!(device.opens.load(Ordering::SeqCst), 1);

    // stop interrupts the long backoff promptly
    let started = Instant::now();
    assert!(source.stop());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_missing_device_keeps_retrying() {
    let source = ReadingSource::new(
        Arc::new(FileDevice::new("/nonexistent/ttyUSB42")),
        Duration::from_millis(20),
    );
    source.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || source.state() == SourceState::Backoff));
    assert!(source.is_running());
    assert!(source.latest("Temperature").is_none());

    assert!(source.stop());
}

#[test]
fn test_start_is_idempotent_and_stop_is_final() {
    let device = Arc::new(ScriptedDevice {
        script: vec!["Water level: 12.5"],
        opens: AtomicUsize::new(0),
    });
    let source = ReadingSource::new(device.clone(), Duration::from_secs(3600));
    source.start().unwrap();
    source.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || source.state() == SourceState::Backoff));
    assert_eq!(device.opens.load(Ordering::SeqCst), 1);

    assert!(source.stop());
    source.start().unwrap();
    assert!(!source.is_running());
}
