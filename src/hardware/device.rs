//! Line-oriented device transports.
use crate::config::DeviceConfig;
use crate::error::LoggerResult;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

/// A source of `name: value` lines that can be (re)opened on demand.
///
/// Each call to [`open`](DeviceStream::open) starts a fresh stream; the reading
/// source calls it again after every stream failure.
pub trait DeviceStream: Send + Sync {
    /// Open a new stream instance.
    fn open(&self) -> io::Result<Box<dyn BufRead + Send>>;

    /// Human-readable identification for logs.
    fn describe(&self) -> String;
}

/// Reads lines from a path: a tty node, a FIFO or a regular file.
#[derive(Debug, Clone)]
pub struct FileDevice {
    path: PathBuf,
}

impl FileDevice {
    /// Create a device for `path`. Nothing is opened until [`DeviceStream::open`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DeviceStream for FileDevice {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serial port opened through the `serialport` crate.
///
/// Read timeouts surface as `ErrorKind::TimedOut` and are retried by the
/// reading source rather than treated as end of stream.
#[cfg(feature = "instrument_serial")]
#[derive(Debug, Clone)]
pub struct SerialDevice {
    port_name: String,
    baud_rate: u32,
    timeout: std::time::Duration,
}

#[cfg(feature = "instrument_serial")]
impl SerialDevice {
    /// Create a serial device description.
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: std::time::Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
        }
    }
}

#[cfg(feature = "instrument_serial")]
impl DeviceStream for SerialDevice {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        let port = serialport::new(self.port_name.as_str(), self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        Ok(Box::new(BufReader::new(port)))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}

/// Build the configured transport.
///
/// A configured baud rate selects the serial transport; without the
/// `instrument_serial` feature that is an error.
pub fn device_from_config(config: &DeviceConfig) -> LoggerResult<Arc<dyn DeviceStream>> {
    match config.baud_rate {
        None => Ok(Arc::new(FileDevice::new(config.path.clone()))),
        #[cfg(feature = "instrument_serial")]
        Some(baud_rate) => Ok(Arc::new(SerialDevice::new(
            config.path.to_string_lossy(),
            baud_rate,
            config.read_timeout,
        ))),
        #[cfg(not(feature = "instrument_serial"))]
        Some(_) => Err(crate::error::LoggerError::SerialFeatureDisabled),
    }
}
