//! Device access and the latest-value reading source.
//!
//! - [`device`]: transports yielding `name: value` lines (plain files / tty
//!   nodes, and serial ports behind the `instrument_serial` feature)
//! - [`reading_source`]: background reader that parses lines and caches the
//!   most recent value per sensor name

pub mod device;
pub mod reading_source;

pub use device::{device_from_config, DeviceStream, FileDevice};
pub use reading_source::{parse_line, CommCounters, LatestValue, LineKind, ReadingSource, SourceState};

#[cfg(feature = "instrument_serial")]
pub use device::SerialDevice;
