//! # Sensor Logger
//!
//! Reads `name: value` lines from a weather-station device, keeps the latest
//! value per sensor, periodically forwards changed values into an in-memory
//! timestamp-ordered queue and drains that queue into a pluggable sink. A
//! second periodic task records link-health statistics (delivery success
//! rate, write latency, device byte and line rates) into the same queue.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-backed [`LoggerConfig`](config::LoggerConfig) (TOML file plus
//!   `SENSOR_LOGGER_` environment overrides) and its validation.
//! - **`data`**: the [`TimedQueue`](data::TimedQueue), a blocking priority queue
//!   ordered by reading timestamp.
//! - **`error`**: the crate-wide [`LoggerError`](error::LoggerError).
//! - **`hardware`**: device transports and the [`ReadingSource`](hardware::ReadingSource).
//! - **`logging`**: tracing subscriber setup.
//! - **`pipeline`**: the scraper, statistics emitter, delivery workers and the
//!   [`Pipeline`](pipeline::Pipeline) that wires them together.
//! - **`reading`**: the [`Reading`](reading::Reading) record.
//! - **`shutdown`**: cancellation shared by threads and async tasks.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod pipeline;
pub mod reading;
pub mod shutdown;
