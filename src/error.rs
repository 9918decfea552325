//! Custom error types for the logger.
//!
//! This module defines the primary error type, `LoggerError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to surface the few
//! failures that are allowed to escape a component.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration sources.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but
//!   is logically wrong (e.g. a zero scrape interval). Produced by validation.
//! - **`Io`**: Wraps `std::io::Error`, covering device and sink I/O.
//! - **`StreamClosed`**: The device stream reported end of data. The reading source
//!   treats this as a recoverable fault and reconnects after a backoff.
//! - **`Delivery`**: A sink failed to persist a reading.
//! - **`CycleFailed`**: A scrape or statistics cycle panicked. The periodic loop
//!   logs it, cools down and carries on.
//! - **`SerialFeatureDisabled`**: A baud rate was configured but the crate was built
//!   without the `instrument_serial` feature.
//!
//! Parse failures of individual device lines are not represented here: damaged
//! lines are dropped where they are read and never reach a caller.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LoggerResult<T> = std::result::Result<T, LoggerError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input stream {0} was terminated")]
    StreamClosed(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Cycle failed: {0}")]
    CycleFailed(String),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl From<figment::Error> for LoggerError {
    fn from(value: figment::Error) -> Self {
        LoggerError::Config(Box::new(value))
    }
}

impl LoggerError {
    /// Whether a periodic loop may keep running after this error.
    ///
    /// Everything except a broken configuration is retried by the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            LoggerError::Config(_)
                | LoggerError::Configuration(_)
                | LoggerError::SerialFeatureDisabled
        )
    }
}
