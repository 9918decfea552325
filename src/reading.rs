//! The unit of data flowing through the pipeline.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single named measurement with its observation time.
///
/// Sensor readings and synthetic connection-quality metrics share this shape;
/// they differ only in the category prefix embedded in `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    kind: String,
    value: f64,
}

impl Reading {
    /// Create a reading.
    pub fn new(timestamp: DateTime<Utc>, kind: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
            value,
        }
    }

    /// Observation time (UTC).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Fully-qualified kind, e.g. `station:reading:humidity`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Measured value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Split into `(timestamp, kind, value)`.
    pub fn into_parts(self) -> (DateTime<Utc>, String, f64) {
        (self.timestamp, self.kind, self.value)
    }
}
