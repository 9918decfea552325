//! In-memory buffering of readings between producers and delivery.
pub mod timed_queue;

pub use timed_queue::TimedQueue;
