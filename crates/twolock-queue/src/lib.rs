//! Two-lock concurrent FIFO queue
//!
//! - `queue`: unbounded MPMC queue with split front/back locking, a sentinel
//!   tail node and blocking pops on a condition variable
//! - `stats`: push/pop counter snapshots
//! - `error`: error returned once a closed queue is drained

pub mod error;
pub mod queue;
pub mod stats;

pub use error::QueueError;
pub use queue::ConcurrentQueue;
pub use stats::QueueStats;
