use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Returned by `wait_and_pop_or_closed` once the queue is closed and drained.
    #[error("queue is closed")]
    Closed,
}
