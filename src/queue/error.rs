//! Queue Error Types

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid ring capacity {capacity}: must be a power of two and at least 2")]
    InvalidCapacity { capacity: usize },

    #[error("Invalid counter group size {size}: need at least 2 counters")]
    InvalidCounterGroup { size: usize },

    #[error("Invalid resizing bounds: initial {initial} must not exceed maximum {max}")]
    InvalidBounds { initial: usize, max: usize },

    #[error("Queue is closed")]
    Closed,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
