//! Delivery Error Types

use crate::core::error_handling::ContextualError;
use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum DeliverError {
    #[error("Delivery failed: {message}")]
    Handler { message: String },

    #[error("Failed to launch worker run: {message}")]
    Launch { message: String },

    #[error("Invalid delivery configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Illegal worker transition {event} from {state}")]
    IllegalTransition { state: String, event: String },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl DeliverError {
    /// Wraps any displayable failure raised by a delivery handler.
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler {
            message: message.to_string(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl ContextualError for DeliverError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, DeliverError::InvalidConfig { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            DeliverError::InvalidConfig { message } => Some(message),
            _ => None,
        }
    }
}

/// Result type for delivery operations
pub type DeliverResult<T> = Result<T, DeliverError>;
