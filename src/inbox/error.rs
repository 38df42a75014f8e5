//! Inbox Error Types

use crate::core::error_handling::ContextualError;
use crate::deliver::DeliverError;

#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("inbox {service} is closed")]
    Closed { service: String },

    #[error("full queue {service} with {size} entries after {timeout_ms}ms at message {message}")]
    QueueFull {
        service: String,
        size: usize,
        timeout_ms: u128,
        message: String,
    },

    #[error("inbox {service} not active after {waited_ms}ms")]
    InitTimeout { service: String, waited_ms: u128 },

    #[error(transparent)]
    Deliver(#[from] DeliverError),
}

impl InboxError {
    pub(crate) fn closed(service: &str) -> Self {
        Self::Closed {
            service: service.to_string(),
        }
    }
}

impl ContextualError for InboxError {
    fn is_user_actionable(&self) -> bool {
        match self {
            InboxError::Deliver(err) => err.is_user_actionable(),
            _ => false,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            InboxError::Deliver(err) => err.user_message(),
            _ => None,
        }
    }
}

pub type InboxResult<T> = Result<T, InboxError>;
