//! Operator-facing error reporting
//!
//! Configuration mistakes are worth showing verbatim; queue and runtime
//! failures get a one-line context with the detail at debug level.

/// An error that knows whether its own message is useful to an operator.
///
/// When `is_user_actionable` is `true`, `user_message` should return the
/// message to show; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    fn is_user_actionable(&self) -> bool;

    fn user_message(&self) -> Option<&str>;
}

/// Logs `error` as fatal, preferring its own message when it is actionable.
pub fn log_error_with_context<E: ContextualError>(error: &E, operation_context: &str) {
    log::error!("{}", fatal_line(error, operation_context));
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

/// Renders the line `log_error_with_context` would log at error level.
pub fn fatal_line<E: ContextualError>(error: &E, operation_context: &str) -> String {
    match error.user_message().filter(|_| error.is_user_actionable()) {
        Some(message) => format!("FATAL: {}", message),
        None => format!("FATAL: {}", operation_context),
    }
}
