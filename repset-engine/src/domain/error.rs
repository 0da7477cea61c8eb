use thiserror::Error;

use crate::domain::models::InvalidTransition;

/// Failure reported by a persistence gateway.
///
/// The kind matters: transient failures are worth retrying, permanent
/// ones are not. `is_transient` is the single place that classification
/// lives, and the auto-save queue retries nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The backend could not be reached or answered with a momentary
    /// server-side error.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The backend rejected the payload; retrying cannot succeed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("unknown gateway error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Helper to convert any error into an unknown gateway error.
    pub fn unknown(err: impl ToString) -> Self {
        Self::Unknown(err.to_string())
    }

    /// Whether a retry has a chance of succeeding. `Unknown` counts as
    /// transient so unclassified backend hiccups still get the retry
    /// budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Unknown(_)
        )
    }
}

/// Failure of a session controller operation. Everything the controller
/// can go wrong with is captured here and also recorded on the
/// controller's `last_error` field; nothing panics past the operation
/// boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// A checkpoint flush left writes undelivered.
    #[error("pending saves could not be delivered")]
    UnsavedChanges,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
