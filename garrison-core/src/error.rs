use thiserror::Error;

/// Error kinds for the log-ingestion core.
///
/// Only construction-time failures and explicit lifecycle-call failures
/// reach a caller as `Err`. Runtime transport failures, parser non-matches,
/// and cache unavailability are handled internally (logged, folded into
/// metrics, or treated as fail-open) and never take this path — see the
/// module docs on [`crate::supervisor`] and [`crate::store`].
#[derive(Error, Debug)]
pub enum GarrisonError {
    #[error("invalid log source configuration: {0}")]
    InvalidConfig(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("log file not found: {0}")]
    FileNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("server {0} not found")]
    NotFound(crate::ids::ServerId),

    #[error("server {0} is already disconnected")]
    AlreadyDisconnected(crate::ids::ServerId),

    #[error("reconnect delayed, retry in {remaining:?}")]
    ReconnectDelayed { remaining: std::time::Duration },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("watch() called twice on the same log source")]
    AlreadyWatching,
}

pub type Result<T> = std::result::Result<T, GarrisonError>;
