//! Health checker error types.

use thiserror::Error;

/// Result type alias for checker construction.
pub type CheckerResult<T> = Result<T, CheckerError>;

/// Errors that can occur while constructing a health checker.
///
/// These are configuration errors: the manager logs them and surfaces
/// an absent checker, never a fault. Probe failures are not errors at
/// all; they feed the hysteresis as `touched=false`.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("checker init failed: {0}")]
    Init(#[from] anyhow::Error),

    #[error("missing required checker arg: {0}")]
    MissingArg(&'static str),
}
