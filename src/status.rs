//! Status codes shared by every operation in the library.
//!
//! The set is closed and ordered: the plugin pipeline aggregates the
//! results of its three phases by keeping the numerically highest code,
//! so `Failure` must sort last and `Success` first.

use serde::{Deserialize, Serialize};

/// Result code returned by library operations and plugin callbacks.
///
/// The numeric ordering is part of the contract: when several plugins
/// handle the same operation the aggregated outcome is the maximum of the
/// individual codes, which makes any error surface over `Success`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    thiserror::Error,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    /// Operation completed.
    #[error("success")]
    Success = 0,
    /// Fire-and-forget execution was started but not awaited.
    #[error("invoked")]
    Invoked,
    /// An argument to the call itself was invalid.
    #[error("invalid parameter")]
    BadParameter,
    /// The request was well-formed but cannot be satisfied.
    #[error("bad request")]
    BadRequest,
    /// An executed command or callback reported failure.
    #[error("execution error")]
    ExecutionError,
    /// The named entity already exists.
    #[error("already exists")]
    Exists,
    /// A file could not be opened.
    #[error("file open failed")]
    FileOpenFailed,
    /// A capacity bound was reached.
    #[error("storage is full")]
    Full,
    /// Reading or writing external data failed.
    #[error("input/output error")]
    IoError,
    /// An allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// The caller lacks permission.
    #[error("permission denied")]
    NoPermission,
    /// A file or plugin is not executable/loadable.
    #[error("not executable")]
    NotExecutable,
    /// The named entity does not exist.
    #[error("not found")]
    NotFound,
    /// The library (or entity) has not been initialized.
    #[error("not initialized")]
    NotInitialized,
    /// A value lies outside its permitted interval.
    #[error("value out of range")]
    OutOfRange,
    /// Input data could not be parsed.
    #[error("error parsing message")]
    ParseError,
    /// A deadline elapsed before the operation finished.
    #[error("timed out")]
    TimedOut,
    /// Transient condition, the caller may retry.
    #[error("try again")]
    TryAgain,
    /// The operation or algorithm is not supported.
    #[error("not supported")]
    NotSupported,
    /// Internal error; kept last so it dominates aggregation.
    #[error("internal error")]
    Failure,
}

impl Status {
    /// Human-readable message for the code, e.g. for diagnostics sent to
    /// the cloud alongside a failed request.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_failure_last() {
        assert!(Status::Success < Status::Invoked);
        assert!(Status::ExecutionError > Status::Success);
        assert!(Status::Failure > Status::NotSupported);
        assert_eq!(
            [Status::Success, Status::ExecutionError, Status::Invoked]
                .into_iter()
                .max(),
            Some(Status::ExecutionError)
        );
    }

    #[test]
    fn messages_match_the_wire_wording() {
        assert_eq!(Status::Success.message(), "success");
        assert_eq!(Status::BadParameter.message(), "invalid parameter");
        assert_eq!(Status::Full.message(), "storage is full");
        assert_eq!(Status::Failure.message(), "internal error");
    }
}
