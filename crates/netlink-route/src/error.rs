//! Kernel routing adapter errors

use thiserror::Error;

/// Errors that can occur when talking rtnetlink to the kernel.
///
/// `AlreadyExists` and `NotFound` are distinguished outcomes rather than
/// failures: callers decide whether the desired postcondition is already met.
#[derive(Debug, Error)]
pub enum NetlinkError {
    /// The kernel already has this route (EEXIST)
    #[error("route already exists in the kernel")]
    AlreadyExists,

    /// The kernel has no such route (ESRCH)
    #[error("no such route in the kernel")]
    NotFound,

    /// Socket-level failure
    #[error("netlink socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A kernel message could not be decoded
    #[error("failed to decode netlink message: {0}")]
    Decode(String),

    /// The kernel refused the request with some other errno
    #[error("kernel refused the request: errno {0}")]
    Errno(i32),

    /// Built without Linux netlink support
    #[error("netlink route operations are only supported on linux")]
    Unsupported,
}
