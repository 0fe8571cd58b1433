//! Route manager errors

use netlink_route::NetlinkError;
use thiserror::Error;

/// Errors surfaced by the route manager to its callers.
#[derive(Debug, Error)]
pub enum RouteManagerError {
    /// A route with the same name is already managed
    #[error("route with the same name already registered")]
    AlreadyRegistered,

    /// No managed route with this name
    #[error("route could not be found")]
    NotFound,

    /// The event loop has stopped; no request can be serviced
    #[error("route manager is not running")]
    Stopped,

    /// The kernel rejected the mutation
    #[error("kernel route operation failed: {0}")]
    Kernel(#[from] NetlinkError),
}
