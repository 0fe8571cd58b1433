//! RouteNetlink trait for mocking
//!
//! Abstracts the kernel route table so the route manager and the reconciler
//! tests can run against an in-memory implementation.

use std::net::Ipv4Addr;

use tokio::sync::mpsc;

use crate::error::NetlinkError;
use crate::types::{Route, RouteEvent};

/// Operations the operator needs from the OS route table.
pub trait RouteNetlink: Send + Sync {
    /// Install a route. A route that is already present surfaces as
    /// `Err(NetlinkError::AlreadyExists)`, not as a generic failure.
    fn add_route(&self, route: &Route) -> Result<(), NetlinkError>;

    /// Remove a route. A route that is already gone surfaces as
    /// `Err(NetlinkError::NotFound)`.
    fn del_route(&self, route: &Route) -> Result<(), NetlinkError>;

    /// Stream of IPv4 route table changes. The stream ends when the
    /// receiver is dropped or the underlying socket fails.
    fn subscribe(&self) -> Result<mpsc::Receiver<RouteEvent>, NetlinkError>;

    /// Next hop the kernel would use to reach `dest`. `None` means the
    /// destination is directly connected (no further hop).
    fn lookup_gateway(&self, dest: Ipv4Addr) -> Result<Option<Ipv4Addr>, NetlinkError>;
}
