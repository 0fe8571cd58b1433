//! Route value types shared between the adapter and its callers.

use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

/// Just enough data to manage an IP route from user code.
///
/// Equality covers exactly these three fields. Kernel messages carry many
/// more properties (protocol, scope, oif, ...); the adapter zeroes them out
/// by never parsing them into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dst: Ipv4Network,
    pub gw: Ipv4Addr,
    pub table: u8,
}

impl Route {
    /// Builds a route with the destination normalized to its network base
    /// address, so "10.5.1.7/16" and "10.5.0.0/16" compare equal.
    pub fn new(dst: Ipv4Network, gw: Ipv4Addr, table: u8) -> Self {
        // prefix comes from an already-valid network, so this cannot fail
        let dst = Ipv4Network::new(dst.network(), dst.prefix()).unwrap_or(dst);
        Self { dst, gw, table }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} table {}", self.dst, self.gw, self.table)
    }
}

/// What happened to a kernel route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEventKind {
    Added,
    Deleted,
}

/// One kernel route table change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEvent {
    pub kind: RouteEventKind,
    pub route: Route,
}
