//! Kernel routing adapter
//!
//! A thin, stateless abstraction over the Linux rtnetlink route table:
//! add and delete routes, resolve the next hop towards an address, and
//! subscribe to kernel route change events.
//!
//! Routes carry only the fields this operator manages (destination, gateway,
//! table); everything else the kernel reports is dropped before comparison so
//! equality between an observed route and a registered route is well-defined.

pub mod client;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;
#[path = "trait.rs"]
pub mod route_trait;
pub mod types;

pub use client::NetlinkRouteClient;
pub use error::NetlinkError;
#[cfg(feature = "test-util")]
pub use mock::MockRouteNetlink;
pub use route_trait::RouteNetlink;
pub use types::{Route, RouteEvent, RouteEventKind};
