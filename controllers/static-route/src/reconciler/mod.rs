//! Reconciliation logic for the static-route controller.
//!
//! Two reconcilers share one struct:
//! - `static_route`: drives the install / refresh / delete / skip decision
//!   tree for a single StaticRoute on this node
//! - `node`: prunes departed nodes' entries from every StaticRoute status

pub mod node;
pub mod static_route;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use ipnetwork::Ipv4Network;
use netlink_route::NetlinkError;
use route_manager::RouteManager;

use crate::backoff::FibonacciBackoff;
use crate::client::ControlPlaneClient;

/// Node label carrying the hostname; appended as an implicit selector
/// requirement so list queries only ever match this node.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

const BACKOFF_MIN_SECONDS: u64 = 60;
const BACKOFF_MAX_SECONDS: u64 = 600;

/// Next-hop probe towards an address on this node's routing table.
/// `None` means directly connected. Injectable for tests; production wraps
/// the netlink `RTM_GETROUTE` lookup.
pub type GatewayLookup = Arc<dyn Fn(Ipv4Addr) -> Result<Option<Ipv4Addr>, NetlinkError> + Send + Sync>;

/// Static route management related node properties.
pub struct ManagerOptions {
    pub hostname: String,
    pub table: u8,
    pub protected_subnets: Vec<Ipv4Network>,
    pub fallback_ip: Ipv4Addr,
    pub route_manager: RouteManager,
    pub gateway_lookup: GatewayLookup,
}

/// Reconciles StaticRoute and Node resources for this node.
pub struct Reconciler {
    pub(crate) client: Box<dyn ControlPlaneClient>,
    pub(crate) options: ManagerOptions,
    /// Error backoff per resource (name -> backoff state)
    backoffs: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl Reconciler {
    pub fn new(client: impl ControlPlaneClient + 'static, options: ManagerOptions) -> Self {
        Self {
            client: Box::new(client),
            options,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.options.hostname
    }

    /// Next requeue delay for a failing resource.
    pub fn backoff_seconds(&self, resource: &str) -> u64 {
        match self.backoffs.lock() {
            Ok(mut backoffs) => backoffs
                .entry(resource.to_string())
                .or_insert_with(|| FibonacciBackoff::new(BACKOFF_MIN_SECONDS, BACKOFF_MAX_SECONDS))
                .next_backoff_seconds(),
            Err(_) => BACKOFF_MIN_SECONDS,
        }
    }

    /// Restart the backoff sequence after a successful reconcile.
    pub fn reset_backoff(&self, resource: &str) {
        if let Ok(mut backoffs) = self.backoffs.lock() {
            if let Some(backoff) = backoffs.get_mut(resource) {
                backoff.reset();
            }
        }
    }
}
