//! Mock kernel route table for unit testing
//!
//! Stores routes in memory and lets tests script gateway lookups, inject
//! kernel events, and force failures without touching a real netlink socket.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::NetlinkError;
use crate::route_trait::RouteNetlink;
use crate::types::{Route, RouteEvent};

const EVENT_CHANNEL_SIZE: usize = 16;

/// In-memory stand-in for the kernel route table.
#[derive(Clone, Default)]
pub struct MockRouteNetlink {
    routes: Arc<Mutex<Vec<Route>>>,
    gateways: Arc<Mutex<HashMap<Ipv4Addr, Option<Ipv4Addr>>>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<RouteEvent>>>>,
    fail_add: Arc<AtomicBool>,
    fail_del: Arc<AtomicBool>,
    fail_lookup: Arc<AtomicBool>,
}

impl MockRouteNetlink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes currently present in the mock kernel.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().expect("mock route table poisoned").clone()
    }

    /// Pre-seed a route, as if it survived an operator crash.
    pub fn seed_route(&self, route: Route) {
        self.routes.lock().expect("mock route table poisoned").push(route);
    }

    /// Drop a route without notifying subscribers, as if an external actor
    /// raced us.
    pub fn lose_route(&self, route: &Route) {
        self.routes
            .lock()
            .expect("mock route table poisoned")
            .retain(|r| r != route);
    }

    /// Script the next-hop answer for `dest`. `None` next hop means the
    /// destination is directly connected.
    pub fn set_next_hop(&self, dest: Ipv4Addr, next_hop: Option<Ipv4Addr>) {
        self.gateways
            .lock()
            .expect("mock gateway table poisoned")
            .insert(dest, next_hop);
    }

    /// Broadcast a kernel event to every subscriber.
    pub fn emit(&self, event: RouteEvent) {
        let subscribers = self.subscribers.lock().expect("mock subscribers poisoned");
        for tx in subscribers.iter() {
            let _ = tx.try_send(event);
        }
    }

    pub fn fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_del(&self, fail: bool) {
        self.fail_del.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }
}

impl RouteNetlink for MockRouteNetlink {
    fn add_route(&self, route: &Route) -> Result<(), NetlinkError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(NetlinkError::Errno(libc::EPERM));
        }
        let mut routes = self.routes.lock().expect("mock route table poisoned");
        if routes.contains(route) {
            return Err(NetlinkError::AlreadyExists);
        }
        routes.push(*route);
        Ok(())
    }

    fn del_route(&self, route: &Route) -> Result<(), NetlinkError> {
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(NetlinkError::Errno(libc::EPERM));
        }
        let mut routes = self.routes.lock().expect("mock route table poisoned");
        if !routes.contains(route) {
            return Err(NetlinkError::NotFound);
        }
        routes.retain(|r| r != route);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<RouteEvent>, NetlinkError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        self.subscribers
            .lock()
            .expect("mock subscribers poisoned")
            .push(tx);
        Ok(rx)
    }

    fn lookup_gateway(&self, dest: Ipv4Addr) -> Result<Option<Ipv4Addr>, NetlinkError> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(NetlinkError::Errno(libc::ENETUNREACH));
        }
        let gateways = self.gateways.lock().expect("mock gateway table poisoned");
        Ok(gateways.get(&dest).copied().unwrap_or(None))
    }
}
