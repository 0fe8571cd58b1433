//! Single-writer route manager
//!
//! Owns the mapping between logical route names and kernel routes. All kernel
//! mutations and the watcher list live inside one event loop; callers talk to
//! the loop through a typed request channel, so there is no locking and every
//! mutation is linearized by arrival order.
//!
//! Registered routes are monitored: when the kernel reports that a managed
//! route was deleted behind our back, every registered watcher is notified.
//! The notification is informational; the manager never re-installs routes on
//! its own.

pub mod error;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use netlink_route::{Route, RouteEvent, RouteEventKind, RouteNetlink};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub use error::RouteManagerError;

const REQUEST_CHANNEL_SIZE: usize = 16;

/// Callback interface for managed-route damage notifications.
///
/// Watchers are invoked synchronously from the event loop and must not block.
/// Identity for deregistration is the `Arc` pointer, not structural equality.
pub trait RouteWatcher: Send + Sync {
    fn route_deleted(&self, route: Route);
}

enum Request {
    RegisterRoute {
        name: String,
        route: Route,
        reply: oneshot::Sender<Result<(), RouteManagerError>>,
    },
    DeregisterRoute {
        name: String,
        reply: oneshot::Sender<Result<(), RouteManagerError>>,
    },
    RegisterWatcher {
        watcher: Arc<dyn RouteWatcher>,
    },
    DeregisterWatcher {
        watcher: Arc<dyn RouteWatcher>,
    },
}

/// Cloneable handle to the route manager event loop.
///
/// All operations are safe to call from any task; mutations block until the
/// loop has serviced them.
#[derive(Clone)]
pub struct RouteManager {
    requests: mpsc::Sender<Request>,
    registered: Arc<RwLock<HashSet<String>>>,
}

impl RouteManager {
    /// Creates the handle plus the event loop that must be driven with
    /// [`RouteManagerLoop::run`].
    pub fn new(netlink: Arc<dyn RouteNetlink>) -> (Self, RouteManagerLoop) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let registered = Arc::new(RwLock::new(HashSet::new()));
        let handle = Self {
            requests: tx,
            registered: registered.clone(),
        };
        let event_loop = RouteManagerLoop {
            netlink,
            requests: rx,
            registered,
            managed: HashMap::new(),
            watchers: Vec::new(),
        };
        (handle, event_loop)
    }

    /// True if a route by this name is currently managed. Reflects every
    /// completed register/deregister call.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered
            .read()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    /// Install `route` in the kernel and start managing it under `name`.
    /// A route the kernel already has is adopted and reported as success.
    pub async fn register_route(&self, name: &str, route: Route) -> Result<(), RouteManagerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::RegisterRoute {
                name: name.to_string(),
                route,
                reply,
            })
            .await
            .map_err(|_| RouteManagerError::Stopped)?;
        response.await.map_err(|_| RouteManagerError::Stopped)?
    }

    /// Remove the managed route `name` from the kernel and stop managing it.
    /// A route the kernel no longer has still deregisters cleanly.
    pub async fn deregister_route(&self, name: &str) -> Result<(), RouteManagerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::DeregisterRoute {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| RouteManagerError::Stopped)?;
        response.await.map_err(|_| RouteManagerError::Stopped)?
    }

    /// Subscribe `watcher` to managed-route deletion notifications.
    pub async fn register_watcher(
        &self,
        watcher: Arc<dyn RouteWatcher>,
    ) -> Result<(), RouteManagerError> {
        self.requests
            .send(Request::RegisterWatcher { watcher })
            .await
            .map_err(|_| RouteManagerError::Stopped)
    }

    /// Remove a previously registered watcher, identified by its handle.
    pub async fn deregister_watcher(
        &self,
        watcher: Arc<dyn RouteWatcher>,
    ) -> Result<(), RouteManagerError> {
        self.requests
            .send(Request::DeregisterWatcher { watcher })
            .await
            .map_err(|_| RouteManagerError::Stopped)
    }
}

/// The event loop half of the route manager. Exclusively owns the managed
/// route map and the watcher list.
pub struct RouteManagerLoop {
    netlink: Arc<dyn RouteNetlink>,
    requests: mpsc::Receiver<Request>,
    registered: Arc<RwLock<HashSet<String>>>,
    managed: HashMap<String, Route>,
    watchers: Vec<Arc<dyn RouteWatcher>>,
}

impl RouteManagerLoop {
    /// Runs until `stop` fires, the kernel event stream closes, or every
    /// handle is dropped. Returns an error only when the kernel subscription
    /// cannot be established.
    pub async fn run(
        mut self,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), netlink_route::NetlinkError> {
        let mut events = self.netlink.subscribe()?;
        info!("route manager event loop started");

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_kernel_event(event),
                    None => {
                        warn!("kernel route event stream closed");
                        break;
                    }
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }

        info!("route manager event loop stopped");
        Ok(())
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::RegisterRoute { name, route, reply } => {
                let _ = reply.send(self.register_route(name, route));
            }
            Request::DeregisterRoute { name, reply } => {
                let _ = reply.send(self.deregister_route(&name));
            }
            Request::RegisterWatcher { watcher } => self.watchers.push(watcher),
            Request::DeregisterWatcher { watcher } => {
                if let Some(index) = self
                    .watchers
                    .iter()
                    .position(|w| Arc::ptr_eq(w, &watcher))
                {
                    self.watchers.remove(index);
                }
            }
        }
    }

    fn register_route(&mut self, name: String, route: Route) -> Result<(), RouteManagerError> {
        if self.managed.contains_key(&name) {
            return Err(RouteManagerError::AlreadyRegistered);
        }
        /* EEXIST means the route is already in the kernel. There is no
        evidence whether we created it before a crash or someone else did.
        We assume it is ours and start managing it again. */
        match self.netlink.add_route(&route) {
            Ok(()) => {}
            Err(netlink_route::NetlinkError::AlreadyExists) => {
                debug!(%route, "adopting pre-existing kernel route")
            }
            Err(e) => return Err(RouteManagerError::Kernel(e)),
        }
        self.managed.insert(name.clone(), route);
        if let Ok(mut set) = self.registered.write() {
            set.insert(name);
        }
        Ok(())
    }

    fn deregister_route(&mut self, name: &str) -> Result<(), RouteManagerError> {
        let Some(route) = self.managed.get(name).copied() else {
            return Err(RouteManagerError::NotFound);
        };
        /* ESRCH means the route is already gone from the kernel, which was
        reported to the watchers, so they know. The desired postcondition
        holds either way. */
        match self.netlink.del_route(&route) {
            Ok(()) => {}
            Err(netlink_route::NetlinkError::NotFound) => {
                debug!(%route, "kernel route already removed")
            }
            Err(e) => return Err(RouteManagerError::Kernel(e)),
        }
        self.managed.remove(name);
        if let Ok(mut set) = self.registered.write() {
            set.remove(name);
        }
        Ok(())
    }

    fn handle_kernel_event(&mut self, event: RouteEvent) {
        if event.kind != RouteEventKind::Deleted {
            return;
        }
        if self.managed.values().any(|route| *route == event.route) {
            info!(route = %event.route, "managed route was deleted from the kernel");
            for watcher in &self.watchers {
                watcher.route_deleted(event.route);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ipnetwork::Ipv4Network;
    use netlink_route::MockRouteNetlink;

    use super::*;

    fn route(dst: &str, gw: [u8; 4], table: u8) -> Route {
        Route::new(
            dst.parse::<Ipv4Network>().unwrap(),
            Ipv4Addr::from(gw),
            table,
        )
    }

    fn start_manager() -> (RouteManager, Arc<MockRouteNetlink>, watch::Sender<bool>) {
        let netlink = Arc::new(MockRouteNetlink::new());
        let (manager, event_loop) = RouteManager::new(netlink.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(event_loop.run(stop_rx));
        (manager, netlink, stop_tx)
    }

    struct CountingWatcher {
        deletions: AtomicUsize,
    }

    impl CountingWatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deletions: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.deletions.load(Ordering::SeqCst)
        }
    }

    impl RouteWatcher for CountingWatcher {
        fn route_deleted(&self, _route: Route) {
            self.deletions.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn register_installs_route_and_tracks_name() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);

        assert!(!manager.is_registered("example"));
        manager.register_route("example", r).await.unwrap();
        assert!(manager.is_registered("example"));
        assert_eq!(netlink.routes(), vec![r]);
    }

    #[tokio::test]
    async fn register_twice_reports_already_registered() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);

        manager.register_route("example", r).await.unwrap();
        let err = manager.register_route("example", r).await.unwrap_err();
        assert!(matches!(err, RouteManagerError::AlreadyRegistered));
        // kernel still has exactly one route
        assert_eq!(netlink.routes().len(), 1);
    }

    #[tokio::test]
    async fn register_adopts_route_surviving_a_crash() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        netlink.seed_route(r);

        manager.register_route("example", r).await.unwrap();
        assert!(manager.is_registered("example"));
        assert_eq!(netlink.routes().len(), 1);
    }

    #[tokio::test]
    async fn register_propagates_kernel_errors_without_managing() {
        let (manager, netlink, _stop) = start_manager();
        netlink.fail_add(true);

        let err = manager
            .register_route("example", route("192.168.1.0/24", [10, 0, 0, 1], 254))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteManagerError::Kernel(_)));
        assert!(!manager.is_registered("example"));
        assert!(netlink.routes().is_empty());
    }

    #[tokio::test]
    async fn deregister_removes_route_then_reports_not_found() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        manager.register_route("example", r).await.unwrap();

        manager.deregister_route("example").await.unwrap();
        assert!(!manager.is_registered("example"));
        assert!(netlink.routes().is_empty());

        let err = manager.deregister_route("example").await.unwrap_err();
        assert!(matches!(err, RouteManagerError::NotFound));
    }

    #[tokio::test]
    async fn deregister_tolerates_externally_deleted_route() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        manager.register_route("example", r).await.unwrap();
        netlink.lose_route(&r);

        manager.deregister_route("example").await.unwrap();
        assert!(!manager.is_registered("example"));
    }

    #[tokio::test]
    async fn watcher_is_notified_once_on_managed_route_deletion() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        manager.register_route("example", r).await.unwrap();

        let watcher = CountingWatcher::new();
        manager.register_watcher(watcher.clone()).await.unwrap();
        settle().await;

        netlink.emit(RouteEvent {
            kind: RouteEventKind::Deleted,
            route: r,
        });
        settle().await;
        assert_eq!(watcher.count(), 1);
    }

    #[tokio::test]
    async fn watcher_ignores_added_events_and_foreign_routes() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        manager.register_route("example", r).await.unwrap();

        let watcher = CountingWatcher::new();
        manager.register_watcher(watcher.clone()).await.unwrap();
        settle().await;

        netlink.emit(RouteEvent {
            kind: RouteEventKind::Added,
            route: r,
        });
        netlink.emit(RouteEvent {
            kind: RouteEventKind::Deleted,
            route: route("172.16.0.0/16", [10, 0, 0, 1], 254),
        });
        settle().await;
        assert_eq!(watcher.count(), 0);
    }

    #[tokio::test]
    async fn deregistered_watcher_is_no_longer_notified() {
        let (manager, netlink, _stop) = start_manager();
        let r = route("192.168.1.0/24", [10, 0, 0, 1], 254);
        manager.register_route("example", r).await.unwrap();

        let watcher = CountingWatcher::new();
        manager.register_watcher(watcher.clone()).await.unwrap();
        manager.deregister_watcher(watcher.clone()).await.unwrap();
        settle().await;

        netlink.emit(RouteEvent {
            kind: RouteEventKind::Deleted,
            route: r,
        });
        settle().await;
        assert_eq!(watcher.count(), 0);
    }

    #[tokio::test]
    async fn concurrent_registrations_on_distinct_names_all_apply() {
        let (manager, netlink, _stop) = start_manager();

        let mut tasks = Vec::new();
        for i in 0..10u8 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let r = route(&format!("10.{}.0.0/16", i), [10, 0, 0, 1], 254);
                manager.register_route(&format!("route-{}", i), r).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(netlink.routes().len(), 10);

        for i in 0..10u8 {
            manager.deregister_route(&format!("route-{}", i)).await.unwrap();
        }
        assert!(netlink.routes().is_empty());
    }

    #[tokio::test]
    async fn stop_signal_terminates_the_loop() {
        let netlink = Arc::new(MockRouteNetlink::new());
        let (manager, event_loop) = RouteManager::new(netlink);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(event_loop.run(stop_rx));

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let err = manager
            .register_route("late", route("192.168.1.0/24", [10, 0, 0, 1], 254))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteManagerError::Stopped));
    }
}
