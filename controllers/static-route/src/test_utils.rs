//! Test utilities for unit testing reconcilers
//!
//! Provides an in-memory control plane, fixture builders, and a fully wired
//! reconciler harness running against the mock kernel route table.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crds::{StaticRoute, StaticRouteSpec};
use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelectorRequirement, ObjectMeta, Time,
};
use netlink_route::{MockRouteNetlink, RouteNetlink};
use route_manager::RouteManager;
use tokio::sync::watch;

use crate::client::ControlPlaneClient;
use crate::config::{DEFAULT_FALLBACK_IP, DEFAULT_ROUTE_TABLE};
use crate::error::ControllerError;
use crate::reconciler::{ManagerOptions, Reconciler};

pub const TEST_HOSTNAME: &str = "nodeA";

/// In-memory control plane. Selector queries return a canned node list so
/// tests control selector match results without a label evaluator.
#[derive(Clone, Default)]
pub struct MockControlPlane {
    routes: Arc<Mutex<BTreeMap<String, StaticRoute>>>,
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    selector_matches: Arc<Mutex<Vec<Node>>>,
    last_selector: Arc<Mutex<Option<String>>>,
    status_updates: Arc<Mutex<usize>>,
    fail_status_update: Arc<Mutex<bool>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_route(&self, route: StaticRoute) {
        let name = route.metadata.name.clone().expect("fixture must have a name");
        self.routes.lock().unwrap().insert(name, route);
    }

    pub fn route(&self, name: &str) -> Option<StaticRoute> {
        self.routes.lock().unwrap().get(name).cloned()
    }

    pub fn put_node(&self, node: Node) {
        let name = node.metadata.name.clone().expect("fixture must have a name");
        self.nodes.lock().unwrap().insert(name, node);
    }

    pub fn set_selector_matches(&self, nodes: Vec<Node>) {
        *self.selector_matches.lock().unwrap() = nodes;
    }

    pub fn last_selector(&self) -> Option<String> {
        self.last_selector.lock().unwrap().clone()
    }

    pub fn status_update_count(&self) -> usize {
        *self.status_updates.lock().unwrap()
    }

    pub fn fail_status_updates(&self, fail: bool) {
        *self.fail_status_update.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ControlPlaneClient for MockControlPlane {
    async fn get_static_route(&self, name: &str) -> Result<Option<StaticRoute>, ControllerError> {
        Ok(self.routes.lock().unwrap().get(name).cloned())
    }

    async fn list_static_routes(&self) -> Result<Vec<StaticRoute>, ControllerError> {
        Ok(self.routes.lock().unwrap().values().cloned().collect())
    }

    async fn update_static_route(
        &self,
        route: &StaticRoute,
    ) -> Result<StaticRoute, ControllerError> {
        let name = route.metadata.name.clone().expect("route must have a name");
        self.routes.lock().unwrap().insert(name, route.clone());
        Ok(route.clone())
    }

    async fn update_status(&self, route: &StaticRoute) -> Result<StaticRoute, ControllerError> {
        if *self.fail_status_update.lock().unwrap() {
            return Err(ControllerError::InvalidConfig(
                "injected status update failure".to_string(),
            ));
        }
        *self.status_updates.lock().unwrap() += 1;
        let name = route.metadata.name.clone().expect("route must have a name");
        let mut routes = self.routes.lock().unwrap();
        let entry = routes.entry(name).or_insert_with(|| route.clone());
        entry.status = route.status.clone();
        Ok(entry.clone())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ControllerError> {
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ControllerError> {
        *self.last_selector.lock().unwrap() = Some(label_selector.to_string());
        Ok(self.selector_matches.lock().unwrap().clone())
    }
}

/// A reconciler wired to the mock control plane and mock kernel, with its
/// route manager loop running.
pub struct TestHarness {
    pub reconciler: Arc<Reconciler>,
    pub control_plane: MockControlPlane,
    pub netlink: Arc<MockRouteNetlink>,
    _stop: watch::Sender<bool>,
}

pub fn harness() -> TestHarness {
    harness_with_protected(Vec::new())
}

pub fn harness_with_protected(protected_subnets: Vec<Ipv4Network>) -> TestHarness {
    let control_plane = MockControlPlane::new();
    let netlink = Arc::new(MockRouteNetlink::new());

    let (route_manager, event_loop) = RouteManager::new(netlink.clone());
    let (stop, stop_rx) = watch::channel(false);
    tokio::spawn(event_loop.run(stop_rx));

    let lookup = netlink.clone();
    let options = ManagerOptions {
        hostname: TEST_HOSTNAME.to_string(),
        table: DEFAULT_ROUTE_TABLE,
        protected_subnets,
        fallback_ip: DEFAULT_FALLBACK_IP,
        route_manager,
        gateway_lookup: Arc::new(move |ip| lookup.lookup_gateway(ip)),
    };

    TestHarness {
        reconciler: Arc::new(Reconciler::new(control_plane.clone(), options)),
        control_plane,
        netlink,
        _stop: stop,
    }
}

/// Helper to create a StaticRoute fixture
pub fn test_route(name: &str, subnet: &str, gateway: Option<&str>) -> StaticRoute {
    StaticRoute {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: StaticRouteSpec {
            subnet: subnet.to_string(),
            gateway: gateway.map(str::to_string),
            table: None,
            selectors: None,
        },
        status: None,
    }
}

/// Helper to create a label selector requirement
pub fn selector(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: key.to_string(),
        operator: operator.to_string(),
        values: if values.is_empty() {
            None
        } else {
            Some(values.iter().map(|v| v.to_string()).collect())
        },
    }
}

/// Helper to create a Node fixture
pub fn test_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Marks a route for deletion the way the API server would.
pub fn mark_deleted(route: &mut StaticRoute) {
    route.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
}

pub fn ip(addr: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::from(addr)
}
