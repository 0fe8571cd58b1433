//! Kubernetes resource watchers.
//!
//! Two watch loops drive the reconcilers:
//! - a `kube_runtime::Controller` over StaticRoute resources, additionally
//!   triggered for every route when this node's label set changes
//! - a raw watch over Node events for the eviction reconciler, because the
//!   controller runtime does not reconcile deleted objects
//!
//! Reconcile errors requeue with a per-resource Fibonacci backoff.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crds::StaticRoute;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::{Action, Controller};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, WatchStreamExt};
use tracing::{error, info};

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;

const EVICTION_RETRY_LIMIT: u32 = 5;

/// Watches StaticRoute resources and this node's labels.
///
/// Every create/update/delete of a StaticRoute reconciles it. A label change
/// on this node resubmits every StaticRoute, because the change may flip
/// selector matches; first sight of the node and updates with an unchanged
/// label set are dropped.
pub async fn watch_static_routes(
    reconciler: Arc<Reconciler>,
    client: Client,
) -> Result<(), ControllerError> {
    let routes: Api<StaticRoute> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client);
    let node_config =
        watcher::Config::default().fields(&format!("metadata.name={}", reconciler.hostname()));

    let controller = Controller::new(routes, watcher::Config::default());
    let store = controller.store();

    let seen_labels: Mutex<HashMap<String, BTreeMap<String, String>>> = Mutex::new(HashMap::new());
    let controller = controller.watches(nodes, node_config, move |node: Node| {
        let name = node.name_any();
        let labels = node.metadata.labels.clone().unwrap_or_default();
        let Ok(mut seen) = seen_labels.lock() else {
            return Vec::new();
        };
        match seen.insert(name, labels.clone()) {
            None => Vec::new(),
            Some(previous) if previous == labels => Vec::new(),
            Some(_) => {
                info!("Node labels changed. Submitting all StaticRoute resources for reconciliation.");
                store
                    .state()
                    .iter()
                    .map(|route| ObjectRef::from_obj(route.as_ref()))
                    .collect()
            }
        }
    });

    controller
        .shutdown_on_signal()
        .run(reconcile_static_route, static_route_error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!("StaticRoute controller error: {}", e);
            }
        })
        .await;

    Ok(())
}

async fn reconcile_static_route(
    route: Arc<StaticRoute>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    let name = route.name_any();
    let action = ctx.reconcile_static_route(&name).await?;
    ctx.reset_backoff(&name);
    Ok(action)
}

fn static_route_error_policy(
    route: Arc<StaticRoute>,
    error: &ControllerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = route.name_any();
    let delay = ctx.backoff_seconds(&name);
    error!(name = %name, "Reconciliation failed, requeueing in {}s: {}", delay, error);
    Action::requeue(Duration::from_secs(delay))
}

/// Watches Node deletions and prunes the departed node's status entries.
pub async fn watch_node_evictions(
    reconciler: Arc<Reconciler>,
    client: Client,
) -> Result<(), ControllerError> {
    let nodes: Api<Node> = Api::all(client);
    let stream = watcher(nodes, watcher::Config::default()).default_backoff();
    let mut stream = std::pin::pin!(stream);

    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| ControllerError::Watch(e.to_string()))?
    {
        let watcher::Event::Delete(node) = event else {
            continue;
        };
        let name = node.name_any();
        info!(node = %name, "Node deleted, pruning its StaticRoute status entries");

        let mut backoff = FibonacciBackoff::new(1, 60);
        let mut attempts = 0;
        while let Err(e) = reconciler.reconcile_node(&name).await {
            attempts += 1;
            if attempts >= EVICTION_RETRY_LIMIT {
                error!(node = %name, "Giving up pruning StaticRoute status entries: {}", e);
                break;
            }
            error!(node = %name, "Failed to prune StaticRoute status entries, retrying: {}", e);
            tokio::time::sleep(backoff.next_backoff()).await;
        }
    }
    Ok(())
}
