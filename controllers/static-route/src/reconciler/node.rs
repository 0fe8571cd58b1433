//! Node eviction reconciler
//!
//! When a node leaves the cluster its per-node entries would linger in every
//! StaticRoute status forever, keeping finalizers alive. This reconciler is
//! the cluster-wide garbage collector for those entries. It never touches
//! kernel state; the departed node's kernel is gone with it.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{error, info};

use super::Reconciler;
use crate::error::ControllerError;
use crate::wrapper::StaticRouteExt;

impl Reconciler {
    /// Triggered for node events. Nodes that still exist need no action;
    /// deletion is detected by the failed fetch.
    pub async fn reconcile_node(&self, node_name: &str) -> Result<Action, ControllerError> {
        if self.client.get_node(node_name).await?.is_some() {
            return Ok(Action::await_change());
        }
        self.evict_node(node_name).await?;
        Ok(Action::await_change())
    }

    /// Remove `node_name`'s entry from the status of every StaticRoute.
    pub async fn evict_node(&self, node_name: &str) -> Result<(), ControllerError> {
        let routes = self.client.list_static_routes().await.map_err(|e| {
            error!("Unable to fetch StaticRoute resources: {}", e);
            e
        })?;

        for mut route in routes {
            if !route.remove_from_status(node_name) {
                continue;
            }
            info!(route = %route.name_any(), node = %node_name, "Found the node to delete");
            self.client.update_status(&route).await.map_err(|e| {
                error!(route = %route.name_any(), "Unable to update the StaticRoute status: {}", e);
                e
            })?;
        }
        Ok(())
    }
}
