//! Main controller implementation.
//!
//! Owns the background watcher tasks and runs until the first of them exits.
//! Both watchers are expected to run for the lifetime of the process; an
//! early exit is surfaced to main for a non-zero shutdown.

use std::sync::Arc;

use kube::Client;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher;

/// Watcher tasks of the static-route controller.
pub struct Controller {
    static_route_watcher: JoinHandle<Result<(), ControllerError>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    pub fn new(client: Client, reconciler: Arc<Reconciler>) -> Self {
        info!("Initializing static-route controller");

        let static_route_watcher = {
            let reconciler = reconciler.clone();
            let client = client.clone();
            tokio::spawn(async move { watcher::watch_static_routes(reconciler, client).await })
        };

        let node_watcher =
            tokio::spawn(async move { watcher::watch_node_evictions(reconciler, client).await });

        Self {
            static_route_watcher,
            node_watcher,
        }
    }

    /// Runs until any watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("static-route controller running");

        tokio::select! {
            result = &mut self.static_route_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("StaticRoute watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("StaticRoute watcher error: {}", e)))?;
            }
            result = &mut self.node_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Node watcher error: {}", e)))?;
            }
        }

        self.static_route_watcher.abort();
        self.node_watcher.abort();
        Ok(())
    }
}
