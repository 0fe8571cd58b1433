//! Static Route Controller
//!
//! Per-node operator that reconciles StaticRoute resources against the
//! kernel routing table: installs declared routes, monitors them for
//! external tampering, reports per-node status back into the resource, and
//! drains cleanly on deletion. One instance runs on every node; the status
//! document is the meeting point of all of them.

mod backoff;
mod client;
mod config;
mod controller;
mod error;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;
mod wrapper;
#[cfg(test)]
mod wrapper_test;

use std::env;
use std::sync::Arc;

use kube::Client;
use netlink_route::{NetlinkRouteClient, RouteNetlink};
use route_manager::RouteManager;
use tokio::sync::watch;
use tracing::{error, info};

use crate::client::KubeControlPlane;
use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use crate::reconciler::{ManagerOptions, Reconciler};

const CRD_GROUP: &str = "static-route.ibm.com";
const CRD_KIND: &str = "StaticRoute";

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting static-route controller v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env(env::vars())?;
    info!("Configuration:");
    info!("  Node hostname: {}", config.hostname);
    info!("  Target table: {}", config.table);
    info!("  Fallback IP for gateway selection: {}", config.fallback_ip);
    for subnet in &config.protected_subnets {
        info!("  Protected subnet: {}", subnet);
    }

    let client = Client::try_default().await?;
    ensure_crd_installed(&client).await?;

    let netlink = Arc::new(NetlinkRouteClient::new());
    let (route_manager, manager_loop) = RouteManager::new(netlink.clone());
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut manager_task = tokio::spawn(manager_loop.run(stop_rx));

    let lookup_client = netlink.clone();
    let options = ManagerOptions {
        hostname: config.hostname.clone(),
        table: config.table,
        protected_subnets: config.protected_subnets.clone(),
        fallback_ip: config.fallback_ip,
        route_manager,
        gateway_lookup: Arc::new(move |ip| lookup_client.lookup_gateway(ip)),
    };
    let reconciler = Arc::new(Reconciler::new(KubeControlPlane::new(client.clone()), options));

    let controller = Controller::new(client, reconciler);

    let result = tokio::select! {
        result = controller.run() => result,
        result = &mut manager_task => {
            // the manager loop runs for the process lifetime; an early exit
            // is a fatal condition (e.g. kernel subscription failure)
            return match result {
                Ok(Ok(())) => Err(ControllerError::Watch(
                    "route manager event loop exited unexpectedly".to_string(),
                )),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(ControllerError::Watch(format!(
                    "route manager task panicked: {}",
                    e
                ))),
            };
        }
    };

    let _ = stop_tx.send(true);
    match manager_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Route manager exited with error: {}", e),
        Err(e) => error!("Route manager task failed: {}", e),
    }

    info!("static-route controller shut down");
    result
}

/// The operator is useless without its CRD; refuse to start rather than
/// watch a kind the API server does not serve.
async fn ensure_crd_installed(client: &Client) -> Result<(), ControllerError> {
    let discovery = kube::Discovery::new(client.clone())
        .filter(&[CRD_GROUP])
        .run()
        .await?;
    let found = discovery.groups().any(|group| {
        group.name() == CRD_GROUP
            && group
                .recommended_resources()
                .iter()
                .any(|(resource, _)| resource.kind == CRD_KIND)
    });
    if !found {
        return Err(ControllerError::InvalidConfig(
            "CRD not found: staticroutes.static-route.ibm.com".to_string(),
        ));
    }
    Ok(())
}
