//! Controller-specific error types.
//!
//! Transient variants make the watcher requeue with backoff; user-input
//! problems are reported through the resource status instead and never reach
//! this type.

use netlink_route::NetlinkError;
use route_manager::RouteManagerError;
use thiserror::Error;

/// Errors that can occur in the static-route controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Route manager rejected a register/deregister request
    #[error("Route manager error: {0}")]
    RouteManager(#[from] RouteManagerError),

    /// Kernel netlink failure (gateway probe or event subscription)
    #[error("Netlink error: {0}")]
    Netlink(#[from] NetlinkError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
