//! Control-plane client abstraction
//!
//! The reconcilers never touch `kube::Api` directly; they talk through this
//! trait so unit tests can run against an in-memory control plane.

use async_trait::async_trait;
use crds::StaticRoute;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;

use crate::error::ControllerError;

/// The subset of control-plane operations the reconcilers need.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn get_static_route(&self, name: &str) -> Result<Option<StaticRoute>, ControllerError>;
    async fn list_static_routes(&self) -> Result<Vec<StaticRoute>, ControllerError>;
    async fn update_static_route(&self, route: &StaticRoute)
        -> Result<StaticRoute, ControllerError>;
    async fn update_status(&self, route: &StaticRoute) -> Result<StaticRoute, ControllerError>;
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ControllerError>;
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ControllerError>;
}

/// Production implementation backed by the Kubernetes API server.
pub struct KubeControlPlane {
    routes: Api<StaticRoute>,
    nodes: Api<Node>,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self {
            routes: Api::all(client.clone()),
            nodes: Api::all(client),
        }
    }

    fn name_of(route: &StaticRoute) -> Result<&str, ControllerError> {
        route.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("StaticRoute missing metadata.name".to_string())
        })
    }
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlane {
    async fn get_static_route(&self, name: &str) -> Result<Option<StaticRoute>, ControllerError> {
        Ok(self.routes.get_opt(name).await?)
    }

    async fn list_static_routes(&self) -> Result<Vec<StaticRoute>, ControllerError> {
        Ok(self.routes.list(&ListParams::default()).await?.items)
    }

    async fn update_static_route(
        &self,
        route: &StaticRoute,
    ) -> Result<StaticRoute, ControllerError> {
        let name = Self::name_of(route)?;
        Ok(self
            .routes
            .replace(name, &PostParams::default(), route)
            .await?)
    }

    async fn update_status(&self, route: &StaticRoute) -> Result<StaticRoute, ControllerError> {
        let name = Self::name_of(route)?;
        let data = serde_json::to_vec(route)?;
        Ok(self
            .routes
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ControllerError> {
        Ok(self.nodes.get_opt(name).await?)
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ControllerError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.nodes.list(&params).await?.items)
    }
}
