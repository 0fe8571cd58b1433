//! StaticRoute reconciler
//!
//! One invocation decides between install, refresh, delete, and skip for one
//! StaticRoute on this node, mutates kernel state through the route manager,
//! and mirrors the result into the resource's per-node status. The status
//! write happens in a single finalize step on every exit path unless a branch
//! explicitly suppresses it.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use netlink_route::Route;
use route_manager::RouteManagerError;
use tracing::{error, info, warn};

use super::{Reconciler, HOSTNAME_LABEL};
use crate::error::ControllerError;
use crate::wrapper::StaticRouteExt;
use crds::StaticRoute;

const PROTECTED_SUBNET_ERROR: &str = "Given subnet overlaps with some protected subnet";
const NOT_ROUTABLE_ERROR: &str = "Given gateway IP is not directly routable, cannot setup the route";
const INVALID_GATEWAY_ERROR: &str = "Invalid gateway found in Spec";

/// Terminal states of one reconcile pass. Only `Updated` asks the harness
/// for an immediate requeue; transient failures travel as errors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    OverlapsProtected,
    InvalidGateway,
    NotRoutable,
    GatewayNotDiscovered,
    WrongSelector,
    SelectorSkip,
    AlreadyDeleted,
    Deleted,
    Updated,
    InvalidSubnet,
    Installed,
}

impl Outcome {
    fn into_action(self) -> Action {
        match self {
            Outcome::Updated => Action::requeue(Duration::ZERO),
            _ => Action::await_change(),
        }
    }
}

enum GatewaySelection {
    Resolved(Ipv4Addr),
    Invalid,
    NotRoutable { gateway: Ipv4Addr, next_hop: Ipv4Addr },
    NotDiscovered,
}

enum SelectorCheck {
    Matches,
    NoMatch,
    Malformed,
}

impl Reconciler {
    pub async fn reconcile_static_route(&self, name: &str) -> Result<Action, ControllerError> {
        info!(node = %self.options.hostname, name = %name, "Reconciling StaticRoute");

        let Some(mut route) = self.client.get_static_route(name).await? else {
            info!(name = %name, "Object not found. Probably deleted meanwhile");
            return Ok(Action::await_change());
        };

        // until a gateway is resolved the status records 0.0.0.0
        let mut gateway = Ipv4Addr::UNSPECIFIED;
        let mut report_status = true;

        let result = self
            .run_pipeline(&mut route, &mut gateway, &mut report_status)
            .await;

        if report_status {
            let message = match &result {
                Ok(Outcome::OverlapsProtected) => Some(PROTECTED_SUBNET_ERROR.to_string()),
                Ok(Outcome::NotRoutable) => Some(NOT_ROUTABLE_ERROR.to_string()),
                Ok(Outcome::InvalidGateway) => Some(INVALID_GATEWAY_ERROR.to_string()),
                Err(e) => Some(e.to_string()),
                Ok(_) => None,
            };
            if !route.status_matches(&self.options.hostname, gateway, message.as_deref()) {
                route.remove_from_status(&self.options.hostname);
                if route.add_to_status(&self.options.hostname, gateway, message.as_deref()) {
                    info!(name = %name, status = ?route.status, "Updating the StaticRoute status");
                    if let Err(update_error) = self.client.update_status(&route).await {
                        error!(name = %name, "Failed to update the StaticRoute status: {}", update_error);
                        return Err(update_error);
                    }
                }
            }
        }

        result.map(Outcome::into_action)
    }

    async fn run_pipeline(
        &self,
        route: &mut StaticRoute,
        gateway: &mut Ipv4Addr,
        report_status: &mut bool,
    ) -> Result<Outcome, ControllerError> {
        let hostname = self.options.hostname.clone();

        if route.is_protected(&self.options.protected_subnets) {
            info!(subnet = %route.spec.subnet, "Subnet overlaps some protected subnet");
            return Ok(Outcome::OverlapsProtected);
        }

        match self.select_gateway(route)? {
            GatewaySelection::Resolved(resolved) => *gateway = resolved,
            GatewaySelection::Invalid => {
                error!(gateway = ?route.spec.gateway, "Invalid gateway found in Spec");
                return Ok(Outcome::InvalidGateway);
            }
            GatewaySelection::NotRoutable {
                gateway: unreachable,
                next_hop,
            } => {
                *gateway = unreachable;
                error!(next_hop = %next_hop, "Gateway IP is not directly routable");
                if route.metadata.deletion_timestamp.is_some() {
                    // a broken gateway must not block the drain
                    *report_status = false;
                    if !route.remove_from_status(&hostname) {
                        return Ok(Outcome::AlreadyDeleted);
                    }
                    self.delete_operation(route).await?;
                    return Ok(Outcome::Deleted);
                }
                return Ok(Outcome::NotRoutable);
            }
            GatewaySelection::NotDiscovered => {
                warn!(
                    fallback = %self.options.fallback_ip,
                    "No next hop for the fallback IP, cannot select a default gateway"
                );
                return Ok(Outcome::GatewayNotDiscovered);
            }
        }

        let mut selector_no_longer_matches = false;
        if let Some(selectors) = route.spec.selectors.clone().filter(|s| !s.is_empty()) {
            info!(selectors = ?selectors, "Node selector found");
            match self.validate_node_by_selector(&selectors).await? {
                SelectorCheck::Matches => {}
                SelectorCheck::Malformed => {
                    info!("There is something wrong with the node selector");
                    return Ok(Outcome::WrongSelector);
                }
                SelectorCheck::NoMatch => {
                    *report_status = false;
                    if !route.already_in_status(&hostname) {
                        info!("Node not found with the given selectors");
                        return Ok(Outcome::SelectorSkip);
                    }
                    info!("Node labels likely changed and the resource no longer applies to this node");
                    selector_no_longer_matches = true;
                }
            }
        }

        let is_changed = route.is_changed(&hostname, &gateway.to_string(), &route.spec.selectors);
        info!(changed = is_changed, "The resource is");

        if route.metadata.deletion_timestamp.is_some() || is_changed || selector_no_longer_matches {
            *report_status = false;
            if !route.remove_from_status(&hostname) {
                return Ok(Outcome::AlreadyDeleted);
            }
            self.delete_operation(route).await?;
            if is_changed {
                return Ok(Outcome::Updated);
            }
            return Ok(Outcome::Deleted);
        }

        self.add_operation(route, *gateway).await
    }

    fn select_gateway(&self, route: &StaticRoute) -> Result<GatewaySelection, ControllerError> {
        match route.gateway() {
            Some(gateway) => {
                // a non-nil next hop means another router sits in between
                match (self.options.gateway_lookup)(gateway)? {
                    Some(next_hop) => Ok(GatewaySelection::NotRoutable { gateway, next_hop }),
                    None => Ok(GatewaySelection::Resolved(gateway)),
                }
            }
            None if route
                .spec
                .gateway
                .as_deref()
                .is_some_and(|gateway| !gateway.is_empty()) =>
            {
                Ok(GatewaySelection::Invalid)
            }
            None => match (self.options.gateway_lookup)(self.options.fallback_ip)? {
                Some(discovered) => Ok(GatewaySelection::Resolved(discovered)),
                None => Ok(GatewaySelection::NotDiscovered),
            },
        }
    }

    async fn validate_node_by_selector(
        &self,
        selectors: &[LabelSelectorRequirement],
    ) -> Result<SelectorCheck, ControllerError> {
        let mut requirements = selectors.to_vec();
        requirements.push(LabelSelectorRequirement {
            key: HOSTNAME_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![self.options.hostname.clone()]),
        });

        let mut parts = Vec::with_capacity(requirements.len());
        for requirement in &requirements {
            match requirement_to_selector(requirement) {
                Some(part) => parts.push(part),
                None => {
                    info!(requirement = ?requirement, "There is something wrong with the node selector operator");
                    return Ok(SelectorCheck::Malformed);
                }
            }
        }

        let nodes = self
            .client
            .list_nodes(&parts.join(","))
            .await
            .map_err(|e| {
                error!("Failed to fetch nodes: {}", e);
                e
            })?;
        if nodes.is_empty() {
            Ok(SelectorCheck::NoMatch)
        } else {
            Ok(SelectorCheck::Matches)
        }
    }

    async fn delete_operation(&self, route: &mut StaticRoute) -> Result<(), ControllerError> {
        let name = route.name_any();
        info!(name = %name, "Deregistering route");
        match self.options.route_manager.deregister_route(&name).await {
            Ok(()) | Err(RouteManagerError::NotFound) => {}
            Err(e) => {
                error!(name = %name, "Unable to deregister route: {}", e);
                return Err(e.into());
            }
        }

        info!(name = %name, status = ?route.status, "Deleted status for StaticRoute");
        *route = self.client.update_status(route).await.map_err(|e| {
            error!(name = %name, "Unable to update status of the StaticRoute: {}", e);
            e
        })?;

        // we were the last one
        if route.node_status().is_empty() {
            info!(name = %name, "Removing finalizer for StaticRoute");
            route.metadata.finalizers = None;
            *route = self.client.update_static_route(route).await.map_err(|e| {
                error!(name = %name, "Unable to delete finalizers: {}", e);
                e
            })?;
        }
        Ok(())
    }

    async fn add_operation(
        &self,
        route: &mut StaticRoute,
        gateway: Ipv4Addr,
    ) -> Result<Outcome, ControllerError> {
        let name = route.name_any();
        if route.set_finalizer() {
            info!(name = %name, "Adding Finalizer for the StaticRoute");
            *route = self.client.update_static_route(route).await.map_err(|e| {
                error!(name = %name, "Failed to update StaticRoute with finalizer: {}", e);
                e
            })?;
        }

        if !self.options.route_manager.is_registered(&name) {
            /* This also runs when the resource was asked for deletion while
            the operator was not running. The route is still programmed in
            the kernel, so registering it here lets the deletion pass
            deregister and remove it cleanly. */
            let subnet = match route.spec.subnet.parse::<Ipv4Network>() {
                Ok(subnet) => subnet,
                Err(e) => {
                    error!(subnet = %route.spec.subnet, "Unable to convert the subnet into IP range and mask: {}", e);
                    return Ok(Outcome::InvalidSubnet);
                }
            };

            info!(name = %name, "Registering route");
            let table = route.spec.table.unwrap_or(self.options.table);
            self.options
                .route_manager
                .register_route(&name, Route::new(subnet, gateway, table))
                .await
                .map_err(|e| {
                    error!(name = %name, "Unable to register route: {}", e);
                    ControllerError::from(e)
                })?;
        }
        Ok(Outcome::Installed)
    }
}

fn requirement_to_selector(requirement: &LabelSelectorRequirement) -> Option<String> {
    if requirement.key.is_empty() {
        return None;
    }
    let values = requirement.values.as_deref().unwrap_or(&[]);
    match requirement.operator.as_str() {
        "In" if !values.is_empty() => {
            Some(format!("{} in ({})", requirement.key, values.join(",")))
        }
        "NotIn" if !values.is_empty() => {
            Some(format!("{} notin ({})", requirement.key, values.join(",")))
        }
        "Exists" if values.is_empty() => Some(requirement.key.clone()),
        "DoesNotExist" if values.is_empty() => Some(format!("!{}", requirement.key)),
        _ => None,
    }
}
