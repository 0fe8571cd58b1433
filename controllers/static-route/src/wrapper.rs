//! Value-level helpers over one StaticRoute instance.
//!
//! Pure data manipulation with no side effects: subnet and gateway parsing,
//! protected-subnet overlap, per-node status bookkeeping, change detection,
//! and the finalizer toggle. The reconciler composes these; nothing here
//! talks to the kernel or the control plane.

use std::net::Ipv4Addr;

use crds::{StaticRoute, StaticRouteNodeStatus, StaticRouteStatus};
use ipnetwork::Ipv4Network;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

/// Blocks garbage collection until every node has drained its route.
/// Older resources may still carry "finalizer.iks.ibm.com"; any non-empty
/// finalizer list counts as set.
pub const FINALIZER: &str = "finalizer.static-route.ibm.com";

pub trait StaticRouteExt {
    /// Parsed `spec.gateway`. `None` when absent or malformed; callers that
    /// care about the difference check the raw spec field.
    fn gateway(&self) -> Option<Ipv4Addr>;

    /// True iff the spec subnet shares at least one address with any
    /// protected subnet. A malformed spec subnet reports false; the add
    /// branch rejects it with its own error.
    fn is_protected(&self, protected: &[Ipv4Network]) -> bool;

    /// True iff this node has a status entry whose recorded state differs
    /// from the incoming spec with `gateway` resolved.
    fn is_changed(
        &self,
        hostname: &str,
        gateway: &str,
        selectors: &Option<Vec<LabelSelectorRequirement>>,
    ) -> bool;

    /// Any status entry for this node.
    fn already_in_status(&self, hostname: &str) -> bool;

    /// Append a status entry for this node unless one exists. Existing
    /// entries are never modified; refresh is remove-then-add.
    fn add_to_status(&mut self, hostname: &str, gateway: Ipv4Addr, error: Option<&str>) -> bool;

    /// Drop every status entry for this node. True iff something was dropped.
    fn remove_from_status(&mut self, hostname: &str) -> bool;

    /// True iff this node's entry already records exactly the current spec
    /// with the given gateway and error message.
    fn status_matches(&self, hostname: &str, gateway: Ipv4Addr, error: Option<&str>) -> bool;

    /// Set the finalizer when the list is empty. True iff newly set.
    fn set_finalizer(&mut self) -> bool;

    fn node_status(&self) -> &[StaticRouteNodeStatus];
}

impl StaticRouteExt for StaticRoute {
    fn gateway(&self) -> Option<Ipv4Addr> {
        self.spec
            .gateway
            .as_deref()
            .filter(|gateway| !gateway.is_empty())?
            .parse()
            .ok()
    }

    fn is_protected(&self, protected: &[Ipv4Network]) -> bool {
        let Ok(subnet) = self.spec.subnet.parse::<Ipv4Network>() else {
            return false;
        };
        // CIDR blocks are either disjoint or nested, so mutual base-address
        // containment is a complete overlap test
        protected
            .iter()
            .any(|p| p.contains(subnet.network()) || subnet.contains(p.network()))
    }

    fn is_changed(
        &self,
        hostname: &str,
        gateway: &str,
        selectors: &Option<Vec<LabelSelectorRequirement>>,
    ) -> bool {
        self.node_status().iter().any(|entry| {
            entry.hostname == hostname
                && (entry.state.subnet != self.spec.subnet
                    || entry.state.gateway.as_deref() != Some(gateway)
                    || entry.state.selectors != *selectors)
        })
    }

    fn already_in_status(&self, hostname: &str) -> bool {
        self.node_status()
            .iter()
            .any(|entry| entry.hostname == hostname)
    }

    fn add_to_status(&mut self, hostname: &str, gateway: Ipv4Addr, error: Option<&str>) -> bool {
        if self.already_in_status(hostname) {
            return false;
        }
        let mut state = self.spec.clone();
        state.gateway = Some(gateway.to_string());
        let status = self.status.get_or_insert_with(StaticRouteStatus::default);
        status.node_status.push(StaticRouteNodeStatus {
            hostname: hostname.to_string(),
            state,
            error: error.unwrap_or_default().to_string(),
        });
        true
    }

    fn remove_from_status(&mut self, hostname: &str) -> bool {
        let Some(status) = self.status.as_mut() else {
            return false;
        };
        let before = status.node_status.len();
        status.node_status.retain(|entry| entry.hostname != hostname);
        status.node_status.len() != before
    }

    fn status_matches(&self, hostname: &str, gateway: Ipv4Addr, error: Option<&str>) -> bool {
        let mut expected = self.spec.clone();
        expected.gateway = Some(gateway.to_string());
        let error = error.unwrap_or_default();
        self.node_status().iter().any(|entry| {
            entry.hostname == hostname && entry.state == expected && entry.error == error
        })
    }

    fn set_finalizer(&mut self) -> bool {
        if self
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty())
        {
            return false;
        }
        self.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        true
    }

    fn node_status(&self) -> &[StaticRouteNodeStatus] {
        self.status
            .as_ref()
            .map(|status| status.node_status.as_slice())
            .unwrap_or(&[])
    }
}
