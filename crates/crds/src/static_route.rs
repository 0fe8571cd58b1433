//! StaticRoute Custom Resource Definition
//!
//! Defines a cluster-scoped CRD describing one IP route. Each node that the
//! route applies to installs the route into its kernel table and reports its
//! own view back through `status.nodeStatus`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// StaticRouteSpec defines the desired state of a StaticRoute
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "static-route.ibm.com",
    version = "v1",
    kind = "StaticRoute",
    plural = "staticroutes",
    status = "StaticRouteStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.subnet","priority":1}"#,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.gateway","description":"empty field means default gateway","priority":1}"#,
    printcolumn = r#"{"name":"Table","type":"integer","jsonPath":".spec.table","description":"empty field means default table","priority":1}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteSpec {
    /// Subnet defines the destination network in the form "x.x.x.x/x"
    #[schemars(regex(pattern = r"^([0-9]{1,3}\.){3}[0-9]{1,3}(/([0-9]|[1-2][0-9]|3[0-2]))?$"))]
    pub subnet: String,

    /// Gateway the subnet is routed through (optional, discovered if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^([0-9]{1,3}\.){3}[0-9]{1,3}$"))]
    pub gateway: Option<String>,

    /// Routing table the route is installed in (optional, node default if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 254))]
    pub table: Option<u8>,

    /// Selectors restrict the route to matching nodes (optional, default is all nodes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<LabelSelectorRequirement>>,
}

/// The observed state of one node, related to the StaticRoute
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteNodeStatus {
    /// Node the entry belongs to
    pub hostname: String,

    /// The spec this node last attempted to program, gateway resolved
    pub state: StaticRouteSpec,

    /// Empty when the route is installed; the failure message otherwise
    #[serde(default)]
    pub error: String,
}

/// StaticRouteStatus defines the observed state of a StaticRoute
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteStatus {
    /// One entry per node that has observed this route
    #[serde(default)]
    pub node_status: Vec<StaticRouteNodeStatus>,
}
