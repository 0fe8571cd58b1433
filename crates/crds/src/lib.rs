//! StaticRoute CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the static-route operator.
//! A `StaticRoute` declares an IP route that every matching node of the
//! cluster programs into its kernel routing table.

pub mod static_route;

pub use static_route::*;
