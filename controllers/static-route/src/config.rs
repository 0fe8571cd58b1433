//! Startup configuration from environment variables.
//!
//! All values are validated up front; anything malformed is fatal before the
//! controllers start. The parser takes the environment as an iterator so
//! tests can inject their own.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::ControllerError;

pub const DEFAULT_ROUTE_TABLE: u8 = 254;
pub const DEFAULT_FALLBACK_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

const PROTECTED_SUBNET_MARKER: &str = "PROTECTED_SUBNET_";

/// Node-wide settings of the static-route controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's identity, equals its kubernetes.io/hostname label value
    pub hostname: String,
    /// Routing table used when a StaticRoute does not name one
    pub table: u8,
    /// Probe target for default-gateway discovery
    pub fallback_ip: Ipv4Addr,
    /// Subnets no StaticRoute may overlap
    pub protected_subnets: Vec<Ipv4Network>,
}

impl Config {
    pub fn from_env(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ControllerError> {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let get = |name: &str| {
            vars.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };

        let hostname = get("NODE_HOSTNAME")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "Missing environment variable: NODE_HOSTNAME".to_string(),
                )
            })?;

        let table = match get("TARGET_TABLE") {
            Some(raw) if !raw.is_empty() => parse_target_table(&raw)?,
            _ => DEFAULT_ROUTE_TABLE,
        };

        let fallback_ip = match get("FALLBACK_IP_FOR_GW_SELECTION") {
            Some(raw) if !raw.is_empty() => parse_fallback_ip(&raw)?,
            _ => DEFAULT_FALLBACK_IP,
        };

        let protected_subnets = collect_protected_subnets(&vars)?;

        Ok(Self {
            hostname,
            table,
            fallback_ip,
            protected_subnets,
        })
    }
}

fn parse_target_table(raw: &str) -> Result<u8, ControllerError> {
    let table: i64 = raw.parse().map_err(|e| {
        ControllerError::InvalidConfig(format!(
            "Unable to parse custom table 'TARGET_TABLE={}': {}",
            raw, e
        ))
    })?;
    if !(0..=254).contains(&table) {
        return Err(ControllerError::InvalidConfig(format!(
            "Target table must be between 0 and 254 'TARGET_TABLE={}'",
            raw
        )));
    }
    Ok(table as u8)
}

fn parse_fallback_ip(raw: &str) -> Result<Ipv4Addr, ControllerError> {
    // an IPv6 literal would parse as an address but can never be routed here
    if raw.contains(':') {
        return Err(ControllerError::InvalidConfig(
            "Environment variable parse error: FALLBACK_IP_FOR_GW_SELECTION".to_string(),
        ));
    }
    raw.parse().map_err(|_| {
        ControllerError::InvalidConfig(
            "Environment variable parse error: FALLBACK_IP_FOR_GW_SELECTION".to_string(),
        )
    })
}

/// Every variable whose name contains `PROTECTED_SUBNET_` contributes a
/// comma-separated list of CIDRs to the protected set.
fn collect_protected_subnets(
    vars: &[(String, String)],
) -> Result<Vec<Ipv4Network>, ControllerError> {
    let mut subnets = Vec::new();
    for (key, value) in vars {
        if !key.contains(PROTECTED_SUBNET_MARKER) {
            continue;
        }
        for raw in value.split(',') {
            let raw = raw.trim();
            let subnet: Ipv4Network = raw.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "Malformed protected subnet '{}' in {}: {}",
                    raw, key, e
                ))
            })?;
            // keep the masked base so later containment checks are exact
            subnets.push(Ipv4Network::new(subnet.network(), subnet.prefix()).unwrap_or(subnet));
        }
    }
    Ok(subnets)
}
