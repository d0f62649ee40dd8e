//! Local advertise-address resolution
//!
//! The control plane must advertise an address the remote host can
//! actually reach, so we ask the local routing table which source
//! address would be used for traffic to the target. If route inspection
//! yields nothing we fall back to the first non-loopback interface
//! address.
//!
//! All interpretation of `ip` output lives in this module, behind the
//! two parse functions, so a format change in iproute2 is a single-point
//! fix. The `-json` flag keeps even that interpretation structural.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::Error;
use crate::remote::LocalRunner;

/// One entry of `ip -json route get <target>`
#[derive(Debug, Deserialize)]
struct RouteEntry {
    /// Preferred source address for the route
    prefsrc: Option<String>,
    #[serde(default)]
    dev: Option<String>,
}

/// One entry of `ip -json addr`
#[derive(Debug, Deserialize)]
struct LinkEntry {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    #[serde(default)]
    family: String,
    local: Option<String>,
    #[serde(default)]
    scope: String,
}

/// Determine the local address the control plane should advertise to
/// reach `target`.
///
/// Fatal on failure: the control plane cannot advertise an unreachable
/// address, so there is nothing sensible to continue with.
pub async fn resolve_advertise_address(
    local: &dyn LocalRunner,
    target: &str,
) -> Result<String, Error> {
    let route = local
        .run(
            "ip",
            &["-json", "route", "get", target],
            Duration::from_secs(10),
        )
        .await?;

    if route.success() {
        if let Some(address) = parse_route_source(&route.stdout) {
            info!(target, address, "resolved advertise address from route");
            return Ok(address);
        }
    }

    debug!(target, "route inspection yielded nothing, trying interfaces");
    let addrs = local
        .run("ip", &["-json", "addr"], Duration::from_secs(10))
        .await?;
    if addrs.success() {
        if let Some(address) = parse_first_global_address(&addrs.stdout) {
            info!(target, address, "using first non-loopback interface address");
            return Ok(address);
        }
    }

    Err(Error::NoRoute(target.to_string()))
}

/// Extract the preferred source address from `ip -json route get` output
fn parse_route_source(json: &str) -> Option<String> {
    let entries: Vec<RouteEntry> = serde_json::from_str(json).ok()?;
    entries.into_iter().find_map(|e| {
        debug!(dev = ?e.dev, "route entry");
        e.prefsrc
    })
}

/// Extract the first non-loopback IPv4 address from `ip -json addr` output
fn parse_first_global_address(json: &str) -> Option<String> {
    let links: Vec<LinkEntry> = serde_json::from_str(json).ok()?;
    links
        .into_iter()
        .filter(|l| l.ifname != "lo")
        .flat_map(|l| l.addr_info)
        .find(|a| a.family == "inet" && a.scope != "host")
        .and_then(|a| a.local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_source_is_extracted() {
        let json = r#"[{"dst":"10.0.0.5","dev":"eth0","prefsrc":"10.0.0.17","flags":[],"uid":1000,"cache":[]}]"#;
        assert_eq!(parse_route_source(json), Some("10.0.0.17".to_string()));
    }

    #[test]
    fn route_without_prefsrc_yields_nothing() {
        let json = r#"[{"dst":"10.0.0.5","dev":"eth0","flags":[]}]"#;
        assert_eq!(parse_route_source(json), None);
    }

    #[test]
    fn malformed_route_output_yields_nothing() {
        assert_eq!(parse_route_source("not json"), None);
        assert_eq!(parse_route_source(""), None);
    }

    #[test]
    fn loopback_is_skipped_in_fallback() {
        let json = r#"[
            {"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","scope":"host"}]},
            {"ifname":"eth0","addr_info":[
                {"family":"inet6","local":"fe80::1","scope":"link"},
                {"family":"inet","local":"192.168.1.30","scope":"global"}
            ]}
        ]"#;
        assert_eq!(
            parse_first_global_address(json),
            Some("192.168.1.30".to_string())
        );
    }

    #[test]
    fn no_candidate_interface_yields_nothing() {
        let json = r#"[
            {"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","scope":"host"}]}
        ]"#;
        assert_eq!(parse_first_global_address(json), None);
    }

    use crate::remote::fake::{FakeRunner, Scripted};

    const ADDR_JSON: &str = r#"[
        {"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","scope":"host"}]},
        {"ifname":"eth0","addr_info":[
            {"family":"inet","local":"192.168.1.30","scope":"global"}
        ]}
    ]"#;

    #[tokio::test]
    async fn route_source_wins_over_interface_fallback() {
        let runner = FakeRunner::new(vec![Scripted::Completes(
            0,
            r#"[{"dst":"10.0.0.5","dev":"eth0","prefsrc":"10.0.0.17"}]"#,
        )]);
        let addr = resolve_advertise_address(&runner, "10.0.0.5").await.unwrap();
        assert_eq!(addr, "10.0.0.17");
        assert_eq!(runner.invocations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interface_fallback_when_route_yields_nothing() {
        let runner = FakeRunner::new(vec![
            Scripted::Completes(2, ""),
            Scripted::Completes(0, ADDR_JSON),
        ]);
        let addr = resolve_advertise_address(&runner, "10.0.0.5").await.unwrap();
        assert_eq!(addr, "192.168.1.30");
    }

    #[tokio::test]
    async fn no_route_at_all_is_fatal() {
        let runner = FakeRunner::new(vec![
            Scripted::Completes(2, ""),
            Scripted::Completes(2, ""),
        ]);
        let result = resolve_advertise_address(&runner, "10.0.0.5").await;
        assert!(matches!(result, Err(Error::NoRoute(_))));
    }
}
