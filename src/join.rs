//! Worker agent installation and registration
//!
//! Joins the remote host to the control plane: first an explicit check
//! that the control plane answers from the remote side (distinct from
//! the local prober - the route from the worker may differ), then one
//! installer command with the join parameters embedded, then a poll
//! until the host registers itself in the node list.
//!
//! The node's name is host-assigned, not chosen here, so the identity
//! is discovered by diffing the node list against the pre-join baseline.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::config::BootstrapConfig;
use crate::error::Error;
use crate::kubectl;
use crate::remote::{shell_quote, LocalRunner, Transport};
use crate::retry::{await_condition, RetryPolicy};

/// Time bound on the remote agent installer command
const AGENT_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Install and start the worker agent, then wait for the node to appear.
///
/// `baseline` is the set of node names registered before the join; the
/// returned identity is the first name that appears beyond it.
pub async fn join_worker(
    config: &BootstrapConfig,
    transport: &dyn Transport,
    local: &dyn LocalRunner,
    control_plane_url: &str,
    kubeconfig: &Path,
    baseline: &[String],
    policy: &RetryPolicy,
) -> Result<String, Error> {
    // The control plane must be reachable from the worker's side of the
    // network before the installer is worth running.
    let reach_command = format!(
        "curl -k -s -o /dev/null -m 10 {}/ping",
        control_plane_url
    );
    let reach = transport
        .execute(&reach_command, Duration::from_secs(30))
        .await?;
    if !reach.success() {
        return Err(Error::install(
            "worker join",
            format!(
                "control plane at {} is not reachable from the target host",
                control_plane_url
            ),
        ));
    }

    info!(host = %config.host, "installing worker agent");
    let install = transport
        .execute(
            &agent_install_command(&config.version, control_plane_url, &config.join_token),
            AGENT_INSTALL_TIMEOUT,
        )
        .await?;
    if !install.success() {
        return Err(Error::install(
            "worker join",
            install.stderr.trim().to_string(),
        ));
    }

    await_registration(local, kubeconfig, baseline, policy).await
}

/// Wait for a node beyond `baseline` to register and become Ready,
/// returning its host-assigned identity.
///
/// Also used directly by the self-contained topology, where the baseline
/// is empty and the single registering node is the cluster.
pub async fn await_registration(
    local: &dyn LocalRunner,
    kubeconfig: &Path,
    baseline: &[String],
    policy: &RetryPolicy,
) -> Result<String, Error> {
    await_condition(policy, "node registration", || async move {
        match kubectl::list_nodes(local, kubeconfig).await {
            Ok(nodes) => nodes
                .iter()
                .any(|n| !baseline.contains(&n.metadata.name) && n.is_ready()),
            Err(_) => false,
        }
    })
    .await?;

    let nodes = kubectl::list_nodes(local, kubeconfig).await?;
    nodes
        .into_iter()
        .find(|n| !baseline.contains(&n.metadata.name) && n.is_ready())
        .map(|n| n.metadata.name)
        .ok_or_else(|| {
            Error::install(
                "worker join",
                "registered node vanished between poll and listing".to_string(),
            )
        })
}

/// Build the fetch-and-pipe installer command for the agent role.
///
/// The join parameters are operator-supplied, so each is shell-quoted
/// before interpolation.
fn agent_install_command(version: &str, server_url: &str, token: &str) -> String {
    format!(
        "curl -sfL https://get.k3s.io | sudo INSTALL_K3S_VERSION={} K3S_URL={} K3S_TOKEN={} sh -s - agent",
        shell_quote(version),
        shell_quote(server_url),
        shell_quote(token)
    )
}
