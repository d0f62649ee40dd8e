//! Access credential retrieval and rewriting
//!
//! The installer writes its kubeconfig with a loopback endpoint. We
//! fetch it over the command channel, replace every loopback occurrence
//! with the externally reachable address, and install it as the
//! operator's default credential. A pre-existing default is backed up
//! under a timestamped name, never overwritten silently.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{BootstrapConfig, Topology};
use crate::error::Error;
use crate::remote::{LocalRunner, Transport};
use crate::retry::{await_condition, RetryPolicy};
use crate::SERVER_CONTAINER;

/// Where the k3s installer writes its kubeconfig
const REMOTE_KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Loopback address the installer embeds as the server endpoint
const LOOPBACK: &str = "127.0.0.1";

/// Fetch the credential file, poll-bounded, from wherever the control
/// plane runs for this topology.
///
/// The file materializes asynchronously after the installer returns, so
/// this waits under the kubeconfig retry policy before reading.
pub async fn fetch(
    config: &BootstrapConfig,
    transport: &dyn Transport,
    local: &dyn LocalRunner,
    policy: &RetryPolicy,
) -> Result<String, Error> {
    match config.topology {
        Topology::RemoteWorker => fetch_from_container(local, policy).await,
        Topology::SelfContained => fetch_from_host(transport, policy).await,
    }
}

/// Read the kubeconfig out of the local control-plane container
async fn fetch_from_container(
    local: &dyn LocalRunner,
    policy: &RetryPolicy,
) -> Result<String, Error> {
    await_condition(policy, "credential file materialization", || async move {
        matches!(read_from_container(local).await, Ok(Some(_)))
    })
    .await?;

    match read_from_container(local).await? {
        Some(content) => Ok(content),
        None => Err(Error::install(
            "fetch kubeconfig",
            "credential file disappeared after materializing".to_string(),
        )),
    }
}

async fn read_from_container(local: &dyn LocalRunner) -> Result<Option<String>, Error> {
    let out = local
        .run(
            "docker",
            &["exec", SERVER_CONTAINER, "cat", REMOTE_KUBECONFIG_PATH],
            Duration::from_secs(15),
        )
        .await?;
    if out.success() && !out.stdout.trim().is_empty() {
        Ok(Some(out.stdout))
    } else {
        Ok(None)
    }
}

/// Read the kubeconfig off the remote host over the command channel
async fn fetch_from_host(
    transport: &dyn Transport,
    policy: &RetryPolicy,
) -> Result<String, Error> {
    let read_command = format!("sudo cat {}", REMOTE_KUBECONFIG_PATH);
    let read = read_command.as_str();
    let attempt_timeout = policy.per_attempt_timeout;

    await_condition(policy, "credential file materialization", || async move {
        matches!(
            transport.execute(read, attempt_timeout).await,
            Ok(out) if out.success() && !out.stdout.trim().is_empty()
        )
    })
    .await?;

    let out = transport
        .execute(&read_command, Duration::from_secs(30))
        .await?;
    if !out.success() {
        return Err(Error::install(
            "fetch kubeconfig",
            out.stderr.trim().to_string(),
        ));
    }
    Ok(out.stdout)
}

/// Replace every loopback occurrence with the reachable address
pub fn rewrite_loopback(content: &str, address: &str) -> String {
    content.replace(LOOPBACK, address)
}

/// Install `content` as the default credential under `kube_dir`.
///
/// Backs up any existing default to `config.backup-<timestamp>` first
/// and returns the installed path.
pub async fn install_default(content: &str, kube_dir: &Path) -> Result<PathBuf, Error> {
    tokio::fs::create_dir_all(kube_dir).await?;
    let target = kube_dir.join("config");

    if tokio::fs::try_exists(&target).await? {
        let backup = kube_dir.join(format!(
            "config.backup-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        ));
        info!(backup = %backup.display(), "backing up existing credential");
        tokio::fs::rename(&target, &backup).await?;
    }

    debug!(path = %target.display(), "installing access credential");
    tokio::fs::write(&target, content).await?;
    Ok(target)
}
