//! Control-plane installer
//!
//! Two variants selected by topology:
//!
//! - Local container: any prior instance is stopped and removed first
//!   ("already stopped" is not an error), then a fresh k3s server
//!   container is started bound to the resolved advertise address.
//! - Remote service: one SSH command pipes the pinned get-script into
//!   the installer on the target host, which then serves on its own
//!   address.
//!
//! Both variants inject the shared join token and the pinned version.
//! Neither command line is ever logged - it carries the token.
//!
//! The installer only starts the process; the orchestrator follows up
//! with the readiness poller before anything else runs.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::BootstrapConfig;
use crate::error::Error;
use crate::remote::{shell_quote, LocalRunner, Transport};
use crate::{SERVER_CONTAINER, SUPERVISOR_PORT};

/// Time bound on the remote installer command. The get-script downloads
/// the distribution binary, so this is generous.
const REMOTE_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Time bound on local docker invocations
const DOCKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the control plane ended up
#[derive(Debug, Clone)]
pub struct ControlPlaneEndpoint {
    /// Address the control plane advertises and serves on
    pub address: String,
}

impl ControlPlaneEndpoint {
    /// URL of the supervisor/API port
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.address, SUPERVISOR_PORT)
    }
}

/// Start the control plane as a local container advertising `advertise`.
///
/// Idempotent with respect to prior instances: exactly one running
/// container exists afterwards regardless of what existed before.
pub async fn install_local_container(
    local: &dyn LocalRunner,
    config: &BootstrapConfig,
    advertise: &str,
) -> Result<ControlPlaneEndpoint, Error> {
    // Stop/remove any prior instance. Failure means there was nothing
    // to remove, which is the state we want.
    debug!(container = SERVER_CONTAINER, "removing prior control-plane container");
    let remove = container_remove_args();
    let remove: Vec<&str> = remove.iter().map(|s| s.as_str()).collect();
    let _ = local.run("docker", &remove, DOCKER_TIMEOUT).await;

    info!(image = %config.image_tag(), advertise, "starting control-plane container");
    let run = container_run_args(config, advertise);
    let run: Vec<&str> = run.iter().map(|s| s.as_str()).collect();
    let out = local.run("docker", &run, DOCKER_TIMEOUT).await?;

    if !out.success() {
        return Err(Error::install(
            "control-plane container",
            out.stderr.trim().to_string(),
        ));
    }

    Ok(ControlPlaneEndpoint {
        address: advertise.to_string(),
    })
}

/// Install the control plane as a system service on the remote host.
///
/// The installer's own output and exit code are its contract; a non-zero
/// exit is fatal here.
pub async fn install_remote_service(
    config: &BootstrapConfig,
    transport: &dyn Transport,
) -> Result<ControlPlaneEndpoint, Error> {
    let command = remote_server_command(&config.version, &config.join_token);

    info!(host = %config.host, version = %config.version, "installing control-plane service on target");
    let out = transport.execute(&command, REMOTE_INSTALL_TIMEOUT).await?;

    if !out.success() {
        return Err(Error::install(
            "control-plane service",
            out.stderr.trim().to_string(),
        ));
    }

    Ok(ControlPlaneEndpoint {
        address: config.host.clone(),
    })
}

/// Arguments removing any prior control-plane container
fn container_remove_args() -> Vec<String> {
    vec!["rm".into(), "-f".into(), SERVER_CONTAINER.into()]
}

/// Arguments starting a fresh control-plane container
fn container_run_args(config: &BootstrapConfig, advertise: &str) -> Vec<String> {
    vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        SERVER_CONTAINER.into(),
        "--privileged".into(),
        "--restart=unless-stopped".into(),
        "-p".into(),
        format!("{}:{}", SUPERVISOR_PORT, SUPERVISOR_PORT),
        "-e".into(),
        format!("K3S_TOKEN={}", config.join_token),
        config.image_tag(),
        "server".into(),
        format!("--advertise-address={}", advertise),
        format!("--tls-san={}", advertise),
    ]
}

/// Build the fetch-and-pipe installer command for the server role.
///
/// The token and version are operator-supplied, so both are shell-quoted
/// before interpolation.
fn remote_server_command(version: &str, token: &str) -> String {
    format!(
        "curl -sfL https://get.k3s.io | sudo INSTALL_K3S_VERSION={} K3S_TOKEN={} sh -s - server",
        shell_quote(version),
        shell_quote(token)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Topology;
    use crate::remote::fake::{FakeRunner, FakeTransport, Scripted};
    use crate::remote::Auth;
    use std::path::PathBuf;

    fn sample_config() -> BootstrapConfig {
        BootstrapConfig {
            host: "10.0.0.5".to_string(),
            user: "pi".to_string(),
            auth: Auth::Password("pw".to_string()),
            version: "v1.30.4+k3s1".to_string(),
            join_token: "deployment-token".to_string(),
            topology: Topology::SelfContained,
            skip_addons: false,
            kube_dir: PathBuf::from("/tmp/.kube"),
        }
    }

    #[test]
    fn endpoint_url_uses_supervisor_port() {
        let endpoint = ControlPlaneEndpoint {
            address: "10.0.0.5".to_string(),
        };
        assert_eq!(endpoint.url(), "https://10.0.0.5:6443");
    }

    #[test]
    fn prior_instance_is_force_removed_before_start() {
        // The remove runs unconditionally and ignores failure, so after
        // the run exactly one instance of the named container exists.
        let remove = container_remove_args();
        assert_eq!(remove, vec!["rm", "-f", SERVER_CONTAINER]);

        let run = container_run_args(&sample_config(), "10.0.0.17");
        assert_eq!(run[0], "run");
        assert!(run.contains(&"--name".to_string()) && run.contains(&SERVER_CONTAINER.to_string()));
    }

    #[test]
    fn container_binds_advertise_address_and_token() {
        let args = container_run_args(&sample_config(), "10.0.0.17");
        assert!(args.contains(&"K3S_TOKEN=deployment-token".to_string()));
        assert!(args.contains(&"--advertise-address=10.0.0.17".to_string()));
        assert!(args.contains(&"--tls-san=10.0.0.17".to_string()));
        assert!(args.contains(&"rancher/k3s:v1.30.4-k3s1".to_string()));
        assert!(args.contains(&"6443:6443".to_string()));
    }

    #[test]
    fn server_command_pins_version_and_injects_token() {
        let cmd = remote_server_command("v1.30.4+k3s1", "tok");
        assert!(cmd.contains("INSTALL_K3S_VERSION='v1.30.4+k3s1'"));
        assert!(cmd.contains("K3S_TOKEN='tok'"));
        assert!(cmd.ends_with("sh -s - server"));
    }

    #[test]
    fn token_with_embedded_quote_stays_inert() {
        let cmd = remote_server_command("v1.30.4+k3s1", "to'ken; rm -rf /");
        assert!(cmd.contains(r"K3S_TOKEN='to'\''ken; rm -rf /'"));
    }

    #[tokio::test]
    async fn rerun_removes_prior_container_before_starting() {
        let mut config = sample_config();
        config.topology = Topology::RemoteWorker;
        // Nothing to remove the first time: the rm fails and is ignored
        let runner = FakeRunner::new(vec![
            Scripted::Completes(1, ""),
            Scripted::Completes(0, "container-id"),
        ]);

        let endpoint = install_local_container(&runner, &config, "10.0.0.17")
            .await
            .unwrap();
        assert_eq!(endpoint.address, "10.0.0.17");

        let invocations = runner.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 2);
        assert!(invocations[0].starts_with(&format!("docker rm -f {}", SERVER_CONTAINER)));
        assert!(invocations[1].starts_with("docker run"));
    }

    #[tokio::test]
    async fn failed_container_start_is_fatal() {
        let mut config = sample_config();
        config.topology = Topology::RemoteWorker;
        let runner = FakeRunner::new(vec![
            Scripted::Completes(0, ""),
            Scripted::Completes(125, ""),
        ]);

        let result = install_local_container(&runner, &config, "10.0.0.17").await;
        assert!(matches!(result, Err(Error::Install { .. })));
    }

    #[tokio::test]
    async fn remote_install_sends_one_installer_command() {
        let config = sample_config();
        let transport = FakeTransport::new(vec![Scripted::Completes(0, "")]);

        let endpoint = install_remote_service(&config, &transport).await.unwrap();
        assert_eq!(endpoint.address, "10.0.0.5");

        let commands = transport.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("get.k3s.io"));
        assert!(commands[0].contains("server"));
    }

    #[tokio::test]
    async fn remote_installer_nonzero_exit_is_fatal() {
        let config = sample_config();
        let transport = FakeTransport::new(vec![Scripted::Completes(1, "")]);

        let result = install_remote_service(&config, &transport).await;
        assert!(matches!(result, Err(Error::Install { .. })));
    }
}
