//! The phased bootstrap sequence
//!
//! One orchestrator, parameterized by topology, runs the whole
//! sequence: prerequisites, probe, advertise-address resolution,
//! control-plane install, credential materialization, readiness,
//! worker join, labeling, add-ons, report. Each phase must complete
//! before the next begins; a fatal error aborts the run at the point of
//! detection with no rollback of completed phases.
//!
//! Both command channels are injected: the SSH transport for the remote
//! host and the local runner for docker, kubectl, ip, and ping.

use tracing::warn;

use crate::config::{BootstrapConfig, Topology};
use crate::control_plane::{self, ControlPlaneEndpoint};
use crate::error::Error;
use crate::probe::{probe, ProbeOutcome};
use crate::remote::{Auth, LocalRunner, Transport, TransportError};
use crate::report::ClusterSummary;
use crate::retry::{await_condition, RetryPolicy};
use crate::{addons, join, kubeconfig, kubectl, report, route};

/// Label marking nodes bootstrapped by this tool
const MANAGED_LABEL: (&str, &str) = ("skiff.dev/managed", "true");

/// Drives one bootstrap run end to end
pub struct Orchestrator {
    config: BootstrapConfig,
    transport: Box<dyn Transport>,
    local: Box<dyn LocalRunner>,
}

impl Orchestrator {
    /// Create an orchestrator for the given configuration and channels
    pub fn new(
        config: BootstrapConfig,
        transport: Box<dyn Transport>,
        local: Box<dyn LocalRunner>,
    ) -> Self {
        Self {
            config,
            transport,
            local,
        }
    }

    /// Run the full bootstrap sequence, returning the final summary
    pub async fn run(&self) -> Result<ClusterSummary, Error> {
        println!("=== Skiff bootstrap ===");
        println!("Target:   {}@{}", self.config.user, self.config.host);
        println!("Version:  {}", self.config.version);
        println!("Topology: {:?}\n", self.config.topology);

        println!("[Phase 1] Checking prerequisites...");
        self.check_prerequisites().await?;

        println!("[Phase 2] Probing target connectivity...");
        let outcome = probe(
            &self.config.host,
            self.transport.as_ref(),
            self.local.as_ref(),
        )
        .await?;
        gate(&self.config.host, outcome)?;

        println!("[Phase 3] Resolving advertise address...");
        let advertise = self.resolve_advertise_address().await?;
        println!("  Advertise address: {}", advertise);

        println!("[Phase 4] Installing control plane...");
        let endpoint = self.install_control_plane(&advertise).await?;

        println!("[Phase 5] Materializing access credential...");
        let kubeconfig_path = self.materialize_credential(&endpoint).await?;
        println!("  Credential installed at {}", kubeconfig_path.display());

        println!("[Phase 6] Waiting for control plane readiness...");
        let kc = kubeconfig_path.clone();
        let local = self.local.as_ref();
        await_condition(&RetryPolicy::control_plane(), "control plane health", || {
            let kc = kc.clone();
            async move { kubectl::api_ready(local, &kc).await }
        })
        .await?;

        println!("[Phase 7] Joining worker...");
        let identity = self.join(&endpoint, &kubeconfig_path).await?;
        println!("  Node registered as '{}'", identity);

        println!("[Phase 8] Labeling node and applying add-ons...");
        self.label(&kubeconfig_path, &identity).await;
        if self.config.skip_addons {
            println!("  Add-ons skipped by request");
        } else {
            let applied = addons::apply_all(self.local.as_ref(), &kubeconfig_path).await;
            println!("  {} add-on set(s) applied", applied);
        }

        println!("[Phase 9] Reporting cluster state...\n");
        let summary = report::report(
            self.local.as_ref(),
            &kubeconfig_path,
            &endpoint.address,
            &identity,
        )
        .await;
        println!("{}", report::render(&summary));

        Ok(summary)
    }

    /// Verify every required local tool before any remote action
    async fn check_prerequisites(&self) -> Result<(), Error> {
        let mut tools: Vec<(&str, &str)> = vec![
            ("ssh", "Install an OpenSSH client"),
            ("ping", "Install iputils"),
            ("kubectl", "Install kubectl: https://kubernetes.io/docs/tasks/tools/"),
        ];
        if matches!(self.config.auth, Auth::Password(_)) {
            tools.push(("sshpass", "Install sshpass for password authentication"));
        }
        if self.config.topology == Topology::RemoteWorker {
            tools.push(("docker", "Install Docker: https://docs.docker.com/get-docker/"));
        }

        for (tool, hint) in tools {
            print!("  Checking {}... ", tool);
            let found = self
                .local
                .run("which", &[tool], std::time::Duration::from_secs(10))
                .await
                .map(|out| out.success())
                .unwrap_or(false);
            if found {
                println!("OK");
            } else {
                println!("NOT FOUND");
                return Err(Error::prerequisite(tool, hint));
            }
        }
        Ok(())
    }

    /// Pick the address the control plane will advertise
    async fn resolve_advertise_address(&self) -> Result<String, Error> {
        match self.config.topology {
            // The local machine hosts the control plane; it must
            // advertise the address that routes to the worker.
            Topology::RemoteWorker => {
                route::resolve_advertise_address(self.local.as_ref(), &self.config.host).await
            }
            // The target hosts everything and serves on its own address.
            Topology::SelfContained => Ok(self.config.host.clone()),
        }
    }

    async fn install_control_plane(&self, advertise: &str) -> Result<ControlPlaneEndpoint, Error> {
        match self.config.topology {
            Topology::RemoteWorker => {
                control_plane::install_local_container(self.local.as_ref(), &self.config, advertise)
                    .await
            }
            Topology::SelfContained => {
                control_plane::install_remote_service(&self.config, self.transport.as_ref()).await
            }
        }
    }

    async fn materialize_credential(
        &self,
        endpoint: &ControlPlaneEndpoint,
    ) -> Result<std::path::PathBuf, Error> {
        let content = kubeconfig::fetch(
            &self.config,
            self.transport.as_ref(),
            self.local.as_ref(),
            &RetryPolicy::kubeconfig(),
        )
        .await?;
        let rewritten = kubeconfig::rewrite_loopback(&content, &endpoint.address);
        kubeconfig::install_default(&rewritten, &self.config.kube_dir).await
    }

    /// Join the worker (or, self-contained, wait for the single node)
    async fn join(
        &self,
        endpoint: &ControlPlaneEndpoint,
        kubeconfig_path: &std::path::Path,
    ) -> Result<String, Error> {
        let policy = RetryPolicy::node_registration();
        match self.config.topology {
            Topology::RemoteWorker => {
                let baseline: Vec<String> =
                    kubectl::list_nodes(self.local.as_ref(), kubeconfig_path)
                        .await?
                        .into_iter()
                        .map(|n| n.metadata.name)
                        .collect();
                join::join_worker(
                    &self.config,
                    self.transport.as_ref(),
                    self.local.as_ref(),
                    &endpoint.url(),
                    kubeconfig_path,
                    &baseline,
                    &policy,
                )
                .await
            }
            Topology::SelfContained => {
                join::await_registration(self.local.as_ref(), kubeconfig_path, &[], &policy).await
            }
        }
    }

    /// Apply idempotent metadata labels; failures warn, never abort
    async fn label(&self, kubeconfig_path: &std::path::Path, identity: &str) {
        let role = match self.config.topology {
            Topology::RemoteWorker => "worker",
            Topology::SelfContained => "server",
        };
        let labels = [MANAGED_LABEL, ("skiff.dev/role", role)];
        if let Err(e) =
            kubectl::label_node(self.local.as_ref(), kubeconfig_path, identity, &labels).await
        {
            warn!(node = identity, error = %e, "labeling failed, continuing");
            println!("  Warning: labeling failed ({}), continuing", e);
        }
    }
}

/// Map the probe outcome to the fatal gate decision.
///
/// Anything but `Ok` aborts before a single installer command runs.
fn gate(host: &str, outcome: ProbeOutcome) -> Result<(), Error> {
    match outcome {
        ProbeOutcome::Ok => Ok(()),
        ProbeOutcome::Unreachable => Err(Error::Transport(TransportError::Unreachable(
            host.to_string(),
        ))),
        ProbeOutcome::AuthFailed => Err(Error::Transport(TransportError::AuthRejected(format!(
            "{}: credential rejected during pre-flight",
            host
        )))),
    }
}
