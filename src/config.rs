//! Immutable run configuration
//!
//! One `BootstrapConfig` is constructed in `main` and passed by
//! reference to every component. There is no ambient or mutable state;
//! the topology field selects which sub-sequence of steps the
//! orchestrator runs.

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::remote::Auth;

/// Which shape of cluster the run produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Topology {
    /// Control plane runs locally in a container; the remote host joins
    /// it as a worker
    RemoteWorker,
    /// The remote host runs a self-contained single-node cluster
    SelfContained,
}

/// Configuration for one bootstrap run
///
/// Constructed once at startup; never mutated. The join token and any
/// password are secret material: `Debug` redacts them and no component
/// logs them.
#[derive(Clone)]
pub struct BootstrapConfig {
    /// Address of the remote host
    pub host: String,
    /// SSH username on the remote host
    pub user: String,
    /// SSH credential (password or key file)
    pub auth: Auth,
    /// Pinned k3s distribution version
    pub version: String,
    /// Shared join secret for the deployment
    pub join_token: String,
    /// Cluster topology
    pub topology: Topology,
    /// Skip applying the add-on manifest set
    pub skip_addons: bool,
    /// Directory holding the default access credential (`~/.kube`)
    pub kube_dir: PathBuf,
}

impl BootstrapConfig {
    /// Image tag for the pinned version (`+` is not a valid tag char)
    pub fn image_tag(&self) -> String {
        format!("rancher/k3s:{}", self.version.replace('+', "-"))
    }

    /// Path the rewritten access credential is installed at
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kube_dir.join("config")
    }
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("auth", &redact_auth(&self.auth))
            .field("version", &self.version)
            .field("join_token", &"<redacted>")
            .field("topology", &self.topology)
            .field("skip_addons", &self.skip_addons)
            .field("kube_dir", &self.kube_dir)
            .finish()
    }
}

fn redact_auth(auth: &Auth) -> String {
    match auth {
        Auth::Password(_) => "password <redacted>".to_string(),
        Auth::KeyFile(path) => format!("key file {}", path.display()),
    }
}
