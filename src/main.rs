//! Skiff - bootstrap a small k3s cluster onto one or two remote hosts

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skiff::config::{BootstrapConfig, Topology};
use skiff::orchestrator::Orchestrator;
use skiff::remote::{Auth, SshTransport, SystemRunner};

/// Bootstrap a small k3s cluster onto one or two remote hosts
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about, long_about = None)]
struct Cli {
    /// Address of the target host
    #[arg(long, env = "SKIFF_HOST")]
    host: String,

    /// SSH username on the target host
    #[arg(long, env = "SKIFF_USER")]
    user: String,

    /// SSH password (prompted interactively when neither this nor a key
    /// file is given)
    #[arg(long, env = "SKIFF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// SSH private key file (takes precedence over password auth)
    #[arg(long, env = "SKIFF_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// Pinned k3s distribution version
    #[arg(long, env = "SKIFF_K3S_VERSION", default_value = skiff::DEFAULT_K3S_VERSION)]
    k3s_version: String,

    /// Shared join secret for this deployment
    #[arg(long, env = "SKIFF_JOIN_TOKEN", hide_env_values = true)]
    join_token: String,

    /// Cluster topology
    #[arg(long, value_enum, default_value = "remote-worker")]
    topology: Topology,

    /// Bootstrap without applying the add-on manifest set
    #[arg(long)]
    skip_addons: bool,

    /// Directory holding the default access credential
    #[arg(long, env = "SKIFF_KUBE_DIR")]
    kube_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Credential precedence: explicit flag > environment (both arrive
    // through clap) > interactive prompt. The prompt happens here, once,
    // before the orchestrator starts - it never blocks on input later.
    let auth = match (cli.ssh_key, cli.password) {
        (Some(key), _) => Auth::KeyFile(key),
        (None, Some(password)) => Auth::Password(password),
        (None, None) => {
            let password = dialoguer::Password::new()
                .with_prompt(format!("Password for {}@{}", cli.user, cli.host))
                .interact()
                .map_err(|e| anyhow::anyhow!("could not read password: {}", e))?;
            Auth::Password(password)
        }
    };

    let kube_dir = match cli.kube_dir {
        Some(dir) => dir,
        None => default_kube_dir()?,
    };

    let config = BootstrapConfig {
        host: cli.host,
        user: cli.user,
        auth: auth.clone(),
        version: cli.k3s_version,
        join_token: cli.join_token,
        topology: cli.topology,
        skip_addons: cli.skip_addons,
        kube_dir,
    };

    let transport = SshTransport::new(config.host.clone(), config.user.clone(), auth);
    let orchestrator = Orchestrator::new(config, Box::new(transport), Box::new(SystemRunner));

    orchestrator
        .run()
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("{}", e))
}

fn default_kube_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| anyhow::anyhow!("HOME is not set; pass --kube-dir"))?;
    Ok(PathBuf::from(home).join(".kube"))
}
