//! Remote command channel over SSH
//!
//! Each call is a discrete authenticated invocation: the channel opens a
//! transport, runs one command, and tears the connection down. No
//! connection pooling - call volume is tens of commands per run and each
//! run is short-lived.
//!
//! Commands are side-effecting by default. Idempotency is the caller's
//! responsibility.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Connect timeout passed to the ssh client itself
const SSH_CONNECT_TIMEOUT_SECS: u32 = 10;

/// Exit code ssh uses for connection and protocol failures
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Exit code sshpass uses for a rejected password
const SSHPASS_AUTH_EXIT: i32 = 5;

/// Transport-level failures: the command never ran to completion on the
/// remote host
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host could not be reached
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The credential was rejected
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The command exceeded its timeout
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The local ssh client could not be spawned
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result of a completed remote command
///
/// Non-zero exit codes are returned structurally, never as an error, so
/// callers decide fatality themselves.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Authentication material for the remote host
#[derive(Clone)]
pub enum Auth {
    /// Password authentication via sshpass
    Password(String),
    /// Key file authentication
    KeyFile(PathBuf),
}

/// Executes commands on a remote host over an authenticated transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one command on the remote host, bounded by `timeout`.
    ///
    /// Returns `CommandOutput` for any command that ran to completion,
    /// including non-zero exits. Errors only for transport failures:
    /// unreachable host, rejected credential, or timeout.
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError>;
}

/// SSH subprocess transport
///
/// Shells out to the system `ssh` client (wrapped in `sshpass` for
/// password auth), the same way the rest of the orchestrator shells out
/// to `docker` and `kubectl`.
pub struct SshTransport {
    host: String,
    user: String,
    auth: Auth,
}

impl SshTransport {
    /// Create a transport for `user@host` with the given credential
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: Auth) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            auth,
        }
    }

    /// Build the local command line for one remote invocation
    fn build_command(&self, remote_command: &str) -> Command {
        let destination = format!("{}@{}", self.user, self.host);
        let connect_timeout = format!("ConnectTimeout={}", SSH_CONNECT_TIMEOUT_SECS);

        let mut cmd = match &self.auth {
            Auth::Password(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-p").arg(password).arg("ssh");
                c.args(["-o", "StrictHostKeyChecking=accept-new"]);
                c.args(["-o", connect_timeout.as_str()]);
                c
            }
            Auth::KeyFile(path) => {
                let mut c = Command::new("ssh");
                c.arg("-i").arg(path);
                c.args(["-o", "BatchMode=yes"]);
                c.args(["-o", "StrictHostKeyChecking=accept-new"]);
                c.args(["-o", connect_timeout.as_str()]);
                c
            }
        };

        // The remote command is a single argument after the destination;
        // sshd hands it to the login shell verbatim. Nothing may come
        // between the two or it becomes part of the remote command line.
        cmd.arg(destination);
        cmd.arg(remote_command);
        cmd
    }

    /// Classify a completed ssh invocation that signalled failure in the
    /// client itself rather than in the remote command.
    ///
    /// Exit 255 is ambiguous: the client reserves it for transport
    /// failures, but a remote command may exit 255 of its own accord.
    /// The client always leaves an `ssh:`-prefixed or `Permission
    /// denied` line on stderr when the failure is its own, so stderr
    /// content disambiguates; a bare 255 is returned structurally.
    fn classify(&self, exit_code: i32, stderr: &str) -> Option<TransportError> {
        if exit_code == SSHPASS_AUTH_EXIT {
            return Some(TransportError::AuthRejected(format!(
                "{}@{}: password rejected",
                self.user, self.host
            )));
        }
        if exit_code == SSH_TRANSPORT_EXIT {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            if stderr.contains("Permission denied") {
                return Some(TransportError::AuthRejected(format!(
                    "{}@{}: {}",
                    self.user, self.host, detail
                )));
            }
            if stderr.contains("ssh:")
                || stderr.contains("Connection ")
                || stderr.contains("kex_exchange_identification")
            {
                return Some(TransportError::Unreachable(format!(
                    "{}: {}",
                    self.host, detail
                )));
            }
        }
        None
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, TransportError> {
        debug!(host = %self.host, timeout = ?timeout, "executing remote command");

        let mut cmd = self.build_command(command);
        cmd.stdin(Stdio::null());

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(timeout)),
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(transport_err) = self.classify(exit_code, &stderr) {
            return Err(transport_err);
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Executes commands on the local machine
///
/// The local counterpart of [`Transport`]: everything the orchestrator
/// drives locally (docker, kubectl, ip, ping) goes through this seam so
/// a run can be exercised end to end without touching the system.
#[async_trait]
pub trait LocalRunner: Send + Sync {
    /// Run one local command, bounded by `timeout`.
    ///
    /// Same contract as [`Transport::execute`]: completed commands come
    /// back structurally, timeouts and spawn failures as errors.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;

    /// Run one local command with `stdin_content` piped to its stdin
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_content: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;
}

/// [`LocalRunner`] backed by real subprocesses
pub struct SystemRunner;

#[async_trait]
impl LocalRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        run_local(program, args, timeout).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_content: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        run_local_with_stdin(program, args, stdin_content, timeout).await
    }
}

/// Quote a value for inclusion in a POSIX shell command line.
///
/// Installer commands interpolate operator-supplied material (the join
/// token, the version pin) into a remote shell string; single-quote
/// wrapping with embedded-quote escaping keeps any value inert.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run a command on the local machine, bounded by `timeout`
///
/// Same contract as [`Transport::execute`]: completed commands come back
/// structurally, timeouts and spawn failures as errors.
pub async fn run_local(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, TransportError> {
    // Arguments are not logged: installer invocations carry the join
    // token in theirs.
    debug!(program, "executing local command");

    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => return Err(TransportError::Timeout(timeout)),
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a local command with a string piped to its stdin
pub async fn run_local_with_stdin(
    program: &str,
    args: &[&str],
    stdin_content: &str,
    timeout: Duration,
) -> Result<CommandOutput, TransportError> {
    use tokio::io::AsyncWriteExt;

    debug!(program, "executing local command with stdin");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(stdin_content.as_bytes()).await?;
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(TransportError::Timeout(timeout)),
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
