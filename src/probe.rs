//! Connectivity and authentication pre-flight
//!
//! Runs before any state-changing operation: a coarse liveness check
//! (a bounded number of ping packets) followed by a single authenticated
//! no-op command. A failure here is always fatal and aborts the run
//! without remediation - the gate exists so no installer command is ever
//! attempted against a host we cannot reach or log into.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::Error;
use crate::remote::{LocalRunner, Transport, TransportError};

/// Number of probe packets sent by the liveness check
const PING_COUNT: &str = "2";

/// Per-packet reply timeout in seconds
const PING_WAIT: &str = "2";

/// Outcome of the pre-flight probe
#[derive(Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Host answers and the credential works
    Ok,
    /// Host does not answer the network-level probe or the transport
    Unreachable,
    /// Host answers but rejected the credential
    AuthFailed,
}

/// Probe the target: coarse liveness first, then one authenticated no-op.
///
/// Only I/O failures of the local ping binary surface as `Err`; every
/// remote-side result is expressed in the outcome.
pub async fn probe(
    host: &str,
    transport: &dyn Transport,
    local: &dyn LocalRunner,
) -> Result<ProbeOutcome, Error> {
    debug!(host, "pinging target");
    let ping = local
        .run(
            "ping",
            &["-c", PING_COUNT, "-W", PING_WAIT, host],
            Duration::from_secs(10),
        )
        .await?;

    if !ping.success() {
        info!(host, "target did not answer ping");
        return Ok(ProbeOutcome::Unreachable);
    }

    debug!(host, "running authenticated no-op");
    match transport.execute("true", Duration::from_secs(20)).await {
        Ok(output) if output.success() => Ok(ProbeOutcome::Ok),
        // The no-op itself cannot fail; a non-zero exit means the shell
        // on the far side is broken, which we treat as unreachable.
        Ok(_) => Ok(ProbeOutcome::Unreachable),
        Err(TransportError::AuthRejected(_)) => Ok(ProbeOutcome::AuthFailed),
        Err(TransportError::Unreachable(_)) | Err(TransportError::Timeout(_)) => {
            Ok(ProbeOutcome::Unreachable)
        }
        Err(e @ TransportError::Spawn(_)) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::{FakeRunner, FakeTransport, Scripted};

    #[tokio::test]
    async fn reachable_host_with_accepted_credential_probes_ok() {
        let runner = FakeRunner::new(vec![Scripted::Completes(0, "")]);
        let transport = FakeTransport::new(vec![Scripted::Completes(0, "")]);

        let outcome = probe("10.0.0.5", &transport, &runner).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);

        let pings = runner.invocations.lock().unwrap();
        assert!(pings[0].starts_with("ping "));
        assert!(pings[0].contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn unanswered_ping_short_circuits_before_any_remote_command() {
        let runner = FakeRunner::new(vec![Scripted::Completes(1, "")]);
        let transport = FakeTransport::new(vec![]);

        let outcome = probe("10.0.0.5", &transport, &runner).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Unreachable);
        assert!(transport.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_credential_is_auth_failure() {
        let runner = FakeRunner::new(vec![Scripted::Completes(0, "")]);
        let transport = FakeTransport::new(vec![Scripted::Fails(|| {
            TransportError::AuthRejected("pi@host: Permission denied".into())
        })]);

        let outcome = probe("10.0.0.5", &transport, &runner).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::AuthFailed);
    }

    #[tokio::test]
    async fn unreachable_transport_is_unreachable() {
        let runner = FakeRunner::new(vec![Scripted::Completes(0, "")]);
        let transport = FakeTransport::new(vec![Scripted::Fails(|| {
            TransportError::Unreachable("no route to host".into())
        })]);

        let outcome = probe("10.0.0.5", &transport, &runner).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn broken_remote_shell_is_unreachable() {
        let runner = FakeRunner::new(vec![Scripted::Completes(0, "")]);
        let transport = FakeTransport::new(vec![Scripted::Completes(2, "")]);

        let outcome = probe("10.0.0.5", &transport, &runner).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
