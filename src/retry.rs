//! Bounded-retry readiness polling
//!
//! Every state-changing step in the bootstrap is asynchronous on the
//! remote side: the control plane comes up, the credential file
//! materializes, the worker registers. `await_condition` converts each
//! of those convergences into a synchronous success or terminal failure
//! by polling a predicate a fixed number of times at a fixed interval.
//!
//! There is deliberately no exponential backoff: `max_attempts x
//! interval` is a hard wall-clock ceiling, and exhausting it is a fatal
//! [`Error::Convergence`], never a silent continuation.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Error;

/// Polling bounds applied wherever convergence is awaited
///
/// The per-condition constructors hold the tunable defaults; the numbers
/// are not load-bearing and can be adjusted without semantic impact as
/// long as the ceiling stays a ceiling.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the poll fails terminally
    pub max_attempts: u32,
    /// Fixed sleep between attempts
    pub interval: Duration,
    /// Time bound on each individual attempt, independent of the ceiling
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Construct a policy with explicit bounds
    pub fn new(max_attempts: u32, interval: Duration, per_attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            per_attempt_timeout,
        }
    }

    /// Default bounds for the control-plane health probe
    pub fn control_plane() -> Self {
        Self::new(30, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Default bounds for credential-file materialization
    pub fn kubeconfig() -> Self {
        Self::new(30, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Default bounds for worker node registration
    pub fn node_registration() -> Self {
        Self::new(60, Duration::from_secs(2), Duration::from_secs(15))
    }
}

/// Poll `predicate` until it returns true or the policy is exhausted.
///
/// Each attempt is bounded by `per_attempt_timeout`; an attempt that
/// times out counts as a failed attempt. The interval sleep happens
/// between attempts, so a never-true predicate takes at least
/// `(max_attempts - 1) x interval` of wall-clock time.
pub async fn await_condition<F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut predicate: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();

    for attempt in 1..=policy.max_attempts {
        let satisfied = match tokio::time::timeout(policy.per_attempt_timeout, predicate()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(what, attempt, "attempt exceeded its timeout");
                false
            }
        };

        if satisfied {
            debug!(what, attempt, "condition satisfied");
            return Ok(());
        }

        if attempt < policy.max_attempts {
            debug!(what, attempt, interval = ?policy.interval, "not yet, sleeping");
            tokio::time::sleep(policy.interval).await;
        }
    }

    warn!(
        what,
        attempts = policy.max_attempts,
        waited = ?started.elapsed(),
        "condition never converged"
    );

    Err(Error::Convergence {
        what: what.to_string(),
        attempts: policy.max_attempts,
        waited: started.elapsed(),
    })
}
