//! Error taxonomy for orchestration runs

use std::time::Duration;
use thiserror::Error;

/// Errors from instance provisioning
///
/// All variants are fatal for the run; none is retried, because the inputs
/// that produced them (quota, name, spec) will not change on retry.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Provider quota exhausted
    #[error("compute quota exceeded: {0}")]
    Quota(String),

    /// An instance with the deterministic name already exists
    ///
    /// Under collision-free naming this means a previous attempt for the
    /// same (ref, commit) was never reclaimed.
    #[error("instance name collision: {0}")]
    NameCollision(String),

    /// Provider rejected the instance specification
    #[error("invalid instance spec: {0}")]
    InvalidSpec(String),

    /// Any other provider-side create failure
    #[error("instance create failed: {0}")]
    Other(String),
}

/// Errors surfaced by the orchestration entry points
///
/// Every variant still triggers teardown of the run's ephemeral instance;
/// teardown failures are reported separately and never replace one of these.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// No container identity announcement observed within the deadline
    #[error("no container identity observed within {waited:?}")]
    DiscoveryTimeout { waited: Duration },

    /// Remote process reported error completion; terminal, snapshot skipped
    #[error("remote process reported failure")]
    RemoteFailure,

    /// Log stream dropped and the bounded reconnect attempts were exhausted
    #[error("log stream interrupted; {attempts} reconnect attempt(s) exhausted")]
    StreamExhausted { attempts: u32 },

    /// Snapshot creation failed for a non-overwrite-eligible reason
    #[error("snapshot conflict for image '{image}': {reason}")]
    SnapshotConflict { image: String, reason: String },

    /// Consumer found no resolvable snapshot to boot from
    #[error("no resolvable snapshot handoff record")]
    HandoffMissing,

    /// The run's own deadline fired
    #[error("run deadline of {limit:?} exceeded during {stage}")]
    Timeout { stage: &'static str, limit: Duration },

    /// Provider communication failure outside the categories above
    #[error("provider error: {0}")]
    Provider(String),
}

impl RunError {
    /// Whether retrying the whole run could plausibly succeed
    ///
    /// Transient infrastructure trouble (propagation delays, dropped
    /// connections, provider flakes, deadlines) is recoverable; a remote
    /// process that reported failure, a rejected spec, or a missing handoff
    /// is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RunError::DiscoveryTimeout { .. }
                | RunError::StreamExhausted { .. }
                | RunError::Timeout { .. }
                | RunError::Provider(_)
        )
    }

    /// Whether this is a missing-handoff failure
    pub fn is_handoff_missing(&self) -> bool {
        matches!(self, RunError::HandoffMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(
            RunError::DiscoveryTimeout {
                waited: Duration::from_secs(60)
            }
            .is_recoverable()
        );
        assert!(RunError::StreamExhausted { attempts: 3 }.is_recoverable());
        assert!(RunError::Provider("ssh flake".into()).is_recoverable());

        assert!(!RunError::RemoteFailure.is_recoverable());
        assert!(!RunError::HandoffMissing.is_recoverable());
        assert!(!RunError::Provision(ProvisionError::Quota("CPUS".into())).is_recoverable());
        assert!(
            !RunError::SnapshotConflict {
                image: "img".into(),
                reason: "permission denied".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_provision_error_propagates() {
        let err: RunError = ProvisionError::NameCollision("statedisk-main-a1b2c3d".into()).into();
        assert!(matches!(
            err,
            RunError::Provision(ProvisionError::NameCollision(_))
        ));
        assert!(err.to_string().contains("statedisk-main-a1b2c3d"));
    }
}
