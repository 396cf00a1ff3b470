//! Disk snapshot and handoff domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::run::{CommitId, Network, RunId};

/// Version of the on-disk state format
///
/// Bumped whenever the binary layout of the cached state changes; snapshots
/// from different format versions are never interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateVersion(pub u64);

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Key identifying one snapshot image: (network, state-format tag, commit)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub network: Network,
    pub state_version: StateVersion,
    pub commit: CommitId,
}

impl SnapshotKey {
    pub fn new(network: Network, state_version: StateVersion, commit: CommitId) -> Self {
        Self {
            network,
            state_version,
            commit,
        }
    }

    /// Deterministic image name for this key
    ///
    /// Two snapshot calls with the same key target the same image name, which
    /// is what makes forced overwrite idempotent.
    pub fn image_name(&self, prefix: &str) -> String {
        format!(
            "{}-cache-{}-{}-{}",
            prefix,
            self.commit.short(),
            self.network.name(),
            self.state_version
        )
    }
}

/// Reference to an immutable disk image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotRef(String);

impl SnapshotRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted record mapping a pipeline run to the commit whose snapshot
/// downstream stages should use
///
/// Records are append-only across runs and retained for a long period,
/// since regenerating a snapshot is far more expensive than storing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub run_id: RunId,
    pub network: Network,
    pub commit: CommitId,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl HandoffRecord {
    pub fn new(run_id: RunId, network: Network, commit: CommitId) -> Self {
        Self {
            run_id,
            network,
            commit,
            published_at: chrono::Utc::now(),
        }
    }
}
