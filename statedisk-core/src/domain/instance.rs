//! Ephemeral instance domain types
//!
//! An ephemeral instance is a (compute node, attached persistent disk,
//! container spec) triple, exclusively owned by the pipeline run that created
//! it. Its name embeds the run's identity, so concurrent runs on different
//! refs or commits can never collide.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::snapshot::SnapshotRef;

/// Deterministic instance name, valid as a provider resource label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceName(pub(crate) String);

impl InstanceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent disk type offered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskType {
    Ssd,
    Balanced,
    Standard,
}

impl DiskType {
    /// Provider-side type name
    pub fn name(&self) -> &'static str {
        match self {
            DiskType::Ssd => "pd-ssd",
            DiskType::Balanced => "pd-balanced",
            DiskType::Standard => "pd-standard",
        }
    }
}

/// Boot source for the instance's attached data disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskSpec {
    /// Fresh empty disk; the container regenerates state from scratch
    Empty { size_gb: u32, disk_type: DiskType },
    /// Disk restored from an existing snapshot image
    FromSnapshot {
        snapshot: SnapshotRef,
        size_gb: u32,
        disk_type: DiskType,
    },
}

impl DiskSpec {
    pub fn size_gb(&self) -> u32 {
        match self {
            DiskSpec::Empty { size_gb, .. } => *size_gb,
            DiskSpec::FromSnapshot { size_gb, .. } => *size_gb,
        }
    }

    pub fn disk_type(&self) -> DiskType {
        match self {
            DiskSpec::Empty { disk_type, .. } => *disk_type,
            DiskSpec::FromSnapshot { disk_type, .. } => *disk_type,
        }
    }

    /// Snapshot image backing the disk, if any
    pub fn source_snapshot(&self) -> Option<&SnapshotRef> {
        match self {
            DiskSpec::Empty { .. } => None,
            DiskSpec::FromSnapshot { snapshot, .. } => Some(snapshot),
        }
    }
}

/// What the instance runs: image reference, command vector, scoped env
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Full request for one ephemeral instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: InstanceName,
    pub machine_type: String,
    pub disk: DiskSpec,
    pub container: ContainerSpec,
}

/// Handle to a provisioned instance
///
/// Carries everything later stages need to address the instance without
/// persisting provider-side resource ids across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub name: InstanceName,
    pub zone: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.zone)
    }
}

/// Result of a create-instance call
///
/// `container` is populated when the provider reports the runtime container
/// identity synchronously at creation time; otherwise log-scrape discovery
/// runs as a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCreated {
    pub instance: InstanceRef,
    pub container: Option<ContainerHandle>,
}

/// Transient runtime identity of the container inside an instance
///
/// A lookup key for addressing the container's log stream precisely; it is
/// never an owned resource and exists only for the lifetime of log-following.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an ephemeral instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Requested,
    Provisioning,
    Running,
    Completed,
    Failed,
    TimedOut,
    Deleting,
    Deleted,
}

impl InstanceState {
    /// Whether the instance has reached an end state of its run phase
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Completed | InstanceState::Failed | InstanceState::TimedOut
        )
    }

    /// Legal transitions of the instance lifecycle
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::*;
        match (self, next) {
            (Requested, Provisioning) => true,
            (Provisioning, Running) => true,
            // Provisioning can fail before the container ever runs
            (Provisioning, Failed) => true,
            (Running, Completed | Failed | TimedOut) => true,
            (Completed | Failed | TimedOut, Deleting) => true,
            (Deleting, Deleted) => true,
            _ => false,
        }
    }
}
