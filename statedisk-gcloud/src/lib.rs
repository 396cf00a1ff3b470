//! Statedisk provider clients
//!
//! Trait seams for the two external services the orchestrator consumes, plus
//! their Google Cloud implementations:
//!
//! - [`ComputeProvider`]: instance create-with-container, instance delete,
//!   disk-image create (forced), system log query, and remote log following —
//!   implemented by [`GcloudCompute`] over the `gcloud` CLI.
//! - [`BlobStore`]: named-blob put/get with retention — implemented by
//!   [`GcsBlobStore`] over the GCS JSON API.
//!
//! All traits are async and object-safe so the orchestration stages can be
//! exercised against in-memory fakes.

pub mod error;

mod compute;
mod storage;

pub use compute::GcloudCompute;
pub use error::{ProviderError, Result};
pub use storage::GcsBlobStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use statedisk_core::domain::instance::{
    ContainerHandle, InstanceCreated, InstanceRef, InstanceSpec,
};
use statedisk_core::domain::snapshot::SnapshotRef;
use statedisk_core::error::ProvisionError;

/// One entry from the provider's system-level log stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub message: String,
}

/// How a log-follow attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// The remote process exited and the follow channel closed cleanly
    RemoteExit {
        code: i32,
        /// Whether the configured success sentinel appeared in the output
        sentinel_seen: bool,
    },
    /// The connection dropped before the remote process exited
    ConnectionLost,
}

/// Compute provider operations consumed by the orchestration stages
///
/// Create is the only call that allocates; everything else addresses
/// resources through the deterministic instance name.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Creates a compute instance running one container with one attached
    /// persistent disk
    ///
    /// Returns the runtime container identity when the provider reports it
    /// synchronously; `None` means callers must fall back to log-scrape
    /// discovery.
    async fn create_instance(&self, spec: &InstanceSpec)
    -> std::result::Result<InstanceCreated, ProvisionError>;

    /// Deletes an instance, cascading to its attached disks when requested
    async fn delete_instance(&self, instance: &InstanceRef, delete_disks: bool) -> Result<()>;

    /// Queries the system-level log stream with a free-text filter
    ///
    /// Read-only; safe to retry at a fixed interval.
    async fn query_system_log(&self, filter: &str) -> Result<Vec<SystemLogEntry>>;

    /// Attaches to a container's combined output in follow mode
    ///
    /// Addressed by instance (the command executes *on* the instance), and
    /// blocks until the remote process exits or the connection drops.
    async fn stream_container_logs(
        &self,
        instance: &InstanceRef,
        container: &ContainerHandle,
        sentinel: Option<&str>,
    ) -> Result<StreamExit>;

    /// Creates an immutable image from the instance's attached disk
    ///
    /// Forced: works against a disk still attached to a running instance,
    /// and replaces an existing image under the same name.
    async fn create_disk_image(&self, instance: &InstanceRef, image_name: &str)
    -> Result<SnapshotRef>;

    /// Whether an image with the given name currently exists
    async fn image_exists(&self, image_name: &str) -> Result<bool>;
}

/// Named-blob storage used for handoff record persistence
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a blob under `name`, retained for at least `retention`
    async fn upload(&self, name: &str, bytes: Vec<u8>, retention: Duration) -> Result<()>;

    /// Fetches a blob by name; `None` when no such blob exists
    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>>;
}
