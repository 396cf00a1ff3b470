//! In-memory fakes for the provider traits
//!
//! The stages are exercised end-to-end against these; call counters back the
//! reclaim-equals-create and idempotence properties.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use statedisk_core::domain::instance::{
    ContainerHandle, InstanceCreated, InstanceRef, InstanceSpec,
};
use statedisk_core::domain::run::{CommitId, Network, PipelineRun, RefSlug, RunId};
use statedisk_core::domain::snapshot::SnapshotRef;
use statedisk_core::error::ProvisionError;
use statedisk_gcloud::error::ProviderError;
use statedisk_gcloud::{BlobStore, ComputeProvider, StreamExit, SystemLogEntry};

use crate::config::Config;

/// Config with test-friendly timings
pub fn test_config() -> Config {
    let mut config = Config::new("test-project", "test-bucket", "registry.test/node:{commit}");
    config.discovery_interval = Duration::from_millis(10);
    config.discovery_timeout = Duration::from_millis(100);
    config.max_reconnects = 2;
    config
}

pub fn test_run() -> PipelineRun {
    PipelineRun::new(
        RunId::new("run-1"),
        RefSlug::new("main"),
        CommitId::new("a1b2c3d4e5f6071829"),
        Network::Mainnet,
    )
}

/// Scriptable compute provider
#[derive(Default)]
pub struct FakeCompute {
    pub state: Mutex<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub create_calls: u32,
    pub delete_calls: u32,
    pub stream_calls: u32,
    pub log_queries: u32,

    /// Specs of every created instance, in order
    pub created: Vec<InstanceSpec>,
    /// Images created through `create_disk_image`
    pub images: HashSet<String>,

    /// Fail the next create: "collision", "quota" or "invalid"
    pub fail_create: Option<&'static str>,
    /// Fail deletes with this detail
    pub fail_delete: Option<&'static str>,
    /// Deletes report the instance as already gone
    pub delete_not_found: bool,
    /// Fail image creation with this detail
    pub fail_image_create: Option<&'static str>,

    /// Entries the system log returns once available
    pub log_entries: Vec<String>,
    /// Number of queries that come back empty before entries appear
    pub log_available_after: u32,

    /// Scripted stream exits, consumed front to back; an empty script
    /// yields a clean successful exit
    pub stream_script: VecDeque<StreamExit>,
    /// Block stream calls until cancelled from outside
    pub stream_hang: bool,

    /// Container identity reported synchronously at create time
    pub sync_container: Option<String>,
}

impl FakeCompute {
    pub fn script_stream(&self, exits: impl IntoIterator<Item = StreamExit>) {
        self.state.lock().unwrap().stream_script.extend(exits);
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<InstanceCreated, ProvisionError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;

        if let Some(kind) = state.fail_create.take() {
            return Err(match kind {
                "collision" => ProvisionError::NameCollision(spec.name.as_str().to_string()),
                "quota" => ProvisionError::Quota("CPUS exceeded".to_string()),
                _ => ProvisionError::InvalidSpec("rejected".to_string()),
            });
        }

        state.created.push(spec.clone());
        Ok(InstanceCreated {
            instance: InstanceRef {
                name: spec.name.clone(),
                zone: "test-zone".to_string(),
            },
            container: state.sync_container.clone().map(ContainerHandle::new),
        })
    }

    async fn delete_instance(
        &self,
        instance: &InstanceRef,
        _delete_disks: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;

        if state.delete_not_found {
            return Err(ProviderError::NotFound(instance.name.as_str().to_string()));
        }
        if let Some(detail) = state.fail_delete {
            return Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: detail.to_string(),
            });
        }
        Ok(())
    }

    async fn query_system_log(&self, _filter: &str) -> Result<Vec<SystemLogEntry>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.log_queries += 1;

        if state.log_queries <= state.log_available_after {
            return Ok(Vec::new());
        }
        Ok(state
            .log_entries
            .iter()
            .map(|message| SystemLogEntry {
                message: message.clone(),
            })
            .collect())
    }

    async fn stream_container_logs(
        &self,
        _instance: &InstanceRef,
        _container: &ContainerHandle,
        _sentinel: Option<&str>,
    ) -> Result<StreamExit, ProviderError> {
        let hang;
        let exit;
        {
            let mut state = self.state.lock().unwrap();
            state.stream_calls += 1;
            hang = state.stream_hang;
            exit = state.stream_script.pop_front();
        }

        if hang {
            // Parked until the enclosing deadline cancels the future
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        Ok(exit.unwrap_or(StreamExit::RemoteExit {
            code: 0,
            sentinel_seen: true,
        }))
    }

    async fn create_disk_image(
        &self,
        _instance: &InstanceRef,
        image_name: &str,
    ) -> Result<SnapshotRef, ProviderError> {
        let mut state = self.state.lock().unwrap();

        if let Some(detail) = state.fail_image_create {
            return Err(ProviderError::CommandFailed {
                program: "gcloud".to_string(),
                detail: detail.to_string(),
            });
        }

        // Forced overwrite: re-inserting the same name keeps one live image
        state.images.insert(image_name.to_string());
        Ok(SnapshotRef::new(image_name))
    }

    async fn image_exists(&self, image_name: &str) -> Result<bool, ProviderError> {
        Ok(self.state.lock().unwrap().images.contains(image_name))
    }
}

/// Blob store over a hash map
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(name.to_string(), bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _retention: Duration,
    ) -> Result<(), ProviderError> {
        self.insert(name, bytes);
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        Ok(self.blobs.lock().unwrap().get(name).cloned())
    }
}
