//! Instance provisioning
//!
//! Builds the ephemeral instance spec for a pipeline run and drives the
//! create call. The instance name is a pure function of the run's identity,
//! which is what later discovery and teardown steps use to relocate it.

use std::sync::Arc;
use tracing::{debug, info};

use statedisk_core::domain::instance::{
    ContainerSpec, DiskSpec, InstanceCreated, InstanceSpec, InstanceState,
};
use statedisk_core::domain::run::PipelineRun;
use statedisk_core::error::ProvisionError;
use statedisk_core::naming::instance_name;
use statedisk_gcloud::ComputeProvider;

use crate::config::Config;

/// Creates ephemeral instances for pipeline runs
pub struct InstanceProvisioner {
    provider: Arc<dyn ComputeProvider>,
}

impl InstanceProvisioner {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    /// Assembles the instance spec for a run
    ///
    /// The container gets the run's network and id as scoped environment
    /// variables; nothing else from the caller's environment leaks in.
    pub fn spec_for(&self, config: &Config, run: &PipelineRun, disk: DiskSpec) -> InstanceSpec {
        let name = instance_name(
            &config.instance_prefix,
            run.ref_slug.as_str(),
            run.commit.short(),
        );

        let env = [
            ("NETWORK".to_string(), run.network.name().to_string()),
            ("RUN_ID".to_string(), run.run_id.to_string()),
        ]
        .into_iter()
        .collect();

        InstanceSpec {
            name,
            machine_type: config.machine_type.clone(),
            disk,
            container: ContainerSpec {
                image: config.resolve_image(&run.commit),
                args: config.container_args.clone(),
                env,
            },
        }
    }

    /// Provisions one instance for the run
    ///
    /// Exactly one instance exists per run; a second create under the same
    /// (ref, commit) surfaces as `NameCollision` rather than a duplicate.
    pub async fn create(
        &self,
        config: &Config,
        run: &PipelineRun,
        disk: DiskSpec,
    ) -> Result<InstanceCreated, ProvisionError> {
        let spec = self.spec_for(config, run, disk);

        debug!(
            "Instance {} state: {:?} -> {:?}",
            spec.name,
            InstanceState::Requested,
            InstanceState::Provisioning
        );

        let created = self.provider.create_instance(&spec).await?;

        debug!(
            "Instance {} state: {:?} -> {:?}",
            spec.name,
            InstanceState::Provisioning,
            InstanceState::Running
        );
        info!(
            "Provisioned instance {} for run {} (boot: {})",
            created.instance,
            run.run_id,
            match spec.disk.source_snapshot() {
                Some(snapshot) => format!("snapshot {snapshot}"),
                None => "empty disk".to_string(),
            }
        );

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeCompute, test_config, test_run};
    use statedisk_core::domain::instance::DiskType;
    use statedisk_core::domain::snapshot::SnapshotRef;

    fn empty_disk() -> DiskSpec {
        DiskSpec::Empty {
            size_gb: 100,
            disk_type: DiskType::Ssd,
        }
    }

    #[test]
    fn test_spec_embeds_run_identity() {
        let provisioner = InstanceProvisioner::new(Arc::new(FakeCompute::default()));
        let config = test_config();
        let run = test_run();

        let spec = provisioner.spec_for(&config, &run, empty_disk());

        assert_eq!(spec.name.as_str(), "statedisk-main-a1b2c3d");
        assert_eq!(spec.container.image, "registry.test/node:a1b2c3d");
        assert_eq!(spec.container.env.get("NETWORK").unwrap(), "mainnet");
        assert_eq!(spec.container.env.get("RUN_ID").unwrap(), "run-1");
    }

    #[tokio::test]
    async fn test_create_records_boot_source() {
        let fake = Arc::new(FakeCompute::default());
        let provisioner = InstanceProvisioner::new(fake.clone());
        let config = test_config();
        let run = test_run();

        let disk = DiskSpec::FromSnapshot {
            snapshot: SnapshotRef::new("statedisk-cache-f00dca7-mainnet-v1"),
            size_gb: 100,
            disk_type: DiskType::Ssd,
        };
        provisioner.create(&config, &run, disk).await.unwrap();

        let state = fake.state.lock().unwrap();
        assert_eq!(state.create_calls, 1);
        let created = &state.created[0];
        assert_eq!(
            created.disk.source_snapshot().unwrap().name(),
            "statedisk-cache-f00dca7-mainnet-v1"
        );
    }

    #[tokio::test]
    async fn test_create_surfaces_collision() {
        let fake = Arc::new(FakeCompute::default());
        fake.state.lock().unwrap().fail_create = Some("collision");
        let provisioner = InstanceProvisioner::new(fake);

        let err = provisioner
            .create(&test_config(), &test_run(), empty_disk())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NameCollision(_)));
    }
}
