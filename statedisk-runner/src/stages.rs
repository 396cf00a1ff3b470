//! Orchestration stages
//!
//! The two entry points exposed to the surrounding pipeline:
//!
//! - [`regenerate_snapshot`]: gate on the change decision, provision an
//!   empty-disk instance, discover its container, follow the sync to
//!   completion, freeze the disk into a snapshot, publish the handoff.
//! - [`run_from_snapshot`]: resolve a snapshot through the handoff store,
//!   provision an instance booting from it, discover and follow again.
//!
//! Stages within a run are strictly sequential; each depends on the previous
//! one's output. Teardown runs on every terminal path of both entry points,
//! and a teardown failure is reported next to the primary outcome, never in
//! place of it.

use std::sync::Arc;
use tracing::{info, warn};

use statedisk_core::change::should_regenerate;
use statedisk_core::domain::instance::{DiskSpec, InstanceCreated};
use statedisk_core::domain::run::{CommitId, PipelineRun, TerminalStatus};
use statedisk_core::domain::snapshot::{HandoffRecord, SnapshotRef};
use statedisk_core::error::RunError;
use statedisk_gcloud::{BlobStore, ComputeProvider};

use crate::config::Config;
use crate::handoff::HandoffStore;
use crate::provision::InstanceProvisioner;
use crate::teardown::ReclaimGuard;
use crate::{discovery, snapshot, stream};

/// Result of the regeneration entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerateOutcome {
    /// The change decision gated regeneration off; downstream consumers use
    /// the newest previous publication
    Skipped,
    /// A fresh snapshot was created and its handoff published
    Snapshotted(SnapshotRef),
}

/// Outcome of one entry point, with teardown reported independently
#[derive(Debug)]
pub struct RunReport<T> {
    pub outcome: Result<T, RunError>,
    /// Set when reclaim failed and resources may have leaked; never
    /// escalated into the primary outcome
    pub teardown_warning: Option<String>,
}

impl<T> RunReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Regenerates the cached state snapshot for a run
///
/// Always completes with reclaim already attempted (or deliberately skipped
/// for a preserved, timed-out instance).
pub async fn regenerate_snapshot(
    config: &Config,
    provider: Arc<dyn ComputeProvider>,
    blob: Arc<dyn BlobStore>,
    run: &PipelineRun,
    changed_paths: &[String],
    force: bool,
) -> RunReport<RegenerateOutcome> {
    let watched: Vec<&str> = config.watched_paths.iter().map(String::as_str).collect();
    if !should_regenerate(changed_paths, force, &watched) {
        info!(
            "No watched path changed and no override set; keeping existing snapshot for {}",
            run.network
        );
        return RunReport {
            outcome: Ok(RegenerateOutcome::Skipped),
            teardown_warning: None,
        };
    }

    let mut guard = ReclaimGuard::new(provider.clone());
    let outcome = regenerate_inner(config, &provider, &blob, run, &mut guard).await;
    finish(config, guard, outcome).await
}

/// Runs the consumer stage from a previously published snapshot
///
/// `pinned_commit` bypasses handoff resolution; otherwise the run's own
/// record is used, falling back to the workflow's most recent publication.
pub async fn run_from_snapshot(
    config: &Config,
    provider: Arc<dyn ComputeProvider>,
    blob: Arc<dyn BlobStore>,
    run: &PipelineRun,
    pinned_commit: Option<CommitId>,
) -> RunReport<TerminalStatus> {
    let mut guard = ReclaimGuard::new(provider.clone());
    let outcome = consume_inner(config, &provider, &blob, run, pinned_commit, &mut guard).await;
    finish(config, guard, outcome).await
}

/// Releases the reclaim guard and assembles the report
///
/// The one sanctioned exception to guaranteed teardown: the run's own
/// deadline fired and the operator asked to preserve the instance for
/// diagnosis.
async fn finish<T>(
    config: &Config,
    mut guard: ReclaimGuard,
    outcome: Result<T, RunError>,
) -> RunReport<T> {
    if config.preserve_on_timeout && matches!(&outcome, Err(RunError::Timeout { .. })) {
        guard.preserve();
    }

    let teardown_warning = guard.reclaim().await;

    RunReport {
        outcome,
        teardown_warning,
    }
}

async fn regenerate_inner(
    config: &Config,
    provider: &Arc<dyn ComputeProvider>,
    blob: &Arc<dyn BlobStore>,
    run: &PipelineRun,
    guard: &mut ReclaimGuard,
) -> Result<RegenerateOutcome, RunError> {
    info!(
        "Regenerating {} snapshot for run {} at commit {}",
        run.network,
        run.run_id,
        run.commit.short()
    );

    let provisioner = InstanceProvisioner::new(provider.clone());
    let disk = DiskSpec::Empty {
        size_gb: config.disk_size_gb,
        disk_type: config.disk_type,
    };
    let created = provisioner.create(config, run, disk).await?;
    guard.arm(created.instance.clone());

    let status = run_container(config, provider.as_ref(), &created).await?;
    require_success(config, status)?;

    let key = config.snapshot_key(run.network, run.commit.clone());
    let snapshot = snapshot::snapshot(
        provider.as_ref(),
        &created.instance,
        &key,
        &config.instance_prefix,
    )
    .await?;

    let store = HandoffStore::new(
        blob.clone(),
        config.workflow.clone(),
        config.handoff_retention,
    );
    let record = HandoffRecord::new(run.run_id.clone(), run.network, run.commit.clone());
    store.publish(&record).await?;

    info!(
        "Snapshot {} published for downstream runs of {}",
        snapshot, config.workflow
    );
    Ok(RegenerateOutcome::Snapshotted(snapshot))
}

async fn consume_inner(
    config: &Config,
    provider: &Arc<dyn ComputeProvider>,
    blob: &Arc<dyn BlobStore>,
    run: &PipelineRun,
    pinned_commit: Option<CommitId>,
    guard: &mut ReclaimGuard,
) -> Result<TerminalStatus, RunError> {
    let commit = match pinned_commit {
        Some(commit) => {
            info!("Using pinned snapshot commit {}", commit.short());
            commit
        }
        None => {
            let store = HandoffStore::new(
                blob.clone(),
                config.workflow.clone(),
                config.handoff_retention,
            );
            store.resolve(Some(&run.run_id)).await?.commit
        }
    };

    let key = config.snapshot_key(run.network, commit);
    let image = key.image_name(&config.instance_prefix);

    // A record that does not resolve to a live image must fail loudly;
    // booting from an empty disk here would silently retest nothing.
    if !provider.image_exists(&image).await? {
        warn!("Handoff resolved to image {} but it does not exist", image);
        return Err(RunError::HandoffMissing);
    }

    let provisioner = InstanceProvisioner::new(provider.clone());
    let disk = DiskSpec::FromSnapshot {
        snapshot: SnapshotRef::new(image),
        size_gb: config.disk_size_gb,
        disk_type: config.disk_type,
    };
    let created = provisioner.create(config, run, disk).await?;
    guard.arm(created.instance.clone());

    let status = run_container(config, provider.as_ref(), &created).await?;
    require_success(config, status)?;

    Ok(TerminalStatus::Success)
}

/// Discovery plus log-following for a freshly provisioned instance
async fn run_container(
    config: &Config,
    provider: &dyn ComputeProvider,
    created: &InstanceCreated,
) -> Result<TerminalStatus, RunError> {
    let container = match &created.container {
        Some(handle) => {
            info!("Provider reported container identity {} at create time", handle);
            handle.clone()
        }
        None => {
            discovery::discover(
                provider,
                &created.instance.name,
                config.discovery_interval,
                config.discovery_timeout,
            )
            .await?
        }
    };

    let follow = stream::follow(
        provider,
        &created.instance,
        &container,
        config.success_sentinel.as_deref(),
        config.max_reconnects,
    );

    match config.run_deadline {
        Some(limit) => tokio::time::timeout(limit, follow)
            .await
            .map_err(|_| RunError::Timeout {
                stage: "log-follow",
                limit,
            })?,
        None => follow.await,
    }
}

fn require_success(config: &Config, status: TerminalStatus) -> Result<(), RunError> {
    match status {
        TerminalStatus::Success => Ok(()),
        TerminalStatus::Failure => Err(RunError::RemoteFailure),
        TerminalStatus::Interrupted => Err(RunError::StreamExhausted {
            attempts: config.max_reconnects,
        }),
    }
}
