//! Snapshot management
//!
//! Freezes a live disk into an immutable, reusable image. Invoked only after
//! the stream stage reported success; the source disk is still attached to
//! its not-yet-deleted instance, which the provider's forced image creation
//! tolerates.

use tracing::info;

use statedisk_core::domain::instance::InstanceRef;
use statedisk_core::domain::snapshot::{SnapshotKey, SnapshotRef};
use statedisk_core::error::RunError;
use statedisk_gcloud::{ComputeProvider, ProviderError};

/// Creates the snapshot image for a verified-successful run
///
/// Forced overwrite: a retried run re-freezes under the same key and
/// replaces the previous image rather than erroring or duplicating. Errors
/// that survive the overwrite path (permission, quota) surface as
/// `SnapshotConflict`.
pub async fn snapshot(
    provider: &dyn ComputeProvider,
    instance: &InstanceRef,
    key: &SnapshotKey,
    prefix: &str,
) -> Result<SnapshotRef, RunError> {
    let image_name = key.image_name(prefix);

    info!(
        "Snapshotting disk of {} as image {} ({} {})",
        instance.name, image_name, key.network, key.state_version
    );

    let snapshot = provider
        .create_disk_image(instance, &image_name)
        .await
        .map_err(|e| image_error(&image_name, e))?;

    info!("Snapshot {} created", snapshot);
    Ok(snapshot)
}

/// Splits image-creation failures into genuine conflicts and provider trouble
///
/// Permission and quota refusals survive the forced-overwrite path and will
/// not clear on retry; anything else (spawn failures, backend flakes) is
/// ordinary provider trouble and stays recoverable.
fn image_error(image: &str, err: ProviderError) -> RunError {
    if let ProviderError::CommandFailed { detail, .. } = &err {
        let lower = detail.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("quota") {
            return RunError::SnapshotConflict {
                image: image.to_string(),
                reason: detail.clone(),
            };
        }
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeCompute;
    use statedisk_core::domain::run::{CommitId, Network};
    use statedisk_core::domain::snapshot::StateVersion;
    use statedisk_core::naming::instance_name;

    fn instance() -> InstanceRef {
        InstanceRef {
            name: instance_name("statedisk", "main", "a1b2c3d"),
            zone: "test-zone".to_string(),
        }
    }

    fn key() -> SnapshotKey {
        SnapshotKey::new(
            Network::Mainnet,
            StateVersion(1),
            CommitId::new("a1b2c3d4e5f6"),
        )
    }

    #[tokio::test]
    async fn test_snapshot_creates_keyed_image() {
        let fake = FakeCompute::default();

        let snap = snapshot(&fake, &instance(), &key(), "statedisk")
            .await
            .unwrap();
        assert_eq!(snap.name(), "statedisk-cache-a1b2c3d-mainnet-v1");
        assert!(fake.state.lock().unwrap().images.contains(snap.name()));
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent_under_same_key() {
        let fake = FakeCompute::default();

        let first = snapshot(&fake, &instance(), &key(), "statedisk")
            .await
            .unwrap();
        let second = snapshot(&fake, &instance(), &key(), "statedisk")
            .await
            .unwrap();

        assert_eq!(first, second);
        // The key still resolves to exactly one live image
        let state = fake.state.lock().unwrap();
        assert_eq!(
            state.images.iter().filter(|i| i.as_str() == first.name()).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_provider_failure_is_conflict() {
        let fake = FakeCompute::default();
        fake.state.lock().unwrap().fail_image_create = Some("permission denied on disk");

        let err = snapshot(&fake, &instance(), &key(), "statedisk")
            .await
            .unwrap_err();
        match err {
            RunError::SnapshotConflict { image, reason } => {
                assert_eq!(image, "statedisk-cache-a1b2c3d-mainnet-v1");
                assert!(reason.contains("permission denied"));
            }
            other => panic!("expected SnapshotConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_provider_failure_stays_recoverable() {
        let fake = FakeCompute::default();
        fake.state.lock().unwrap().fail_image_create =
            Some("exit 1: backend timed out, try again later");

        let err = snapshot(&fake, &instance(), &key(), "statedisk")
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Provider(_)));
        assert!(err.is_recoverable());
    }
}
