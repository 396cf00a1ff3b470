//! Guaranteed teardown
//!
//! A reclaim guard is created for every provisioning attempt and released on
//! every terminal path. Reclaim is best-effort: a failure is surfaced as a
//! warning alongside the run's primary outcome, never in place of it,
//! because teardown must not block the pipeline from reporting its result.

use std::sync::Arc;
use tracing::{debug, info, warn};

use statedisk_core::domain::instance::{InstanceRef, InstanceState};
use statedisk_gcloud::ComputeProvider;

/// Guard that reclaims one provisioning attempt's instance and disks
pub struct ReclaimGuard {
    provider: Arc<dyn ComputeProvider>,
    instance: Option<InstanceRef>,
    reclaimed: bool,
    preserved: bool,
}

impl ReclaimGuard {
    /// Creates an unarmed guard; reclaim is a no-op until `arm` is called
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            provider,
            instance: None,
            reclaimed: false,
            preserved: false,
        }
    }

    /// Registers the instance this guard owns
    pub fn arm(&mut self, instance: InstanceRef) {
        self.instance = Some(instance);
    }

    /// Marks the instance as intentionally kept for manual inspection
    ///
    /// Operator-visible escape hatch for hung instances; the leak warning on
    /// drop is suppressed.
    pub fn preserve(&mut self) {
        if let Some(instance) = &self.instance {
            warn!(
                "Preserving instance {} for diagnosis; manual deletion required",
                instance
            );
        }
        self.preserved = true;
    }

    /// Reclaims the instance and its disks
    ///
    /// Idempotent: a second call, an unarmed guard, or an already-deleted
    /// instance are all no-ops. Returns a warning message when deletion
    /// failed and the instance may have leaked.
    pub async fn reclaim(&mut self) -> Option<String> {
        if self.reclaimed || self.preserved {
            return None;
        }
        self.reclaimed = true;

        let instance = self.instance.as_ref()?;

        debug!(
            "Instance {} state: {:?} -> {:?}",
            instance.name,
            InstanceState::Deleting,
            InstanceState::Deleted
        );

        match self.provider.delete_instance(instance, true).await {
            Ok(()) => {
                info!("Reclaimed instance {}", instance.name);
                None
            }
            Err(e) if e.is_not_found() => {
                debug!("Instance {} already gone", instance.name);
                None
            }
            Err(e) => {
                let warning = format!(
                    "failed to reclaim instance {}: {e}; manual cleanup required",
                    instance
                );
                warn!("{}", warning);
                Some(warning)
            }
        }
    }
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        if self.instance.is_some() && !self.reclaimed && !self.preserved {
            warn!("Reclaim guard dropped without running; instance may have leaked");
        }
    }
}
