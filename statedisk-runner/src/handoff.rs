//! Snapshot handoff
//!
//! Publishes and resolves the mapping from a pipeline run to the commit
//! whose snapshot downstream stages should use. The store is an append-only
//! history of small JSON records over the blob store, not a transactional
//! database: publication only happens after a verified-successful snapshot,
//! so last-write-wins is acceptable, and the rolling `latest` pointer is
//! only replaced by a strictly newer record.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use statedisk_core::domain::run::RunId;
use statedisk_core::domain::snapshot::HandoffRecord;
use statedisk_core::error::RunError;
use statedisk_gcloud::BlobStore;

/// Store for handoff records, scoped to one workflow
pub struct HandoffStore {
    blob: Arc<dyn BlobStore>,
    workflow: String,
    retention: Duration,
}

impl HandoffStore {
    pub fn new(blob: Arc<dyn BlobStore>, workflow: impl Into<String>, retention: Duration) -> Self {
        Self {
            blob,
            workflow: workflow.into(),
            retention,
        }
    }

    fn run_object(&self, run_id: &RunId) -> String {
        format!("{}/runs/{}.json", self.workflow, run_id)
    }

    fn latest_object(&self) -> String {
        format!("{}/latest.json", self.workflow)
    }

    /// Appends a record for this run and advances the `latest` pointer
    ///
    /// Concurrent publications never corrupt each other: each run writes its
    /// own object, and `latest` only moves forward in publication time.
    pub async fn publish(&self, record: &HandoffRecord) -> Result<(), RunError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| RunError::Provider(format!("encode handoff record: {e}")))?;

        self.blob
            .upload(&self.run_object(&record.run_id), bytes.clone(), self.retention)
            .await?;
        info!(
            "Published handoff record for run {} (commit {})",
            record.run_id,
            record.commit.short()
        );

        match self.read(&self.latest_object()).await? {
            Some(existing) if existing.published_at >= record.published_at => {
                debug!(
                    "Keeping newer latest pointer from run {}",
                    existing.run_id
                );
            }
            _ => {
                self.blob
                    .upload(&self.latest_object(), bytes, self.retention)
                    .await?;
                debug!("Advanced latest pointer to run {}", record.run_id);
            }
        }

        Ok(())
    }

    /// Resolves the record a consumer should boot from
    ///
    /// The run's own record wins when present; otherwise the most recent
    /// successful publication of the workflow; otherwise `HandoffMissing`.
    pub async fn resolve(&self, run_id: Option<&RunId>) -> Result<HandoffRecord, RunError> {
        if let Some(run_id) = run_id {
            if let Some(record) = self.read(&self.run_object(run_id)).await? {
                info!("Resolved handoff record for run {}", run_id);
                return Ok(record);
            }
            debug!("No handoff record for run {}; falling back to latest", run_id);
        }

        match self.read(&self.latest_object()).await? {
            Some(record) => {
                info!(
                    "Resolved latest handoff record from run {} (commit {})",
                    record.run_id,
                    record.commit.short()
                );
                Ok(record)
            }
            None => {
                warn!("No handoff record found for workflow {}", self.workflow);
                Err(RunError::HandoffMissing)
            }
        }
    }

    async fn read(&self, object: &str) -> Result<Option<HandoffRecord>, RunError> {
        let Some(bytes) = self.blob.download(object).await? else {
            return Ok(None);
        };

        let record = serde_json::from_slice(&bytes)
            .map_err(|e| RunError::Provider(format!("decode handoff record '{object}': {e}")))?;
        Ok(Some(record))
    }
}
