//! Container discovery
//!
//! Provisioning only specifies *what* to run; the runtime identity the
//! platform assigns to the container is needed to address its log stream
//! precisely. When the provider does not report that identity at create
//! time, this module polls the system log at a fixed interval for an
//! identity-announcement entry mentioning the deterministic instance name
//! and extracts the decorated container token from it.
//!
//! The search is inherently racy: the entry may already exist before the
//! first poll, or lag behind provider-side log propagation. Every poll is an
//! idempotent read over the same window, so retries are safe.

use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use statedisk_core::domain::instance::{ContainerHandle, InstanceName};
use statedisk_core::error::RunError;
use statedisk_gcloud::{ComputeProvider, SystemLogEntry};

/// Resolves the runtime container identity for an instance
///
/// # Arguments
/// * `provider` - Source of the system log stream
/// * `instance` - Deterministic name the announcement must mention
/// * `interval` - Fixed delay between polls
/// * `timeout` - Deadline for the search as a whole
///
/// # Returns
/// The discovered handle, or `DiscoveryTimeout` when no matching entry
/// appears before the deadline.
pub async fn discover(
    provider: &dyn ComputeProvider,
    instance: &InstanceName,
    interval: Duration,
    timeout: Duration,
) -> Result<ContainerHandle, RunError> {
    let deadline = Instant::now() + timeout;
    let filter = format!("\"{}\"", instance.as_str());
    let pattern = token_pattern(instance);

    info!(
        "Discovering container identity for {} (interval: {:?}, timeout: {:?})",
        instance, interval, timeout
    );

    loop {
        let entries = provider.query_system_log(&filter).await?;
        debug!("Discovery poll returned {} entries", entries.len());

        if let Some(handle) = extract_handle(&entries, instance, &pattern) {
            info!("Discovered container {} for instance {}", handle, instance);
            return Ok(handle);
        }

        if Instant::now() + interval > deadline {
            return Err(RunError::DiscoveryTimeout { waited: timeout });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Pattern for the decorated container token embedding the instance name
fn token_pattern(instance: &InstanceName) -> Regex {
    let name = regex::escape(instance.as_str());
    // Names are RFC-1035-ish labels; the token may carry platform prefixes
    // and suffixes around the instance name
    Regex::new(&format!("[a-z0-9][a-z0-9-]*{name}[a-z0-9-]*"))
        .expect("escaped instance name always forms a valid pattern")
}

/// Scans announcement entries for a container token
///
/// A token equal to the bare instance name is the instance's own lifecycle
/// noise (create/delete events), not a container announcement, and is
/// skipped.
fn extract_handle(
    entries: &[SystemLogEntry],
    instance: &InstanceName,
    pattern: &Regex,
) -> Option<ContainerHandle> {
    entries.iter().find_map(|entry| {
        pattern
            .find_iter(&entry.message)
            .map(|m| m.as_str())
            .find(|token| token.len() > instance.as_str().len())
            .map(ContainerHandle::new)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeCompute;
    use statedisk_core::naming::instance_name;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_millis(10);
    const TIMEOUT: Duration = Duration::from_millis(100);

    fn name() -> InstanceName {
        instance_name("statedisk", "main", "a1b2c3d")
    }

    #[tokio::test]
    async fn test_discovers_decorated_token() {
        let fake = Arc::new(FakeCompute::default());
        fake.state.lock().unwrap().log_entries = vec![
            "Created instance statedisk-main-a1b2c3d".to_string(),
            "Starting container with name klt-statedisk-main-a1b2c3d-xyzw.".to_string(),
        ];

        let handle = discover(fake.as_ref(), &name(), INTERVAL, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "klt-statedisk-main-a1b2c3d-xyzw");
    }

    #[tokio::test]
    async fn test_bare_instance_name_is_not_an_identity() {
        let fake = Arc::new(FakeCompute::default());
        fake.state.lock().unwrap().log_entries =
            vec!["Instance statedisk-main-a1b2c3d is now running".to_string()];

        let err = discover(fake.as_ref(), &name(), INTERVAL, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::DiscoveryTimeout { .. }));
    }

    #[tokio::test]
    async fn test_silent_log_times_out() {
        let fake = Arc::new(FakeCompute::default());

        let started = std::time::Instant::now();
        let err = discover(fake.as_ref(), &name(), INTERVAL, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::DiscoveryTimeout { .. }));
        assert!(err.is_recoverable());
        // Bounded: returns around the deadline, not indefinitely
        assert!(started.elapsed() < TIMEOUT * 10);
        // Polled more than once before giving up
        assert!(fake.state.lock().unwrap().log_queries > 1);
    }

    #[tokio::test]
    async fn test_entry_appearing_late_is_found() {
        let fake = Arc::new(FakeCompute::default());
        {
            let mut state = fake.state.lock().unwrap();
            state.log_entries =
                vec!["konlet: launched klt-statedisk-main-a1b2c3d-abcd".to_string()];
            // Announcement only propagates after a few polls
            state.log_available_after = 3;
        }

        let handle = discover(fake.as_ref(), &name(), INTERVAL, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "klt-statedisk-main-a1b2c3d-abcd");
        assert!(fake.state.lock().unwrap().log_queries >= 4);
    }
}
