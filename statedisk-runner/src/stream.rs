//! Log streaming
//!
//! Attaches to the discovered container's combined output and blocks until
//! the remote process exits. A dropped connection is transient and gets a
//! bounded number of reattach attempts; a genuine remote failure is terminal
//! and never retried.

use std::time::Duration;
use tracing::{info, warn};

use statedisk_core::domain::instance::{ContainerHandle, InstanceRef};
use statedisk_core::domain::run::TerminalStatus;
use statedisk_core::error::RunError;
use statedisk_gcloud::{ComputeProvider, StreamExit};

/// Delay before reattaching after a dropped connection
const REATTACH_DELAY: Duration = Duration::from_millis(500);

/// Follows the container's output to completion
///
/// # Arguments
/// * `sentinel` - Log line that must appear for exit code 0 to count as
///   success; a container that exits cleanly without reaching it still failed
/// * `max_reconnects` - Reattach budget for dropped connections
///
/// # Returns
/// `Success` or `Failure` from the remote process, or `Interrupted` once the
/// reattach budget is exhausted.
pub async fn follow(
    provider: &dyn ComputeProvider,
    instance: &InstanceRef,
    container: &ContainerHandle,
    sentinel: Option<&str>,
    max_reconnects: u32,
) -> Result<TerminalStatus, RunError> {
    let mut reconnects = 0;

    loop {
        let exit = provider
            .stream_container_logs(instance, container, sentinel)
            .await?;

        match exit {
            StreamExit::RemoteExit {
                code: 0,
                sentinel_seen,
            } => {
                if sentinel.is_some() && !sentinel_seen {
                    warn!(
                        "Container {} exited cleanly without reaching the success sentinel",
                        container
                    );
                    return Ok(TerminalStatus::Failure);
                }
                info!("Container {} completed successfully", container);
                return Ok(TerminalStatus::Success);
            }
            StreamExit::RemoteExit { code, .. } => {
                warn!("Container {} failed with exit code {}", container, code);
                return Ok(TerminalStatus::Failure);
            }
            StreamExit::ConnectionLost => {
                reconnects += 1;
                if reconnects > max_reconnects {
                    warn!(
                        "Log stream to {} lost; {} reconnect attempt(s) exhausted",
                        instance.name, max_reconnects
                    );
                    return Ok(TerminalStatus::Interrupted);
                }
                warn!(
                    "Log stream to {} lost; reconnecting ({}/{})",
                    instance.name, reconnects, max_reconnects
                );
                tokio::time::sleep(REATTACH_DELAY).await;
            }
        }
    }
}
