//! Runner configuration
//!
//! One immutable configuration value built up front and passed into every
//! component; stages never read ambient environment state themselves.

use std::time::Duration;

use statedisk_core::change::DEFAULT_WATCHED_PATHS;
use statedisk_core::domain::instance::DiskType;
use statedisk_core::domain::run::{CommitId, Network};
use statedisk_core::domain::snapshot::{SnapshotKey, StateVersion};

/// Cap on the instance-name prefix, leaving room for the ref slug and commit
/// id within the provider's 63-character resource-name limit
const MAX_INSTANCE_PREFIX_LEN: usize = 32;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning for different
/// deployment scenarios (a mainnet sync runs for hours, a small testnet
/// fixture for minutes).
#[derive(Debug, Clone)]
pub struct Config {
    /// Cloud project the instances and images live in
    pub project: String,

    /// Zone instances are provisioned into
    pub zone: String,

    /// Machine profile for the sync instance
    pub machine_type: String,

    /// Prefix for deterministic instance and image names
    pub instance_prefix: String,

    /// Container image reference template; `{commit}` is replaced with the
    /// short commit id (the registry is assumed already pushed)
    pub image_template: String,

    /// Arguments passed to the container entrypoint
    pub container_args: Vec<String>,

    /// Version tag of the on-disk state format
    pub state_version: u64,

    /// Size of the state disk in GB
    pub disk_size_gb: u32,

    /// Persistent disk type for the state disk
    pub disk_type: DiskType,

    /// Bucket holding handoff records
    pub bucket: String,

    /// Object-name prefix inside the bucket
    pub blob_prefix: String,

    /// Pre-issued blob store token; metadata server is used when unset
    pub gcs_token: Option<String>,

    /// Workflow name scoping the handoff records
    pub workflow: String,

    /// How long handoff records are retained
    pub handoff_retention: Duration,

    /// Fixed delay between container discovery polls
    pub discovery_interval: Duration,

    /// Deadline for container discovery as a whole
    pub discovery_timeout: Duration,

    /// Reconnect attempts after a dropped log-follow connection
    pub max_reconnects: u32,

    /// Optional in-process deadline around log-following
    pub run_deadline: Option<Duration>,

    /// Skip reclaim when the run deadline fired, keeping the instance for
    /// manual inspection
    pub preserve_on_timeout: bool,

    /// Log line that must appear before exit code 0 counts as success
    pub success_sentinel: Option<String>,

    /// Paths whose changes force snapshot regeneration
    pub watched_paths: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults for everything that has one
    pub fn new(
        project: impl Into<String>,
        bucket: impl Into<String>,
        image_template: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: "us-east1-b".to_string(),
            machine_type: "n2d-standard-4".to_string(),
            instance_prefix: "statedisk".to_string(),
            image_template: image_template.into(),
            container_args: Vec::new(),
            state_version: 1,
            disk_size_gb: 100,
            disk_type: DiskType::Ssd,
            bucket: bucket.into(),
            blob_prefix: "statedisk".to_string(),
            gcs_token: None,
            workflow: "state-sync".to_string(),
            handoff_retention: Duration::from_secs(730 * 86_400), // two years
            discovery_interval: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(600),
            max_reconnects: 3,
            run_deadline: None,
            preserve_on_timeout: false,
            success_sentinel: None,
            watched_paths: DEFAULT_WATCHED_PATHS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Required:
    /// - STATEDISK_PROJECT
    /// - STATEDISK_BUCKET
    /// - STATEDISK_IMAGE_TEMPLATE (must contain `{commit}`)
    ///
    /// Optional (defaults in parentheses):
    /// - STATEDISK_ZONE (us-east1-b), STATEDISK_MACHINE_TYPE (n2d-standard-4)
    /// - STATEDISK_INSTANCE_PREFIX (statedisk), STATEDISK_CONTAINER_ARGS
    /// - STATEDISK_STATE_VERSION (1), STATEDISK_DISK_SIZE_GB (100)
    /// - STATEDISK_DISK_TYPE (pd-ssd), STATEDISK_BLOB_PREFIX (statedisk)
    /// - STATEDISK_WORKFLOW (state-sync), STATEDISK_GCS_TOKEN
    /// - STATEDISK_RETENTION_DAYS (730)
    /// - STATEDISK_DISCOVERY_INTERVAL / _TIMEOUT (seconds; 10 / 600)
    /// - STATEDISK_MAX_RECONNECTS (3), STATEDISK_RUN_DEADLINE (seconds)
    /// - STATEDISK_PRESERVE_ON_TIMEOUT (false), STATEDISK_SUCCESS_SENTINEL
    pub fn from_env() -> anyhow::Result<Self> {
        let project = std::env::var("STATEDISK_PROJECT")
            .map_err(|_| anyhow::anyhow!("STATEDISK_PROJECT environment variable not set"))?;
        let bucket = std::env::var("STATEDISK_BUCKET")
            .map_err(|_| anyhow::anyhow!("STATEDISK_BUCKET environment variable not set"))?;
        let image_template = std::env::var("STATEDISK_IMAGE_TEMPLATE").map_err(|_| {
            anyhow::anyhow!("STATEDISK_IMAGE_TEMPLATE environment variable not set")
        })?;

        let mut config = Self::new(project, bucket, image_template);

        if let Ok(zone) = std::env::var("STATEDISK_ZONE") {
            config.zone = zone;
        }
        if let Ok(machine_type) = std::env::var("STATEDISK_MACHINE_TYPE") {
            config.machine_type = machine_type;
        }
        if let Ok(prefix) = std::env::var("STATEDISK_INSTANCE_PREFIX") {
            config.instance_prefix = prefix;
        }
        if let Ok(args) = std::env::var("STATEDISK_CONTAINER_ARGS") {
            config.container_args = args.split_whitespace().map(str::to_string).collect();
        }

        config.state_version = env_parse("STATEDISK_STATE_VERSION", config.state_version);
        config.disk_size_gb = env_parse("STATEDISK_DISK_SIZE_GB", config.disk_size_gb);
        if let Ok(disk_type) = std::env::var("STATEDISK_DISK_TYPE") {
            config.disk_type = parse_disk_type(&disk_type)
                .ok_or_else(|| anyhow::anyhow!("unknown disk type '{disk_type}'"))?;
        }

        if let Ok(prefix) = std::env::var("STATEDISK_BLOB_PREFIX") {
            config.blob_prefix = prefix;
        }
        if let Ok(workflow) = std::env::var("STATEDISK_WORKFLOW") {
            config.workflow = workflow;
        }
        config.gcs_token = std::env::var("STATEDISK_GCS_TOKEN").ok();

        let retention_days: u64 = env_parse("STATEDISK_RETENTION_DAYS", 730);
        config.handoff_retention = Duration::from_secs(retention_days * 86_400);

        config.discovery_interval =
            Duration::from_secs(env_parse("STATEDISK_DISCOVERY_INTERVAL", 10));
        config.discovery_timeout =
            Duration::from_secs(env_parse("STATEDISK_DISCOVERY_TIMEOUT", 600));
        config.max_reconnects = env_parse("STATEDISK_MAX_RECONNECTS", 3);

        config.run_deadline = std::env::var("STATEDISK_RUN_DEADLINE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        config.preserve_on_timeout = std::env::var("STATEDISK_PRESERVE_ON_TIMEOUT")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config.success_sentinel = std::env::var("STATEDISK_SUCCESS_SENTINEL").ok();

        Ok(config)
    }

    /// Resolves the container image reference for a commit
    pub fn resolve_image(&self, commit: &CommitId) -> String {
        self.image_template.replace("{commit}", commit.short())
    }

    /// Snapshot key for a (network, commit) under the configured format tag
    pub fn snapshot_key(&self, network: Network, commit: CommitId) -> SnapshotKey {
        SnapshotKey::new(network, StateVersion(self.state_version), commit)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.is_empty() {
            anyhow::bail!("project cannot be empty");
        }
        if self.bucket.is_empty() {
            anyhow::bail!("bucket cannot be empty");
        }
        if !self.image_template.contains("{commit}") {
            anyhow::bail!("image_template must contain a {{commit}} placeholder");
        }
        if self.instance_prefix.is_empty() {
            anyhow::bail!("instance_prefix cannot be empty");
        }
        // Resource names are RFC 1035 labels: they must start with a letter
        if !self
            .instance_prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
        {
            anyhow::bail!("instance_prefix must start with a letter");
        }
        if self.instance_prefix.len() > MAX_INSTANCE_PREFIX_LEN {
            anyhow::bail!("instance_prefix must be at most {MAX_INSTANCE_PREFIX_LEN} characters");
        }
        if self.disk_size_gb == 0 {
            anyhow::bail!("disk_size_gb must be greater than 0");
        }
        if self.discovery_interval.is_zero() {
            anyhow::bail!("discovery_interval must be greater than 0");
        }
        if self.discovery_timeout < self.discovery_interval {
            anyhow::bail!("discovery_timeout must be at least the discovery_interval");
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_disk_type(name: &str) -> Option<DiskType> {
    match name {
        "pd-ssd" => Some(DiskType::Ssd),
        "pd-balanced" => Some(DiskType::Balanced),
        "pd-standard" => Some(DiskType::Standard),
        _ => None,
    }
}
