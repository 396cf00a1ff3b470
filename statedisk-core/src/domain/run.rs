//! Pipeline run domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one pipeline execution.
///
/// Normally supplied by the surrounding CI system (a workflow run id);
/// generated locally when the orchestrator is invoked by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Creates a run id from an externally supplied identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh run id for ad-hoc invocations
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network whose on-disk state the run operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Lowercase name used in instance metadata and snapshot image names
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// Full commit id with access to the short form embedded in resource names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

/// Length of the short commit form used in instance and image names
pub const COMMIT_SHORT_LEN: usize = 7;

impl CommitId {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into().trim().to_ascii_lowercase())
    }

    /// Short form embedded in deterministic resource names
    ///
    /// Truncation is char-boundary safe: the commit string comes straight
    /// from CLI input and is not guaranteed to be ASCII hex.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(COMMIT_SHORT_LEN) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sanitized ref name suitable for embedding in provider resource names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefSlug(String);

impl RefSlug {
    /// Slugifies a git ref name (e.g. `feature/Sync-Speedup` -> `feature-sync-speedup`)
    pub fn new(ref_name: &str) -> Self {
        Self(crate::naming::sanitize_label(ref_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pipeline execution
///
/// Identified by (ref-slug, commit-short-id, network); owns at most one
/// ephemeral instance at a time, and that instance's name is a pure function
/// of this identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub ref_slug: RefSlug,
    pub commit: CommitId,
    pub network: Network,
}

impl PipelineRun {
    pub fn new(run_id: RunId, ref_slug: RefSlug, commit: CommitId, network: Network) -> Self {
        Self {
            run_id,
            ref_slug,
            commit,
            network,
        }
    }
}

/// Terminal status of a followed container process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    /// Remote process exited successfully (and reached the success sentinel,
    /// when one is configured)
    Success,
    /// Remote process reported error completion; terminal, never retried
    Failure,
    /// Connection dropped and reconnect attempts were exhausted
    Interrupted,
}

impl TerminalStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Success)
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalStatus::Success => "success",
            TerminalStatus::Failure => "failure",
            TerminalStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_short_form() {
        let commit = CommitId::new("A1B2C3D4E5F60718293A4B5C6D7E8F9012345678");
        assert_eq!(commit.short(), "a1b2c3d");
        assert_eq!(commit.as_str().len(), 40);

        let tiny = CommitId::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_commit_short_survives_non_ascii_input() {
        // A malformed --commit argument must error downstream, not abort here
        let odd = CommitId::new("éééééééééé");
        assert_eq!(odd.short().chars().count(), COMMIT_SHORT_LEN);

        let tiny = CommitId::new("éé");
        assert_eq!(tiny.short(), "éé");
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("Mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert!("regtest".parse::<Network>().is_err());
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
    }

    #[test]
    fn test_ref_slug_sanitization() {
        let slug = RefSlug::new("feature/Sync-Speedup");
        assert_eq!(slug.as_str(), "feature-sync-speedup");
    }
}
