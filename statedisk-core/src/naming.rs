//! Deterministic resource naming
//!
//! Instance names are a pure function of (prefix, ref-slug, commit-short-id).
//! Later stages relocate the instance by recomputing the same name, so no
//! provider-side resource id ever needs to be persisted across process
//! boundaries. The same determinism makes re-provisioning under identical
//! inputs detectable as a name collision rather than a silent duplicate.

use crate::domain::instance::InstanceName;

/// Provider limit for resource names (RFC 1035 label)
pub const INSTANCE_NAME_MAX_LEN: usize = 63;

/// Lowercases and strips a raw string down to a valid name fragment
///
/// Every run of characters outside `[a-z0-9]` collapses to a single `-`,
/// and leading/trailing dashes are trimmed.
pub fn sanitize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    out
}

/// Builds the deterministic instance name `{prefix}-{ref_slug}-{commit_short}`
///
/// The ref slug is the only variable-length fragment, so it is the part that
/// gets truncated when the assembled name would exceed the provider limit;
/// the commit id is always preserved in full so that names for different
/// commits never collide.
pub fn instance_name(prefix: &str, ref_slug: &str, commit_short: &str) -> InstanceName {
    let mut prefix = sanitize_label(prefix);
    let commit = sanitize_label(commit_short);
    let mut slug = sanitize_label(ref_slug);

    // The commit is the one fragment never sacrificed; an oversized prefix
    // loses its tail before the slug budget is computed
    let prefix_budget = INSTANCE_NAME_MAX_LEN.saturating_sub(commit.len() + 1);
    if prefix.len() > prefix_budget {
        prefix.truncate(prefix_budget);
        while prefix.ends_with('-') {
            prefix.pop();
        }
    }

    // prefix + '-' + slug + '-' + commit
    let fixed_len = prefix.len() + commit.len() + 2;
    let budget = INSTANCE_NAME_MAX_LEN.saturating_sub(fixed_len);
    if slug.len() > budget {
        slug.truncate(budget);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        InstanceName(format!("{prefix}-{commit}"))
    } else {
        InstanceName(format!("{prefix}-{slug}-{commit}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Feature/Sync_Speedup"), "feature-sync-speedup");
        assert_eq!(sanitize_label("--main--"), "main");
        assert_eq!(sanitize_label("v1.2.3"), "v1-2-3");
        assert_eq!(sanitize_label(""), "");
    }

    #[test]
    fn test_instance_name_is_deterministic() {
        let a = instance_name("statedisk", "main", "a1b2c3d");
        let b = instance_name("statedisk", "main", "a1b2c3d");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "statedisk-main-a1b2c3d");
    }

    #[test]
    fn test_instance_name_differs_per_input() {
        let main = instance_name("statedisk", "main", "a1b2c3d");
        let branch = instance_name("statedisk", "fix-sync", "a1b2c3d");
        let other_commit = instance_name("statedisk", "main", "f00dca7");

        assert_ne!(main, branch);
        assert_ne!(main, other_commit);
        assert_ne!(branch, other_commit);
    }

    #[test]
    fn test_long_ref_truncates_but_keeps_commit() {
        let long_ref = "feature/".to_string() + &"very-long-segment-".repeat(8);
        let name = instance_name("statedisk", &long_ref, "a1b2c3d");

        assert!(name.as_str().len() <= INSTANCE_NAME_MAX_LEN);
        assert!(name.as_str().ends_with("-a1b2c3d"));
        assert!(name.as_str().starts_with("statedisk-"));
        // Truncation never leaves a dangling dash before the commit
        assert!(!name.as_str().contains("--"));
    }

    #[test]
    fn test_oversized_prefix_still_fits_and_keeps_commit() {
        let prefix = "p".repeat(80);
        let name = instance_name(&prefix, "main", "a1b2c3d");

        assert!(name.as_str().len() <= INSTANCE_NAME_MAX_LEN);
        assert!(name.as_str().ends_with("-a1b2c3d"));
    }

    #[test]
    fn test_empty_ref_slug() {
        let name = instance_name("statedisk", "", "a1b2c3d");
        assert_eq!(name.as_str(), "statedisk-a1b2c3d");
    }
}
