//! Regeneration gate
//!
//! Decides whether the current change warrants regenerating the cached state
//! disk. Pure function of its inputs: the changed-path set comes from an
//! external change detector, the override flag from a manual pipeline input.

/// Paths that define the on-disk state's binary layout and invariants
///
/// A change under any of these means previously cached disks may no longer
/// be readable, so the snapshot must be rebuilt.
pub const DEFAULT_WATCHED_PATHS: &[&str] = &[
    "state/src/disk_format",
    "state/src/db",
    "state/src/finalized",
    "state/src/constants.rs",
];

/// Returns true when the cached state disk must be regenerated
///
/// Contract: `force || watched ∩ changed ≠ ∅`. A changed path matches a
/// watched entry either exactly or when it lives under a watched directory.
pub fn should_regenerate(changed_paths: &[String], force: bool, watched: &[&str]) -> bool {
    if force {
        return true;
    }

    changed_paths.iter().any(|changed| {
        watched.iter().any(|watch| {
            changed == watch || changed.strip_prefix(watch).is_some_and(|rest| rest.starts_with('/'))
        })
    })
}
