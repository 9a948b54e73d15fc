use crate::paths::PROFILE_LOCK_NAMES;
use std::path::Path;
use tracing::{info, warn};

/// Remove stale browser-exclusivity artifacts from `profile_dir`.
///
/// Chrome leaves `Singleton*` entries behind when it is killed; while they
/// exist a new browser refuses the profile. `SingletonLock` is usually a
/// dangling symlink, so existence is checked without following links.
/// Returns the names that were removed. A file that cannot be removed is
/// logged and skipped.
pub fn clear_profile_locks(profile_dir: &Path) -> Vec<String> {
    let mut removed = Vec::new();
    if !profile_dir.is_dir() {
        return removed;
    }
    for name in PROFILE_LOCK_NAMES {
        let path = profile_dir.join(name);
        if std::fs::symlink_metadata(&path).is_err() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(name.to_string()),
            Err(e) => warn!(lock = %name, error = %e, "could not remove profile lock"),
        }
    }
    if !removed.is_empty() {
        info!(removed = %removed.join(", "), "cleared profile locks");
    }
    removed
}
