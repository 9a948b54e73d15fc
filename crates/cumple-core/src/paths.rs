use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory names
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "cumple.yaml";
pub const DEFAULT_PERSIST_DIR: &str = "/data";
pub const PROFILE_DIR: &str = "chrome-profile";
pub const SNAPSHOT_FILE: &str = "qr.png";

/// Chrome process-exclusivity artifacts left in the profile directory by an
/// unclean shutdown.
pub const PROFILE_LOCK_NAMES: &[&str] = &[
    "SingletonLock",
    "SingletonCookie",
    "SingletonSocket",
    "SingletonIPC",
];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn default_profile_dir(persist_dir: &Path) -> PathBuf {
    persist_dir.join(PROFILE_DIR)
}

pub fn snapshot_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(SNAPSHOT_FILE)
}
