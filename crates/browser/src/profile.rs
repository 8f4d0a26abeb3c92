//! On-disk Chrome profile management.
//!
//! Each logical session runs against its own uniquely-named profile
//! clone. Resume never mutates the known-good base profile in place: it
//! copies it (minus Chrome's transient lock files) into a fresh working
//! directory, so a half-written or locked base cannot poison the new
//! session. A working clone that proves itself is promoted back to base.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use wabridge_core::{Error, Result};

/// Chrome files that must never be carried into a clone: they encode
/// process-instance state and make the copy look locked or corrupt.
const SKIP_FILES: &[&str] = &[
    "SingletonLock",
    "SingletonSocket",
    "SingletonCookie",
    "lockfile",
];

/// Working clones older than this are removed on the next acquisition.
const CLONE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    /// Allocate a brand-new empty profile directory.
    Fresh,
    /// Clone the known-good base profile into a new working directory.
    Resume,
}

pub struct ProfileStore {
    profiles_dir: PathBuf,
}

impl ProfileStore {
    pub fn new(profiles_dir: PathBuf) -> Self {
        Self { profiles_dir }
    }

    fn base_profile(&self) -> PathBuf {
        self.profiles_dir.join("base")
    }

    /// Whether a base profile exists to resume from.
    pub fn has_base(&self) -> bool {
        self.base_profile().is_dir()
    }

    /// Acquire a working profile directory for a new browser session.
    pub fn acquire(&self, mode: ProfileMode) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.profiles_dir)?;
        self.gc_stale_clones();

        let working = self
            .profiles_dir
            .join(format!("clone-{}", uuid::Uuid::new_v4()));

        match mode {
            ProfileMode::Fresh => {
                std::fs::create_dir_all(&working)?;
                info!(profile = %working.display(), "Created fresh profile");
            }
            ProfileMode::Resume => {
                let base = self.base_profile();
                if !base.is_dir() {
                    return Err(Error::ProfileUnavailable(
                        "no base profile exists to resume from".to_string(),
                    ));
                }
                copy_profile(&base, &working)?;
                info!(
                    from = %base.display(),
                    to = %working.display(),
                    "Cloned base profile for resume"
                );
            }
        }

        make_browser_accessible(&working);
        Ok(working)
    }

    /// Record a working clone as the new base profile, so the next resume
    /// starts from this session's cookies.
    pub fn promote(&self, working: &Path) -> Result<()> {
        let base = self.base_profile();
        let staging = self
            .profiles_dir
            .join(format!("base-staging-{}", uuid::Uuid::new_v4()));

        copy_profile(working, &staging)?;
        if base.exists() {
            std::fs::remove_dir_all(&base)?;
        }
        std::fs::rename(&staging, &base)?;
        info!(from = %working.display(), "Promoted working profile to base");
        Ok(())
    }

    /// Remove abandoned working clones. Errors are logged, never fatal.
    fn gc_stale_clones(&self) {
        let entries = match std::fs::read_dir(&self.profiles_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !path.is_dir() || !name.starts_with("clone-") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .map(|age| age > CLONE_MAX_AGE)
                .unwrap_or(false);
            if stale {
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => debug!(profile = %path.display(), "Removed stale profile clone"),
                    Err(e) => warn!(profile = %path.display(), error = %e, "Failed to remove stale clone"),
                }
            }
        }
    }
}

/// Recursively copy a profile directory, skipping Chrome's transient
/// lock/socket files at any depth.
fn copy_profile(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if SKIP_FILES.iter().any(|s| name.to_string_lossy() == *s) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_profile(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path)?;
        }
        // Symlinks (rare inside profiles) are dropped rather than followed.
    }
    Ok(())
}

/// The browser process may run as a different user in a container; the
/// profile directory has to stay readable and writable for it.
fn make_browser_accessible(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o755);
            if let Err(e) = std::fs::set_permissions(path, perms) {
                warn!(profile = %path.display(), error = %e, "Could not set profile permissions");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_base(store_dir: &Path) -> PathBuf {
        let base = store_dir.join("base");
        std::fs::create_dir_all(base.join("Default")).unwrap();
        std::fs::write(base.join("Default/Cookies"), b"cookie-data").unwrap();
        std::fs::write(base.join("SingletonLock"), b"pid").unwrap();
        std::fs::write(base.join("lockfile"), b"lock").unwrap();
        base
    }

    #[test]
    fn test_fresh_allocates_unique_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let first = store.acquire(ProfileMode::Fresh).unwrap();
        let second = store.acquire(ProfileMode::Fresh).unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir());
        assert!(second.is_dir());
    }

    #[test]
    fn test_resume_without_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let err = store.acquire(ProfileMode::Resume).unwrap_err();
        assert!(matches!(err, Error::ProfileUnavailable(_)));
    }

    #[test]
    fn test_resume_clones_base_without_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_base(dir.path());
        let store = ProfileStore::new(dir.path().to_path_buf());

        let working = store.acquire(ProfileMode::Resume).unwrap();
        assert!(working.join("Default/Cookies").is_file());
        assert!(!working.join("SingletonLock").exists());
        assert!(!working.join("lockfile").exists());
    }

    #[test]
    fn test_resume_does_not_mutate_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = seed_base(dir.path());
        let store = ProfileStore::new(dir.path().to_path_buf());

        let working = store.acquire(ProfileMode::Resume).unwrap();
        std::fs::write(working.join("Default/Cookies"), b"mutated").unwrap();

        let original = std::fs::read(base.join("Default/Cookies")).unwrap();
        assert_eq!(original, b"cookie-data");
    }

    #[test]
    fn test_promote_replaces_base() {
        let dir = tempfile::tempdir().unwrap();
        seed_base(dir.path());
        let store = ProfileStore::new(dir.path().to_path_buf());

        let working = store.acquire(ProfileMode::Resume).unwrap();
        std::fs::write(working.join("Default/Cookies"), b"new-session").unwrap();
        store.promote(&working).unwrap();

        let base_cookies = std::fs::read(dir.path().join("base/Default/Cookies")).unwrap();
        assert_eq!(base_cookies, b"new-session");
        assert!(store.has_base());
    }
}
