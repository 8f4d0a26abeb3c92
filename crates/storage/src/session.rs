use std::path::PathBuf;

use wabridge_core::{Result, SessionRecord};

use tracing::{debug, warn};

/// Durable store for the single [`SessionRecord`].
///
/// Saves are whole-record overwrites through a sibling temp file plus
/// rename, so a concurrently starting process never observes a torn
/// write. A missing or corrupt file reads back as the empty record —
/// "never authenticated" is a normal state, not an error.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn load(&self) -> SessionRecord {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, path = %self.path.display(), "Corrupt session record, treating as empty");
                    SessionRecord::default()
                }
            },
            Err(_) => SessionRecord::default(),
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            authenticated = record.authenticated,
            path = %self.path.display(),
            "Session record saved"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("session.json"))
    }

    #[test]
    fn test_load_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let record = store_in(&dir).load();
        assert_eq!(record, SessionRecord::default());
        assert!(!record.authenticated);
    }

    #[test]
    fn test_load_corrupt_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{truncated").unwrap();
        assert_eq!(store.load(), SessionRecord::default());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = SessionRecord::authenticated_now(true);
        store.save(&record).unwrap();
        let loaded = store.load();
        assert!(loaded.authenticated);
        assert!(loaded.restored);
        assert_eq!(loaded.last_login, record.last_login);
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&SessionRecord::authenticated_now(false)).unwrap();
        store.save(&SessionRecord::signed_out()).unwrap();
        let loaded = store.load();
        assert!(!loaded.authenticated);
        // Fields from the previous record must not leak through.
        assert!(loaded.last_login.is_none());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&SessionRecord::default()).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("session.json")]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&SessionRecord::default()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), SessionRecord::default());
    }
}
