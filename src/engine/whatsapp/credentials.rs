// WhatsApp Gateway — Credential Store
// CredentialBlob, CredentialStore trait, FileCredentialStore (one directory per session)

use crate::atoms::constants::CREDENTIALS_FILE;
use crate::atoms::error::EngineResult;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Serialized authentication state emitted by the connection client.
/// Opaque to the gateway — it is stored and handed back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlob(serde_json::Value);

impl CredentialBlob {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Persistent per-session credential storage.
pub trait CredentialStore: Send + Sync {
    /// Load the last saved blob, or `None` if the session was never paired.
    fn load(&self, id: &str) -> EngineResult<Option<CredentialBlob>>;
    /// Overwrite the stored blob.
    fn save(&self, id: &str, blob: &CredentialBlob) -> EngineResult<()>;
    /// Remove everything stored for `id`. Missing state is not an error.
    fn delete(&self, id: &str) -> EngineResult<()>;
}

// ── Filesystem implementation ──────────────────────────────────────────

/// Stores each session under `{root}/{encoded id}/creds.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one session. The id is percent-encoded (dots included)
    /// so it can never escape `root` or collide with another id.
    pub fn session_dir(&self, id: &str) -> PathBuf {
        let encoded = urlencoding::encode(id).replace('.', "%2E");
        self.root.join(encoded)
    }

    fn creds_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(CREDENTIALS_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, id: &str) -> EngineResult<Option<CredentialBlob>> {
        let path = self.creds_path(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob: CredentialBlob = serde_json::from_str(&text)?;
        debug!("[whatsapp] Loaded credentials for {} from {}", id, path.display());
        Ok(Some(blob))
    }

    fn save(&self, id: &str, blob: &CredentialBlob) -> EngineResult<()> {
        let dir = self.session_dir(id);
        std::fs::create_dir_all(&dir)?;
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = dir.join(format!("{CREDENTIALS_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(blob)?)?;
        std::fs::rename(&tmp, dir.join(CREDENTIALS_FILE))?;
        debug!("[whatsapp] Saved credentials for {}", id);
        Ok(())
    }

    fn delete(&self, id: &str) -> EngineResult<()> {
        let dir = self.session_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("[whatsapp] Deleted credentials for {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(store.load("5511999").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_and_load_returns_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save("A", &CredentialBlob::new(json!({"step": 1}))).unwrap();
        store.save("A", &CredentialBlob::new(json!({"step": 2}))).unwrap();
        let loaded = store.load("A").unwrap().unwrap();
        assert_eq!(loaded.as_value(), &json!({"step": 2}));
        assert!(!store.session_dir("A").join("creds.json.tmp").exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save("A", &CredentialBlob::new(json!({}))).unwrap();
        store.delete("A").unwrap();
        store.delete("A").unwrap();
        assert!(store.load("A").unwrap().is_none());
        assert!(!store.session_dir("A").exists());
    }

    #[test]
    fn hostile_ids_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        for id in ["..", "../escape", "a/b", "."] {
            let session_dir = store.session_dir(id);
            assert_eq!(session_dir.parent().unwrap(), dir.path(), "id {id:?}");
        }
        assert_ne!(store.session_dir("a/b"), store.session_dir("a_b"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let session_dir = store.session_dir("A");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join("creds.json"), "{not json").unwrap();
        assert!(store.load("A").is_err());
    }
}
