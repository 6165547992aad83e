//! Small JSON documents persisted next to the ledger.
//!
//! OAuth tokens, a pending device-code authorization, and the invoice
//! awaiting import each live in their own file under the data directory.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// A typed JSON file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash never leaves a half-written document behind.
#[derive(Debug, Clone)]
pub struct StateFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the document.
    ///
    /// A missing file yields `None`. An unreadable or corrupt file is
    /// logged and also yields `None`, so callers fall back to a fresh flow.
    pub fn load(&self) -> Option<T> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file is corrupt, ignoring");
                None
            }
        }
    }

    /// Persist the document.
    pub fn save(&self, value: &T) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(value)?;

        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        restrict_permissions(&tmp).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), "state file saved");
        Ok(())
    }

    /// Delete the document. Deleting a missing file is not an error.
    pub fn clear(&self) -> StoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "state file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        token: String,
        expires_at: i64,
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let file: StateFile<Doc> = StateFile::new(dir.path().join("missing.json"));
        assert!(file.load().is_none());
        assert!(!file.exists());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("sub").join("doc.json"));
        let doc = Doc {
            token: "abc".into(),
            expires_at: 42,
        };
        file.save(&doc).unwrap();

        assert!(file.exists());
        assert_eq!(file.load(), Some(doc));
        assert!(!dir.path().join("sub").join("doc.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let file: StateFile<Doc> = StateFile::new(path);
        assert!(file.load().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("doc.json"));
        file.save(&Doc {
            token: "x".into(),
            expires_at: 1,
        })
        .unwrap();
        file.clear().unwrap();
        file.clear().unwrap();
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("doc.json"));
        file.save(&Doc {
            token: "x".into(),
            expires_at: 1,
        })
        .unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
