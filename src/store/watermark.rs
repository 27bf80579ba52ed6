use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::domain::message::{FetchBatch, Uid};
use crate::error::StateError;

/// On-disk record: the highest uid already processed. Stored as state.json next to the config.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatermarkState {
    pub last_uid: Uid,
}

/// Durable watermark. Owned by the single poll worker; the persisted value never decreases.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    state: WatermarkState,
}

impl WatermarkStore {
    /// Load state from `path`. A missing file yields watermark 0; malformed content is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).map_err(|source| StateError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WatermarkState::default(),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_uid(&self) -> Uid {
        self.state.last_uid
    }

    /// Record the highest uid of a fetch batch. Persists only when it is above the
    /// current watermark; returns whether the watermark moved.
    pub fn update_last_uid(&mut self, batch: &FetchBatch) -> Result<bool, StateError> {
        match batch.max_uid {
            Some(max) => self.advance_to(max),
            None => Ok(false),
        }
    }

    /// Move the watermark to `uid` if that is an advance, and persist it.
    pub fn advance_to(&mut self, uid: Uid) -> Result<bool, StateError> {
        if uid == 0 || uid <= self.state.last_uid {
            return Ok(false);
        }
        self.state.last_uid = uid;
        self.save()?;
        Ok(true)
    }

    /// Write the state through a sibling temp file renamed over the target, so a
    /// crash mid-write leaves either the old or the new watermark on disk.
    pub fn save(&self) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;
            restrict_permissions(dir, 0o700).map_err(|e| StateError::io(dir, e))?;
        }
        let s = serde_json::to_string_pretty(&self.state)
            .map_err(|e| StateError::io(&self.path, std::io::Error::other(e)))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
        restrict_permissions(tmp.path(), 0o600).map_err(|e| StateError::io(tmp.path(), e))?;
        tmp.write_all(s.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StateError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StateError::io(&self.path, e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn batch(uids: &[Uid]) -> FetchBatch {
        FetchBatch {
            max_uid: uids.iter().copied().max(),
            ..FetchBatch::default()
        }
    }

    #[test]
    fn missing_file_starts_at_zero() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::load(dir.path().join("state.json")).unwrap();
        assert_eq!(store.last_uid(), 0);
    }

    #[test]
    fn update_persists_batch_max() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();

        assert!(store.update_last_uid(&batch(&[3, 7, 5])).unwrap());
        assert_eq!(store.last_uid(), 7);

        let reloaded = WatermarkStore::load(&path).unwrap();
        assert_eq!(reloaded.last_uid(), 7);
    }

    #[test]
    fn never_moves_backwards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();
        store.update_last_uid(&batch(&[10])).unwrap();

        assert!(!store.update_last_uid(&batch(&[4, 9])).unwrap());
        assert!(!store.update_last_uid(&batch(&[])).unwrap());
        assert!(!store.advance_to(0).unwrap());
        assert_eq!(store.last_uid(), 10);
        assert_eq!(WatermarkStore::load(&path).unwrap().last_uid(), 10);
    }

    #[test]
    fn empty_batch_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();
        store.update_last_uid(&batch(&[])).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ last_uid: ").unwrap();
        let err = WatermarkStore::load(&path).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"last_uid": 42, "written_by": "other"}"#).unwrap();
        assert_eq!(WatermarkStore::load(&path).unwrap().last_uid(), 42);
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();
        store.advance_to(3).unwrap();
        store.advance_to(8).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["state.json"]);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{\n  \"last_uid\": 8\n}");
    }

    #[test]
    fn interrupted_write_leaves_previous_state_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();
        store.advance_to(5).unwrap();

        // a half-written temp file from a crashed save
        fs::write(dir.path().join(".tmpA1b2C3"), "{ \"last_u").unwrap();

        let mut reloaded = WatermarkStore::load(&path).unwrap();
        assert_eq!(reloaded.last_uid(), 5);
        assert!(reloaded.advance_to(6).unwrap());
        assert_eq!(WatermarkStore::load(&path).unwrap().last_uid(), 6);
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = WatermarkStore::load(&path).unwrap();
        store.advance_to(1).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
