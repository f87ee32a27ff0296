//! Persisted session storage.
//!
//! The messaging client keeps its authentication artifacts in one directory.
//! Recovery never deletes that directory in place: it is first renamed to a
//! quarantine path (so a handle still held open by a dying browser cannot
//! block or corrupt the next login) and the renamed copy is purged later.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Handle to the session directory. Not the data itself, just its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStorage {
    path: PathBuf,
}

impl SessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable key for per-storage bookkeeping (scheduled tasks).
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Atomically move the directory to a fresh `<path>_old_<uuid>` sibling.
    ///
    /// Returns the new location, or `None` when there was nothing to move.
    pub async fn quarantine(&self) -> std::io::Result<Option<PathBuf>> {
        let target = self.quarantine_path();
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Recursively delete the directory now. A missing directory is success.
    pub async fn remove_now(&self) -> std::io::Result<()> {
        remove_dir_if_exists(&self.path).await
    }

    fn quarantine_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        self.path
            .with_file_name(format!("{}_old_{}", name, Uuid::new_v4().simple()))
    }
}

/// Best-effort purge of quarantined directories.
///
/// Each failure is logged and skipped; returns how many paths were removed.
pub async fn remove_quarantined(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match remove_dir_if_exists(path).await {
            Ok(()) => {
                log::info!("Removed old session directory {}", path.display());
                removed += 1;
            }
            Err(e) => log::error!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded(dir: &Path) -> SessionStorage {
        let path = dir.join(".wwebjs_auth");
        std::fs::create_dir_all(path.join("session/Default")).unwrap();
        std::fs::write(path.join("session/Default/Cookies"), b"cookie").unwrap();
        SessionStorage::new(path)
    }

    #[tokio::test]
    async fn quarantine_moves_directory_aside() {
        let dir = tempdir().unwrap();
        let storage = seeded(dir.path());

        let moved = storage.quarantine().await.unwrap().unwrap();

        assert!(!storage.exists().await);
        assert!(moved.join("session/Default/Cookies").exists());
        let name = moved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".wwebjs_auth_old_"));
        assert_eq!(moved.parent(), storage.path().parent());
    }

    #[tokio::test]
    async fn quarantine_without_directory_is_none() {
        let dir = tempdir().unwrap();
        let storage = SessionStorage::new(dir.path().join("missing"));
        assert_eq!(storage.quarantine().await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_quarantine_never_collides() {
        let dir = tempdir().unwrap();
        let storage = seeded(dir.path());
        let first = storage.quarantine().await.unwrap().unwrap();

        std::fs::create_dir_all(storage.path()).unwrap();
        let second = storage.quarantine().await.unwrap().unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[tokio::test]
    async fn remove_now_is_recursive_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let storage = seeded(dir.path());

        storage.remove_now().await.unwrap();
        assert!(!storage.exists().await);
        storage.remove_now().await.unwrap();
    }

    #[tokio::test]
    async fn remove_quarantined_counts_removals() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a_old");
        let b = dir.path().join("b_old");
        std::fs::create_dir_all(a.join("nested")).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let removed = remove_quarantined(&[a.clone(), b.clone(), dir.path().join("gone")]).await;

        assert_eq!(removed, 3);
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn key_is_path_string() {
        let storage = SessionStorage::new("/var/lib/wabot/.wwebjs_auth");
        assert_eq!(storage.key(), "/var/lib/wabot/.wwebjs_auth");
    }
}
