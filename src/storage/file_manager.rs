use log::{debug, info};
use std::path::{Component, Path, PathBuf};
use tokio::fs as async_fs;

use crate::core::FileListing;
use crate::utils::{P2PError, Result};

/// Owns the working directory and the listing published from it.
pub struct FileManager {
    working_dir: PathBuf,
    listing: FileListing,
}

impl FileManager {
    pub async fn new(working_dir: PathBuf) -> Result<Self> {
        let mut manager = Self {
            working_dir,
            listing: FileListing::default(),
        };

        manager.scan_files().await?;
        Ok(manager)
    }

    /// Recompute the listing from the directory's regular files, sorted by name.
    /// The directory is created if it went missing.
    pub async fn scan_files(&mut self) -> Result<&FileListing> {
        async_fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;

        let mut entries = async_fs::read_dir(&self.working_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                debug!("Skipping non-file entry {:?}", entry.path());
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        info!(
            "Scanned {} files in {}",
            names.len(),
            self.working_dir.display()
        );
        self.listing = FileListing::new(names);
        Ok(&self.listing)
    }

    pub fn listing(&self) -> &FileListing {
        &self.listing
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Join `name` onto `dir`, refusing anything but a single plain file name.
pub fn resolve_in(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(name)),
        _ => Err(P2PError::InvalidFileName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("syncFolder");

        let manager = FileManager::new(dir.clone()).await.unwrap();
        assert!(dir.is_dir());
        assert!(manager.listing().is_empty());
    }

    #[tokio::test]
    async fn test_listing_is_sorted_files_only() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("b.txt"), b"b").unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(root.path().join("nested")).unwrap();

        let manager = FileManager::new(root.path().to_path_buf()).await.unwrap();
        assert_eq!(manager.listing().encode(), "a.txt@b.txt@");
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_files() {
        let root = tempfile::tempdir().unwrap();
        let mut manager = FileManager::new(root.path().to_path_buf()).await.unwrap();
        assert!(manager.listing().is_empty());

        std::fs::write(root.path().join("late.bin"), [1u8, 2, 3]).unwrap();
        assert_eq!(manager.scan_files().await.unwrap().names(), ["late.bin"]);
    }

    #[test]
    fn test_resolve_rejects_paths() {
        let dir = Path::new("/tmp/share");
        assert_eq!(
            resolve_in(dir, "notes.md").unwrap(),
            PathBuf::from("/tmp/share/notes.md")
        );
        assert!(resolve_in(dir, "../escape").is_err());
        assert!(resolve_in(dir, "a/b").is_err());
        assert!(resolve_in(dir, "").is_err());
    }
}
