//! Filesystem access for the synced files directory
//!
//! Every path handed in is a normalized relative name; it is resolved
//! against the files directory here and nowhere else.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::error::{StorageError, StorageResult};
use crate::models::{FileRecord, Timestamp};
use crate::paths::{is_supported, normalize_path};

/// Reader/writer for the project's files directory
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    root: PathBuf,
}

impl ProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The files directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a relative file name
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(normalize_path(name))
    }

    /// Relative, normalized name for an absolute path under the root
    pub fn relative_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let name = normalize_path(&name);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Create the files directory if missing
    pub fn ensure_root(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::CreateDirectory {
            path: self.root.clone(),
            source,
        })
    }

    /// Recursively list every supported file with its content and mtime
    ///
    /// Unreadable entries are skipped with a warning.
    pub fn list_files(&self) -> StorageResult<Vec<FileRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry while listing files: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = self.relative_name(entry.path()) else {
                continue;
            };
            if !is_supported(&name) {
                continue;
            }
            match self.read_file(&name) {
                Ok(record) => files.push(record),
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} local files", files.len());
        Ok(files)
    }

    /// Read one file
    pub fn read_file(&self, name: &str) -> StorageResult<FileRecord> {
        let path = self.resolve(name);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound { path: path.clone() },
            _ => StorageError::ReadError {
                path: path.clone(),
                source: e,
            },
        })?;

        let mut record = FileRecord::new(normalize_path(name), content);
        record.modified_at = modified_millis(&path);
        Ok(record)
    }

    /// Write one file, creating parent directories as needed
    pub fn write_file(&self, name: &str, content: &str) -> StorageResult<()> {
        let path = self.resolve(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, content).map_err(|e| StorageError::from_io(e, path))
    }

    /// Delete one file; a file that is already gone is not an error
    pub fn delete_file(&self, name: &str) -> StorageResult<()> {
        let path = self.resolve(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already absent", name);
                Ok(())
            }
            Err(source) => Err(StorageError::DeleteError { path, source }),
        }
    }
}

/// File modification time in epoch milliseconds
fn modified_millis(path: &Path) -> Option<Timestamp> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Timestamp::try_from(since_epoch.as_millis()).ok()
}

/// Write a file atomically
///
/// Writes to a temporary file first, then renames it to the target path so
/// the file is never left partially written.
pub fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProjectFiles) {
        let temp_dir = TempDir::new().unwrap();
        let files = ProjectFiles::new(temp_dir.path().join("files"));
        files.ensure_root().unwrap();
        (temp_dir, files)
    }

    #[test]
    fn test_write_creates_parents_and_reads_back() {
        let (_dir, files) = setup();

        files
            .write_file("components/nav/Menu.tsx", "export const Menu = 1")
            .unwrap();
        let record = files.read_file("components/nav/Menu.tsx").unwrap();

        assert_eq!(record.name, "components/nav/Menu.tsx");
        assert_eq!(record.content, "export const Menu = 1");
        assert!(record.modified_at.is_some());
    }

    #[test]
    fn test_list_files_filters_extensions() {
        let (_dir, files) = setup();

        files.write_file("App.tsx", "a").unwrap();
        files.write_file("lib/util.ts", "b").unwrap();
        files.write_file("README.md", "c").unwrap();
        files.write_file("image.png", "d").unwrap();

        let listed = files.list_files().unwrap();
        let names: Vec<_> = listed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["App.tsx", "lib/util.ts"]);
    }

    #[test]
    fn test_list_files_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let files = ProjectFiles::new(temp_dir.path().join("does-not-exist"));
        assert!(files.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_file_is_ok() {
        let (_dir, files) = setup();
        files.delete_file("Ghost.tsx").unwrap();

        files.write_file("Real.tsx", "x").unwrap();
        files.delete_file("Real.tsx").unwrap();
        assert!(!files.resolve("Real.tsx").exists());
    }

    #[test]
    fn test_read_missing_file() {
        let (_dir, files) = setup();
        let err = files.read_file("Missing.tsx").unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_cannot_escape_root() {
        let (_dir, files) = setup();
        let path = files.resolve("../../outside.ts");
        assert!(path.starts_with(files.root()));
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("doc.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
