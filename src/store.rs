use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, TempDir};
use tracing::info;

use crate::error::CdsError;

const PARTIAL_SUFFIX: &str = "part";

/// A directory holding the artifacts of one data collection.
#[derive(Debug, Clone)]
pub struct Storage {
    root: Utf8PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_path(path: &Path) -> Result<Self, CdsError> {
        let root = Utf8PathBuf::from_path_buf(path.to_path_buf())
            .map_err(|_| CdsError::Filesystem(format!("non-utf8 path {}", path.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), CdsError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| CdsError::Filesystem(err.to_string()))
    }

    pub fn artifact_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub fn partial_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}.{PARTIAL_SUFFIX}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.artifact_path(name).as_std_path().is_file()
    }

    /// File names in the root with the given extension, sorted.
    pub fn list_artifacts(&self, extension: &str) -> Result<Vec<String>, CdsError> {
        if !self.root.as_std_path().is_dir() {
            return Err(CdsError::Filesystem(format!(
                "storage path {} is not a directory",
                self.root
            )));
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| CdsError::Filesystem(err.to_string()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| CdsError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == extension)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// A scratch directory inside the root, removed on drop. Living on the same
    /// filesystem keeps [`Storage::relocate`] a plain rename.
    pub fn staging(&self) -> Result<Staging, CdsError> {
        self.ensure_root()?;
        let dir = Builder::new()
            .prefix(".cds-staging")
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| CdsError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| CdsError::Filesystem("invalid staging dir".to_string()))?;
        Ok(Staging { _dir: dir, path })
    }

    /// Moves `source` to `name` in the root, atomically replacing an existing
    /// file. Returns whether a file was replaced.
    pub fn relocate(&self, source: &Utf8Path, name: &str) -> Result<bool, CdsError> {
        let dest = self.artifact_path(name);
        let replaced = dest.as_std_path().exists();
        let relocation_failed = |message: String| CdsError::RelocationFailed {
            path: dest.clone().into_std_path_buf(),
            message,
        };

        if fs::rename(source.as_std_path(), dest.as_std_path()).is_err() {
            // cross-device: copy next to the destination, then rename over it
            let temp = Builder::new()
                .prefix(".cds-relocate")
                .tempfile_in(self.root.as_std_path())
                .map_err(|err| relocation_failed(err.to_string()))?;
            fs::copy(source.as_std_path(), temp.path())
                .map_err(|err| relocation_failed(err.to_string()))?;
            temp.persist(dest.as_std_path())
                .map_err(|err| relocation_failed(err.to_string()))?;
            fs::remove_file(source.as_std_path())
                .map_err(|err| relocation_failed(err.to_string()))?;
        }

        info!(from = %source, to = %dest, replaced, "artifact relocated");
        Ok(replaced)
    }
}

pub struct Staging {
    _dir: TempDir,
    path: Utf8PathBuf,
}

impl Staging {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempfile::tempdir().unwrap();
        let storage = Storage::from_path(&temp.path().join("data")).unwrap();
        (temp, storage)
    }

    #[test]
    fn ensure_root_is_idempotent() {
        let (_temp, storage) = temp_storage();
        storage.ensure_root().unwrap();
        storage.ensure_root().unwrap();
        assert!(storage.root().as_std_path().is_dir());
    }

    #[test]
    fn lists_only_matching_files_sorted() {
        let (_temp, storage) = temp_storage();
        storage.ensure_root().unwrap();
        for name in ["1980_02_p.grib", "1980_01_p.grib", "notes.txt", "1980_03_p.grib.part"] {
            fs::write(storage.artifact_path(name).as_std_path(), b"x").unwrap();
        }
        fs::create_dir(storage.artifact_path("dir.grib").as_std_path()).unwrap();

        assert_eq!(
            storage.list_artifacts("grib").unwrap(),
            vec!["1980_01_p.grib", "1980_02_p.grib"]
        );
    }

    #[test]
    fn relocate_replaces_existing_file() {
        let (_temp, storage) = temp_storage();
        storage.ensure_root().unwrap();
        fs::write(storage.artifact_path("a.grib").as_std_path(), b"old").unwrap();

        let staging = storage.staging().unwrap();
        let staged = staging.path().join("a.grib");
        fs::write(staged.as_std_path(), b"new").unwrap();

        assert!(storage.relocate(&staged, "a.grib").unwrap());
        assert_eq!(fs::read(storage.artifact_path("a.grib")).unwrap(), b"new");
        assert!(!staged.as_std_path().exists());
    }

    #[test]
    fn staging_is_invisible_to_listing() {
        let (_temp, storage) = temp_storage();
        let staging = storage.staging().unwrap();
        fs::write(staging.path().join("x.grib").as_std_path(), b"x").unwrap();
        assert!(storage.list_artifacts("grib").unwrap().is_empty());
    }
}
