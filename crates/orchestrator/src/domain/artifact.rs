#![forbid(unsafe_code)]

use crate::error::Error;
use std::io;
use std::path::{Path, PathBuf};

/// A sample on disk, as seen at the moment it was inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
        }
    }

    /// Read the identifying metadata of the file at `path`.
    ///
    /// Fails with [`Error::MetadataUnavailable`] when the path does not exist,
    /// cannot be read, is not a regular file or has no file name component.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let unavailable = |source: io::Error| Error::MetadataUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(unavailable)?;
        if !metadata.is_file() {
            return Err(unavailable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                unavailable(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path has no file name",
                ))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inspect_reads_name_and_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let artifact = Artifact::inspect(&path).unwrap();
        assert_eq!(artifact.name, "sample.bin");
        assert_eq!(artifact.size, 1024);
        assert_eq!(artifact.path, path);
    }

    #[test]
    fn missing_file_is_metadata_unavailable() {
        let dir = tempdir().unwrap();
        let err = Artifact::inspect(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::MetadataUnavailable { .. }));
    }

    #[test]
    fn directory_is_metadata_unavailable() {
        let dir = tempdir().unwrap();
        let err = Artifact::inspect(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::MetadataUnavailable { ref source, .. } if source.kind() == io::ErrorKind::InvalidInput
        ));
    }
}
