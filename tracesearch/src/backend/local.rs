//! A backend that stores objects on a local filesystem

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use super::{KeyPath, RawReader, RawWriter, Version, VersionedReaderWriter};
use super::{check_range, check_version};
use crate::utils::Error;

/// Cast a not found IO error to a does not exist error
fn not_found(error: std::io::Error, path: &Path) -> Error {
    match error.kind() {
        std::io::ErrorKind::NotFound => Error::DoesNotExist(path.to_string_lossy().into_owned()),
        _ => Error::IO(error),
    }
}

/// Stores objects as files under a root directory
#[derive(Debug)]
pub struct LocalBackend {
    /// The directory all objects are stored under
    root: PathBuf,
    /// Serializes versioned operations so compare and write are atomic
    versioned: Mutex<()>,
}

impl LocalBackend {
    /// Create a new local backend, creating its root directory if needed
    ///
    /// # Arguments
    ///
    /// * `root` - The directory to store objects under
    pub async fn new<P: Into<PathBuf>>(root: P) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(LocalBackend {
            root,
            versioned: Mutex::new(()),
        })
    }

    /// Get the directory for a keypath
    fn dir(&self, keypath: &KeyPath) -> PathBuf {
        keypath
            .iter()
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Read an object if it exists
    async fn read_opt(&self, name: &str, keypath: &KeyPath) -> Result<Option<Bytes>, Error> {
        match self.read(name, keypath).await {
            Ok(data) => Ok(Some(data)),
            Err(Error::DoesNotExist(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl RawReader for LocalBackend {
    async fn list(&self, keypath: &KeyPath) -> Result<Vec<String>, Error> {
        let dir = self.dir(keypath);
        // a keypath with nothing written under it is just empty
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(Error::IO(error)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // skip any partially written temp files
            if !name.starts_with(".tmp-") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    #[instrument(name = "LocalBackend::read", skip(self), err(Debug))]
    async fn read(&self, name: &str, keypath: &KeyPath) -> Result<Bytes, Error> {
        let path = self.dir(keypath).join(name);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|error| not_found(error, &path))?;
        Ok(Bytes::from(data))
    }

    #[instrument(name = "LocalBackend::read_range", skip(self), err(Debug))]
    async fn read_range(
        &self,
        name: &str,
        keypath: &KeyPath,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, Error> {
        let path = self.dir(keypath).join(name);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|error| not_found(error, &path))?;
        // make sure this range is actually in our file
        let size = file.metadata().await?.len();
        check_range(name, size, offset, length)?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0; usize::try_from(length).map_err(|_| {
            Error::new(format!("Range length {length} does not fit in memory"))
        })?];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

#[async_trait]
impl RawWriter for LocalBackend {
    #[instrument(name = "LocalBackend::write", skip(self, data), err(Debug))]
    async fn write(&self, name: &str, keypath: &KeyPath, data: Bytes) -> Result<(), Error> {
        let dir = self.dir(keypath);
        tokio::fs::create_dir_all(&dir).await?;
        // write to a temp file first so readers never see a partial object
        let temp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&temp, &data).await?;
        tokio::fs::rename(&temp, dir.join(name)).await?;
        Ok(())
    }

    async fn delete(&self, name: &str, keypath: &KeyPath) -> Result<(), Error> {
        let path = self.dir(keypath).join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::IO(error)),
        }
    }
}

#[async_trait]
impl VersionedReaderWriter for LocalBackend {
    async fn read_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
    ) -> Result<(Bytes, Version), Error> {
        let data = self.read(name, keypath).await?;
        let version = Version::of(&data);
        Ok((data, version))
    }

    async fn write_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
        data: Bytes,
        version: &Version,
    ) -> Result<Version, Error> {
        let _guard = self.versioned.lock().await;
        // compare against what is on disk right now
        let current = self
            .read_opt(name, keypath)
            .await?
            .map(|data| Version::of(&data));
        check_version(name, version, current.as_ref())?;
        let new_version = Version::of(&data);
        self.write(name, keypath, data).await?;
        Ok(new_version)
    }

    async fn delete_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
        version: &Version,
    ) -> Result<(), Error> {
        let _guard = self.versioned.lock().await;
        if let Some(data) = self.read_opt(name, keypath).await? {
            check_version(name, version, Some(&Version::of(&data)))?;
            self.delete(name, keypath).await?;
        }
        Ok(())
    }
}
