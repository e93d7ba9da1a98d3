//! The object storage backends blocks are stored in

use async_trait::async_trait;
use bytes::Bytes;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use std::sync::Arc;

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

use crate::conf::BackendConf;
use crate::utils::Error;

/// The path to an object in a backend, outermost directory first
pub type KeyPath = Vec<String>;

/// The version of a stored object used for optimistic concurrency
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    /// The version to use when writing an object that should not exist yet
    #[must_use]
    pub fn new_object() -> Self {
        Version(String::new())
    }

    /// Get the version for some object data
    ///
    /// # Arguments
    ///
    /// * `data` - The data to get a version for
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Version(HEXLOWER.encode(&Sha256::digest(data)))
    }

    /// Whether this is the version for objects that do not exist yet
    #[must_use]
    pub fn is_new_object(&self) -> bool {
        self.0.is_empty()
    }

    /// Get this version as a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a caller's version matches what is currently stored
///
/// # Arguments
///
/// * `name` - The name of the object being updated
/// * `expected` - The version the caller expects
/// * `current` - The version currently stored if the object exists
pub(crate) fn check_version(
    name: &str,
    expected: &Version,
    current: Option<&Version>,
) -> Result<(), Error> {
    let matches = match current {
        Some(current) => current == expected,
        // objects that don't exist can only be written as new objects
        None => expected.is_new_object(),
    };
    if matches {
        Ok(())
    } else {
        Err(Error::VersionDoesNotMatch {
            name: name.to_owned(),
            expected: expected.to_string(),
            current: current.map(ToString::to_string),
        })
    }
}

/// Check that a range fits within an object
///
/// # Arguments
///
/// * `name` - The name of the object being read
/// * `size` - The size of the object
/// * `offset` - The offset to start reading at
/// * `length` - The number of bytes to read
pub(crate) fn check_range(name: &str, size: u64, offset: u64, length: u64) -> Result<(), Error> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::new(format!(
            "Range {offset}+{length} is outside of {name} which is {size} bytes"
        ))),
    }
}

/// Reads objects from a backend
#[async_trait]
pub trait RawReader: Send + Sync {
    /// List the names directly under a keypath
    ///
    /// # Arguments
    ///
    /// * `keypath` - The keypath to list
    async fn list(&self, keypath: &KeyPath) -> Result<Vec<String>, Error>;

    /// Read an entire object
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to read
    /// * `keypath` - The keypath the object is at
    async fn read(&self, name: &str, keypath: &KeyPath) -> Result<Bytes, Error>;

    /// Read a range of bytes from an object
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to read
    /// * `keypath` - The keypath the object is at
    /// * `offset` - The byte to start reading at
    /// * `length` - The number of bytes to read
    async fn read_range(
        &self,
        name: &str,
        keypath: &KeyPath,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, Error>;
}

/// Writes objects to a backend
#[async_trait]
pub trait RawWriter: Send + Sync {
    /// Write an entire object, replacing it if it exists
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to write
    /// * `keypath` - The keypath to write the object at
    /// * `data` - The data to write
    async fn write(&self, name: &str, keypath: &KeyPath, data: Bytes) -> Result<(), Error>;

    /// Delete an object
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to delete
    /// * `keypath` - The keypath the object is at
    async fn delete(&self, name: &str, keypath: &KeyPath) -> Result<(), Error>;
}

/// Reads and writes objects guarded by a version
///
/// A version mismatch returns [`Error::VersionDoesNotMatch`] and the caller
/// must re-read the object before trying again.
#[async_trait]
pub trait VersionedReaderWriter: Send + Sync {
    /// Read an object and its current version
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to read
    /// * `keypath` - The keypath the object is at
    async fn read_versioned(&self, name: &str, keypath: &KeyPath)
    -> Result<(Bytes, Version), Error>;

    /// Write an object if its version still matches
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to write
    /// * `keypath` - The keypath to write the object at
    /// * `data` - The data to write
    /// * `version` - The version we expect to be replacing
    async fn write_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
        data: Bytes,
        version: &Version,
    ) -> Result<Version, Error>;

    /// Delete an object if its version still matches
    ///
    /// Deleting an object that does not exist succeeds.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the object to delete
    /// * `keypath` - The keypath the object is at
    /// * `version` - The version we expect to be deleting
    async fn delete_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
        version: &Version,
    ) -> Result<(), Error>;
}

/// A backend supporting every kind of object operation
pub trait Backend: RawReader + RawWriter + VersionedReaderWriter {}

impl<T: RawReader + RawWriter + VersionedReaderWriter> Backend for T {}

/// Build the backend described by our config
///
/// # Arguments
///
/// * `conf` - The backend config to use
pub async fn from_conf(conf: &BackendConf) -> Result<Arc<dyn Backend>, Error> {
    match conf {
        BackendConf::Memory => Ok(Arc::new(MemoryBackend::default())),
        BackendConf::Local { path } => Ok(Arc::new(LocalBackend::new(path).await?)),
    }
}
