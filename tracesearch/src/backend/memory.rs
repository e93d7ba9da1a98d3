//! An in memory backend

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::{KeyPath, RawReader, RawWriter, Version, VersionedReaderWriter};
use super::{check_range, check_version};
use crate::utils::Error;

/// Build the full key for an object
fn object_key(name: &str, keypath: &KeyPath) -> String {
    let mut key = keypath.join("/");
    if !key.is_empty() {
        key.push('/');
    }
    key.push_str(name);
    key
}

/// Keeps objects in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Our objects by their full key
    objects: RwLock<BTreeMap<String, Bytes>>,
}

#[async_trait]
impl RawReader for MemoryBackend {
    async fn list(&self, keypath: &KeyPath) -> Result<Vec<String>, Error> {
        // build the prefix to list under
        let prefix = object_key("", keypath);
        let objects = self.objects.read().await;
        // get the next segment of every key under this prefix
        let names: BTreeSet<String> = objects
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn read(&self, name: &str, keypath: &KeyPath) -> Result<Bytes, Error> {
        let key = object_key(name, keypath);
        match self.objects.read().await.get(&key) {
            Some(data) => Ok(data.clone()),
            None => Err(Error::DoesNotExist(key)),
        }
    }

    async fn read_range(
        &self,
        name: &str,
        keypath: &KeyPath,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, Error> {
        let data = self.read(name, keypath).await?;
        check_range(name, data.len() as u64, offset, length)?;
        // our range is in bounds so these casts can't truncate
        let start = offset as usize;
        Ok(data.slice(start..start + length as usize))
    }
}

#[async_trait]
impl RawWriter for MemoryBackend {
    async fn write(&self, name: &str, keypath: &KeyPath, data: Bytes) -> Result<(), Error> {
        let key = object_key(name, keypath);
        self.objects.write().await.insert(key, data);
        Ok(())
    }

    async fn delete(&self, name: &str, keypath: &KeyPath) -> Result<(), Error> {
        let key = object_key(name, keypath);
        self.objects.write().await.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl VersionedReaderWriter for MemoryBackend {
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
        let key = object_key(name, keypath);
        // hold the write lock so our compare and write are atomic
        let mut objects = self.objects.write().await;
        let current = objects.get(&key).map(|data| Version::of(data));
        check_version(name, version, current.as_ref())?;
        let new_version = Version::of(&data);
        objects.insert(key, data);
        Ok(new_version)
    }

    async fn delete_versioned(
        &self,
        name: &str,
        keypath: &KeyPath,
        version: &Version,
    ) -> Result<(), Error> {
        let key = object_key(name, keypath);
        let mut objects = self.objects.write().await;
        // deleting something that is already gone is fine
        if let Some(current) = objects.get(&key).map(|data| Version::of(data)) {
            check_version(name, version, Some(&current))?;
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> KeyPath {
        parts.iter().map(|part| (*part).to_owned()).collect()
    }

    #[tokio::test]
    async fn list_returns_children() {
        let backend = MemoryBackend::default();
        let data = Bytes::from_static(b"{}");
        backend.write("meta.json", &path(&["t1", "b1"]), data.clone()).await.unwrap();
        backend.write("meta.json", &path(&["t1", "b2"]), data.clone()).await.unwrap();
        backend.write("index.json", &path(&["t1"]), data.clone()).await.unwrap();
        backend.write("meta.json", &path(&["t10", "b3"]), data).await.unwrap();
        let names = backend.list(&path(&["t1"])).await.unwrap();
        assert_eq!(names, vec!["b1", "b2", "index.json"]);
        let tenants = backend.list(&Vec::new()).await.unwrap();
        assert_eq!(tenants, vec!["t1", "t10"]);
    }

    #[tokio::test]
    async fn missing_objects_do_not_exist() {
        let backend = MemoryBackend::default();
        let err = backend.read("nope", &path(&["t1"])).await.unwrap_err();
        assert_eq!(err.kind(), "DoesNotExist");
    }
}
