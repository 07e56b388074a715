//! # Storage backends
//!
//! Configuration and unification for the byte storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Which storage backend to use, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep everything in memory, pre-creating one bucket.
    Memory {
        /// Bucket to create.
        bucket: String,
    },

    /// Store objects as files below a root directory.
    #[cfg(feature = "local")]
    Local {
        /// Root directory.
        path: Utf8PathBuf,
    },

    /// Store objects in a temporary directory removed on drop.
    #[cfg(feature = "tmp")]
    Temp {},
}

impl StorageConfig {
    /// Build the storage handle described by this configuration.
    #[tracing::instrument]
    pub fn build(self) -> Result<Storage, StorageError> {
        let storage: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "tmp")]
            StorageConfig::Temp {} => TempDriver::new()
                .map_err(|error| StorageError::io("temp", error))?
                .into(),
        };
        Ok(storage)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Scope this handle to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// A storage handle scoped to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name.
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// Check whether an object exists.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn exists(&self, key: &Utf8Path) -> Result<bool, StorageError> {
        self.driver.exists(&self.bucket, key).await
    }

    /// Get object metadata.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn metadata(&self, key: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, key).await
    }

    /// Stream an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download<'d, W>(&'d self, key: &Utf8Path, writer: &mut W) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + 'd,
    {
        tracing::trace!(%key, "Downloading from: {}/{key}", self.bucket);
        self.driver.download(&self.bucket, key, writer).await
    }

    /// Save the contents of `reader` at `key`.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn upload<'d, R>(&'d self, key: &Utf8Path, reader: &mut R) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + 'd,
    {
        tracing::trace!(%key, "Uploading to: {}/{key}", self.bucket);
        self.driver.upload(&self.bucket, key, reader).await
    }

    /// Read a whole object into memory.
    pub async fn read(&self, key: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut buffer = Vec::new();
        self.download(key, &mut buffer).await?;
        Ok(buffer)
    }

    /// Save a byte slice at `key`.
    pub async fn write(&self, key: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = data;
        self.upload(key, &mut reader).await
    }

    /// List keys below `prefix`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Delete an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn delete(&self, key: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, key).await
    }

    /// Move an object to a new key.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StorageError> {
        self.driver.rename(&self.bucket, from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_roundtrip() {
        let storage: Storage = MemoryStorage::with_buckets(&["test"]).into();
        let bucket = storage.bucket("test");

        let key = Utf8Path::new("a/b/c");
        assert!(!bucket.exists(key).await.unwrap());

        bucket.write(key, b"hello").await.unwrap();
        assert!(bucket.exists(key).await.unwrap());
        assert_eq!(bucket.metadata(key).await.unwrap().size, 5);
        assert_eq!(bucket.read(key).await.unwrap(), b"hello");

        bucket.rename(key, Utf8Path::new("a/d")).await.unwrap();
        assert!(!bucket.exists(key).await.unwrap());
        assert_eq!(bucket.read(Utf8Path::new("a/d")).await.unwrap(), b"hello");

        bucket.delete(Utf8Path::new("a/d")).await.unwrap();
        assert!(bucket.list(None).await.unwrap().is_empty());
    }

    #[test]
    fn config_from_json() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            storage: StorageConfig,
        }

        let config: Wrapper = serde_json::from_str(r#"{"storage": {"memory": {"bucket": "b"}}}"#)
            .unwrap();
        assert!(matches!(config.storage, StorageConfig::Memory { bucket } if bucket == "b"));
    }
}
