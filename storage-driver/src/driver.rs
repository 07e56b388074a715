use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for object contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + 'r;

/// A writer stream for object contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + 'w;

/// Object metadata, which will be generically provided by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// The creation timestamp of the object.
    pub created: DateTime<Utc>,
}

/// A key/value byte store.
///
/// Keys are `/`-delimited paths inside a bucket. Drivers must make `upload`
/// atomic: when it returns an error, no object is left at the key, and a
/// previous object at that key is untouched.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug + Send + Sync {
    /// The name of the driver, used in errors and tracing fields.
    fn name(&self) -> &'static str;

    /// Check whether an object exists at `key`.
    async fn exists(&self, bucket: &str, key: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(bucket, key).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Get the metadata for an object.
    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Save the contents of `reader` at `key`, replacing any existing object.
    async fn upload(
        &self,
        bucket: &str,
        key: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Stream the object at `key` into `writer`.
    async fn download(
        &self,
        bucket: &str,
        key: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// List every key in the bucket which starts with `prefix`.
    ///
    /// Prefixes match whole path components, so `a/b` matches `a/b/c` but not `a/bc`.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;

    /// Delete the object at `key`. Deleting a missing key succeeds.
    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError>;

    /// Move an object from `from` to `to`, replacing any object at `to`.
    ///
    /// The default implementation copies through memory and then deletes the source.
    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        self.download(bucket, from, &mut buffer).await?;

        let mut reader = buffer.as_slice();
        self.upload(bucket, to, &mut reader).await?;
        self.delete(bucket, from).await
    }
}

/// Build the error returned when a key is missing.
pub fn not_found(driver: &'static str, bucket: &str, key: &Utf8Path) -> StorageError {
    StorageError::builder(
        driver,
        StorageErrorKind::NotFound,
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("key not found: {key}")),
    )
    .bucket(bucket)
    .path(key.as_str())
    .build()
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn exists(&self, bucket: &str, key: &Utf8Path) -> Result<bool, StorageError> {
        self.deref().exists(bucket, key).await
    }

    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, key).await
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, key, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        key: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, key, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }

    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, key).await
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().rename(bucket, from, to).await
    }
}
