//! Upload sessions: bytes pushed in over one or more requests, then stored
//! as a verified blob.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use storage::StorageBucket;
use tokio::io::AsyncBufReadExt as _;
use uuid::Uuid;

use crate::blob::{Blob, BlobContent, StorageLayers, put_streamed};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout;
use crate::name::RepositoryName;

/// How much of an upload has been received, rendered as a `Range` value.
///
/// ```
/// use registry::UploadOffset;
///
/// assert_eq!(UploadOffset::new(0).to_string(), "0-0");
/// assert_eq!(UploadOffset::new(10).to_string(), "0-9");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOffset {
    size: u64,
}

impl UploadOffset {
    /// An offset after `size` bytes.
    pub fn new(size: u64) -> Self {
        Self { size }
    }

    /// Bytes received.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Display for UploadOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0-{}", self.size.saturating_sub(1))
    }
}

/// An upload session in progress.
#[async_trait]
pub trait Upload: fmt::Debug + Send + Sync {
    /// The session id.
    fn id(&self) -> Uuid;

    /// Add data to the session. A session accepts a single successful
    /// append; a failed append leaves nothing behind and may be retried.
    /// Appending nothing leaves the session unchanged.
    async fn append(&self, content: BlobContent) -> RegistryResult<UploadOffset>;

    /// How much data the session holds.
    async fn offset(&self) -> RegistryResult<UploadOffset>;

    /// Store the received data as the blob `digest` and end the session.
    ///
    /// When the data does not match `digest`, the session is kept.
    async fn complete(&self, digest: &Digest) -> RegistryResult<Box<dyn Blob>>;

    /// Discard the session.
    async fn cancel(&self) -> RegistryResult<()>;
}

/// Upload sessions of one repository.
#[async_trait]
pub trait Uploads: Send + Sync {
    /// Begin a new session.
    async fn start(&self) -> RegistryResult<Box<dyn Upload>>;

    /// Find a session by id. `None` when it does not exist.
    async fn get(&self, id: Uuid) -> RegistryResult<Option<Box<dyn Upload>>>;
}

/// Upload sessions kept in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageUploads {
    name: RepositoryName,
    bucket: StorageBucket,
}

impl StorageUploads {
    /// Sessions of repository `name`, stored in `bucket`.
    pub fn new(name: RepositoryName, bucket: StorageBucket) -> Self {
        Self { name, bucket }
    }

    fn session(&self, id: Uuid) -> StorageUpload {
        StorageUpload {
            name: self.name.clone(),
            id,
            layers: StorageLayers::new(self.bucket.clone()),
            bucket: self.bucket.clone(),
        }
    }
}

#[async_trait]
impl Uploads for StorageUploads {
    async fn start(&self) -> RegistryResult<Box<dyn Upload>> {
        let session = self.session(Uuid::new_v4());
        let started = Utc::now().to_rfc3339();
        self.bucket
            .write(
                &layout::upload_started_key(&self.name, session.id),
                started.as_bytes(),
            )
            .await?;

        tracing::debug!(repository = %self.name, id = %session.id, "started upload");
        Ok(Box::new(session))
    }

    async fn get(&self, id: Uuid) -> RegistryResult<Option<Box<dyn Upload>>> {
        let entries = self
            .bucket
            .list(Some(&layout::upload_key(&self.name, id)))
            .await?;

        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(self.session(id))))
    }
}

/// An upload session in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageUpload {
    name: RepositoryName,
    id: Uuid,
    bucket: StorageBucket,
    layers: StorageLayers,
}

#[async_trait]
impl Upload for StorageUpload {
    fn id(&self) -> Uuid {
        self.id
    }

    #[tracing::instrument(skip(self, content), fields(repository = %self.name, id = %self.id))]
    async fn append(&self, mut content: BlobContent) -> RegistryResult<UploadOffset> {
        let key = layout::upload_data_key(&self.name, self.id);
        if self.bucket.exists(&key).await? {
            return Err(RegistryError::UnsupportedOperation(
                "upload sessions accept a single chunk",
            ));
        }

        if content.fill_buf().await?.is_empty() {
            return self.offset().await;
        }

        self.bucket.upload(&key, &mut content).await?;
        self.offset().await
    }

    async fn offset(&self) -> RegistryResult<UploadOffset> {
        let key = layout::upload_data_key(&self.name, self.id);
        match self.bucket.metadata(&key).await {
            Ok(metadata) => Ok(UploadOffset::new(metadata.size)),
            Err(error) if error.is_not_found() => Ok(UploadOffset::default()),
            Err(error) => Err(error.into()),
        }
    }

    #[tracing::instrument(skip(self), fields(repository = %self.name, id = %self.id))]
    async fn complete(&self, digest: &Digest) -> RegistryResult<Box<dyn Blob>> {
        let key = layout::upload_data_key(&self.name, self.id);
        let blob = put_streamed(&self.layers, digest, |mut writer| async move {
            match self.bucket.download(&key, &mut writer).await {
                Err(error) if error.is_not_found() => Ok(()),
                result => result.map_err(RegistryError::from),
            }
        })
        .await?;

        self.cancel().await?;
        tracing::debug!(%digest, "completed upload");
        Ok(blob)
    }

    async fn cancel(&self) -> RegistryResult<()> {
        self.bucket
            .delete(&layout::upload_data_key(&self.name, self.id))
            .await?;
        self.bucket
            .delete(&layout::upload_started_key(&self.name, self.id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;
    use crate::blob::tests::{broken, bucket};
    use crate::blob::{BlobSource, Layers};

    fn content(data: &'static [u8]) -> BlobContent {
        Box::new(Cursor::new(data))
    }

    fn uploads(bucket: &StorageBucket) -> StorageUploads {
        StorageUploads::new("app".parse().unwrap(), bucket.clone())
    }

    #[tokio::test]
    async fn upload_then_complete() {
        let bucket = bucket();
        let uploads = uploads(&bucket);

        let upload = uploads.start().await.unwrap();
        assert_eq!(upload.offset().await.unwrap().to_string(), "0-0");

        let offset = upload.append(content(b"hello world")).await.unwrap();
        assert_eq!(offset.to_string(), "0-10");

        let found = uploads.get(upload.id()).await.unwrap().unwrap();
        assert_eq!(found.offset().await.unwrap(), offset);

        let blob = upload.complete(&Digest::of(b"hello world")).await.unwrap();
        assert_eq!(blob.content().await.unwrap(), "hello world");

        assert!(uploads.get(upload.id()).await.unwrap().is_none());
        assert!(StorageLayers::new(bucket).exists(&Digest::of(b"hello world")).await.unwrap());
    }

    #[tokio::test]
    async fn single_append() {
        let upload = uploads(&bucket()).start().await.unwrap();
        upload.append(content(b"one")).await.unwrap();

        let error = upload.append(content(b"two")).await.unwrap_err();
        assert!(matches!(error, RegistryError::UnsupportedOperation(_)));
        assert_eq!(upload.offset().await.unwrap().size(), 3);
    }

    #[tokio::test]
    async fn empty_append_is_ignored() {
        let bucket = bucket();
        let upload = uploads(&bucket).start().await.unwrap();

        let offset = upload.append(content(b"")).await.unwrap();
        assert_eq!(offset.size(), 0);
        let data = layout::upload_data_key(&"app".parse().unwrap(), upload.id());
        assert!(!bucket.exists(&data).await.unwrap());

        upload.append(content(b"after")).await.unwrap();
        upload.complete(&Digest::of(b"after")).await.unwrap();
    }

    #[tokio::test]
    async fn failed_append_can_be_retried() {
        let upload = uploads(&bucket()).start().await.unwrap();
        assert!(upload.append(broken()).await.is_err());
        assert_eq!(upload.offset().await.unwrap().size(), 0);

        upload.append(content(b"retry")).await.unwrap();
        upload.complete(&Digest::of(b"retry")).await.unwrap();
    }

    #[tokio::test]
    async fn mismatch_keeps_session() {
        let bucket = bucket();
        let uploads = uploads(&bucket);
        let upload = uploads.start().await.unwrap();
        upload.append(content(b"data")).await.unwrap();

        let error = upload.complete(&Digest::of(b"other")).await.unwrap_err();
        assert!(matches!(error, RegistryError::InvalidDigest { .. }));

        let upload = uploads.get(upload.id()).await.unwrap().unwrap();
        assert_eq!(upload.offset().await.unwrap().size(), 4);
        upload.complete(&Digest::of(b"data")).await.unwrap();
    }

    #[tokio::test]
    async fn complete_without_data_stores_empty_blob() {
        let upload = uploads(&bucket()).start().await.unwrap();
        let blob = upload.complete(&Digest::of(b"")).await.unwrap();
        assert_eq!(blob.size(), 0);
        assert_eq!(blob.content().await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn complete_existing_blob() {
        let bucket = bucket();
        StorageLayers::new(bucket.clone())
            .put(BlobSource::trusted(Bytes::from_static(b"dup")))
            .await
            .unwrap();

        let upload = uploads(&bucket).start().await.unwrap();
        upload.append(content(b"dup")).await.unwrap();
        upload.complete(&Digest::of(b"dup")).await.unwrap();
        assert!(uploads(&bucket).get(upload.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_discards() {
        let bucket = bucket();
        let uploads = uploads(&bucket);
        let upload = uploads.start().await.unwrap();
        upload.append(content(b"data")).await.unwrap();
        upload.cancel().await.unwrap();

        assert!(uploads.get(upload.id()).await.unwrap().is_none());
        assert!(bucket.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_session() {
        assert!(uploads(&bucket()).get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
