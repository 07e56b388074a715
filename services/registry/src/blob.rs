//! Blob store: immutable content addressed by digest.

use std::fmt;
use std::future::Future;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use storage::StorageBucket;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt as _, BufReader, DuplexStream};
use uuid::Uuid;

use crate::digest::{Digest, DigestReader};
use crate::error::{RegistryError, RegistryResult};
use crate::layout;

const PIPE_CAPACITY: usize = 64 * 1024;

/// An owned stream of blob bytes.
pub type BlobContent = Box<dyn AsyncBufRead + Unpin + Send>;

/// Destination for [`Blob::copy_to`].
pub type BlobWriter<'w> = dyn AsyncWrite + Unpin + Send + 'w;

/// Bytes to be stored as a blob, and how far to trust their digest.
pub enum BlobSource {
    /// The digest is known to be correct and is not recomputed.
    Trusted {
        /// Blob bytes.
        content: BlobContent,
        /// Digest of `content`.
        digest: Digest,
    },

    /// The digest is a claim which is verified while storing.
    Checked {
        /// Blob bytes.
        content: BlobContent,
        /// Claimed digest of `content`.
        claimed: Digest,
    },
}

impl BlobSource {
    /// In-memory bytes, digest computed here.
    pub fn trusted(bytes: Bytes) -> Self {
        let digest = Digest::of(&bytes);
        BlobSource::Trusted {
            content: Box::new(Cursor::new(bytes)),
            digest,
        }
    }

    /// In-memory bytes claimed to have `claimed` as their digest.
    pub fn checked(bytes: Bytes, claimed: Digest) -> Self {
        BlobSource::Checked {
            content: Box::new(Cursor::new(bytes)),
            claimed,
        }
    }

    /// The digest the blob will be stored under.
    pub fn digest(&self) -> &Digest {
        match self {
            BlobSource::Trusted { digest, .. } => digest,
            BlobSource::Checked { claimed, .. } => claimed,
        }
    }
}

impl fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobSource::Trusted { digest, .. } => {
                f.debug_struct("Trusted").field("digest", digest).finish()
            }
            BlobSource::Checked { claimed, .. } => {
                f.debug_struct("Checked").field("claimed", claimed).finish()
            }
        }
    }
}

/// A stored blob.
#[async_trait]
pub trait Blob: fmt::Debug + Send + Sync {
    /// Digest of the content.
    fn digest(&self) -> &Digest;

    /// Size of the content in bytes.
    fn size(&self) -> u64;

    /// The whole content. May be called more than once.
    async fn content(&self) -> RegistryResult<Bytes>;

    /// Stream the content into `writer`.
    async fn copy_to(&self, writer: &mut BlobWriter<'_>) -> RegistryResult<()> {
        let content = self.content().await?;
        writer.write_all(&content).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Blob storage of a registry.
#[async_trait]
pub trait Layers: Send + Sync {
    /// Look up a blob. `None` when it is not stored.
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>>;

    /// Whether a blob is stored.
    async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        Ok(self.get(digest).await?.is_some())
    }

    /// Store a blob. Storing a digest which already exists does nothing.
    async fn put(&self, source: BlobSource) -> RegistryResult<Box<dyn Blob>>;

    /// Store a blob from another registry, trusting its digest.
    async fn mount(&self, blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        if let Some(existing) = self.get(blob.digest()).await? {
            return Ok(existing);
        }

        let content = blob.content().await?;
        self.put(BlobSource::Trusted {
            content: Box::new(Cursor::new(content)),
            digest: blob.digest().clone(),
        })
        .await
    }
}

/// Store whatever `fill` writes into its pipe as the blob `claimed`.
///
/// The pipe holds at most 64 KiB, so the blob is never buffered whole. `fill`
/// ends the stream by dropping the pipe.
pub(crate) async fn put_streamed<F, Fut>(
    layers: &dyn Layers,
    claimed: &Digest,
    fill: F,
) -> RegistryResult<Box<dyn Blob>>
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: Future<Output = RegistryResult<()>>,
{
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let put = layers.put(BlobSource::Checked {
        content: Box::new(BufReader::new(reader)),
        claimed: claimed.clone(),
    });

    let (stored, filled) = tokio::join!(put, fill(writer));
    match (stored, filled) {
        (Ok(blob), _) => Ok(blob),
        // A fill which failed part way leaves a truncated stream behind.
        (Err(RegistryError::InvalidDigest { .. }), Err(error)) => Err(error),
        // When the put fails first the fill only sees a broken pipe.
        (Err(error), _) => Err(error),
    }
}

/// Blobs kept in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageLayers {
    bucket: StorageBucket,
}

impl StorageLayers {
    /// Keep blobs in `bucket`.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    async fn stored(&self, digest: &Digest) -> RegistryResult<Option<StorageBlob>> {
        let key = layout::blob_key(digest);
        match self.bucket.metadata(&key).await {
            Ok(metadata) => Ok(Some(StorageBlob {
                bucket: self.bucket.clone(),
                key,
                digest: digest.clone(),
                size: metadata.size,
            })),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn put_checked(&self, content: BlobContent, claimed: &Digest) -> RegistryResult<()> {
        let temporary = layout::temporary_blob_key(Uuid::new_v4());
        let mut reader = BufReader::new(DigestReader::new(content));
        self.bucket.upload(&temporary, &mut reader).await?;

        let actual = reader.get_ref().digest();
        if actual != *claimed {
            if let Err(error) = self.bucket.delete(&temporary).await {
                tracing::warn!(%temporary, "failed to remove rejected blob: {error}");
            }
            return Err(RegistryError::InvalidDigest {
                claimed: claimed.clone(),
                actual,
            });
        }

        self.bucket
            .rename(&temporary, &layout::blob_key(claimed))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Layers for StorageLayers {
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>> {
        Ok(self
            .stored(digest)
            .await?
            .map(|blob| Box::new(blob) as Box<dyn Blob>))
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket.bucket))]
    async fn put(&self, source: BlobSource) -> RegistryResult<Box<dyn Blob>> {
        let digest = source.digest().clone();
        if let Some(blob) = self.stored(&digest).await? {
            tracing::trace!(%digest, "blob already stored");
            return Ok(Box::new(blob));
        }

        match source {
            BlobSource::Trusted { mut content, digest } => {
                self.bucket
                    .upload(&layout::blob_key(&digest), &mut content)
                    .await?;
            }
            BlobSource::Checked { content, claimed } => {
                self.put_checked(content, &claimed).await?;
            }
        }

        let key = layout::blob_key(&digest);
        let metadata = self.bucket.metadata(&key).await?;
        tracing::debug!(%digest, size = metadata.size, "stored blob");
        Ok(Box::new(StorageBlob {
            bucket: self.bucket.clone(),
            key,
            digest,
            size: metadata.size,
        }))
    }
}

/// A blob in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageBlob {
    bucket: StorageBucket,
    key: Utf8PathBuf,
    digest: Digest,
    size: u64,
}

#[async_trait]
impl Blob for StorageBlob {
    fn digest(&self) -> &Digest {
        &self.digest
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn content(&self) -> RegistryResult<Bytes> {
        Ok(self.bucket.read(&self.key).await?.into())
    }

    async fn copy_to(&self, mut writer: &mut BlobWriter<'_>) -> RegistryResult<()> {
        self.bucket.download(&self.key, &mut writer).await?;
        writer.flush().await?;
        Ok(())
    }
}
