//! A pull-through cache: reads from an origin registry are copied into a
//! cache registry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt as _};
use uuid::Uuid;

use crate::blob::{Blob, BlobSource, Layers, put_streamed};
use crate::catalog::{Catalog, CatalogQuery, Tags, TagsQuery};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{Manifest, Manifests};
use crate::name::{ManifestReference, RepositoryName};
use crate::registry::{Registry, Repository};
use crate::upload::{Upload, Uploads};

const READ_ONLY: &str = "cached registries are read only";

/// Serves `origin`, keeping a copy of what it serves in `cache`.
///
/// Blobs never change, so they are served from the cache when present.
/// Manifests may be re-tagged upstream, so the origin is asked first and the
/// cache only answers when the origin fails or misses.
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    origin: Arc<dyn Registry>,
    cache: Arc<dyn Registry>,
}

impl CacheRegistry {
    /// Cache reads from `origin` in `cache`.
    pub fn new(origin: Arc<dyn Registry>, cache: Arc<dyn Registry>) -> Self {
        Self { origin, cache }
    }
}

#[async_trait]
impl Registry for CacheRegistry {
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository> {
        Box::new(CacheRepository {
            name: name.clone(),
            origin: self.origin.repository(name),
            cache: self.cache.repository(name),
        })
    }

    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog> {
        match self.origin.catalog(query).await {
            Ok(catalog) => Ok(catalog),
            Err(error) => {
                tracing::warn!("origin catalog failed, using cache: {error}");
                self.cache.catalog(query).await
            }
        }
    }
}

/// A repository of a [`CacheRegistry`].
#[derive(Debug)]
pub struct CacheRepository {
    name: RepositoryName,
    origin: Box<dyn Repository>,
    cache: Box<dyn Repository>,
}

impl CacheRepository {
    async fn copy_blob(&self, blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        put_streamed(self.cache.layers(), blob.digest(), |mut writer| async move {
            blob.copy_to(&mut writer).await
        })
        .await
    }

    /// Copy `manifest` and everything it references into the cache.
    fn copy_manifest<'a>(
        &'a self,
        reference: &'a ManifestReference,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, RegistryResult<()>> {
        async move {
            let document = manifest.document()?;

            for child in &document.manifests {
                if self.cache.layers().exists(&child.digest).await? {
                    continue;
                }
                let reference = ManifestReference::Digest(child.digest.clone());
                if let Some(child) = self.origin.manifests().get(&reference).await? {
                    self.copy_manifest(&reference, &child).await?;
                }
            }

            for digest in document.referenced_blobs() {
                if self.cache.layers().exists(digest).await? {
                    continue;
                }
                if let Some(blob) = self.origin.layers().get(digest).await? {
                    self.copy_blob(blob.as_ref()).await?;
                }
            }

            self.cache
                .manifests()
                .put(reference, manifest.content().clone())
                .await?;
            tracing::debug!(repository = %self.name, %reference, "cached manifest");
            Ok(())
        }
        .boxed()
    }
}

impl Repository for CacheRepository {
    fn name(&self) -> &RepositoryName {
        &self.name
    }

    fn layers(&self) -> &dyn Layers {
        self
    }

    fn manifests(&self) -> &dyn Manifests {
        self
    }

    fn uploads(&self) -> &dyn Uploads {
        self
    }
}

#[async_trait]
impl Layers for CacheRepository {
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>> {
        match self.cache.layers().get(digest).await {
            Ok(Some(blob)) => return Ok(Some(blob)),
            Ok(None) => {}
            Err(error) => tracing::warn!(%digest, "cache lookup failed: {error}"),
        }

        let Some(blob) = self.origin.layers().get(digest).await? else {
            return Ok(None);
        };

        match self.copy_blob(blob.as_ref()).await {
            Ok(cached) => {
                tracing::debug!(repository = %self.name, %digest, "cached blob");
                Ok(Some(cached))
            }
            Err(error) => {
                tracing::warn!(%digest, "failed to cache blob: {error}");
                Ok(Some(blob))
            }
        }
    }

    async fn put(&self, _source: BlobSource) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn mount(&self, _blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}

#[async_trait]
impl Manifests for CacheRepository {
    async fn put(&self, _reference: &ManifestReference, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>> {
        match self.origin.manifests().get(reference).await {
            Ok(Some(manifest)) => {
                if let Err(error) = self.copy_manifest(reference, &manifest).await {
                    tracing::warn!(repository = %self.name, %reference, "failed to cache manifest: {error}");
                }
                return Ok(Some(manifest));
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(repository = %self.name, %reference, "origin lookup failed, using cache: {error}")
            }
        }

        self.cache.manifests().get(reference).await
    }

    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags> {
        match self.origin.manifests().tags(query).await {
            Ok(tags) => Ok(tags),
            Err(error) => {
                tracing::warn!(repository = %self.name, "origin tags failed, using cache: {error}");
                self.cache.manifests().tags(query).await
            }
        }
    }
}

#[async_trait]
impl Uploads for CacheRepository {
    async fn start(&self) -> RegistryResult<Box<dyn Upload>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, _id: Uuid) -> RegistryResult<Option<Box<dyn Upload>>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}
