//! A read-only registry answering from the first of several registries.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use uuid::Uuid;

use crate::blob::{Blob, BlobSource, Layers};
use crate::catalog::{self, Catalog, CatalogQuery, Tags, TagsQuery};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{Manifest, Manifests};
use crate::name::{ManifestReference, RepositoryName};
use crate::registry::{Registry, Repository};
use crate::upload::{Upload, Uploads};

const READ_ONLY: &str = "multi-read registries are read only";

/// Reads from each inner registry in order, returning the first hit.
///
/// Failures of an inner registry are logged and treated as a miss. Listings
/// are merged from all inner registries.
#[derive(Debug, Clone)]
pub struct MultiReadRegistry {
    inner: Vec<Arc<dyn Registry>>,
}

impl MultiReadRegistry {
    /// Read from `inner`, in order.
    pub fn new(inner: Vec<Arc<dyn Registry>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Registry for MultiReadRegistry {
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository> {
        Box::new(MultiReadRepository {
            name: name.clone(),
            inner: self
                .inner
                .iter()
                .map(|registry| registry.repository(name))
                .collect(),
        })
    }

    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog> {
        let pages = join_all(self.inner.iter().map(|registry| registry.catalog(query))).await;

        let names = pages
            .into_iter()
            .flat_map(|page| match page {
                Ok(page) => page.repositories,
                Err(error) => {
                    tracing::warn!("catalog failed: {error}");
                    Vec::new()
                }
            });

        Ok(Catalog {
            repositories: catalog::page(names, query.from.as_deref(), query.limit),
        })
    }
}

/// A repository of a [`MultiReadRegistry`].
#[derive(Debug)]
pub struct MultiReadRepository {
    name: RepositoryName,
    inner: Vec<Box<dyn Repository>>,
}

impl Repository for MultiReadRepository {
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
impl Layers for MultiReadRepository {
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>> {
        for repository in &self.inner {
            match repository.layers().get(digest).await {
                Ok(Some(blob)) => return Ok(Some(blob)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(repository = %self.name, %digest, "blob lookup failed: {error}")
                }
            }
        }
        Ok(None)
    }

    async fn put(&self, _source: BlobSource) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn mount(&self, _blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}

#[async_trait]
impl Manifests for MultiReadRepository {
    async fn put(&self, _reference: &ManifestReference, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>> {
        for repository in &self.inner {
            match repository.manifests().get(reference).await {
                Ok(Some(manifest)) => return Ok(Some(manifest)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(repository = %self.name, %reference, "manifest lookup failed: {error}")
                }
            }
        }
        Ok(None)
    }

    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags> {
        let pages = join_all(
            self.inner
                .iter()
                .map(|repository| repository.manifests().tags(query)),
        )
        .await;

        let tags = pages.into_iter().flat_map(|page| match page {
            Ok(page) => page.tags,
            Err(error) => {
                tracing::warn!(repository = %self.name, "tag listing failed: {error}");
                Vec::new()
            }
        });

        Ok(Tags {
            name: self.name.clone(),
            tags: catalog::page(tags, query.from.as_deref(), query.limit),
        })
    }
}

#[async_trait]
impl Uploads for MultiReadRepository {
    async fn start(&self) -> RegistryResult<Box<dyn Upload>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, _id: Uuid) -> RegistryResult<Option<Box<dyn Upload>>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}
