//! A registry which reads from one registry and writes to another.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::blob::{Blob, BlobSource, Layers};
use crate::catalog::{Catalog, CatalogQuery, Tags, TagsQuery};
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::manifest::{Manifest, Manifests};
use crate::name::{ManifestReference, RepositoryName};
use crate::registry::{Registry, Repository};
use crate::upload::Uploads;

/// Sends lookups and listings to `read`, and stores and uploads to `write`.
///
/// Nothing is copied between the two.
#[derive(Debug, Clone)]
pub struct ReadWriteRegistry {
    read: Arc<dyn Registry>,
    write: Arc<dyn Registry>,
}

impl ReadWriteRegistry {
    /// Combine a registry to read from with one to write to.
    pub fn new(read: Arc<dyn Registry>, write: Arc<dyn Registry>) -> Self {
        Self { read, write }
    }
}

#[async_trait]
impl Registry for ReadWriteRegistry {
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository> {
        Box::new(ReadWriteRepository {
            name: name.clone(),
            read: self.read.repository(name),
            write: self.write.repository(name),
        })
    }

    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog> {
        self.read.catalog(query).await
    }
}

/// A repository of a [`ReadWriteRegistry`].
#[derive(Debug)]
pub struct ReadWriteRepository {
    name: RepositoryName,
    read: Box<dyn Repository>,
    write: Box<dyn Repository>,
}

impl Repository for ReadWriteRepository {
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
        self.write.uploads()
    }
}

#[async_trait]
impl Layers for ReadWriteRepository {
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>> {
        self.read.layers().get(digest).await
    }

    async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        self.read.layers().exists(digest).await
    }

    async fn put(&self, source: BlobSource) -> RegistryResult<Box<dyn Blob>> {
        self.write.layers().put(source).await
    }

    async fn mount(&self, blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        self.write.layers().mount(blob).await
    }
}

#[async_trait]
impl Manifests for ReadWriteRepository {
    async fn put(&self, reference: &ManifestReference, content: Bytes) -> RegistryResult<Manifest> {
        self.write.manifests().put(reference, content).await
    }

    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>> {
        self.read.manifests().get(reference).await
    }

    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags> {
        self.read.manifests().tags(query).await
    }
}
