//! The registry façade, and the registry kept in a storage bucket.

use std::fmt;

use async_trait::async_trait;
use storage::{Storage, StorageBucket};

use crate::blob::{Layers, StorageLayers};
use crate::catalog::{self, Catalog, CatalogQuery};
use crate::error::RegistryResult;
use crate::layout;
use crate::manifest::{Manifests, StorageManifests};
use crate::name::RepositoryName;
use crate::upload::{StorageUploads, Uploads};

/// A registry: a set of repositories sharing one blob store.
///
/// Implementations compose: the multi-read, read/write, proxy and cache
/// registries all wrap other registries behind this trait.
#[async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// Scope to one repository. Repositories exist implicitly.
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository>;

    /// A page of repository names.
    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog>;
}

/// One repository of a registry.
pub trait Repository: fmt::Debug + Send + Sync {
    /// The repository name.
    fn name(&self) -> &RepositoryName;

    /// Blob storage.
    fn layers(&self) -> &dyn Layers;

    /// Manifest storage.
    fn manifests(&self) -> &dyn Manifests;

    /// Upload sessions.
    fn uploads(&self) -> &dyn Uploads;
}

/// A registry kept in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageRegistry {
    bucket: StorageBucket,
}

impl StorageRegistry {
    /// Keep the registry in `bucket` of `storage`.
    pub fn new(storage: Storage, bucket: impl Into<String>) -> Self {
        Self::from_bucket(storage.bucket(bucket))
    }

    /// Keep the registry in `bucket`.
    pub fn from_bucket(bucket: StorageBucket) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl Registry for StorageRegistry {
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository> {
        Box::new(StorageRepository {
            name: name.clone(),
            layers: StorageLayers::new(self.bucket.clone()),
            manifests: StorageManifests::new(name.clone(), self.bucket.clone()),
            uploads: StorageUploads::new(name.clone(), self.bucket.clone()),
        })
    }

    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog> {
        let keys = self
            .bucket
            .list(Some(layout::repositories_prefix()))
            .await?;

        let names = keys
            .iter()
            .filter_map(|key| layout::repository_of(key))
            .map(str::to_owned);

        Ok(Catalog {
            repositories: catalog::page(names, query.from.as_deref(), query.limit),
        })
    }
}

/// A repository of a [`StorageRegistry`].
#[derive(Debug, Clone)]
pub struct StorageRepository {
    name: RepositoryName,
    layers: StorageLayers,
    manifests: StorageManifests,
    uploads: StorageUploads,
}

impl Repository for StorageRepository {
    fn name(&self) -> &RepositoryName {
        &self.name
    }

    fn layers(&self) -> &dyn Layers {
        &self.layers
    }

    fn manifests(&self) -> &dyn Manifests {
        &self.manifests
    }

    fn uploads(&self) -> &dyn Uploads {
        &self.uploads
    }
}
