//! # Container Registry
//!
//! A content-addressable registry for container images, speaking the
//! [Docker Registry HTTP API V2](https://distribution.github.io/distribution/spec/api/).
//!
//! ## Features
//!
//! - Blobs stored by digest, verified while they are written
//! - Manifests addressed by tag or digest, checked for missing blobs
//! - Chunked upload sessions
//! - Composable backends: [`MultiReadRegistry`], [`ReadWriteRegistry`],
//!   [`ProxyRegistry`] and the pull-through [`CacheRegistry`]
//! - Pluggable storage backend via the `storage` crate
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new(storage.into())
//!     .bucket("registry")
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod cache;
pub mod catalog;
mod config;
mod digest;
mod error;
pub mod layout;
mod manifest;
mod multi;
mod name;
mod proxy;
mod readwrite;
mod registry;
mod upload;

pub use api::{MANIFEST_BODY_LIMIT, RegistryBuilder, router};
pub use blob::{Blob, BlobContent, BlobSource, BlobWriter, Layers, StorageBlob, StorageLayers};
pub use cache::{CacheRegistry, CacheRepository};
pub use catalog::{Catalog, CatalogQuery, Limit, Tags, TagsQuery};
pub use config::{Config, RemoteConfig};
pub use digest::{Digest, DigestAlgorithm, DigestHasher, DigestReader};
pub use error::{RegistryError, RegistryResult};
pub use manifest::{
    Descriptor, MANIFEST_MEDIA_TYPES, Manifest, ManifestDocument, Manifests, StorageManifests,
};
pub use multi::{MultiReadRegistry, MultiReadRepository};
pub use name::{ManifestReference, RepositoryName, Tag};
pub use proxy::{ProxyBlob, ProxyRegistry, ProxyRepository};
pub use readwrite::{ReadWriteRegistry, ReadWriteRepository};
pub use registry::{Registry, Repository, StorageRegistry, StorageRepository};
pub use upload::{StorageUpload, StorageUploads, Upload, UploadOffset, Uploads};
