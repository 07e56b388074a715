//! Manifest store: manifests addressed by tag or digest.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use storage::StorageBucket;

use crate::blob::{BlobSource, Layers, StorageLayers};
use crate::catalog::{self, Tags, TagsQuery};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout;
use crate::name::{ManifestReference, RepositoryName};

/// Docker schema 2 image manifest.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list.
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest.
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index.
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Manifest media types this registry understands, most preferred first.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_INDEX_V1,
    DOCKER_MANIFEST_LIST_V2,
    OCI_MANIFEST_V1,
    DOCKER_MANIFEST_V2,
    "application/vnd.docker.distribution.manifest.v1+prettyjws",
    "application/vnd.docker.distribution.manifest.v1+json",
];

/// A manifest: raw bytes and their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    digest: Digest,
    content: Bytes,
}

impl Manifest {
    /// Wrap manifest bytes, computing their digest.
    pub fn new(content: Bytes) -> Self {
        Self {
            digest: Digest::of(&content),
            content,
        }
    }

    /// Wrap manifest bytes with a digest which is already known.
    pub fn from_parts(digest: Digest, content: Bytes) -> Self {
        Self { digest, content }
    }

    /// The manifest digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The raw manifest bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Parse the manifest body.
    pub fn document(&self) -> RegistryResult<ManifestDocument> {
        serde_json::from_slice(&self.content)
            .map_err(|error| RegistryError::InvalidManifest(error.to_string()))
    }

    /// The media type to serve this manifest with.
    ///
    /// Taken from `mediaType` when present, otherwise guessed from the
    /// schema version and shape.
    pub fn media_type(&self) -> String {
        let Ok(document) = self.document() else {
            return OCI_MANIFEST_V1.to_owned();
        };

        if let Some(media_type) = document.media_type {
            return media_type;
        }

        match document.schema_version {
            Some(1) => "application/vnd.docker.distribution.manifest.v1+json",
            Some(2) if !document.manifests.is_empty() => DOCKER_MANIFEST_LIST_V2,
            Some(2) => DOCKER_MANIFEST_V2,
            _ if !document.manifests.is_empty() => OCI_INDEX_V1,
            _ => OCI_MANIFEST_V1,
        }
        .to_owned()
    }
}

/// The parts of a manifest body the registry looks at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Schema version, `2` for current manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    /// Declared media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Image configuration blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    /// Layer blobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Descriptor>,

    /// Child manifests of a manifest list or index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<Descriptor>,
}

impl ManifestDocument {
    /// Blobs which must be stored before this manifest may be.
    ///
    /// Layers with `urls` are fetched from elsewhere and are not required.
    pub fn referenced_blobs(&self) -> impl Iterator<Item = &Digest> {
        self.config
            .iter()
            .chain(self.layers.iter().filter(|layer| layer.urls.is_empty()))
            .chain(self.manifests.iter())
            .map(|descriptor| &descriptor.digest)
    }
}

/// A reference to content from inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Digest of the referenced content.
    pub digest: Digest,

    /// Size of the referenced content.
    #[serde(default)]
    pub size: u64,

    /// External locations of the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// Manifest storage of one repository.
#[async_trait]
pub trait Manifests: Send + Sync {
    /// Store a manifest under `reference`, linking its digest as well.
    async fn put(&self, reference: &ManifestReference, content: Bytes) -> RegistryResult<Manifest>;

    /// Look up a manifest. `None` when the reference is unknown.
    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>>;

    /// A page of the repository's tags.
    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags>;
}

/// Manifests kept in a storage bucket, as blobs plus link records.
#[derive(Debug, Clone)]
pub struct StorageManifests {
    name: RepositoryName,
    bucket: StorageBucket,
    layers: StorageLayers,
}

impl StorageManifests {
    /// Manifests of repository `name`, stored in `bucket`.
    pub fn new(name: RepositoryName, bucket: StorageBucket) -> Self {
        Self {
            layers: StorageLayers::new(bucket.clone()),
            name,
            bucket,
        }
    }

    async fn resolve(&self, reference: &ManifestReference) -> RegistryResult<Option<Digest>> {
        let key = layout::link_key(&self.name, reference);
        match self.bucket.read(&key).await {
            Ok(link) => {
                let link = String::from_utf8_lossy(&link);
                Ok(Some(link.trim().parse()?))
            }
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl Manifests for StorageManifests {
    #[tracing::instrument(skip(self, content), fields(repository = %self.name))]
    async fn put(&self, reference: &ManifestReference, content: Bytes) -> RegistryResult<Manifest> {
        let manifest = Manifest::new(content);
        if let ManifestReference::Digest(claimed) = reference {
            if claimed != manifest.digest() {
                return Err(RegistryError::InvalidDigest {
                    claimed: claimed.clone(),
                    actual: manifest.digest().clone(),
                });
            }
        }

        let document = manifest.document()?;
        for digest in document.referenced_blobs() {
            if !self.layers.exists(digest).await? {
                return Err(RegistryError::ManifestBlobUnknown(digest.clone()));
            }
        }

        self.layers
            .put(BlobSource::checked(
                manifest.content().clone(),
                manifest.digest().clone(),
            ))
            .await?;

        let link = manifest.digest().to_string();
        let revision = layout::revision_link_key(&self.name, manifest.digest());
        let created = !self.bucket.exists(&revision).await?;
        self.bucket.write(&revision, link.as_bytes()).await?;

        if let ManifestReference::Tag(tag) = reference {
            let key = layout::tag_link_key(&self.name, tag);
            if let Err(error) = self.bucket.write(&key, link.as_bytes()).await {
                if created {
                    if let Err(error) = self.bucket.delete(&revision).await {
                        tracing::warn!(%revision, "failed to remove revision link: {error}");
                    }
                }
                return Err(error.into());
            }
        }

        tracing::debug!(digest = %manifest.digest(), %reference, "stored manifest");
        Ok(manifest)
    }

    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>> {
        let Some(digest) = self.resolve(reference).await? else {
            return Ok(None);
        };

        let Some(blob) = self.layers.get(&digest).await? else {
            tracing::warn!(repository = %self.name, %reference, %digest, "dangling manifest link");
            return Ok(None);
        };

        Ok(Some(Manifest::from_parts(digest, blob.content().await?)))
    }

    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags> {
        let keys = self
            .bucket
            .list(Some(&layout::tags_prefix(&self.name)))
            .await?;

        let names = keys
            .iter()
            .filter_map(|key| layout::tag_of(&self.name, key))
            .map(str::to_owned);

        Ok(Tags {
            name: self.name.clone(),
            tags: catalog::page(names, query.from.as_deref(), query.limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::blob::tests::bucket;
    use crate::catalog::Limit;

    fn image(config: &Digest, layers: &[&Digest]) -> Bytes {
        let layers: Vec<_> = layers
            .iter()
            .map(|digest| json!({"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": digest, "size": 1}))
            .collect();
        json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST_V1,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": config, "size": 1},
            "layers": layers,
        })
        .to_string()
        .into()
    }

    async fn setup() -> (StorageLayers, StorageManifests, Digest, Digest) {
        let bucket = bucket();
        let layers = StorageLayers::new(bucket.clone());
        let config = layers.put(BlobSource::trusted("{}".into())).await.unwrap();
        let layer = layers.put(BlobSource::trusted("layer".into())).await.unwrap();
        let manifests = StorageManifests::new("library/alpine".parse().unwrap(), bucket);
        (
            layers,
            manifests,
            config.digest().clone(),
            layer.digest().clone(),
        )
    }

    fn tag(s: &str) -> ManifestReference {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn tag_and_digest_address_the_same_manifest() {
        let (_, manifests, config, layer) = setup().await;
        let body = image(&config, &[&layer]);

        let stored = manifests.put(&tag("latest"), body.clone()).await.unwrap();
        assert_eq!(stored.digest(), &Digest::of(&body));

        let by_tag = manifests.get(&tag("latest")).await.unwrap().unwrap();
        let by_digest = manifests
            .get(&stored.digest().clone().into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tag, by_digest);
        assert_eq!(by_tag.content(), &body);
        assert_eq!(by_tag.media_type(), OCI_MANIFEST_V1);
    }

    #[tokio::test]
    async fn missing_blob_rejects_manifest() {
        let (_, manifests, config, _) = setup().await;
        let missing = Digest::of(b"not stored");
        let body = image(&config, &[&missing]);

        let error = manifests.put(&tag("latest"), body).await.unwrap_err();
        assert!(matches!(error, RegistryError::ManifestBlobUnknown(ref d) if *d == missing));
        assert!(manifests.get(&tag("latest")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_layers_are_not_required() {
        let (_, manifests, config, _) = setup().await;
        let body: Bytes = json!({
            "schemaVersion": 2,
            "config": {"digest": config, "size": 2},
            "layers": [{"digest": Digest::of(b"elsewhere"), "size": 9, "urls": ["https://example.com/layer"]}],
        })
        .to_string()
        .into();

        manifests.put(&tag("foreign"), body).await.unwrap();
    }

    #[tokio::test]
    async fn index_requires_child_manifests() {
        let (_, manifests, config, layer) = setup().await;
        let child = manifests
            .put(&tag("amd64"), image(&config, &[&layer]))
            .await
            .unwrap();

        let index = |children: &[&Digest]| -> Bytes {
            let children: Vec<_> = children
                .iter()
                .map(|digest| json!({"mediaType": OCI_MANIFEST_V1, "digest": digest, "size": 1}))
                .collect();
            json!({"schemaVersion": 2, "mediaType": OCI_INDEX_V1, "manifests": children})
                .to_string()
                .into()
        };

        let unknown = Digest::of(b"other arch");
        let error = manifests
            .put(&tag("multi"), index(&[child.digest(), &unknown]))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::ManifestBlobUnknown(ref d) if *d == unknown));

        let stored = manifests
            .put(&tag("multi"), index(&[child.digest()]))
            .await
            .unwrap();
        assert_eq!(stored.media_type(), OCI_INDEX_V1);
    }

    #[tokio::test]
    async fn digest_reference_must_match() {
        let (_, manifests, config, layer) = setup().await;
        let body = image(&config, &[&layer]);
        let wrong = Digest::of(b"wrong");

        let error = manifests
            .put(&wrong.clone().into(), body.clone())
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::InvalidDigest { .. }));

        let digest = Digest::of(&body);
        manifests.put(&digest.clone().into(), body).await.unwrap();
        assert!(manifests.get(&digest.into()).await.unwrap().is_some());
        assert!(manifests.tags(&TagsQuery::default()).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let (_, manifests, _, _) = setup().await;
        let error = manifests
            .put(&tag("latest"), Bytes::from_static(b"not json"))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::InvalidManifest(_)));
    }

    #[tokio::test]
    async fn dangling_link_is_absent() {
        let bucket = bucket();
        let manifests = StorageManifests::new("app".parse().unwrap(), bucket.clone());
        let digest = Digest::of(b"gone");
        bucket
            .write(
                &layout::tag_link_key(&"app".parse().unwrap(), &"latest".parse().unwrap()),
                digest.to_string().as_bytes(),
            )
            .await
            .unwrap();

        assert!(manifests.get(&tag("latest")).await.unwrap().is_none());
        assert!(manifests.get(&tag("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retagging_moves_the_tag() {
        let (layers, manifests, config, layer) = setup().await;
        let first = manifests.put(&tag("latest"), image(&config, &[&layer])).await.unwrap();

        let extra = layers.put(BlobSource::trusted("extra".into())).await.unwrap();
        let second = manifests
            .put(&tag("latest"), image(&config, &[&layer, extra.digest()]))
            .await
            .unwrap();

        let current = manifests.get(&tag("latest")).await.unwrap().unwrap();
        assert_eq!(current.digest(), second.digest());
        assert!(manifests.get(&first.digest().clone().into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tags_are_paged() {
        let (_, manifests, config, layer) = setup().await;
        let body = image(&config, &[&layer]);
        for name in ["test", "bar", "my-alpine", "busybox"] {
            manifests.put(&tag(name), body.clone()).await.unwrap();
        }

        let all = manifests.tags(&TagsQuery::default()).await.unwrap();
        assert_eq!(all.name.as_str(), "library/alpine");
        assert_eq!(all.tags, ["bar", "busybox", "my-alpine", "test"]);

        let page = manifests
            .tags(&TagsQuery {
                from: Some("busybox".into()),
                limit: Limit::At(1),
            })
            .await
            .unwrap();
        assert_eq!(page.tags, ["my-alpine"]);
    }

    #[test]
    fn media_type_guesses() {
        let list = Manifest::new(
            json!({"schemaVersion": 2, "manifests": []}).to_string().into(),
        );
        assert_eq!(list.media_type(), DOCKER_MANIFEST_V2);

        let list = Manifest::new(
            json!({"schemaVersion": 2, "manifests": [{"digest": Digest::of(b"x"), "size": 1}]})
                .to_string()
                .into(),
        );
        assert_eq!(list.media_type(), DOCKER_MANIFEST_LIST_V2);
    }
}
