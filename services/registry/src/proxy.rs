//! A read-only registry backed by a remote registry.

use std::io;

use async_trait::async_trait;
use axum::http::header::{self, HeaderValue};
use axum::http::{self, Method, StatusCode, Uri};
use bytes::Bytes;
use futures::TryStreamExt as _;
use registry_client::uri::UriExtension as _;
use registry_client::{RegistryClient, Response};
use tokio::io::AsyncWriteExt as _;
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::blob::{Blob, BlobSource, BlobWriter, Layers};
use crate::catalog::{self, Catalog, CatalogQuery, PageParams, Tags, TagsQuery};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{MANIFEST_MEDIA_TYPES, Manifest, Manifests};
use crate::name::{ManifestReference, RepositoryName};
use crate::registry::{Registry, Repository};
use crate::upload::{Upload, Uploads};

const READ_ONLY: &str = "remote registries are read only";

/// Header carrying the digest of a served manifest or blob.
pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

fn unexpected(response: &Response) -> RegistryError {
    RegistryError::RemoteUnexpectedStatus {
        status: response.status(),
        uri: response.uri().clone(),
    }
}

/// Send a blob request, following one redirect.
///
/// Blob requests are commonly redirected to a storage service.
async fn send_blob_request(
    client: &RegistryClient,
    method: Method,
    endpoint: &str,
) -> RegistryResult<Response> {
    let response = client.endpoint(method.clone(), endpoint).send().await?;
    if !response.status().is_redirection() {
        return Ok(response);
    }

    let Some(location) = response.header_str(header::LOCATION) else {
        return Err(unexpected(&response));
    };

    let uri: Uri = location
        .parse()
        .map_err(|error: http::uri::InvalidUri| RegistryError::Remote(error.into()))?;
    let uri = if uri.scheme().is_some() {
        uri
    } else {
        client.base().clone().join(location)?
    };

    tracing::trace!(%method, %uri, "following blob redirect");
    Ok(client.request(method, uri).send().await?)
}

/// A registry which forwards reads to a remote registry over HTTP.
#[derive(Debug, Clone)]
pub struct ProxyRegistry {
    client: RegistryClient,
}

impl ProxyRegistry {
    /// Forward reads through `client`.
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Registry for ProxyRegistry {
    fn repository(&self, name: &RepositoryName) -> Box<dyn Repository> {
        Box::new(ProxyRepository {
            name: name.clone(),
            client: self.client.clone(),
        })
    }

    async fn catalog(&self, query: &CatalogQuery) -> RegistryResult<Catalog> {
        let response = self
            .client
            .get("v2/_catalog")
            .query(&PageParams::from(query))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected(&response));
        }

        let remote: Catalog = response.json().await?;
        Ok(Catalog {
            repositories: catalog::page(
                remote.repositories,
                query.from.as_deref(),
                query.limit,
            ),
        })
    }
}

/// A repository of a [`ProxyRegistry`].
#[derive(Debug, Clone)]
pub struct ProxyRepository {
    name: RepositoryName,
    client: RegistryClient,
}

impl ProxyRepository {
    fn blob_endpoint(&self, digest: &Digest) -> String {
        format!("v2/{}/blobs/{digest}", self.name)
    }
}

impl Repository for ProxyRepository {
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
impl Layers for ProxyRepository {
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Box<dyn Blob>>> {
        let endpoint = self.blob_endpoint(digest);
        let response = send_blob_request(&self.client, Method::HEAD, &endpoint).await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            _ => return Err(unexpected(&response)),
        }

        let size = response
            .header_str(header::CONTENT_LENGTH)
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| RegistryError::RemoteInvalidResponse {
                uri: response.uri().clone(),
                reason: "blob size is missing",
            })?;

        Ok(Some(Box::new(ProxyBlob {
            client: self.client.clone(),
            endpoint,
            digest: digest.clone(),
            size,
        })))
    }

    async fn put(&self, _source: BlobSource) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn mount(&self, _blob: &dyn Blob) -> RegistryResult<Box<dyn Blob>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}

#[async_trait]
impl Manifests for ProxyRepository {
    async fn put(&self, _reference: &ManifestReference, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, reference: &ManifestReference) -> RegistryResult<Option<Manifest>> {
        let accept = HeaderValue::from_str(&MANIFEST_MEDIA_TYPES.join(", "))
            .map_err(|error| RegistryError::Remote(http::Error::from(error).into()))?;

        let response = self
            .client
            .get(&format!("v2/{}/manifests/{reference}", self.name))
            .header(header::ACCEPT, accept)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            _ => return Err(unexpected(&response)),
        }

        let digest = response
            .header_str(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.parse::<Digest>().ok());
        let content = response.bytes().await?;

        Ok(Some(match digest {
            Some(digest) => Manifest::from_parts(digest, content),
            None => Manifest::new(content),
        }))
    }

    async fn tags(&self, query: &TagsQuery) -> RegistryResult<Tags> {
        let response = self
            .client
            .get(&format!("v2/{}/tags/list", self.name))
            .query(&PageParams::from(query))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(Tags::empty(self.name.clone())),
            _ => return Err(unexpected(&response)),
        }

        let remote: Tags = response.json().await?;
        Ok(Tags {
            name: self.name.clone(),
            tags: catalog::page(remote.tags, query.from.as_deref(), query.limit),
        })
    }
}

#[async_trait]
impl Uploads for ProxyRepository {
    async fn start(&self) -> RegistryResult<Box<dyn Upload>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }

    async fn get(&self, _id: Uuid) -> RegistryResult<Option<Box<dyn Upload>>> {
        Err(RegistryError::UnsupportedOperation(READ_ONLY))
    }
}

/// A blob on a remote registry, fetched when its content is asked for.
#[derive(Debug, Clone)]
pub struct ProxyBlob {
    client: RegistryClient,
    endpoint: String,
    digest: Digest,
    size: u64,
}

impl ProxyBlob {
    async fn open(&self) -> RegistryResult<Response> {
        let response = send_blob_request(&self.client, Method::GET, &self.endpoint).await?;
        if response.status() != StatusCode::OK {
            return Err(unexpected(&response));
        }
        Ok(response)
    }
}

#[async_trait]
impl Blob for ProxyBlob {
    fn digest(&self) -> &Digest {
        &self.digest
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn content(&self) -> RegistryResult<Bytes> {
        Ok(self.open().await?.bytes().await?)
    }

    async fn copy_to(&self, writer: &mut BlobWriter<'_>) -> RegistryResult<()> {
        let body = self.open().await?.into_data_stream().map_err(io::Error::other);
        let mut reader = StreamReader::new(Box::pin(body));
        tokio::io::copy(&mut reader, &mut *writer).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use registry_client::mock::MockService;

    use super::*;

    fn client(mock: &MockService) -> RegistryClient {
        RegistryClient::with_inner_service("http://remote.test/".parse().unwrap(), None, mock.clone())
    }

    fn blob(mock: &MockService, content: &[u8]) -> ProxyBlob {
        let digest = Digest::of(content);
        ProxyBlob {
            client: client(mock),
            endpoint: format!("v2/app/blobs/{digest}"),
            digest,
            size: content.len() as u64,
        }
    }

    fn redirect(mock: &mut MockService, content: &[u8], location: &'static str) {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static(location));
        mock.add(
            &format!("/v2/app/blobs/{}", Digest::of(content)),
            StatusCode::TEMPORARY_REDIRECT,
            headers,
            Bytes::new(),
        );
    }

    #[tokio::test]
    async fn follows_relative_redirect() {
        let mut mock = MockService::new();
        redirect(&mut mock, b"moved", "/storage/moved");
        mock.add("/storage/moved", StatusCode::OK, HeaderMap::new(), "moved");

        let content = blob(&mock, b"moved").content().await.unwrap();
        assert_eq!(content, "moved");
        assert_eq!(mock.requests()[1].uri, "http://remote.test/storage/moved");
    }

    #[tokio::test]
    async fn follows_absolute_redirect() {
        let mut mock = MockService::new();
        redirect(&mut mock, b"elsewhere", "http://cdn.test/blob");
        mock.add("/blob", StatusCode::OK, HeaderMap::new(), "elsewhere");

        let content = blob(&mock, b"elsewhere").content().await.unwrap();
        assert_eq!(content, "elsewhere");
        assert_eq!(mock.requests()[1].uri.host(), Some("cdn.test"));
    }

    #[tokio::test]
    async fn copy_to_streams_the_body() {
        let data = vec![3u8; 256 * 1024];
        let mut mock = MockService::new();
        redirect(&mut mock, &data, "/storage/large");
        mock.add("/storage/large", StatusCode::OK, HeaderMap::new(), data.clone());

        let mut out = Vec::new();
        blob(&mock, &data).copy_to(&mut out).await.unwrap();
        assert_eq!(out, data);

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|request| request.method == Method::GET));
    }

    #[tokio::test]
    async fn head_follows_redirect() {
        let mut mock = MockService::new();
        redirect(&mut mock, b"moved", "/storage/moved");
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(5));
        mock.add("/storage/moved", StatusCode::OK, headers, "moved");

        let repository = ProxyRepository {
            name: "app".parse().unwrap(),
            client: client(&mock),
        };
        let blob = repository.layers().get(&Digest::of(b"moved")).await.unwrap().unwrap();
        assert_eq!(blob.size(), 5);

        let requests = mock.requests();
        assert_eq!(requests[1].method, Method::HEAD);
        assert_eq!(requests[1].uri, "http://remote.test/storage/moved");
    }

    #[tokio::test]
    async fn head_without_size_is_rejected() {
        let mut mock = MockService::new();
        let digest = Digest::of(b"unsized");
        mock.add(&format!("/v2/app/blobs/{digest}"), StatusCode::OK, HeaderMap::new(), "unsized");

        let repository = ProxyRepository {
            name: "app".parse().unwrap(),
            client: client(&mock),
        };
        let error = repository.layers().get(&digest).await.unwrap_err();
        assert!(matches!(error, RegistryError::RemoteInvalidResponse { .. }), "{error}");
    }

    #[tokio::test]
    async fn redirect_without_location_fails() {
        let mut mock = MockService::new();
        mock.add(
            &format!("/v2/app/blobs/{}", Digest::of(b"lost")),
            StatusCode::FOUND,
            HeaderMap::new(),
            Bytes::new(),
        );

        let error = blob(&mock, b"lost").content().await.unwrap_err();
        assert!(matches!(error, RegistryError::RemoteUnexpectedStatus { .. }));
    }
}
