//! API server builder and router.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use futures::TryStreamExt as _;
use registry_client::RegistryClient;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use crate::blob::{BlobContent, BlobSource};
use crate::cache::CacheRegistry;
use crate::catalog::{CatalogQuery, Limit, PageParams, TagsQuery};
use crate::digest::Digest;
use crate::error::{ErrorResponse, RegistryError};
use crate::manifest::Manifest;
use crate::multi::MultiReadRegistry;
use crate::name::{ManifestReference, RepositoryName};
use crate::proxy::{DOCKER_CONTENT_DIGEST, ProxyRegistry};
use crate::readwrite::ReadWriteRegistry;
use crate::registry::{Registry, Repository, StorageRegistry};

/// Largest manifest body accepted.
pub const MANIFEST_BODY_LIMIT: usize = 4 * 1024 * 1024;

const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
const API_VERSION: HeaderName = HeaderName::from_static("docker-distribution-api-version");

/// Registry builder for configuring and creating the registry service.
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: storage::Storage,
    bucket: Option<String>,
    remotes: Vec<RegistryClient>,
}

impl RegistryBuilder {
    /// Create a new registry builder storing content in `storage`.
    pub fn new(storage: storage::Storage) -> Self {
        Self {
            storage,
            bucket: None,
            remotes: Vec::new(),
        }
    }

    /// Set the bucket name for storage.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Pull through from a remote registry, caching in storage.
    ///
    /// Remotes are consulted in the order they are added, before storage.
    pub fn remote(mut self, client: RegistryClient) -> Self {
        self.remotes.push(client);
        self
    }

    /// Compose the registry.
    ///
    /// Without remotes this is the storage registry. With remotes, reads go
    /// to each remote through a cache kept in storage and then to storage,
    /// while writes go to storage. Tags are resolved upstream first, so a
    /// re-tagged remote manifest replaces the cached one.
    pub fn registry(self) -> Arc<dyn Registry> {
        let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());
        let local: Arc<dyn Registry> = Arc::new(StorageRegistry::new(self.storage, bucket));
        if self.remotes.is_empty() {
            return local;
        }

        let mut read: Vec<Arc<dyn Registry>> = Vec::with_capacity(self.remotes.len() + 1);
        for client in self.remotes {
            let origin: Arc<dyn Registry> = Arc::new(ProxyRegistry::new(client));
            read.push(Arc::new(CacheRegistry::new(origin, local.clone())));
        }
        read.push(local.clone());

        Arc::new(ReadWriteRegistry::new(
            Arc::new(MultiReadRegistry::new(read)),
            local,
        ))
    }

    /// Build the registry service.
    ///
    /// Returns a Router that can be served with any tower-compatible server.
    pub fn build(self) -> Router {
        router(self.registry())
    }
}

/// Serve `registry` over the registry HTTP API.
pub fn router(registry: Arc<dyn Registry>) -> Router {
    Router::new()
        .route("/v2/", get(api_version_check))
        .route("/v2/_catalog", get(catalog))
        .route("/v2/{*path}", any(dispatch))
        .with_state(registry)
}

/// Errors which only exist at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("blob unknown to registry: {0}")]
    BlobUnknown(Digest),

    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    #[error("blob upload unknown: {0}")]
    UploadUnknown(String),

    #[error("digest parameter is required")]
    DigestRequired,

    #[error("reading request body: {0}")]
    Body(#[source] axum::Error),

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Registry(error) => return registry_error(error, self.to_string()),
            ApiError::BlobUnknown(_) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
            ApiError::ManifestUnknown(_) => (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN"),
            ApiError::UploadUnknown(_) => (StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN"),
            ApiError::DigestRequired => (StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
            ApiError::Body(_) => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NAME_UNKNOWN"),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED"),
        };

        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}

fn registry_error(error: &RegistryError, message: String) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(%error, "request failed");
    }
    (status, Json(ErrorResponse::new(error.error_code(), message))).into_response()
}

type ApiResult = Result<Response, ApiError>;

/// API version check endpoint.
///
/// Returns 200 OK to indicate the registry is available.
async fn api_version_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(API_VERSION, "registry/2.0")],
        Json(json!({})),
    )
}

/// Query parameters understood by any endpoint.
#[derive(Debug, Default, Deserialize)]
struct Params {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
    n: Option<usize>,
    last: Option<String>,
}

impl Params {
    fn page(&self) -> PageParams {
        PageParams {
            n: self.n,
            last: self.last.clone(),
        }
    }

    fn digest(&self) -> Result<Option<Digest>, ApiError> {
        Ok(self.digest.as_deref().map(str::parse::<Digest>).transpose()?)
    }
}

/// `Link` header value pointing at the page after a full one.
fn next_page(path: &str, limit: Limit, entries: &[String]) -> Option<String> {
    let Limit::At(n) = limit else {
        return None;
    };
    let last = entries.last().filter(|_| entries.len() == n)?;
    Some(format!("<{path}?n={n}&last={last}>; rel=\"next\""))
}

fn with_link(mut response: Response, link: Option<String>) -> Response {
    if let Some(link) = link.and_then(|link| HeaderValue::from_str(&link).ok()) {
        response.headers_mut().insert(header::LINK, link);
    }
    response
}

async fn catalog(
    State(registry): State<Arc<dyn Registry>>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let query = CatalogQuery::from(params);
    let catalog = registry.catalog(&query).await?;

    let link = next_page("/v2/_catalog", query.limit, &catalog.repositories);
    Ok(with_link(Json(catalog).into_response(), link))
}

/// Which endpoint a path below `/v2/` addresses.
#[derive(Debug, PartialEq, Eq)]
enum Endpoint<'p> {
    Manifest(&'p str, &'p str),
    Blob(&'p str, &'p str),
    Uploads(&'p str),
    Upload(&'p str, &'p str),
    Tags(&'p str),
}

impl<'p> Endpoint<'p> {
    // Repository names may contain `/`, so match on the trailing segments.
    fn parse(path: &'p str) -> Option<Self> {
        let path = path.trim_start_matches('/');

        if let Some(name) = path
            .strip_suffix("/blobs/uploads/")
            .or_else(|| path.strip_suffix("/blobs/uploads"))
        {
            return Some(Endpoint::Uploads(name));
        }
        if let Some((name, id)) = path.rsplit_once("/blobs/uploads/") {
            return Some(Endpoint::Upload(name, id));
        }
        if let Some(name) = path.strip_suffix("/tags/list") {
            return Some(Endpoint::Tags(name));
        }
        if let Some((name, reference)) = path.rsplit_once("/manifests/") {
            return Some(Endpoint::Manifest(name, reference));
        }
        if let Some((name, digest)) = path.rsplit_once("/blobs/") {
            return Some(Endpoint::Blob(name, digest));
        }
        None
    }
}

async fn dispatch(
    State(registry): State<Arc<dyn Registry>>,
    method: Method,
    Path(path): Path<String>,
    Query(params): Query<Params>,
    body: Body,
) -> ApiResult {
    let endpoint = Endpoint::parse(&path).ok_or(ApiError::NotFound)?;
    tracing::debug!(%method, ?endpoint, "registry request");

    let name = match &endpoint {
        Endpoint::Manifest(name, _)
        | Endpoint::Blob(name, _)
        | Endpoint::Uploads(name)
        | Endpoint::Upload(name, _)
        | Endpoint::Tags(name) => name.parse::<RepositoryName>()?,
    };
    let repository = registry.repository(&name);

    match (endpoint, method) {
        (Endpoint::Manifest(_, reference), method @ (Method::GET | Method::HEAD)) => {
            get_manifest(repository.as_ref(), reference, method == Method::HEAD).await
        }
        (Endpoint::Manifest(_, reference), Method::PUT) => {
            put_manifest(repository.as_ref(), reference, body).await
        }
        (Endpoint::Blob(_, digest), method @ (Method::GET | Method::HEAD)) => {
            get_blob(repository.as_ref(), digest, method == Method::HEAD).await
        }
        (Endpoint::Tags(_), Method::GET) => list_tags(repository.as_ref(), &params).await,
        (Endpoint::Uploads(_), Method::POST) => {
            start_upload(registry.as_ref(), repository.as_ref(), &params, body).await
        }
        (Endpoint::Upload(_, id), Method::GET) => upload_status(repository.as_ref(), id).await,
        (Endpoint::Upload(_, id), Method::PATCH) => {
            patch_upload(repository.as_ref(), id, body).await
        }
        (Endpoint::Upload(_, id), Method::PUT) => {
            complete_upload(repository.as_ref(), id, &params, body).await
        }
        (Endpoint::Upload(_, id), Method::DELETE) => {
            cancel_upload(repository.as_ref(), id).await
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}

fn manifest_headers(manifest: &Manifest) -> [(HeaderName, String); 3] {
    [
        (header::CONTENT_TYPE, manifest.media_type()),
        (
            HeaderName::from_static(DOCKER_CONTENT_DIGEST),
            manifest.digest().to_string(),
        ),
        (header::CONTENT_LENGTH, manifest.content().len().to_string()),
    ]
}

/// Get a manifest, or only its headers.
async fn get_manifest(repository: &dyn Repository, reference: &str, head: bool) -> ApiResult {
    let parsed: ManifestReference = reference.parse()?;
    let manifest = repository
        .manifests()
        .get(&parsed)
        .await?
        .ok_or_else(|| ApiError::ManifestUnknown(format!("{}:{reference}", repository.name())))?;

    let headers = manifest_headers(&manifest);
    if head {
        return Ok((StatusCode::OK, headers).into_response());
    }
    Ok((StatusCode::OK, headers, manifest.content().clone()).into_response())
}

/// Put a manifest.
async fn put_manifest(repository: &dyn Repository, reference: &str, body: Body) -> ApiResult {
    let reference: ManifestReference = reference.parse()?;
    let content = axum::body::to_bytes(body, MANIFEST_BODY_LIMIT)
        .await
        .map_err(|error| RegistryError::InvalidManifest(error.to_string()))?;

    let manifest = repository.manifests().put(&reference, content).await?;
    let location = format!("/v2/{}/manifests/{}", repository.name(), manifest.digest());

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (
                HeaderName::from_static(DOCKER_CONTENT_DIGEST),
                manifest.digest().to_string(),
            ),
        ],
    )
        .into_response())
}

/// Get a blob, or only its headers.
async fn get_blob(repository: &dyn Repository, digest: &str, head: bool) -> ApiResult {
    let digest: Digest = digest.parse()?;
    let blob = repository
        .layers()
        .get(&digest)
        .await?
        .ok_or_else(|| ApiError::BlobUnknown(digest.clone()))?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (HeaderName::from_static(DOCKER_CONTENT_DIGEST), digest.to_string()),
        (header::CONTENT_LENGTH, blob.size().to_string()),
    ];
    if head {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        if let Err(error) = blob.copy_to(&mut writer).await {
            tracing::warn!(%digest, "blob download interrupted: {error}");
        }
    });

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(reader))).into_response())
}

/// List tags for a repository.
async fn list_tags(repository: &dyn Repository, params: &Params) -> ApiResult {
    let query = TagsQuery::from(params.page());
    let tags = repository.manifests().tags(&query).await?;

    let path = format!("/v2/{}/tags/list", repository.name());
    let link = next_page(&path, query.limit, &tags.tags);
    Ok(with_link(Json(tags).into_response(), link))
}

/// Read a request body as blob content.
fn body_reader(body: Body) -> BufReader<impl tokio::io::AsyncRead + Unpin + Send + 'static> {
    BufReader::new(StreamReader::new(
        body.into_data_stream().map_err(io::Error::other),
    ))
}

fn blob_created(repository: &dyn Repository, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{}/blobs/{digest}", repository.name()),
            ),
            (HeaderName::from_static(DOCKER_CONTENT_DIGEST), digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

fn upload_accepted(
    repository: &dyn Repository,
    status: StatusCode,
    id: Uuid,
    range: String,
) -> Response {
    (
        status,
        [
            (
                header::LOCATION,
                format!("/v2/{}/blobs/uploads/{id}", repository.name()),
            ),
            (header::RANGE, range),
            (DOCKER_UPLOAD_UUID, id.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

/// Start a blob upload session, or store a blob in one request.
async fn start_upload(
    registry: &dyn Registry,
    repository: &dyn Repository,
    params: &Params,
    body: Body,
) -> ApiResult {
    if let (Some(mount), Some(from)) = (&params.mount, &params.from) {
        let digest: Digest = mount.parse()?;
        let from: RepositoryName = from.parse()?;
        let source = registry.repository(&from);
        if let Some(blob) = source.layers().get(&digest).await? {
            repository.layers().mount(blob.as_ref()).await?;
            return Ok(blob_created(repository, &digest));
        }
        tracing::debug!(%digest, %from, "mount source missing, starting upload");
    } else if let Some(digest) = params.digest()? {
        let content: BlobContent = Box::new(body_reader(body));
        repository
            .layers()
            .put(BlobSource::Checked {
                content,
                claimed: digest.clone(),
            })
            .await?;
        return Ok(blob_created(repository, &digest));
    }

    let upload = repository.uploads().start().await?;
    Ok(upload_accepted(
        repository,
        StatusCode::ACCEPTED,
        upload.id(),
        "0-0".to_string(),
    ))
}

async fn find_upload(
    repository: &dyn Repository,
    id: &str,
) -> Result<Box<dyn crate::upload::Upload>, ApiError> {
    let uuid = Uuid::parse_str(id).map_err(|_| ApiError::UploadUnknown(id.to_string()))?;
    repository
        .uploads()
        .get(uuid)
        .await?
        .ok_or_else(|| ApiError::UploadUnknown(id.to_string()))
}

/// Report how much of an upload has been received.
async fn upload_status(repository: &dyn Repository, id: &str) -> ApiResult {
    let upload = find_upload(repository, id).await?;
    let offset = upload.offset().await?;
    Ok(upload_accepted(
        repository,
        StatusCode::NO_CONTENT,
        upload.id(),
        offset.to_string(),
    ))
}

/// Send the data of an upload.
async fn patch_upload(repository: &dyn Repository, id: &str, body: Body) -> ApiResult {
    let upload = find_upload(repository, id).await?;
    let offset = upload.append(Box::new(body_reader(body))).await?;
    Ok(upload_accepted(
        repository,
        StatusCode::ACCEPTED,
        upload.id(),
        offset.to_string(),
    ))
}

/// Complete a blob upload, with an optional final chunk.
async fn complete_upload(
    repository: &dyn Repository,
    id: &str,
    params: &Params,
    body: Body,
) -> ApiResult {
    let digest = params.digest()?.ok_or(ApiError::DigestRequired)?;
    let upload = find_upload(repository, id).await?;

    let mut reader = body_reader(body);
    let pending = reader
        .fill_buf()
        .await
        .map_err(|error| ApiError::Body(axum::Error::new(error)))?;
    if !pending.is_empty() {
        upload.append(Box::new(reader)).await?;
    }

    let blob = upload.complete(&digest).await?;
    Ok(blob_created(repository, blob.digest()))
}

/// Cancel a blob upload.
async fn cancel_upload(repository: &dyn Repository, id: &str) -> ApiResult {
    let upload = find_upload(repository, id).await?;
    upload.cancel().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
