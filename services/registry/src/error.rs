//! Error types for the registry.

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use registry_client::ClientError;

use crate::digest::Digest;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations.
///
/// Absence is never an error: lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Content did not hash to the digest it was claimed to have.
    #[error("digest mismatch: claimed {claimed}, got {actual}")]
    InvalidDigest {
        /// Digest supplied by the caller.
        claimed: Digest,
        /// Digest of the bytes received.
        actual: Digest,
    },

    /// A string which is not a valid digest.
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    /// A manifest references a blob which is not stored.
    #[error("manifest references unknown blob {0}")]
    ManifestBlobUnknown(Digest),

    /// A manifest body which could not be parsed.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The backend does not support this operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A remote registry answered with a status we don't handle.
    #[error("unexpected status {status} from {uri}")]
    RemoteUnexpectedStatus {
        /// Response status.
        status: StatusCode,
        /// Request URI.
        uri: Uri,
    },

    /// A remote registry answered with a response we cannot use.
    #[error("invalid response from {uri}: {reason}")]
    RemoteInvalidResponse {
        /// Request URI.
        uri: Uri,
        /// What was wrong with the response.
        reason: &'static str,
    },

    /// Talking to a remote registry failed.
    #[error("remote registry: {0}")]
    Remote(#[from] ClientError),

    /// Invalid repository name.
    #[error("invalid repository name: {0}")]
    InvalidName(String),

    /// Invalid tag.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::InvalidDigest { .. }
            | RegistryError::MalformedDigest(_)
            | RegistryError::ManifestBlobUnknown(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::InvalidName(_)
            | RegistryError::InvalidTag(_) => StatusCode::BAD_REQUEST,
            RegistryError::UnsupportedOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::RemoteUnexpectedStatus { .. }
            | RegistryError::RemoteInvalidResponse { .. }
            | RegistryError::Remote(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Storage(_) | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for registry error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::InvalidDigest { .. } | RegistryError::MalformedDigest(_) => {
                "DIGEST_INVALID"
            }
            RegistryError::ManifestBlobUnknown(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::UnsupportedOperation(_) => "UNSUPPORTED",
            RegistryError::InvalidName(_) => "NAME_INVALID",
            RegistryError::InvalidTag(_) => "TAG_INVALID",
            RegistryError::RemoteUnexpectedStatus { .. }
            | RegistryError::RemoteInvalidResponse { .. }
            | RegistryError::Remote(_)
            | RegistryError::Storage(_)
            | RegistryError::Io(_) => "UNKNOWN",
        }
    }
}

/// Registry error response format.
#[derive(Debug, serde::Serialize)]
pub(crate) struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl ErrorResponse {
    pub(crate) fn new(code: &'static str, message: String) -> Self {
        Self {
            errors: vec![ErrorDetail { code, message }],
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse::new(self.error_code(), self.to_string());
        (status, axum::Json(body)).into_response()
    }
}
