//! Error types for the registry client.
use http::Uri;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error occurred while talking to a remote registry.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be built.
    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    /// A URI could not be parsed.
    #[error("Invalid URI: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    /// The query string could not be encoded.
    #[error("Invalid query: {0}")]
    Query(#[from] serde_urlencoded::ser::Error),

    /// An error occurred while sending the request.
    #[error("Sending request to {uri}: {source}")]
    Transport {
        /// The request URI.
        uri: Uri,

        /// The underlying transport error.
        #[source]
        source: hyperdriver::client::Error,
    },

    /// An error occurred while receiving the response body.
    #[error("Error reading response body: {0}")]
    ResponseBody(#[source] BoxError),

    /// The response body was not the expected JSON document.
    #[error("Decoding JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote still refused the request after answering its challenge.
    #[error("Unauthorized: {uri}")]
    Unauthorized {
        /// The request URI.
        uri: Uri,
    },

    /// The token endpoint named by a bearer challenge failed.
    #[error("Token request to {realm} failed: {reason}")]
    Token {
        /// The token endpoint.
        realm: String,

        /// What went wrong.
        reason: String,
    },
}
