//! Responses from a remote registry.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use http_body_util::{BodyDataStream, BodyExt as _};
use hyperdriver::Body;

use crate::error::ClientError;

/// A response, along with the URI of the request which produced it.
#[derive(Debug)]
pub struct Response {
    uri: Uri,
    response: http::response::Parts,
    body: Body,
}

impl Response {
    /// Create a new `Response` instance.
    pub fn new(uri: Uri, response: http::Response<Body>) -> Self {
        let (response, body) = response.into_parts();

        Self {
            uri,
            response,
            body,
        }
    }

    /// The status code of the response.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Read a header as a string, ignoring values which are not visible ASCII.
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.response
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// The URI of the request that generated the response.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Stream the body without collecting it.
    pub fn into_data_stream(self) -> BodyDataStream<Body> {
        self.body.into_data_stream()
    }

    /// Collect the body into memory.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        let collected = self
            .body
            .collect()
            .await
            .map_err(|err| ClientError::ResponseBody(err.into()))?;
        Ok(collected.to_bytes())
    }

    /// Collect the body and deserialize it as JSON.
    pub async fn json<T>(self) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
