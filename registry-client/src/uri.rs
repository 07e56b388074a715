//! URI utilities.

use camino::Utf8Path;
use http::uri::PathAndQuery;
use http::Uri;
use serde::Serialize;

use crate::error::ClientError;

/// Extension trait for URIs.
pub trait UriExtension: Sized {
    /// Join a path onto a URI, dropping any query.
    fn join<P: AsRef<str>>(self, path: P) -> Result<Uri, ClientError>;

    /// Replace the query of a URI with the url-encoded form of `query`.
    ///
    /// An empty query removes the `?` entirely.
    fn with_query<Q: Serialize + ?Sized>(self, query: &Q) -> Result<Uri, ClientError>;
}

impl UriExtension for Uri {
    fn join<P: AsRef<str>>(self, path: P) -> Result<Uri, ClientError> {
        let mut parts = self.into_parts();

        let base = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path())
            .unwrap_or("/");
        let joined = Utf8Path::new(base).join(path.as_ref());
        parts.path_and_query = Some(PathAndQuery::from_maybe_shared(joined.into_string())?);

        Ok(Uri::from_parts(parts).map_err(http::Error::from)?)
    }

    fn with_query<Q: Serialize + ?Sized>(self, query: &Q) -> Result<Uri, ClientError> {
        let query = serde_urlencoded::to_string(query)?;
        let mut parts = self.into_parts();

        let path = parts
            .path_and_query
            .as_ref()
            .map(|pq| pq.path())
            .unwrap_or("/");
        let pq = if query.is_empty() {
            path.to_owned()
        } else {
            format!("{path}?{query}")
        };
        parts.path_and_query = Some(PathAndQuery::from_maybe_shared(pq)?);

        Ok(Uri::from_parts(parts).map_err(http::Error::from)?)
    }
}

/// Serialize and deserialize a URI as a string.
pub mod serde_uri {
    use http::Uri;
    use serde::{Deserialize as _, Deserializer};

    /// Deserialize a URI from a string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }

    /// Serialize a URI as a string.
    pub fn serialize<S>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(uri)
    }
}
