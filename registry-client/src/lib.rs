//! HTTP client for a remote registry speaking the Docker Registry V2 protocol.
//!
//! [`RegistryClient`] sends requests relative to a base URI and answers
//! authentication challenges: a `401` carrying a `Bearer` challenge fetches a
//! token from the challenge's realm and retries once, a `Basic` challenge is
//! retried once with the configured [`Credentials`].

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use hyperdriver::service::SharedService;
use tower::ServiceExt as _;

mod auth;
pub mod error;
pub mod mock;
pub mod response;
pub mod uri;

pub use self::auth::{basic_auth, Challenge, Credentials, Password};
pub use self::error::ClientError;
pub use self::response::Response;
use self::uri::UriExtension as _;

/// A client for one remote registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base: Uri,
    credentials: Option<Credentials>,
    inner: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
}

impl RegistryClient {
    /// Create a client for the registry at `base`, speaking HTTP or HTTPS.
    pub fn new(base: Uri, credentials: Option<Credentials>) -> Self {
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();

        RegistryClient {
            base,
            credentials,
            inner,
        }
    }

    /// Create a client which sends requests through `inner`.
    pub fn with_inner_service<S>(base: Uri, credentials: Option<Credentials>, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(inner);

        RegistryClient {
            base,
            credentials,
            inner: service,
        }
    }

    /// The base URI requests are relative to.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// Build a GET request against an endpoint relative to the base URI.
    pub fn get(&self, endpoint: &str) -> RequestBuilder {
        self.endpoint(Method::GET, endpoint)
    }

    /// Build a HEAD request against an endpoint relative to the base URI.
    pub fn head(&self, endpoint: &str) -> RequestBuilder {
        self.endpoint(Method::HEAD, endpoint)
    }

    /// Build a request against an absolute URI.
    pub fn request(&self, method: Method, uri: Uri) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, Ok(uri))
    }

    /// Build a request against an endpoint relative to the base URI.
    pub fn endpoint(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let uri = self.base.clone().join(endpoint);
        RequestBuilder::new(self.clone(), method, uri)
    }

    /// Send a single request, without answering challenges.
    pub async fn execute(&self, req: http::Request<hyperdriver::Body>) -> Result<Response, ClientError> {
        let uri = req.uri().clone();
        tracing::trace!(method = %req.method(), %uri, "sending request");

        let response = self
            .inner
            .clone()
            .oneshot(req)
            .await
            .map_err(|source| ClientError::Transport {
                uri: uri.clone(),
                source,
            })?;
        Ok(Response::new(uri, response))
    }

    async fn send(&self, request: PreparedRequest) -> Result<Response, ClientError> {
        let response = self.execute(request.build(None)?).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .header_str(header::WWW_AUTHENTICATE)
            .and_then(Challenge::parse);

        let authorization = match challenge {
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let token = self
                    .token(&realm, service.as_deref(), scope.as_deref())
                    .await?;
                auth::bearer_auth(&token).ok_or_else(|| ClientError::Token {
                    realm: realm.clone(),
                    reason: "token is not a valid header value".into(),
                })?
            }
            Some(Challenge::Basic) => match &self.credentials {
                Some(credentials) => credentials.header_value(),
                None => {
                    return Err(ClientError::Unauthorized {
                        uri: request.uri.clone(),
                    })
                }
            },
            None => {
                return Err(ClientError::Unauthorized {
                    uri: request.uri.clone(),
                })
            }
        };

        tracing::debug!(uri = %request.uri, "retrying after authentication challenge");
        let response = self.execute(request.build(Some(authorization))?).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized {
                uri: request.uri.clone(),
            });
        }

        Ok(response)
    }

    /// Fetch a bearer token from a challenge's realm.
    #[tracing::instrument(skip(self))]
    async fn token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String, ClientError> {
        let failed = |reason: String| ClientError::Token {
            realm: realm.to_owned(),
            reason,
        };

        let query: Vec<(&str, &str)> = [("service", service), ("scope", scope)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect();
        let uri = realm.parse::<Uri>()?.with_query(&query)?;

        let mut req = http::Request::get(uri).body(hyperdriver::Body::empty())?;
        if let Some(credentials) = &self.credentials {
            req.headers_mut()
                .insert(header::AUTHORIZATION, credentials.header_value());
        }

        let response = self.execute(req).await?;
        if !response.status().is_success() {
            return Err(failed(format!("status {}", response.status())));
        }

        let body: auth::TokenResponse = response.json().await?;
        body.into_token()
            .ok_or_else(|| failed("response carried no token".into()))
    }
}

/// The replayable parts of a request.
#[derive(Debug, Clone)]
struct PreparedRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl PreparedRequest {
    fn build(
        &self,
        authorization: Option<HeaderValue>,
    ) -> Result<http::Request<hyperdriver::Body>, ClientError> {
        let mut req = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(hyperdriver::Body::from(self.body.clone()))?;

        *req.headers_mut() = self.headers.clone();
        if let Some(authorization) = authorization {
            req.headers_mut()
                .insert(header::AUTHORIZATION, authorization);
        }

        Ok(req)
    }
}

/// A request under construction.
#[derive(Debug)]
pub struct RequestBuilder {
    client: RegistryClient,
    method: Method,
    uri: Result<Uri, ClientError>,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    fn new(client: RegistryClient, method: Method, uri: Result<Uri, ClientError>) -> Self {
        Self {
            client,
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, key: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Replace the query string with the url-encoded form of `query`.
    pub fn query<Q: serde::Serialize + ?Sized>(mut self, query: &Q) -> Self {
        self.uri = self.uri.and_then(|uri| uri.with_query(query));
        self
    }

    /// Set the request body.
    pub fn body<B: Into<Bytes>>(self, body: B) -> Self {
        Self {
            body: body.into(),
            ..self
        }
    }

    /// Send the request, answering at most one authentication challenge.
    pub async fn send(self) -> Result<Response, ClientError> {
        let request = PreparedRequest {
            method: self.method,
            uri: self.uri?,
            headers: self.headers,
            body: self.body,
        };

        self.client.send(request).await
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::mock::MockService;

    const CHALLENGE: &str = r#"Bearer realm="http://auth.example/token",service="registry.example",scope="repository:library/alpine:pull""#;

    fn client(mock: MockService, credentials: Option<Credentials>) -> RegistryClient {
        RegistryClient::with_inner_service(
            "http://registry.example/".parse().unwrap(),
            credentials,
            mock,
        )
    }

    #[test]
    fn send_futures_are_send() {
        let client = RegistryClient::new("http://registry.example/".parse().unwrap(), None);
        fn assert_send<T: Send>(_t: T) {}

        assert_send(client.get("v2/").send());
    }

    #[tokio::test]
    async fn unprotected_request() {
        let mut mock = MockService::new();
        mock.add("/v2/", StatusCode::OK, HeaderMap::new(), "{}");

        let client = client(mock.clone(), None);
        let response = client.get("v2/").send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn bearer_challenge_is_answered_once() {
        let mut mock = MockService::new();
        mock.add_json("/v2/library/alpine/tags/list", &json!({"name": "library/alpine", "tags": ["3"]}));
        mock.protect("/v2/library/alpine/tags/list", "Bearer t0k3n", CHALLENGE);
        mock.add_json("/token", &json!({"token": "t0k3n"}));

        let client = client(mock.clone(), None);
        let response = client
            .get("v2/library/alpine/tags/list")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].authorization, None);
        assert_eq!(
            requests[1].uri.to_string(),
            "http://auth.example/token?service=registry.example&scope=repository%3Alibrary%2Falpine%3Apull"
        );
        assert_eq!(requests[1].authorization, None);
        assert_eq!(requests[2].authorization.as_deref(), Some("Bearer t0k3n"));
    }

    #[tokio::test]
    async fn token_request_uses_credentials() {
        let mut mock = MockService::new();
        mock.add_json("/v2/", &json!({}));
        mock.protect("/v2/", "Bearer abc", CHALLENGE);
        mock.add_json("/token", &json!({"access_token": "abc"}));

        let credentials = Credentials::new("user", Some("secret"));
        let expected = credentials.header_value();
        let client = client(mock.clone(), Some(credentials));

        client.get("v2/").send().await.unwrap();

        let requests = mock.requests();
        assert_eq!(
            requests[1].authorization.as_deref(),
            expected.to_str().ok()
        );
    }

    #[tokio::test]
    async fn second_rejection_is_unauthorized() {
        let mut mock = MockService::new();
        mock.add_json("/v2/", &json!({}));
        mock.protect("/v2/", "Bearer right", CHALLENGE);
        mock.add_json("/token", &json!({"token": "wrong"}));

        let client = client(mock.clone(), None);
        let error = client.get("v2/").send().await.unwrap_err();
        assert!(matches!(error, ClientError::Unauthorized { .. }));
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn basic_challenge_uses_credentials() {
        let credentials = Credentials::new("user", Some("secret"));
        let expected = credentials.header_value();

        let mut mock = MockService::new();
        mock.add_json("/v2/", &json!({}));
        mock.protect(
            "/v2/",
            expected.to_str().unwrap(),
            r#"Basic realm="registry""#,
        );

        let response = client(mock.clone(), Some(credentials))
            .get("v2/")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let error = client(mock, None).get("v2/").send().await.unwrap_err();
        assert!(matches!(error, ClientError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn token_endpoint_failure() {
        let mut mock = MockService::new();
        mock.add_json("/v2/", &json!({}));
        mock.protect("/v2/", "Bearer abc", CHALLENGE);

        let error = client(mock, None).get("v2/").send().await.unwrap_err();
        assert!(matches!(error, ClientError::Token { .. }));
    }

    #[tokio::test]
    async fn query_parameters() {
        let mut mock = MockService::new();
        mock.add_json("/v2/_catalog", &json!({"repositories": []}));

        let client = client(mock.clone(), None);
        client
            .get("v2/_catalog")
            .query(&[("n", "10"), ("last", "a/b")])
            .send()
            .await
            .unwrap();

        assert_eq!(
            mock.requests()[0].uri.to_string(),
            "http://registry.example/v2/_catalog?n=10&last=a%2Fb"
        );
    }
}
