//! An in-memory transport standing in for a remote registry in tests.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// Create a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    fn to_response(&self, method: &Method) -> http::Response<hyperdriver::Body> {
        let body = if *method == Method::HEAD {
            Bytes::new()
        } else {
            self.body.clone()
        };

        let mut response = http::Response::new(hyperdriver::Body::from(body));
        *response.status_mut() = self.status;
        *response.version_mut() = http::Version::HTTP_11;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

#[derive(Debug, Clone)]
struct Guard {
    authorization: HeaderValue,
    challenge: HeaderValue,
}

#[derive(Debug, Clone)]
struct Route {
    response: MockResponse,
    guard: Option<Guard>,
}

/// A request seen by the [`MockService`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request method.
    pub method: Method,

    /// The full request URI, including the query.
    pub uri: Uri,

    /// The `Authorization` header, if one was sent.
    pub authorization: Option<String>,

    /// The `Accept` header, if one was sent.
    pub accept: Option<String>,
}

/// A tower service answering requests by path from canned responses.
///
/// Paths without a response get `404 Not Found`. Protected paths answer
/// `401 Unauthorized` with a challenge unless the expected `Authorization`
/// header is present. `HEAD` requests get the `GET` response without a body.
#[derive(Debug, Default, Clone)]
pub struct MockService {
    routes: HashMap<String, Route>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    /// Create a mock with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for `path` with a canned response.
    pub fn add(&mut self, path: &str, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) {
        self.routes.insert(
            path.to_owned(),
            Route {
                response: MockResponse::new(status, headers, body),
                guard: None,
            },
        );
    }

    /// Answer requests for `path` with a JSON body.
    pub fn add_json(&mut self, path: &str, body: &serde_json::Value) {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.add(path, StatusCode::OK, headers, body.to_string());
    }

    /// Require `authorization` on `path`, answering other requests with
    /// `401` and `challenge` in `WWW-Authenticate`.
    ///
    /// The route must already exist.
    pub fn protect(&mut self, path: &str, authorization: &str, challenge: &str) {
        if let Some(route) = self.routes.get_mut(path) {
            route.guard = Some(Guard {
                authorization: HeaderValue::from_str(authorization)
                    .expect("mock authorization is a valid header"),
                challenge: HeaderValue::from_str(challenge)
                    .expect("mock challenge is a valid header"),
            });
        }
    }

    /// Every request handled so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn respond(&self, req: &http::Request<hyperdriver::Body>) -> http::Response<hyperdriver::Body> {
        let Some(route) = self.routes.get(req.uri().path()) else {
            return MockResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new())
                .to_response(req.method());
        };

        if let Some(guard) = &route.guard {
            if req.headers().get(http::header::AUTHORIZATION) != Some(&guard.authorization) {
                let mut headers = HeaderMap::new();
                headers.insert(http::header::WWW_AUTHENTICATE, guard.challenge.clone());
                return MockResponse::new(StatusCode::UNAUTHORIZED, headers, Bytes::new())
                    .to_response(req.method());
            }
        }

        route.response.to_response(req.method())
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let header = |name: http::header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        self.requests.lock().push(RecordedRequest {
            method: req.method().clone(),
            uri: req.uri().clone(),
            authorization: header(http::header::AUTHORIZATION),
            accept: header(http::header::ACCEPT),
        });

        std::future::ready(Ok(self.respond(&req)))
    }
}
