//! Authentication against a remote registry.
//!
//! Registries answer unauthenticated requests with `401 Unauthorized` and a
//! `WWW-Authenticate` challenge. A `Bearer` challenge names a token endpoint
//! (`realm`) which hands out a token for the `service` and `scope` in the
//! challenge; a `Basic` challenge expects the credentials directly.

use std::fmt;

use http::HeaderValue;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Create a basic authentication header value, with the password being optional.
///
/// Basic authentication Base64 encodes the username and password, separated by a colon.
///
/// # Example
/// ```rust
/// use registry_client::basic_auth;
///
/// let header = basic_auth("username", Some("password"));
/// assert_eq!(header.to_str().unwrap(), "Basic dXNlcm5hbWU6cGFzc3dvcmQ=");
/// ```
pub fn basic_auth<U, P>(username: U, password: Option<P>) -> HeaderValue
where
    U: fmt::Display,
    P: fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{username}:");
        if let Some(password) = password {
            let _ = write!(encoder, "{password}");
        }
    }

    // Base64 output is always a valid header value.
    let mut header = HeaderValue::from_maybe_shared(bytes::Bytes::from(buf))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    header.set_sensitive(true);
    header
}

/// Build a bearer authorization header for `token`.
pub(crate) fn bearer_auth(token: &str) -> Option<HeaderValue> {
    let mut header = HeaderValue::try_from(format!("Bearer {token}")).ok()?;
    header.set_sensitive(true);
    Some(header)
}

/// A password, kept out of debug output and zeroed when dropped.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        &self.0
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(****)")
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Password(value)
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Password(value.to_owned())
    }
}

/// Username and optional password for a remote registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    /// The account name.
    pub username: String,

    /// The account password or access token.
    #[serde(default)]
    pub password: Option<Password>,
}

impl Credentials {
    /// Create credentials from a username and optional password.
    pub fn new<U, P>(username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<Password>,
    {
        Self {
            username: username.into(),
            password: password.map(Into::into),
        }
    }

    /// The `Authorization` header value for basic authentication.
    pub fn header_value(&self) -> HeaderValue {
        basic_auth(&self.username, self.password.as_ref().map(Password::revealed))
    }
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Fetch a token from `realm` and retry with `Authorization: Bearer`.
    Bearer {
        /// Token endpoint.
        realm: String,
        /// Service the token is for.
        service: Option<String>,
        /// Requested access scope.
        scope: Option<String>,
    },

    /// Retry with `Authorization: Basic`.
    Basic,
}

impl Challenge {
    /// Parse a challenge header. Unknown schemes, or a bearer challenge
    /// without a realm, yield `None`.
    pub fn parse(header: &str) -> Option<Challenge> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }

        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in parameters(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Challenge::Bearer {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split `key=value, key="quoted, value"` pairs.
fn parameters(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}

        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ','))
            .collect();
        if key.trim().is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => value.extend(chars.next()),
                        c => value.push(c),
                    }
                }
            } else {
                value.extend(std::iter::from_fn(|| chars.next_if(|c| *c != ',')));
                value = value.trim().to_owned();
            }
        }

        pairs.push((key.trim().to_owned(), value));
    }

    pairs
}

/// The body returned by a token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Option<String> {
        self.token
            .filter(|token| !token.is_empty())
            .or(self.access_token)
    }
}
