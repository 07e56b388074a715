//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::http::Uri;
use registry_client::uri::serde_uri;
use registry_client::{Credentials, Password, RegistryClient};
use serde::Deserialize;
use storage::StorageConfig;

use crate::api::RegistryBuilder;
use crate::error::RegistryResult;
use crate::registry::Registry;

/// Configuration of a registry server.
///
/// ```toml
/// listen = "127.0.0.1:5000"
/// bucket = "registry"
///
/// [storage]
/// local = { path = "/var/lib/registry" }
/// # or: memory = { bucket = "registry" }, temp = {}
///
/// [[remotes]]
/// uri = "https://registry-1.docker.io/"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Address to serve on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Storage bucket holding the registry.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Storage backend.
    pub storage: StorageConfig,

    /// Remote registries to pull through from, in order.
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

fn default_listen() -> SocketAddr {
    (Ipv4Addr::LOCALHOST, 5000).into()
}

fn default_bucket() -> String {
    "registry".into()
}

/// A remote registry to pull through from.
#[derive(Debug, Deserialize)]
pub struct RemoteConfig {
    /// Base URI of the remote.
    #[serde(with = "serde_uri")]
    pub uri: Uri,

    /// Account name, when the remote needs one.
    #[serde(default)]
    pub username: Option<String>,

    /// Password or access token for `username`.
    #[serde(default)]
    pub password: Option<Password>,
}

impl RemoteConfig {
    /// A client for this remote.
    pub fn client(self) -> RegistryClient {
        let credentials = self
            .username
            .map(|username| Credentials::new(username, self.password));
        RegistryClient::new(self.uri, credentials)
    }
}

impl Config {
    /// Build the storage backend and compose the registry.
    pub fn build(self) -> RegistryResult<Arc<dyn Registry>> {
        let storage = self.storage.build()?;
        let builder = self
            .remotes
            .into_iter()
            .fold(RegistryBuilder::new(storage).bucket(self.bucket), |builder, remote| {
                builder.remote(remote.client())
            });
        Ok(builder.registry())
    }
}
