//! Storage keys for blobs, links and upload sessions.
//!
//! ```text
//! blobs/<alg>/<first 2 hex>/<hex>/data
//! blobs/_tmp/<uuid>/data
//! repositories/<name>/_manifests/tags/<tag>/current/link
//! repositories/<name>/_manifests/revisions/<alg>/<hex>/link
//! repositories/<name>/_uploads/<uuid>/{startedat,data}
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::digest::Digest;
use crate::name::{ManifestReference, RepositoryName, Tag};

const BLOBS: &str = "blobs";
const REPOSITORIES: &str = "repositories";
const MANIFESTS: &str = "_manifests";
const UPLOADS: &str = "_uploads";

/// Key of the blob with `digest`.
pub fn blob_key(digest: &Digest) -> Utf8PathBuf {
    Utf8PathBuf::from(format!(
        "{BLOBS}/{}/{}/{}/data",
        digest.algorithm(),
        digest.prefix(),
        digest.hex()
    ))
}

/// Key a checked blob is written to before it is verified.
pub fn temporary_blob_key(id: Uuid) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{BLOBS}/_tmp/{id}/data"))
}

/// Prefix of every per-repository key.
pub fn repositories_prefix() -> &'static Utf8Path {
    Utf8Path::new(REPOSITORIES)
}

fn manifests_dir(name: &RepositoryName) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{REPOSITORIES}/{name}/{MANIFESTS}"))
}

/// Prefix of every tag link in a repository.
pub fn tags_prefix(name: &RepositoryName) -> Utf8PathBuf {
    manifests_dir(name).join("tags")
}

/// Link key for `tag`.
pub fn tag_link_key(name: &RepositoryName, tag: &Tag) -> Utf8PathBuf {
    tags_prefix(name).join(format!("{tag}/current/link"))
}

/// Link key for a manifest digest.
pub fn revision_link_key(name: &RepositoryName, digest: &Digest) -> Utf8PathBuf {
    manifests_dir(name).join(format!(
        "revisions/{}/{}/link",
        digest.algorithm(),
        digest.hex()
    ))
}

/// Link key for either kind of reference.
pub fn link_key(name: &RepositoryName, reference: &ManifestReference) -> Utf8PathBuf {
    match reference {
        ManifestReference::Tag(tag) => tag_link_key(name, tag),
        ManifestReference::Digest(digest) => revision_link_key(name, digest),
    }
}

/// Directory holding the working state of an upload session.
pub fn upload_key(name: &RepositoryName, id: Uuid) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{REPOSITORIES}/{name}/{UPLOADS}/{id}"))
}

/// Uploaded bytes of a session.
pub fn upload_data_key(name: &RepositoryName, id: Uuid) -> Utf8PathBuf {
    upload_key(name, id).join("data")
}

/// Start marker of a session.
pub fn upload_started_key(name: &RepositoryName, id: Uuid) -> Utf8PathBuf {
    upload_key(name, id).join("startedat")
}

/// The repository name owning a manifest key, if `key` is one.
pub fn repository_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(REPOSITORIES)?.strip_prefix('/')?;
    let (name, _) = rest.split_once(&format!("/{MANIFESTS}/"))?;
    Some(name)
}

/// The tag named by a tag link key, if `key` is one.
pub fn tag_of<'k>(name: &RepositoryName, key: &'k str) -> Option<&'k str> {
    let prefix = tags_prefix(name);
    key.strip_prefix(prefix.as_str())?
        .strip_prefix('/')?
        .strip_suffix("/current/link")
        .filter(|tag| !tag.contains('/'))
}
