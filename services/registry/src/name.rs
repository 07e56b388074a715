//! Repository names, tags and manifest references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::RegistryError;

const NAME_MAX: usize = 255;
const TAG_MAX: usize = 128;

/// A repository name, e.g. `library/alpine`.
///
/// Lowercase alphanumeric components joined by `/`. Within a component,
/// alphanumeric runs may be separated by `.`, `_`, `__` or any number of `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryName(String);

impl RepositoryName {
    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_component(component: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let separator =
        |s: &str| matches!(s, "." | "_" | "__") || (!s.is_empty() && s.bytes().all(|c| c == b'-'));

    // Alphanumeric runs joined by separators.
    let mut rest = component;
    loop {
        let run = rest.find(|c: char| !alnum(c)).unwrap_or(rest.len());
        if run == 0 {
            return false;
        }
        rest = &rest[run..];
        if rest.is_empty() {
            return true;
        }

        let sep = rest.find(alnum).unwrap_or(rest.len());
        if !separator(&rest[..sep]) {
            return false;
        }
        rest = &rest[sep..];
    }
}

impl FromStr for RepositoryName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > NAME_MAX || !s.split('/').all(valid_component) {
            return Err(RegistryError::InvalidName(s.to_owned()));
        }
        Ok(RepositoryName(s.to_owned()))
    }
}

impl TryFrom<String> for RepositoryName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepositoryName> for String {
    fn from(value: RepositoryName) -> Self {
        value.0
    }
}

impl AsRef<str> for RepositoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag, e.g. `latest` or `3.19.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let valid = match bytes.split_first() {
            Some((first, rest)) => {
                (first.is_ascii_alphanumeric() || *first == b'_')
                    && rest.len() < TAG_MAX
                    && rest
                        .iter()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(*c, b'.' | b'_' | b'-'))
            }
            None => false,
        };

        if !valid {
            return Err(RegistryError::InvalidTag(s.to_owned()));
        }
        Ok(Tag(s.to_owned()))
    }
}

impl TryFrom<String> for Tag {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        value.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a manifest is addressed: by tag or by digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestReference {
    /// A mutable tag.
    Tag(Tag),

    /// The manifest's own digest.
    Digest(Digest),
}

impl FromStr for ManifestReference {
    type Err = RegistryError;

    /// Anything containing `:` must be a digest, since tags cannot contain one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse().map(ManifestReference::Digest)
        } else {
            s.parse().map(ManifestReference::Tag)
        }
    }
}

impl fmt::Display for ManifestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestReference::Tag(tag) => fmt::Display::fmt(tag, f),
            ManifestReference::Digest(digest) => fmt::Display::fmt(digest, f),
        }
    }
}

impl From<Tag> for ManifestReference {
    fn from(value: Tag) -> Self {
        ManifestReference::Tag(value)
    }
}

impl From<Digest> for ManifestReference {
    fn from(value: Digest) -> Self {
        ManifestReference::Digest(value)
    }
}
