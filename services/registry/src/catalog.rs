//! Catalog and tag listings, and the pagination shared by every listing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::name::RepositoryName;

/// How many entries a page may hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Limit {
    /// No limit.
    #[default]
    Unbounded,

    /// At most this many.
    At(usize),
}

impl Limit {
    /// The limit as an optional count, as sent on the wire.
    pub fn as_count(&self) -> Option<usize> {
        match self {
            Limit::Unbounded => None,
            Limit::At(n) => Some(*n),
        }
    }
}

impl From<Option<usize>> for Limit {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Limit::Unbounded, Limit::At)
    }
}

/// Sort and deduplicate `names`, keep those strictly after `from`, and
/// return at most `limit` of them.
///
/// ```
/// use registry::catalog::{page, Limit};
///
/// let names = ["test", "bar", "my-alpine", "busybox"].map(String::from);
/// assert_eq!(page(names.clone(), Some("busybox"), Limit::Unbounded), ["my-alpine", "test"]);
/// assert_eq!(page(names, None, Limit::At(2)), ["bar", "busybox"]);
/// ```
pub fn page<I>(names: I, from: Option<&str>, limit: Limit) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let sorted: BTreeSet<String> = names.into_iter().collect();
    let after = sorted
        .into_iter()
        .filter(|name| from.is_none_or(|from| name.as_str() > from));

    match limit {
        Limit::Unbounded => after.collect(),
        Limit::At(n) => after.take(n).collect(),
    }
}

/// Which page of the catalog to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Only names after this one.
    pub from: Option<String>,

    /// Page size.
    pub limit: Limit,
}

/// Which page of a repository's tags to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsQuery {
    /// Only tags after this one.
    pub from: Option<String>,

    /// Page size.
    pub limit: Limit,
}

/// Query string of the listing endpoints, `?n=<limit>&last=<from>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageParams {
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,

    /// Last entry of the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

impl From<PageParams> for CatalogQuery {
    fn from(params: PageParams) -> Self {
        CatalogQuery {
            from: params.last,
            limit: params.n.into(),
        }
    }
}

impl From<PageParams> for TagsQuery {
    fn from(params: PageParams) -> Self {
        TagsQuery {
            from: params.last,
            limit: params.n.into(),
        }
    }
}

impl From<&CatalogQuery> for PageParams {
    fn from(query: &CatalogQuery) -> Self {
        PageParams {
            n: query.limit.as_count(),
            last: query.from.clone(),
        }
    }
}

impl From<&TagsQuery> for PageParams {
    fn from(query: &TagsQuery) -> Self {
        PageParams {
            n: query.limit.as_count(),
            last: query.from.clone(),
        }
    }
}

/// A page of repository names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Repository names, sorted.
    pub repositories: Vec<String>,
}

/// A page of tags in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    /// The repository.
    pub name: RepositoryName,

    /// Tags, sorted.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

impl Tags {
    /// An empty page.
    pub fn empty(name: RepositoryName) -> Self {
        Tags {
            name,
            tags: Vec::new(),
        }
    }
}

// Some registries answer `"tags": null` for repositories without tags.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
