//! Content digests.
//!
//! A [`Digest`] is the canonical `<algorithm>:<hex>` identity of a blob or
//! manifest. [`DigestReader`] computes one while bytes stream through it.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll, ready};

use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::RegistryError;

const SHA256_HEXLEN: usize = 64;

/// Hash algorithms a digest can be computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    /// SHA-256, the only algorithm in use.
    Sha256,
}

impl DigestAlgorithm {
    /// The algorithm name as it appears in digests and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => SHA256_HEXLEN,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content digest, `<algorithm>:<lowercase hex>`.
///
/// ```
/// use registry::Digest;
///
/// let digest = Digest::of(b"data");
/// assert_eq!(
///     digest.to_string(),
///     "sha256:3a6eb0790f39ac87c94f3856b2dd2c5d110e6811602261a9a923d3bb23adc8b7"
/// );
/// assert_eq!(digest, digest.to_string().parse().unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Compute the SHA-256 digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(bytes);
        hasher.finish()
    }

    /// The hash algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The lowercase hex encoded hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The first two hex characters, used to shard storage keys.
    pub fn prefix(&self) -> &str {
        &self.hex[..2]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| RegistryError::MalformedDigest(format!("{s}: {reason}"));

        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| malformed("missing `:`"))?;

        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            _ => return Err(malformed("unsupported algorithm")),
        };

        if hex.len() != algorithm.hex_len() {
            return Err(malformed("wrong length"));
        }

        if !hex.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(malformed("not lowercase hex"));
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_owned(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// Incremental digest computation.
#[derive(Debug, Clone, Default)]
pub struct DigestHasher {
    hasher: Sha256,
}

impl DigestHasher {
    /// Start a new SHA-256 computation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finish the computation.
    pub fn finish(self) -> Digest {
        Digest {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(self.hasher.finalize()),
        }
    }
}

/// Forwards reads from `inner` unchanged, hashing every byte on the way.
#[pin_project]
#[derive(Debug)]
pub struct DigestReader<R> {
    #[pin]
    inner: R,
    hasher: DigestHasher,
    bytes_read: u64,
}

impl<R> DigestReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: DigestHasher::new(),
            bytes_read: 0,
        }
    }

    /// Digest of the bytes read so far. Once the inner reader is exhausted
    /// this is the digest of the whole stream.
    pub fn digest(&self) -> Digest {
        self.hasher.clone().finish()
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: AsyncRead> AsyncRead for DigestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let start = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;

        let read = &buf.filled()[start..];
        this.hasher.update(read);
        *this.bytes_read += read.len() as u64;
        Poll::Ready(Ok(()))
    }
}
