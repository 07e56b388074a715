use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// What went wrong, independent of the driver which reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// No object at the key, or no such bucket.
    NotFound,

    /// The driver may not touch the key.
    PermissionDenied,

    /// Reading or writing failed, including errors raised by the stream
    /// handed to the driver.
    Io,

    /// The key cannot be stored by this driver.
    InvalidKey,

    /// Anything else.
    Other,
}

impl StorageErrorKind {
    /// Classify an I/O error.
    pub fn from_io(error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::PermissionDenied => "permission denied",
            StorageErrorKind::Io => "i/o failure",
            StorageErrorKind::InvalidKey => "invalid key",
            StorageErrorKind::Other => "failure",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a storage driver.
///
/// Records which driver failed, on which bucket and key, and the tracing
/// span it failed in.
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
/// )
/// .bucket("registry")
/// .path("blobs/sha256/ab/abcd/data")
/// .build();
///
/// assert!(error.is_not_found());
/// assert_eq!(error.path(), Some("blobs/sha256/ab/abcd/data"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    driver: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    span_trace: Box<SpanTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// An error without bucket or key.
    pub fn new<E>(driver: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(driver, kind, error).build()
    }

    /// An I/O error, classified by its kind.
    pub fn io(driver: &'static str, error: std::io::Error) -> Self {
        Self::new(driver, StorageErrorKind::from_io(&error), error)
    }

    /// Start an error which names its bucket and key.
    pub fn builder<E>(driver: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            kind,
            driver,
            bucket: None,
            path: None,
            source: error.into(),
        }
    }

    /// The error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether the key or bucket was missing.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// The driver name.
    pub fn driver(&self) -> &'static str {
        self.driver
    }

    /// The bucket, if known.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// The key, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Where in the traced call tree the error was built.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} storage {}", self.driver, self.kind)?;
        match (&self.bucket, &self.path) {
            (Some(bucket), Some(path)) => write!(f, " at {bucket}:{path}")?,
            (Some(bucket), None) => write!(f, " in {bucket}")?,
            (None, Some(path)) => write!(f, " at {path}")?,
            (None, None) => {}
        }
        write!(f, ": {}", self.source)
    }
}

/// Adds bucket and key to a [`StorageError`].
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    driver: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl StorageErrorBuilder {
    /// The bucket being accessed.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// The key being accessed.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Capture the current span and finish the error.
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            driver: self.driver,
            bucket: self.bucket,
            path: self.path,
            source: self.source,
            span_trace: Box::new(SpanTrace::capture()),
        }
    }
}
