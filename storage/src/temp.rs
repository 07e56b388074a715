use std::io;

use camino::Utf8Path;
use tempfile::TempDir;

use crate::local::LocalDriver;
use storage_driver::{Driver, Metadata, Reader, StorageError, Writer};

/// A [`LocalDriver`] rooted in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TempDriver {
    // Held only so the directory lives as long as the driver.
    _dir: TempDir,
    driver: LocalDriver,
}

impl TempDriver {
    /// Create a driver in a fresh temporary directory.
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let root = Utf8Path::from_path(dir.path())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "temporary path is not utf-8"))?
            .to_owned();

        Ok(Self {
            _dir: dir,
            driver: LocalDriver::new(root),
        })
    }
}

#[async_trait::async_trait]
impl Driver for TempDriver {
    fn name(&self) -> &'static str {
        "temp"
    }

    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, key).await
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.driver.upload(bucket, key, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        key: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.driver.download(bucket, key, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.rename(bucket, from, to).await
    }
}
