use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{not_found, Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Suffix of files which are still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// Storage driver which keeps each bucket in a directory below `root`.
///
/// Uploads are written to a sibling `.partial` file and renamed into place
/// once complete.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. The directory is created lazily.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, key: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        let valid = key
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
        if !valid || key.as_str().is_empty() || bucket.contains('/') {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidKey,
                eyre::eyre!("key must be a relative path without `..`"),
            )
            .bucket(bucket)
            .path(key.as_str())
            .build());
        }

        Ok(self.root.join(bucket).join(key))
    }

    fn error(&self, bucket: &str, key: &Utf8Path, error: eyre::Report) -> StorageError {
        let kind = error
            .downcast_ref::<std::io::Error>()
            .map(StorageErrorKind::from_io)
            .unwrap_or(StorageErrorKind::Other);
        StorageError::builder(self.name(), kind, error)
            .bucket(bucket)
            .path(key.as_str())
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, key: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, key)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(not_found(self.name(), bucket, key)),
            Err(error) => {
                return Err(self.error(bucket, key, eyre::Report::new(error).wrap_err("metadata")))
            }
        };

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .wrap_err("file timestamps")
            .map_err(|err| self.error(bucket, key, err))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, key: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, key)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.error(bucket, key, eyre::Report::new(error).wrap_err("remove_file"))),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, key)?;
        let parent = path.parent().unwrap_or(self.root.as_path());

        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err("create_dir_all")
            .map_err(|err| self.error(bucket, key, err))?;

        let partial = parent.join(format!(
            ".{}.{}{PARTIAL_SUFFIX}",
            path.file_name().unwrap_or("object"),
            uuid::Uuid::new_v4()
        ));

        let written = async {
            let mut writer = tokio::io::BufWriter::new(
                tokio::fs::File::create(&partial)
                    .await
                    .wrap_err("create partial file")?,
            );
            tokio::io::copy(reader, &mut writer).await.wrap_err("copy")?;
            writer.shutdown().await.wrap_err("shutdown writer")?;
            tokio::fs::rename(&partial, &path)
                .await
                .wrap_err("rename partial file")?;
            Ok::<_, eyre::Report>(())
        }
        .await;

        if let Err(error) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                tracing::debug!(%partial, "partial file not removed: {cleanup}");
            }
            return Err(self.error(bucket, key, error));
        }

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        key: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, key)?;

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .wrap_err("open file")
                .map_err(|err| self.error(bucket, key, err))?,
        );

        tokio::io::copy(&mut reader, writer)
            .await
            .wrap_err("copy")
            .map_err(|err| self.error(bucket, key, err))?;

        writer
            .flush()
            .await
            .wrap_err("flush writer")
            .map_err(|err| self.error(bucket, key, err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let root = self.root.join(bucket);
        let target = match prefix {
            Some(prefix) => self.path(bucket, prefix)?,
            None => root.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &target))
            .in_current_span()
            .await
            .wrap_err("local driver")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Other, err))?
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from)?;
        let destination = self.path(bucket, to)?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("create_dir_all")
                .map_err(|err| self.error(bucket, to, err))?;
        }

        tokio::fs::rename(&source, &destination)
            .await
            .wrap_err("rename")
            .map_err(|err| self.error(bucket, from, err))
    }
}

/// Collect the keys of every file below `target`, relative to `root`.
#[tracing::instrument]
fn collect_list(root: &Utf8Path, target: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    if target.is_dir() {
        visit(target, &mut files)?;
    } else if target.is_file() {
        files.push(target.to_owned());
    }

    Ok(files
        .into_iter()
        .filter(|p| !p.as_str().ends_with(PARTIAL_SUFFIX))
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
