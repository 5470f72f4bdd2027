use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, BufWriter};

use crate::FileId;

const TEMP_EXT: &str = "tmp";

/// A writer to an under-storage file being created.
pub type UfsWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Durable backing storage lineage files are persisted to.
///
/// A file is written in full through the writer returned by [`UnderStorage::create()`], which is shut down by the caller,
/// then made visible by [`UnderStorage::commit()`]. An aborted file leaves nothing behind, so that a failed attempt can be
/// retried from scratch.
#[async_trait]
pub trait UnderStorage: Send + Sync {
    async fn create(&self, file_id: FileId) -> io::Result<UfsWriter>;

    async fn commit(&self, file_id: FileId) -> io::Result<()>;

    async fn abort(&self, file_id: FileId) -> io::Result<()>;
}

/// Under-storage backed by a local (usually mounted) directory.
///
/// ```text
///     - root
///       L {file_id}         persisted file
///       L {file_id}.tmp     file being written
/// ```
#[derive(Debug)]
pub struct LocalUnderStorage {
    root: PathBuf,
}

impl LocalUnderStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the path of a persisted file.
    #[inline]
    pub fn file_path(&self, file_id: FileId) -> PathBuf {
        self.root.join(file_id.to_string())
    }

    #[inline]
    fn temp_path(&self, file_id: FileId) -> PathBuf {
        self.file_path(file_id).with_extension(TEMP_EXT)
    }
}

#[async_trait]
impl UnderStorage for LocalUnderStorage {
    async fn create(&self, file_id: FileId) -> io::Result<UfsWriter> {
        tokio::fs::create_dir_all(&self.root).await?;

        // a previous attempt may have left a partial file behind
        let file = tokio::fs::File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.temp_path(file_id))
            .await?;

        Ok(Box::new(BufWriter::new(file)))
    }

    async fn commit(&self, file_id: FileId) -> io::Result<()> {
        let tmp = self.temp_path(file_id);

        tokio::fs::File::open(&tmp).await?.sync_all().await?;
        tokio::fs::rename(&tmp, self.file_path(file_id)).await?;

        tracing::debug!("Persisted lineage file {file_id} to under-storage: `{}`", self.root.display());

        Ok(())
    }

    async fn abort(&self, file_id: FileId) -> io::Result<()> {
        match tokio::fs::remove_file(self.temp_path(file_id)).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
