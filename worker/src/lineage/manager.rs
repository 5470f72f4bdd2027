use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::io::AsyncWriteExt;

use super::*;
use crate::block::BlockStore;
use crate::config::WorkerConf;
use crate::error::{Error, Result};
use crate::util::Cleanup;
use crate::LockId;

#[derive(Debug)]
struct Tracked {
    file: LineageFile,
    /// Reason of the last failed attempt, kept across retries so that a rollback to `Failed` still has it.
    error: Option<String>,
}

/// Worker's lineage data manager.
///
/// It owns the registry of lineage files waiting for a durable copy and persists them from the worker storage to the
/// under-storage. Files are kept ordered by id, and the registry lock is never held across an `.await`.
pub struct LineageDataManager {
    blocks: Arc<dyn BlockStore>,
    ufs: Arc<dyn UnderStorage>,
    files: RwLock<BTreeMap<FileId, Tracked>>,
}

impl LineageDataManager {
    pub fn new(blocks: Arc<dyn BlockStore>, ufs: Arc<dyn UnderStorage>) -> Self {
        Self {
            blocks,
            ufs,
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a manager persisting to the local under-storage directory of `conf`.
    pub fn with_conf(conf: &WorkerConf, blocks: Arc<dyn BlockStore>) -> Self {
        Self::new(blocks, Arc::new(LocalUnderStorage::new(conf.lineage.under_storage_dir.clone())))
    }

    /// Register a file closed by its writer as needing persistence.
    ///
    /// Return `false` if the file is already tracked, in which case it is left untouched.
    pub fn record_pending(&self, file: LineageFile) -> bool {
        let mut files = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        if files.contains_key(&file.file_id) {
            tracing::debug!("Lineage file {} is already tracked", file.file_id);
            return false;
        }

        tracing::debug!("Tracking lineage file {} ({} blocks)", file.file_id, file.block_ids.len());

        let file = LineageFile {
            state: PersistState::Pending,
            ..file
        };
        files.insert(file.file_id, Tracked { file, error: None });

        true
    }

    /// Return every tracked file not yet persisted, ordered by id.
    pub fn pending_files(&self) -> Vec<LineageFile> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|tracked| tracked.file.state != PersistState::Persisted)
            .map(|tracked| tracked.file.clone())
            .collect()
    }

    pub fn state(&self, file_id: FileId) -> Option<PersistState> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&file_id)
            .map(|tracked| tracked.file.state)
    }

    /// Reason of the last failed persistence attempt of a file, if it is [`PersistState::Failed`].
    pub fn last_error(&self, file_id: FileId) -> Option<String> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&file_id)
            .filter(|tracked| tracked.file.state == PersistState::Failed)
            .and_then(|tracked| tracked.error.clone())
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the blocks of a tracked file to the under-storage.
    ///
    /// The file moves to [`PersistState::Persisting`] and stays there on success, until the master acknowledges it.
    /// The whole file is one unit: if any block cannot be read or written, nothing is left in the under-storage, the
    /// file moves to [`PersistState::Failed`] and [`Error::Persistence`] is returned.
    pub async fn persist(&self, file: &LineageFile) -> Result<LineageFile> {
        let file_id = file.file_id;

        self.transition(file_id, PersistState::Persisting, None)?;

        tracing::debug!("Persisting lineage file {file_id} ({} blocks)", file.block_ids.len());

        match self.write_file(file).await {
            Ok(bytes) => {
                tracing::debug!("Persisted lineage file {file_id} ({bytes} bytes), waiting for acknowledgment");

                Ok(LineageFile {
                    state: PersistState::Persisting,
                    ..file.clone()
                })
            }
            Err(err) => {
                let reason = err.to_string();

                tracing::warn!("Failed to persist lineage file {file_id}: {reason}");

                self.mark_failed(file_id, reason.clone());

                Err(Error::Persistence { file_id, reason })
            }
        }
    }

    /// Finalize a file acknowledged by the master and stop tracking it.
    ///
    /// Only [`PersistState::Persisting`] files can be acknowledged, others are left untouched.
    pub fn acknowledge(&self, file_id: FileId) -> Option<LineageFile> {
        let mut files = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        match files.get(&file_id).map(|tracked| tracked.file.state) {
            Some(PersistState::Persisting) => {
                let mut file = files.remove(&file_id)?.file;
                file.state = PersistState::Persisted;

                tracing::debug!("Lineage file {file_id} acknowledged as persisted");

                Some(file)
            }
            Some(state) => {
                tracing::warn!("Ignoring acknowledgment of lineage file {file_id} in state {state}");
                None
            }
            None => {
                tracing::trace!("Ignoring acknowledgment of untracked lineage file {file_id}");
                None
            }
        }
    }

    /// Stop tracking a file whatever its state.
    pub fn abandon(&self, file_id: FileId) -> bool {
        let removed = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(&file_id);

        if let Some(ref tracked) = removed {
            tracing::debug!("Abandoned lineage file {file_id} in state {}", tracked.file.state);
        }

        removed.is_some()
    }

    /// Restore files to the states they had in `snapshot`.
    ///
    /// Files no longer tracked are ignored.
    pub fn rollback(&self, snapshot: &[LineageFile]) {
        let mut files = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        for file in snapshot {
            if let Some(tracked) = files.get_mut(&file.file_id) {
                if tracked.file.state != file.state {
                    tracing::trace!("Rolling lineage file {} back from {} to {}", file.file_id, tracked.file.state, file.state);

                    tracked.file.state = file.state;
                }
            }
        }
    }

    /// Move a file to [`PersistState::Failed`], whatever happened to the attempt.
    pub(crate) fn mark_failed(&self, file_id: FileId, reason: String) {
        if let Err(err) = self.transition(file_id, PersistState::Failed, Some(reason)) {
            tracing::debug!("Cannot mark lineage file {file_id} as failed: {err}");
        }
    }

    fn transition(&self, file_id: FileId, next: PersistState, error: Option<String>) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let tracked = files.get_mut(&file_id).ok_or_else(|| Error::Persistence {
            file_id,
            reason: "file is not tracked".to_owned(),
        })?;

        if !tracked.file.state.can_transition_to(next) {
            return Err(Error::Persistence {
                file_id,
                reason: format!("cannot move from {} to {next}", tracked.file.state),
            });
        }

        tracked.file.state = next;
        if error.is_some() {
            tracked.error = error;
        }

        Ok(())
    }

    /// Write all the blocks of `file` to a new under-storage file, committed only if everything succeeded.
    async fn write_file(&self, file: &LineageFile) -> Result<u64> {
        let mut locks = Vec::with_capacity(file.block_ids.len());
        let mut cleanup = Cleanup::<Error>::new();

        let written = cleanup.record(self.copy_blocks(file, &mut locks).await);

        for (block_id, lock_id) in locks {
            cleanup.record(self.blocks.unlock_block(block_id, lock_id));
        }

        if cleanup.is_ok() {
            cleanup.record(self.ufs.commit(file.file_id).await);
        }

        if !cleanup.is_ok() {
            if let Err(err) = self.ufs.abort(file.file_id).await {
                tracing::warn!("Failed to clean up aborted lineage file {}: {err}", file.file_id);
            }
        }

        cleanup.finish()?;

        Ok(written.unwrap_or_default())
    }

    /// Stream every block of `file`, in order, into a new under-storage file.
    ///
    /// Blocks are locked as they are read and stay locked until the caller releases `locks`.
    async fn copy_blocks(&self, file: &LineageFile, locks: &mut Vec<(BlockId, LockId)>) -> Result<u64> {
        let mut writer = self.ufs.create(file.file_id).await?;
        let mut written = 0;

        for &block_id in &file.block_ids {
            let lock = self.blocks.lock_block(block_id).ok_or(Error::BlockNotLocallyAvailable(block_id))?;
            locks.push((block_id, lock.lock_id));

            let mut block = tokio::fs::File::open(&lock.block_path).await?;
            written += tokio::io::copy(&mut block, &mut writer).await?;
        }

        writer.shutdown().await?;

        Ok(written)
    }
}

impl std::fmt::Debug for LineageDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageDataManager").field("files", &self.len()).finish_non_exhaustive()
    }
}
