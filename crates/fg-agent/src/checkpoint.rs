//! Durable per-reader inbox checkpoints

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use fg_proto::v1::{CheckpointV1, Fingerprint};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Corrupt checkpoint: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("Checkpoint lock poisoned")]
    Poisoned,
}

/// Where a peer keeps its inbox high-water mark between runs.
///
/// `save` never moves a stored checkpoint backwards.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, reader: &Fingerprint) -> Result<Option<CheckpointV1>, CheckpointError>;

    fn save(&self, checkpoint: &CheckpointV1) -> Result<(), CheckpointError>;
}

/// JSON checkpoint file, replaced atomically on each save
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<CheckpointV1>, CheckpointError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, reader: &Fingerprint) -> Result<Option<CheckpointV1>, CheckpointError> {
        // A file left by another identity does not apply to this reader
        Ok(self.read()?.filter(|cp| &cp.reader == reader))
    }

    fn save(&self, checkpoint: &CheckpointV1) -> Result<(), CheckpointError> {
        if let Some(current) = self.load(&checkpoint.reader)? {
            if current.last_id_seen >= checkpoint.last_id_seen {
                return Ok(());
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp)?;
            file.write_all(&serde_json::to_vec_pretty(checkpoint)?)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Checkpoints held only for the life of the process
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoint: Mutex<Option<CheckpointV1>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, reader: &Fingerprint) -> Result<Option<CheckpointV1>, CheckpointError> {
        let guard = self.checkpoint.lock().map_err(|_| CheckpointError::Poisoned)?;
        Ok(guard.as_ref().filter(|cp| &cp.reader == reader).cloned())
    }

    fn save(&self, checkpoint: &CheckpointV1) -> Result<(), CheckpointError> {
        let mut guard = self.checkpoint.lock().map_err(|_| CheckpointError::Poisoned)?;
        match guard.as_ref() {
            Some(current)
                if current.reader == checkpoint.reader
                    && current.last_id_seen >= checkpoint.last_id_seen => {}
            _ => *guard = Some(checkpoint.clone()),
        }
        Ok(())
    }
}
