//! # Persistence
//!
//! Durable state lives in three JSON documents inside the data directory:
//!
//! | file                  | content                                        |
//! |-----------------------|------------------------------------------------|
//! | `device_history.json` | device id → [`DeviceHistory`]                  |
//! | `offline_archive.json`| device id → [`ArchiveEntry`]                   |
//! | `system_history.json` | list of [`SystemSnapshot`], oldest first       |
//!
//! Every document is written to a temp file in the same directory, synced and
//! renamed over the old one. Loading treats each document on its own: a
//! missing or corrupt file only empties that part of the state.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ArchiveEntry, DeviceHistory, DeviceId, SystemSnapshot};

pub const DEVICE_HISTORY_FILE: &str = "device_history.json";
pub const OFFLINE_ARCHIVE_FILE: &str = "offline_archive.json";
pub const SYSTEM_HISTORY_FILE: &str = "system_history.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize {document}: {source}")]
    Serialize {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence worker did not finish: {0}")]
    Worker(String),
}

/// The part of the engine state that outlives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub histories: BTreeMap<DeviceId, DeviceHistory>,
    pub archive: BTreeMap<DeviceId, ArchiveEntry>,
    pub snapshots: Vec<SystemSnapshot>,
}

/// What happened to one document during [`StateStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Loaded { entries: usize },
    Missing,
    /// Unparseable; renamed aside to `moved_to` when the rename succeeded.
    Corrupt { moved_to: Option<PathBuf> },
    /// Present but could not be read.
    Unreadable,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub state: PersistedState,
    pub statuses: Vec<(&'static str, DocumentStatus)>,
}

impl LoadOutcome {
    pub fn status(&self, document: &str) -> Option<&DocumentStatus> {
        self.statuses
            .iter()
            .find(|(name, _)| *name == document)
            .map(|(_, status)| status)
    }
}

/// File-backed store rooted at the data directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes all three documents. Blocking; run it off the async runtime.
    pub fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        self.write_document(DEVICE_HISTORY_FILE, &state.histories)?;
        self.write_document(OFFLINE_ARCHIVE_FILE, &state.archive)?;
        self.write_document(SYSTEM_HISTORY_FILE, &state.snapshots)?;
        debug!(
            dir = %self.dir.display(),
            histories = state.histories.len(),
            archived = state.archive.len(),
            snapshots = state.snapshots.len(),
            "state persisted"
        );
        Ok(())
    }

    /// Reads whatever can be recovered. Never fails: bad documents load empty.
    pub fn load(&self) -> LoadOutcome {
        let (histories, history_status) = self
            .read_document::<BTreeMap<DeviceId, DeviceHistory>>(DEVICE_HISTORY_FILE, |m| m.len());
        let (archive, archive_status) = self
            .read_document::<BTreeMap<DeviceId, ArchiveEntry>>(OFFLINE_ARCHIVE_FILE, |m| m.len());
        let (snapshots, snapshot_status) =
            self.read_document::<Vec<SystemSnapshot>>(SYSTEM_HISTORY_FILE, |v| v.len());

        LoadOutcome {
            state: PersistedState {
                histories,
                archive,
                snapshots,
            },
            statuses: vec![
                (DEVICE_HISTORY_FILE, history_status),
                (OFFLINE_ARCHIVE_FILE, archive_status),
                (SYSTEM_HISTORY_FILE, snapshot_status),
            ],
        }
    }

    fn write_document<T: Serialize>(&self, name: &'static str, value: &T) -> Result<(), PersistError> {
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Serialize {
            document: name,
            source,
        })?;
        let io_err = |source: io::Error| PersistError::Io {
            path: path.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.as_file_mut().write_all(&bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn read_document<T>(&self, name: &'static str, count: fn(&T) -> usize) -> (T, DocumentStatus)
    where
        T: DeserializeOwned + Default,
    {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(file = %path.display(), "no persisted document, starting empty");
                return (T::default(), DocumentStatus::Missing);
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "cannot read persisted document, starting empty");
                return (T::default(), DocumentStatus::Unreadable);
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                let entries = count(&value);
                info!(file = %path.display(), entries, "persisted document loaded");
                (value, DocumentStatus::Loaded { entries })
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "persisted document is corrupt, starting empty");
                let moved_to = set_aside(&path);
                (T::default(), DocumentStatus::Corrupt { moved_to })
            }
        }
    }
}

fn set_aside(path: &Path) -> Option<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupted-{}", Utc::now().timestamp()));
    let target = PathBuf::from(target);
    match fs::rename(path, &target) {
        Ok(()) => {
            warn!(from = %path.display(), to = %target.display(), "corrupt document renamed");
            Some(target)
        }
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed to rename corrupt document");
            None
        }
    }
}
