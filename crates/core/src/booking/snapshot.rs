//! Client-local persistence of the in-progress booking.
//!
//! The draft is written before the payment-setup redirect so the form can be
//! restored when the user comes back, whether setup succeeded or was
//! cancelled. Every save overwrites the single entry under [`SNAPSHOT_KEY`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::domain::booking::BookingSnapshot;

pub const SNAPSHOT_KEY: &str = "quoteFormData";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot storage at `{path}` failed: {message}")]
    Io { path: String, message: String },
    #[error("snapshot could not be encoded: {0}")]
    Encode(String),
    #[error("stored snapshot is unreadable: {0}")]
    Decode(String),
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &BookingSnapshot) -> Result<(), SnapshotError>;
    fn load(&self) -> Result<Option<BookingSnapshot>, SnapshotError>;
    fn clear(&self) -> Result<(), SnapshotError>;
}

fn encode(snapshot: &BookingSnapshot) -> Result<String, SnapshotError> {
    serde_json::to_string(snapshot).map_err(|error| SnapshotError::Encode(error.to_string()))
}

fn decode(raw: &str) -> Result<BookingSnapshot, SnapshotError> {
    serde_json::from_str(raw).map_err(|error| SnapshotError::Decode(error.to_string()))
}

/// Key/value store standing in for browser local storage.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySnapshotStore {
    pub fn raw(&self) -> Option<String> {
        match self.entries.lock() {
            Ok(entries) => entries.get(SNAPSHOT_KEY).cloned(),
            Err(poisoned) => poisoned.into_inner().get(SNAPSHOT_KEY).cloned(),
        }
    }

    pub fn put_raw(&self, raw: impl Into<String>) {
        match self.entries.lock() {
            Ok(mut entries) => entries.insert(SNAPSHOT_KEY.to_owned(), raw.into()),
            Err(poisoned) => poisoned.into_inner().insert(SNAPSHOT_KEY.to_owned(), raw.into()),
        };
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, snapshot: &BookingSnapshot) -> Result<(), SnapshotError> {
        self.put_raw(encode(snapshot)?);
        Ok(())
    }

    fn load(&self) -> Result<Option<BookingSnapshot>, SnapshotError> {
        self.raw().as_deref().map(decode).transpose()
    }

    fn clear(&self) -> Result<(), SnapshotError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.remove(SNAPSHOT_KEY),
            Err(poisoned) => poisoned.into_inner().remove(SNAPSHOT_KEY),
        };
        Ok(())
    }
}

/// Stores the snapshot as `<dir>/quoteFormData.json`.
#[derive(Clone, Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_KEY}.json"))
    }

    fn io_error(path: &Path, error: std::io::Error) -> SnapshotError {
        SnapshotError::Io { path: path.display().to_string(), message: error.to_string() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &BookingSnapshot) -> Result<(), SnapshotError> {
        let encoded = encode(snapshot)?;
        fs::create_dir_all(&self.dir).map_err(|error| Self::io_error(&self.dir, error))?;

        let path = self.path();
        let staging = self.dir.join(format!("{SNAPSHOT_KEY}.json.tmp"));
        fs::write(&staging, encoded).map_err(|error| Self::io_error(&staging, error))?;
        fs::rename(&staging, &path).map_err(|error| Self::io_error(&path, error))
    }

    fn load(&self) -> Result<Option<BookingSnapshot>, SnapshotError> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(raw) => decode(&raw).map(Some),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(Self::io_error(&path, error)),
        }
    }

    fn clear(&self) -> Result<(), SnapshotError> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Self::io_error(&path, error)),
        }
    }
}
