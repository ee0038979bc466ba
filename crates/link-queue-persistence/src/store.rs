//! Whole-queue snapshot file.
//!
//! The queue is small (tens of entries), so every mutation rewrites the full
//! JSON array instead of appending to a log. Writes go through a temp file:
//!
//! 1. Write to `<file>.tmp`
//! 2. fsync the file
//! 3. Rename over `<file>`
//! 4. fsync the directory
//!
//! A reader therefore sees either the previous snapshot or the new one.

use crate::Result;
use chrono::Utc;
use link_queue_core::Request;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// JSON file holding the queue contents in queue order
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. `Ok(None)` means no snapshot has been written yet.
    pub fn load(&self) -> Result<Option<Vec<Request>>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let requests: Vec<Request> = serde_json::from_slice(&bytes)?;
        Ok(Some(requests))
    }

    /// Load the snapshot for startup, never failing.
    ///
    /// A missing file yields an empty queue. An unreadable or malformed file
    /// is logged and also yields an empty queue; a malformed file is moved to
    /// `<file>.corrupt-<millis>` first so the next save does not overwrite it.
    pub fn recover(&self) -> Vec<Request> {
        match self.load() {
            Ok(Some(requests)) => {
                info!("Loaded {} requests from {:?}", requests.len(), self.path);
                requests
            }
            Ok(None) => {
                info!("Queue file {:?} does not exist, starting with empty queue", self.path);
                Vec::new()
            }
            Err(crate::PersistenceError::SerializationError(e)) => {
                error!("Queue file {:?} is malformed, starting with empty queue: {}", self.path, e);
                self.quarantine();
                Vec::new()
            }
            Err(e) => {
                error!("Failed to read queue file {:?}, starting with empty queue: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Atomically replace the snapshot with `requests`
    pub fn save(&self, requests: &[Request]) -> Result<()> {
        if let Some(parent) = self.parent_dir() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let bytes = serde_json::to_vec_pretty(requests)?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.parent_dir() {
            fsync_dir(parent)?;
        }

        debug!("Saved {} requests to {:?}", requests.len(), self.path);
        Ok(())
    }

    fn quarantine(&self) {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".corrupt-{}", Utc::now().timestamp_millis()));
        let target = PathBuf::from(name);

        match std::fs::rename(&self.path, &target) {
            Ok(()) => warn!("Moved malformed queue file to {:?}", target),
            Err(e) => warn!("Could not move malformed queue file aside: {}", e),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Parent directory, `None` for a bare file name in the working directory
    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
