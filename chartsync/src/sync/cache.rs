use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStamp {
    pub mtime: f64,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(meta: &fs::Metadata) -> io::Result<Self> {
        let modified = meta.modified()?;
        let mtime = match modified.duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        };
        Ok(Self {
            mtime,
            size: meta.len(),
        })
    }

    pub fn of(path: &Path) -> io::Result<Self> {
        Self::from_metadata(&fs::metadata(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheRecord {
    mtime: f64,
    size: u64,
    md5: String,
}

#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    entries: HashMap<String, CacheRecord>,
    dirty: bool,
}

impl CacheStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, CacheRecord>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "hash cache is corrupt, starting cold");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no hash cache yet");
                HashMap::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "hash cache is unreadable, starting cold");
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, path: &Path, stamp: &FileStamp) -> Option<&str> {
        let record = self.entries.get(&cache_key(path))?;
        (record.mtime == stamp.mtime && record.size == stamp.size).then_some(record.md5.as_str())
    }

    pub fn put(&mut self, path: &Path, stamp: FileStamp, hash: impl Into<String>) {
        let record = CacheRecord {
            mtime: stamp.mtime,
            size: stamp.size,
            md5: hash.into(),
        };
        let key = cache_key(path);
        if self.entries.get(&key) != Some(&record) {
            self.entries.insert(key, record);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, path: &Path) {
        if self.entries.remove(&cache_key(path)).is_some() {
            self.dirty = true;
        }
    }

    pub fn flush(&mut self) -> Result<bool, CacheError> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec(&self.entries)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "hash cache flushed");
        Ok(true)
    }
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
