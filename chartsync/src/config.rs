use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::sync::orchestrator::DEFAULT_CONCURRENCY;
use crate::sync::retry::{DEFAULT_RETRY_INTERVAL, RetryPolicy};

const DEFAULT_MANIFEST_NAME: &str = "master_songs.json";
const CACHE_FILE_NAME: &str = "local_cache.json";
const DATA_DIR_NAME: &str = "chartsync";
const LIBRARY_INDEX_FILE_NAME: &str = "library_index.json";
const GAME_SONGS_SUBDIR: [&str; 2] = ["Clone Hero", "Songs"];

/// Where the list of remote files comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMode {
    /// Download the manifest document published in the root folder.
    Published,
    /// List the remote tree folder by folder.
    Walk,
}

impl ManifestMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "published" | "document" => Some(Self::Published),
            "walk" | "tree" => Some(Self::Walk),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub songs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub root_folder_id: String,
    pub manifest_name: String,
    pub manifest_mode: ManifestMode,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub api_base: Option<String>,
    pub token: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let documents = dirs::document_dir();
        Self::from_lookup(|name| std::env::var(name).ok(), &home, documents.as_deref())
    }

    /// Without `CHARTSYNC_SONGS_DIR` the game's default songs folder under
    /// `documents` is used when it exists.
    pub fn from_lookup<L>(lookup: L, home: &Path, documents: Option<&Path>) -> anyhow::Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let songs_dir = match read("CHARTSYNC_SONGS_DIR") {
            Some(value) => expand_with_home(&value, home),
            None => detect_songs_dir(documents)
                .context("CHARTSYNC_SONGS_DIR must point at the game's songs folder")?,
        };
        let data_dir = read("CHARTSYNC_DATA_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(default_data_dir);
        let root_folder_id = read("CHARTSYNC_ROOT_FOLDER_ID")
            .context("CHARTSYNC_ROOT_FOLDER_ID must name the shared Drive folder")?;
        let manifest_name =
            read("CHARTSYNC_MANIFEST_NAME").unwrap_or_else(|| DEFAULT_MANIFEST_NAME.to_string());
        let manifest_mode = match read("CHARTSYNC_MANIFEST_MODE") {
            None => ManifestMode::Published,
            Some(value) => ManifestMode::parse(&value).unwrap_or_else(|| {
                warn!(value = %value, "unknown manifest mode, using published");
                ManifestMode::Published
            }),
        };
        let concurrency = read_u64(&read, "CHARTSYNC_CONCURRENCY")
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_CONCURRENCY);
        let interval = read_u64(&read, "CHARTSYNC_RETRY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_INTERVAL);
        let mut retry = RetryPolicy::fixed(interval);
        if let Some(max) = read_u64(&read, "CHARTSYNC_RETRY_MAX_ATTEMPTS") {
            retry = retry.with_max_attempts(u32::try_from(max).unwrap_or(u32::MAX));
        }

        Ok(Self {
            songs_dir,
            data_dir,
            root_folder_id,
            manifest_name,
            manifest_mode,
            concurrency,
            retry,
            api_base: read("CHARTSYNC_API_BASE"),
            token: read("CHARTSYNC_TOKEN"),
        })
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE_NAME)
    }

    pub fn library_index_path(&self) -> PathBuf {
        self.data_dir.join(LIBRARY_INDEX_FILE_NAME)
    }

    /// Last successfully downloaded copy of the published manifest.
    pub fn manifest_copy_path(&self) -> PathBuf {
        self.data_dir.join(&self.manifest_name)
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn detect_songs_dir(documents: Option<&Path>) -> Option<PathBuf> {
    let candidate = GAME_SONGS_SUBDIR
        .iter()
        .fold(documents?.to_path_buf(), |path, part| path.join(part));
    if !candidate.is_dir() {
        return None;
    }
    info!(path = %candidate.display(), "using detected songs folder");
    Some(candidate)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
}

fn read_u64(read: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let value = read(name)?;
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Some(parsed),
        _ => {
            warn!(name, value = %value, "ignoring invalid number");
            None
        }
    }
}
