use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{CacheError, FileStamp};

pub const SONG_INI: &str = "song.ini";
const SONG_SECTION: &str = "song";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySong {
    pub folder: String,
    pub artist: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LibraryRecord {
    mtime: f64,
    artist: String,
    name: String,
}

#[derive(Debug)]
pub struct LibraryIndex {
    path: PathBuf,
    records: BTreeMap<String, LibraryRecord>,
    dirty: bool,
}

impl LibraryIndex {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "library index is corrupt, rebuilding");
                BTreeMap::new()
            }),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no library index yet");
                BTreeMap::new()
            }
        };
        Self {
            path,
            records,
            dirty: false,
        }
    }

    pub fn scan(&mut self, songs_dir: &Path) -> io::Result<Vec<LibrarySong>> {
        let mut folders = Vec::new();
        for dir_entry in fs::read_dir(songs_dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.is_dir() {
                folders.push((dir_entry.file_name().to_string_lossy().into_owned(), path));
            }
        }
        folders.sort();

        let mut records = BTreeMap::new();
        let mut parsed = 0usize;
        let mut songs = Vec::with_capacity(folders.len());
        for (folder, path) in folders {
            let mtime = FileStamp::of(&path).map(|stamp| stamp.mtime).unwrap_or(0.0);
            let record = match self.records.remove(&folder) {
                Some(record) if record.mtime == mtime => record,
                _ => {
                    parsed += 1;
                    let (artist, name) = read_metadata(&path, &folder);
                    LibraryRecord {
                        mtime,
                        artist,
                        name,
                    }
                }
            };
            songs.push(LibrarySong {
                folder: folder.clone(),
                artist: record.artist.clone(),
                name: record.name.clone(),
            });
            records.insert(folder, record);
        }

        if parsed > 0 || !self.records.is_empty() {
            self.dirty = true;
        }
        self.records = records;
        info!(folders = songs.len(), parsed, "local library listed");
        Ok(songs)
    }

    pub fn flush(&mut self) -> Result<bool, CacheError> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(&self.records)?)?;
        fs::rename(&staging, &self.path)?;
        self.dirty = false;
        Ok(true)
    }
}

pub fn list_library(songs_dir: &Path, index_path: &Path) -> io::Result<Vec<LibrarySong>> {
    let mut index = LibraryIndex::load(index_path);
    let songs = index.scan(songs_dir)?;
    if let Err(err) = index.flush() {
        warn!(path = %index_path.display(), error = %err, "failed to persist library index");
    }
    Ok(songs)
}

fn read_metadata(folder_path: &Path, folder: &str) -> (String, String) {
    match fs::read(folder_path.join(SONG_INI)) {
        Ok(bytes) => parse_song_ini(&String::from_utf8_lossy(&bytes), folder),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(folder, error = %err, "cannot read song.ini");
            }
            (String::new(), folder.to_string())
        }
    }
}

/// Artist and title from a `song.ini` body. Keys outside any section count
/// as the song section; the title falls back to the folder name.
pub fn parse_song_ini(text: &str, folder: &str) -> (String, String) {
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = match Ini::load_from_str_opt(text.trim_start_matches('\u{feff}'), options) {
        Ok(ini) => ini,
        Err(err) => {
            debug!(folder, error = %err, "unparseable song.ini");
            return (String::new(), folder.to_string());
        }
    };

    let section = ini.section(Some(SONG_SECTION)).or_else(|| {
        ini.iter()
            .map(|(_, props)| props)
            .find(|props| !props.is_empty())
    });
    let field = |key: &str| {
        section
            .and_then(|props| props.get(key))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    (
        field("artist").unwrap_or_default().to_string(),
        field("name").unwrap_or(folder).to_string(),
    )
}
