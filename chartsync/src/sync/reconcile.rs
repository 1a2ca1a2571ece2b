use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::Context;
use tracing::{debug, info, warn};

use super::cache::{CacheStore, FileStamp};
use super::events::ProgressSink;
use super::manifest::ManifestEntry;
use super::paths::resolve_destination;

const HASH_CHUNK: usize = 64 * 1024;
const PROGRESS_EVERY: usize = 50;

pub trait FileHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Hasher;

impl FileHasher for Md5Hasher {
    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut ctx = Context::new();
        let mut buf = vec![0u8; HASH_CHUNK];
        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            ctx.consume(&buf[..read]);
        }
        Ok(format!("{:x}", ctx.compute()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadReason {
    Missing,
    SizeMismatch,
    HashMismatch,
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub entry: ManifestEntry,
    pub destination: PathBuf,
    pub reason: DownloadReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pending: Vec<ResolvedEntry>,
    pub scanned: usize,
    pub missing: usize,
    pub size_mismatch: usize,
    pub hash_mismatch: usize,
    pub unreadable: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub hashed: usize,
}

impl ReconcileReport {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    fn flag(&mut self, entry: &ManifestEntry, destination: PathBuf, reason: DownloadReason) {
        match reason {
            DownloadReason::Missing => self.missing += 1,
            DownloadReason::SizeMismatch => self.size_mismatch += 1,
            DownloadReason::HashMismatch => self.hash_mismatch += 1,
            DownloadReason::Unreadable => self.unreadable += 1,
        }
        self.pending.push(ResolvedEntry {
            entry: entry.clone(),
            destination,
            reason,
        });
    }
}

#[derive(Debug, Default, Clone)]
pub struct Reconciler<H = Md5Hasher> {
    hasher: H,
}

impl Reconciler<Md5Hasher> {
    pub fn new() -> Self {
        Self { hasher: Md5Hasher }
    }
}

impl<H: FileHasher> Reconciler<H> {
    pub fn with_hasher(hasher: H) -> Self {
        Self { hasher }
    }

    pub fn diff(
        &self,
        manifest: &[ManifestEntry],
        local_root: &Path,
        cache: &mut CacheStore,
        sink: &dyn ProgressSink,
    ) -> ReconcileReport {
        let total = manifest.len();
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for (index, entry) in manifest.iter().enumerate() {
            report.scanned += 1;
            match resolve_destination(local_root, &entry.relative_path, &entry.name) {
                Ok(destination) if !seen.insert(destination.clone()) => {
                    warn!(
                        path = %destination.display(),
                        remote_id = %entry.remote_id,
                        "duplicate destination in manifest, keeping the first entry"
                    );
                    report.duplicates += 1;
                }
                Ok(destination) => {
                    if let Some(reason) = self.check(entry, &destination, cache, &mut report) {
                        debug!(path = %destination.display(), ?reason, "flagged for download");
                        report.flag(entry, destination, reason);
                    }
                }
                Err(err) => {
                    warn!(
                        name = %entry.name,
                        path = %entry.relative_path,
                        error = %err,
                        "rejecting manifest entry"
                    );
                    report.rejected += 1;
                }
            }

            let processed = index + 1;
            if processed % PROGRESS_EVERY == 0 && processed < total {
                sink.progress(processed as f64 / total as f64);
            }
        }
        sink.progress(1.0);

        info!(
            scanned = report.scanned,
            pending = report.pending.len(),
            missing = report.missing,
            size_mismatch = report.size_mismatch,
            hash_mismatch = report.hash_mismatch,
            unreadable = report.unreadable,
            rejected = report.rejected,
            duplicates = report.duplicates,
            hashed = report.hashed,
            "reconciliation finished"
        );
        report
    }

    fn check(
        &self,
        entry: &ManifestEntry,
        destination: &Path,
        cache: &mut CacheStore,
        report: &mut ReconcileReport,
    ) -> Option<DownloadReason> {
        let meta = match fs::metadata(destination) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Some(DownloadReason::Missing);
            }
            Err(err) => {
                warn!(path = %destination.display(), error = %err, "cannot stat local file");
                return Some(DownloadReason::Unreadable);
            }
        };
        if !meta.is_file() {
            warn!(path = %destination.display(), "local path is not a regular file");
            return Some(DownloadReason::Unreadable);
        }
        if meta.len() != entry.size {
            return Some(DownloadReason::SizeMismatch);
        }

        let expected = entry.content_hash.as_deref()?;
        let stamp = match FileStamp::from_metadata(&meta) {
            Ok(stamp) => stamp,
            Err(err) => {
                warn!(path = %destination.display(), error = %err, "cannot read modification time");
                return Some(DownloadReason::Unreadable);
            }
        };

        let local_hash = match cache.get(destination, &stamp) {
            Some(hash) => hash.to_string(),
            None => match self.hasher.hash_file(destination) {
                Ok(hash) => {
                    report.hashed += 1;
                    cache.put(destination, stamp, hash.clone());
                    hash
                }
                Err(err) => {
                    warn!(path = %destination.display(), error = %err, "cannot hash local file");
                    return Some(DownloadReason::Unreadable);
                }
            },
        };

        (!local_hash.eq_ignore_ascii_case(expected)).then_some(DownloadReason::HashMismatch)
    }
}
