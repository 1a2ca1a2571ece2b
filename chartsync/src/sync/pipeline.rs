use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::cache::{CacheError, CacheStore, FileStamp};
use super::document::ManifestDocument;
use super::events::{ColorHint, EventSender, ProgressSink};
use super::group::{DownloadGroup, group_entries};
use super::manifest::{ManifestEntry, ManifestError, ManifestSource};
use super::orchestrator::{
    DownloadOrchestrator, OrchestratorError, StopHandle, SyncOutcome, SyncReport,
};
use super::reconcile::{ReconcileReport, Reconciler, ResolvedEntry};
use super::remote::RemoteFetcher;
use crate::config::{ManifestMode, SyncConfig};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("songs folder {0} does not exist")]
    MissingSongsDir(PathBuf),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: ReconcileReport,
    pub groups: Vec<DownloadGroup>,
}

impl ScanOutcome {
    pub fn pending_files(&self) -> usize {
        self.groups.iter().map(|group| group.files.len()).sum()
    }
}

pub struct SyncPipeline<F> {
    config: SyncConfig,
    manifest: ManifestSource<F>,
    orchestrator: DownloadOrchestrator<F>,
    events: EventSender,
}

impl<F: RemoteFetcher> SyncPipeline<F> {
    pub fn new(config: SyncConfig, remote: Arc<F>, events: EventSender) -> Self {
        let manifest = ManifestSource::new(
            Arc::clone(&remote),
            config.root_folder_id.clone(),
            config.retry,
        );
        let orchestrator = DownloadOrchestrator::new(remote, config.concurrency, events.clone());
        Self {
            config,
            manifest,
            orchestrator,
            events,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.orchestrator.stop_handle()
    }

    pub async fn scan(&self) -> Result<ScanOutcome, SyncError> {
        self.events.enable_control(false);
        let result = self.scan_inner().await;
        match &result {
            Ok(outcome) if outcome.groups.is_empty() => {
                self.events.status(
                    "Up to date",
                    &format!("{} files checked", outcome.report.scanned),
                    ColorHint::Success,
                );
            }
            Ok(outcome) => {
                self.events.status(
                    "Updates available",
                    &format!(
                        "{} folders, {} files",
                        outcome.groups.len(),
                        outcome.pending_files()
                    ),
                    ColorHint::Accent,
                );
                self.events.show_selection(&outcome.groups);
            }
            Err(err) => {
                self.events.status("Scan failed", &err.to_string(), ColorHint::Error);
                self.events.log(&format!("ERR: {err}"));
            }
        }
        self.events.enable_control(true);
        result
    }

    async fn scan_inner(&self) -> Result<ScanOutcome, SyncError> {
        let songs_dir = self.config.songs_dir.clone();
        if !tokio::fs::metadata(&songs_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(SyncError::MissingSongsDir(songs_dir));
        }

        self.events.progress(0.0);
        let entries = self.load_manifest().await?;
        self.events.status(
            "Checking local files",
            &format!("{} files in manifest", entries.len()),
            ColorHint::Accent,
        );

        let cache_path = self.config.cache_path();
        let events = self.events.clone();
        let (mut report, groups, flushed) = tokio::task::spawn_blocking(move || {
            let mut cache = CacheStore::load(cache_path);
            let mut report = Reconciler::new().diff(&entries, &songs_dir, &mut cache, &events);
            let groups = group_entries(std::mem::take(&mut report.pending), &songs_dir);
            let flushed = cache.flush();
            (report, groups, flushed)
        })
        .await?;
        match flushed {
            Ok(true) => info!("hash cache updated"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "failed to persist hash cache after scan"),
        }
        report.pending.clear();

        Ok(ScanOutcome { report, groups })
    }

    pub async fn load_manifest(&self) -> Result<Vec<ManifestEntry>, SyncError> {
        let entries = match self.config.manifest_mode {
            ManifestMode::Published => {
                self.events.status(
                    "Fetching manifest",
                    &self.config.manifest_name,
                    ColorHint::Accent,
                );
                self.manifest
                    .fetch_published(&self.config.manifest_name, &self.config.manifest_copy_path())
                    .await?
            }
            ManifestMode::Walk => {
                self.events
                    .status("Listing remote folders", "", ColorHint::Accent);
                self.manifest.walk().await?
            }
        };
        Ok(entries)
    }

    pub async fn confirm_download(&self, files: Vec<ResolvedEntry>) -> Result<SyncReport, SyncError> {
        self.events.enable_control(false);
        let report = match self.orchestrator.start(files).await {
            Ok(report) => report,
            Err(err) => {
                self.events.enable_control(true);
                return Err(err.into());
            }
        };

        let cache_path = self.config.cache_path();
        let downloaded: Vec<(PathBuf, String)> = report
            .downloaded
            .iter()
            .map(|(resolved, fetched)| (resolved.destination.clone(), fetched.md5.clone()))
            .collect();
        let failed: Vec<PathBuf> = report
            .failures
            .iter()
            .map(|failure| failure.entry.destination.clone())
            .collect();
        let flushed = tokio::task::spawn_blocking(move || {
            record_downloads(&cache_path, &downloaded, &failed)
        })
        .await?;
        if let Err(err) = flushed {
            warn!(error = %err, "failed to persist hash cache after downloads");
        }

        if let SyncOutcome::Failed { reason } = &report.outcome {
            self.events.log(&format!("ERR: {reason}"));
        }
        self.events.enable_control(true);
        Ok(report)
    }

    pub async fn generate(&self, output: &Path) -> Result<ManifestDocument, SyncError> {
        let started = Instant::now();
        self.events
            .status("Listing remote folders", "", ColorHint::Accent);
        let entries = self.manifest.walk().await?;
        let document = ManifestDocument::from_entries(&entries, started.elapsed());

        let target = output.to_path_buf();
        let to_write = document.clone();
        tokio::task::spawn_blocking(move || to_write.write_to(&target)).await??;

        self.events.status(
            "Manifest written",
            &format!("{} files, {}", entries.len(), output.display()),
            ColorHint::Success,
        );
        Ok(document)
    }
}

fn record_downloads(
    cache_path: &Path,
    downloaded: &[(PathBuf, String)],
    failed: &[PathBuf],
) -> Result<bool, CacheError> {
    let mut cache = CacheStore::load(cache_path);
    for (path, md5) in downloaded {
        match FileStamp::of(path) {
            Ok(stamp) => cache.put(path, stamp, md5.clone()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "downloaded file vanished");
                cache.remove(path);
            }
        }
    }
    for path in failed {
        cache.remove(path);
    }
    cache.flush()
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
