use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ColorHint, EventSender, ProgressSink};
use super::reconcile::ResolvedEntry;
use super::remote::{FetchedFile, RemoteError, RemoteFetcher};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
    Stopping,
    Completed,
    Stopped,
    Failed,
}

impl OrchestratorState {
    pub fn is_active(self) -> bool {
        matches!(self, OrchestratorState::Running | OrchestratorState::Stopping)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { succeeded: usize, failed: usize },
    Stopped { succeeded: usize, failed: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub entry: ResolvedEntry,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub total: usize,
    pub dispatched: usize,
    pub downloaded: Vec<(ResolvedEntry, FetchedFile)>,
    pub failures: Vec<FileFailure>,
    pub elapsed: Duration,
    pub started_at: OffsetDateTime,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("a download run is already in progress")]
    AlreadyRunning,
}

struct Shared {
    state: Mutex<OrchestratorState>,
    token: Mutex<CancellationToken>,
}

#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        let mut state = lock(&self.shared.state);
        if *state == OrchestratorState::Running {
            *state = OrchestratorState::Stopping;
            lock(&self.shared.token).cancel();
            info!("stop requested");
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *lock(&self.shared.state)
    }
}

struct SyncSession {
    total: usize,
    started: Instant,
    completed: usize,
    downloaded: Vec<(ResolvedEntry, FetchedFile)>,
    failures: Vec<FileFailure>,
}

pub struct DownloadOrchestrator<F> {
    remote: Arc<F>,
    concurrency: usize,
    events: EventSender,
    shared: Arc<Shared>,
}

impl<F: RemoteFetcher> DownloadOrchestrator<F> {
    pub fn new(remote: Arc<F>, concurrency: usize, events: EventSender) -> Self {
        Self {
            remote,
            concurrency: concurrency.max(1),
            events,
            shared: Arc::new(Shared {
                state: Mutex::new(OrchestratorState::Idle),
                token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *lock(&self.shared.state)
    }

    pub async fn start(&self, selection: Vec<ResolvedEntry>) -> Result<SyncReport, OrchestratorError> {
        let token = {
            let mut state = lock(&self.shared.state);
            if state.is_active() {
                return Err(OrchestratorError::AlreadyRunning);
            }
            *state = OrchestratorState::Running;
            let token = CancellationToken::new();
            *lock(&self.shared.token) = token.clone();
            token
        };

        let total = selection.len();
        let started_at = OffsetDateTime::now_utc();
        let session = Arc::new(Mutex::new(SyncSession {
            total,
            started: Instant::now(),
            completed: 0,
            downloaded: Vec::new(),
            failures: Vec::new(),
        }));
        info!(total, concurrency = self.concurrency, "download run started");
        self.events.progress(0.0);
        self.events.status(
            "Downloading",
            &format!("0/{total} files"),
            ColorHint::Accent,
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut dispatched = 0usize;
        let mut pool_closed = false;

        for resolved in selection {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        pool_closed = true;
                        break;
                    }
                },
            };
            // A stop may land while the permit was being granted.
            if token.is_cancelled() {
                break;
            }

            dispatched += 1;
            let remote = Arc::clone(&self.remote);
            let session = Arc::clone(&session);
            let events = self.events.clone();
            let task_entry = resolved.clone();
            let handle = tasks.spawn(async move {
                let result = fetch_one(remote.as_ref(), &task_entry).await;
                record(&session, &events, task_entry, result);
                drop(permit);
            });
            in_flight.insert(handle.id(), resolved);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined
                && let Some(resolved) = in_flight.remove(&err.id())
            {
                warn!(name = %resolved.entry.name, error = %err, "download task aborted");
                record(
                    &session,
                    &self.events,
                    resolved,
                    Err(RemoteError::Unavailable(format!("download task aborted: {err}"))),
                );
            }
        }

        let (downloaded, failures, elapsed) = {
            let mut session = lock(&session);
            (
                std::mem::take(&mut session.downloaded),
                std::mem::take(&mut session.failures),
                session.started.elapsed(),
            )
        };
        let succeeded = downloaded.len();
        let failed = failures.len();
        let (outcome, state) = if pool_closed {
            (
                SyncOutcome::Failed {
                    reason: "worker pool closed unexpectedly".to_string(),
                },
                OrchestratorState::Failed,
            )
        } else if token.is_cancelled() {
            (
                SyncOutcome::Stopped { succeeded, failed },
                OrchestratorState::Stopped,
            )
        } else {
            (
                SyncOutcome::Completed { succeeded, failed },
                OrchestratorState::Completed,
            )
        };
        *lock(&self.shared.state) = state;
        self.announce(&outcome, total);
        info!(
            ?outcome,
            total,
            dispatched,
            elapsed_ms = elapsed.as_millis() as u64,
            "download run finished"
        );

        Ok(SyncReport {
            outcome,
            total,
            dispatched,
            downloaded,
            failures,
            elapsed,
            started_at,
        })
    }

    fn announce(&self, outcome: &SyncOutcome, total: usize) {
        match outcome {
            SyncOutcome::Completed { succeeded, failed: 0 } => {
                self.events.progress(1.0);
                self.events.status(
                    "Sync complete",
                    &format!("{succeeded}/{total} files downloaded"),
                    ColorHint::Success,
                );
            }
            SyncOutcome::Completed { succeeded, failed } => {
                self.events.progress(1.0);
                self.events.status(
                    "Sync finished with errors",
                    &format!("{succeeded} downloaded, {failed} failed"),
                    ColorHint::Error,
                );
            }
            SyncOutcome::Stopped { succeeded, failed } => self.events.status(
                "Sync stopped",
                &format!("{succeeded} downloaded, {failed} failed before stopping"),
                ColorHint::Accent,
            ),
            SyncOutcome::Failed { reason } => {
                self.events.status("Sync failed", reason, ColorHint::Error)
            }
        }
    }
}

async fn fetch_one<F: RemoteFetcher>(
    remote: &F,
    resolved: &ResolvedEntry,
) -> Result<FetchedFile, RemoteError> {
    if let Some(parent) = resolved.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    remote
        .fetch(
            &resolved.entry.remote_id,
            &resolved.destination,
            resolved.entry.content_hash.as_deref(),
        )
        .await
}

// Events go out under the session lock so progress never moves backwards.
fn record(
    session: &Mutex<SyncSession>,
    events: &EventSender,
    resolved: ResolvedEntry,
    result: Result<FetchedFile, RemoteError>,
) {
    let mut session = lock(session);
    session.completed += 1;
    match result {
        Ok(fetched) => {
            debug!(name = %resolved.entry.name, bytes = fetched.bytes, "file downloaded");
            events.log(&format!("OK: {}", resolved.entry.name));
            session.downloaded.push((resolved, fetched));
        }
        Err(err) => {
            warn!(name = %resolved.entry.name, error = %err, "file download failed");
            events.log(&format!("ERR: {}: {err}", resolved.entry.name));
            session.failures.push(FileFailure {
                entry: resolved,
                error: err.to_string(),
            });
        }
    }

    let (completed, total) = (session.completed, session.total);
    let eta = estimate_eta(completed, total, session.started.elapsed());
    events.progress(completed as f64 / total.max(1) as f64);
    events.status(
        "Downloading",
        &format!("{completed}/{total} files, ETA {}", format_eta(eta)),
        ColorHint::Accent,
    );
}

pub fn estimate_eta(completed: usize, total: usize, elapsed: Duration) -> Duration {
    let elapsed = elapsed.as_secs_f64();
    if completed == 0 || elapsed <= 0.0 {
        return Duration::ZERO;
    }
    let throughput = completed as f64 / elapsed;
    let remaining = total.saturating_sub(completed) as f64;
    Duration::from_secs_f64(remaining / throughput)
}

pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
