use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use super::events::ProgressSink;
use super::events::{ColorHint, SyncEvent};
use super::group::DownloadGroup;
use super::orchestrator::StopHandle;
use super::remote::{FetchedFile, ListingPage, RemoteError, RemoteFetcher, RemoteItem};

/// In-memory blob store with scripted failures.
#[derive(Default)]
pub struct FakeRemote {
    folders: HashMap<String, Vec<Vec<RemoteItem>>>,
    files: HashMap<String, Vec<u8>>,
    failing_fetches: HashSet<String>,
    list_failures: Mutex<VecDeque<RemoteError>>,
    fetched: Mutex<Vec<String>>,
    stop_trigger: OnceLock<(usize, StopHandle)>,
    finished: AtomicUsize,
    list_calls: AtomicUsize,
    find_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a folder listing split into pages.
    pub fn with_folder(mut self, id: &str, pages: Vec<Vec<RemoteItem>>) -> Self {
        self.folders.insert(id.to_string(), pages);
        self
    }

    pub fn with_blob(mut self, id: &str, content: &[u8]) -> Self {
        self.files.insert(id.to_string(), content.to_vec());
        self
    }

    pub fn failing_fetch(mut self, id: &str) -> Self {
        self.failing_fetches.insert(id.to_string());
        self
    }

    /// Scripts a failure for the next listing or name lookup.
    pub fn fail_next_list(self, err: RemoteError) -> Self {
        self.list_failures.lock().unwrap().push_back(err);
        self
    }

    /// Requests a stop from inside the fetch that finishes `finished`-th.
    pub fn stop_after(&self, finished: usize, handle: StopHandle) {
        let _ = self.stop_trigger.set((finished, handle));
    }

    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn find_count(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

pub fn folder(id: &str, name: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        name: name.to_string(),
        is_folder: true,
        md5: None,
        size: None,
    }
}

pub fn file(id: &str, name: &str, content: &[u8]) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        name: name.to_string(),
        is_folder: false,
        md5: Some(md5_hex(content)),
        size: Some(content.len() as u64),
    }
}

pub fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

impl RemoteFetcher for FakeRemote {
    async fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.list_failures.lock().unwrap().pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        let Some(pages) = self.folders.get(folder_id) else {
            return Ok(ListingPage::default());
        };
        let index = page_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        Ok(ListingPage {
            items: pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (index + 1 < pages.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.list_failures.lock().unwrap().pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        Ok(self
            .folders
            .get(folder_id)
            .into_iter()
            .flatten()
            .flatten()
            .find(|item| !item.is_folder && item.name == name)
            .cloned())
    }

    async fn fetch(
        &self,
        remote_id: &str,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> Result<FetchedFile, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(remote_id.to_string());
        tokio::task::yield_now().await;

        let outcome = self.write_blob(remote_id, destination, expected_md5);

        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, handle)) = self.stop_trigger.get()
            && finished == *after
        {
            handle.request_stop();
        }
        outcome
    }
}

impl FakeRemote {
    fn write_blob(
        &self,
        remote_id: &str,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> Result<FetchedFile, RemoteError> {
        if self.failing_fetches.contains(remote_id) {
            return Err(RemoteError::Rejected(format!("{remote_id} is unavailable")));
        }
        let content = self
            .files
            .get(remote_id)
            .ok_or_else(|| RemoteError::Rejected(format!("unknown id {remote_id}")))?;
        let actual = md5_hex(content);
        if let Some(expected) = expected_md5
            && !expected.eq_ignore_ascii_case(&actual)
        {
            return Err(RemoteError::IntegrityMismatch {
                expected_md5: expected.to_string(),
                actual_md5: actual,
            });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, content)?;
        Ok(FetchedFile {
            bytes: content.len() as u64,
            md5: actual,
        })
    }
}

/// Sink that records every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::Progress(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressSink for RecordingSink {
    fn status(&self, title: &str, subtitle: &str, color: ColorHint) {
        self.push(SyncEvent::Status {
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            color,
        });
    }

    fn progress(&self, fraction: f64) {
        self.push(SyncEvent::Progress(fraction));
    }

    fn log(&self, line: &str) {
        self.push(SyncEvent::Log(line.to_string()));
    }

    fn enable_control(&self, enabled: bool) {
        self.push(SyncEvent::EnableControl(enabled));
    }

    fn show_selection(&self, groups: &[DownloadGroup]) {
        self.push(SyncEvent::ShowSelection(groups.to_vec()));
    }
}
