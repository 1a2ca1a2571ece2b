use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::document::ManifestDocument;
use super::paths::normalize_relative_path;
use super::remote::{ListingPage, RemoteError, RemoteFetcher, RemoteItem};
use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("remote still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RemoteError,
    },
    #[error("manifest document {name:?} not found in folder {folder_id}")]
    NotFound { name: String, folder_id: String },
    #[error("manifest document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub relative_path: String,
    pub remote_id: String,
    pub content_hash: Option<String>,
    pub size: u64,
}

impl ManifestEntry {
    pub fn new(
        name: String,
        relative_path: &str,
        remote_id: String,
        content_hash: Option<String>,
        size: u64,
    ) -> Self {
        Self {
            name,
            relative_path: normalize_relative_path(relative_path),
            remote_id,
            content_hash: content_hash.filter(|hash| !hash.trim().is_empty()),
            size,
        }
    }
}

pub struct ManifestSource<F> {
    remote: Arc<F>,
    root_folder_id: String,
    retry: RetryPolicy,
}

impl<F: RemoteFetcher> ManifestSource<F> {
    pub fn new(remote: Arc<F>, root_folder_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            root_folder_id: root_folder_id.into(),
            retry,
        }
    }

    pub async fn walk(&self) -> Result<Vec<ManifestEntry>, ManifestError> {
        let mut queue = VecDeque::from([(self.root_folder_id.clone(), String::new())]);
        let mut entries = Vec::new();
        let mut folders = 0usize;

        while let Some((folder_id, prefix)) = queue.pop_front() {
            folders += 1;
            debug!(folder_id = %folder_id, path = %prefix, "listing remote folder");
            let mut page_token: Option<String> = None;
            loop {
                let page = self
                    .list_page_with_retry(&folder_id, page_token.as_deref())
                    .await?;
                for item in page.items {
                    if item.is_folder {
                        let child = join_prefix(&prefix, &item.name);
                        queue.push_back((item.id, child));
                    } else {
                        entries.push(entry_from_item(item, &prefix));
                    }
                }
                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }

        info!(folders, files = entries.len(), "remote tree walked");
        Ok(entries)
    }

    pub async fn fetch_published(
        &self,
        name: &str,
        local_copy: &Path,
    ) -> Result<Vec<ManifestEntry>, ManifestError> {
        let refresh_err = match self.refresh_published(name, local_copy).await {
            Ok(entries) => return Ok(entries),
            Err(err) => err,
        };
        warn!(error = %refresh_err, copy = %local_copy.display(), "manifest refresh failed, trying local copy");

        match read_local_copy(local_copy).await {
            Some(document) => Ok(document.into_entries()),
            None => Err(refresh_err),
        }
    }

    async fn refresh_published(
        &self,
        name: &str,
        local_copy: &Path,
    ) -> Result<Vec<ManifestEntry>, ManifestError> {
        let item = self
            .find_in_root(name)
            .await?
            .ok_or_else(|| ManifestError::NotFound {
                name: name.to_string(),
                folder_id: self.root_folder_id.clone(),
            })?;

        let staging = local_copy.with_extension("download");
        self.remote
            .fetch(&item.id, &staging, item.md5.as_deref())
            .await?;
        let bytes = tokio::fs::read(&staging).await?;
        let document = match ManifestDocument::parse(&bytes) {
            Ok(document) => document,
            Err(err) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(err.into());
            }
        };
        tokio::fs::rename(&staging, local_copy).await?;
        info!(name, files = document.files.len(), "manifest document refreshed");
        Ok(document.into_entries())
    }

    async fn find_in_root(&self, name: &str) -> Result<Option<RemoteItem>, ManifestError> {
        let root = self.root_folder_id.as_str();
        self.with_retry(root, || self.remote.find_file(root, name))
            .await
    }

    async fn list_page_with_retry(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, ManifestError> {
        self.with_retry(folder_id, || self.remote.list(folder_id, page_token))
            .await
    }

    async fn with_retry<T, Fut>(
        &self,
        folder_id: &str,
        mut call: impl FnMut() -> Fut,
    ) -> Result<T, ManifestError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut failures = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    let Some(delay) = self.retry.delay_after(failures) else {
                        return Err(ManifestError::RetriesExhausted {
                            attempts: failures,
                            source: err,
                        });
                    };
                    warn!(
                        folder_id,
                        attempt = failures,
                        error = %err,
                        "remote call failed, retrying in {}s",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

async fn read_local_copy(path: &Path) -> Option<ManifestDocument> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no local manifest copy");
            return None;
        }
    };
    match ManifestDocument::parse(&bytes) {
        Ok(document) => Some(document),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "local manifest copy is corrupt, ignoring it");
            None
        }
    }
}

fn entry_from_item(item: RemoteItem, prefix: &str) -> ManifestEntry {
    ManifestEntry::new(
        item.name,
        prefix,
        item.id,
        item.md5,
        item.size.unwrap_or(0),
    )
}

fn join_prefix(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
