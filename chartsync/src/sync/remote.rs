use std::future::Future;
use std::io;
use std::path::Path;

use chartsync_drive::DriveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("drive api error: {0}")]
    Api(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
    #[error("remote temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("remote rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Api(err) => err.is_retryable(),
            RemoteError::Unavailable(_) => true,
            RemoteError::Io(_) | RemoteError::IntegrityMismatch { .. } | RemoteError::Rejected(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub md5: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<RemoteItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub bytes: u64,
    pub md5: String,
}

/// `fetch` must either leave a complete file at `destination` or fail; a
/// failed fetch must not leave a partial file in its place.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<ListingPage, RemoteError>> + Send;

    fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<RemoteItem>, RemoteError>> + Send;

    fn fetch(
        &self,
        remote_id: &str,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> impl Future<Output = Result<FetchedFile, RemoteError>> + Send;
}
