use std::path::{Path, PathBuf};

use chartsync_drive::{DriveClient, DriveFile};
use futures_util::StreamExt;
use md5::Context;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::remote::{FetchedFile, ListingPage, RemoteError, RemoteFetcher, RemoteItem};

#[derive(Clone)]
pub struct DriveFetcher {
    client: DriveClient,
}

impl DriveFetcher {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    async fn download_to_path(
        &self,
        remote_id: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<FetchedFile, RemoteError> {
        let response = self.client.download_media(remote_id).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let written = stream_into(response, &partial).await;
        let fetched = match written {
            Ok(fetched) => fetched,
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
        };

        if let Some(expected) = expected_md5
            && !expected.eq_ignore_ascii_case(&fetched.md5)
        {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(RemoteError::IntegrityMismatch {
                expected_md5: expected.to_ascii_lowercase(),
                actual_md5: fetched.md5,
            });
        }

        tokio::fs::rename(&partial, target).await?;
        debug!(remote_id, target = %target.display(), bytes = fetched.bytes, "download committed");
        Ok(fetched)
    }
}

impl RemoteFetcher for DriveFetcher {
    async fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, RemoteError> {
        let page = self.client.list_folder(folder_id, page_token).await?;
        Ok(ListingPage {
            items: page.files.into_iter().map(remote_item).collect(),
            next_page_token: page.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn find_file(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        let found = self.client.find_child_by_name(folder_id, name).await?;
        Ok(found.map(remote_item).filter(|item| !item.is_folder))
    }

    async fn fetch(
        &self,
        remote_id: &str,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> Result<FetchedFile, RemoteError> {
        self.download_to_path(remote_id, destination, expected_md5)
            .await
    }
}

fn remote_item(file: DriveFile) -> RemoteItem {
    RemoteItem {
        is_folder: file.is_folder(),
        size: file.size_bytes(),
        md5: file.md5_checksum.clone(),
        id: file.id,
        name: file.name,
    }
}

async fn stream_into(response: reqwest::Response, partial: &Path) -> Result<FetchedFile, RemoteError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    let mut md5 = Context::new();
    let mut bytes = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(chartsync_drive::DriveError::from)?;
        file.write_all(&chunk).await?;
        md5.consume(&chunk);
        bytes += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;

    Ok(FetchedFile {
        bytes,
        md5: format!("{:x}", md5.compute()),
    })
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
