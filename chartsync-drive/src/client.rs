use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, md5Checksum, size)";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(300);

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Lists one page of the non-trashed children of `folder_id`.
    pub async fn list_folder(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        self.list_with_query(&query, page_token).await
    }

    /// Looks up a direct child of `folder_id` by exact name.
    pub async fn find_child_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<DriveFile>, DriveError> {
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query(folder_id),
            escape_query(name)
        );
        let page = self.list_with_query(&query, None).await?;
        Ok(page.files.into_iter().next())
    }

    /// Starts a media download. The returned response has a success status;
    /// callers stream its body.
    pub async fn download_media(&self, file_id: &str) -> Result<reqwest::Response, DriveError> {
        let mut url = self.endpoint("/drive/v3/files/")?.join(file_id)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }

    async fn list_with_query(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("fields", LIST_FIELDS);
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, body } => Some(classify_api_status(*status, body)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Request(err) => err.is_timeout() || err.is_connect() || err.is_body(),
            DriveError::Url(_) => false,
            DriveError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    // Drive reports per-user quota exhaustion as 403 with a rate limit reason.
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && body.to_ascii_lowercase().contains("ratelimitexceeded"))
    {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    /// Drive encodes int64 values as JSON strings.
    #[serde(default)]
    pub size: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
