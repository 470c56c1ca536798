//! Release publication through the GitHub REST API.

use crate::config::Secret;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const API_VERSION: &str = "2022-11-28";
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("GitHub token is not set")]
    MissingToken,

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GitHub API returned {status} for {url}: {message}")]
    Api {
        status: StatusCode,
        url: String,
        message: String,
    },

    #[error("failed to read asset {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("asset path {0} has no file name")]
    AssetName(PathBuf),
}

/// Everything needed to publish one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub tag: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
    pub assets: Vec<PathBuf>,
}

/// The release as it exists after publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRelease {
    pub id: u64,
    pub html_url: String,
    /// File names of the uploaded assets.
    pub assets: Vec<String>,
}

/// Publishes releases on a source-hosting platform. Faked in tests.
#[async_trait]
pub trait ReleasePublisher: Send + Sync + std::fmt::Debug {
    async fn publish(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ReleaseError>;
}

#[derive(Debug, Serialize)]
struct ReleasePayload<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    html_url: String,
    upload_url: String,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client for `https://api.github.com` (or a GitHub Enterprise API URL).
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    repository: String,
    token: Secret,
}

impl GithubClient {
    /// Creates a client for `repository` (`owner/name`). Fails if the token is
    /// empty.
    pub fn new(
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: Secret,
    ) -> Result<Self, ReleaseError> {
        if token.is_empty() {
            return Err(ReleaseError::MissingToken);
        }
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ReleaseError::Client)?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            token,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repository, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.token.expose())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(USER_AGENT, concat!("tagflow/", env!("CARGO_PKG_VERSION")))
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, ReleaseError> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|source| ReleaseError::Http {
                url: url.to_string(),
                source,
            })
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        url: &str,
        response: Response,
    ) -> Result<T, ReleaseError> {
        let response = check(url, response).await?;
        response.json().await.map_err(|source| ReleaseError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Option<ReleaseResponse>, ReleaseError> {
        let url = self.repo_url(&format!("releases/tags/{tag}"));
        let response = self.send(&url, self.http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json(&url, response).await.map(Some)
    }

    async fn create(&self, payload: &ReleasePayload<'_>) -> Result<ReleaseResponse, ReleaseError> {
        let url = self.repo_url("releases");
        let response = self.send(&url, self.http.post(&url).json(payload)).await?;
        Self::json(&url, response).await
    }

    async fn update(
        &self,
        id: u64,
        payload: &ReleasePayload<'_>,
    ) -> Result<ReleaseResponse, ReleaseError> {
        let url = self.repo_url(&format!("releases/{id}"));
        let response = self.send(&url, self.http.patch(&url).json(payload)).await?;
        Self::json(&url, response).await
    }

    async fn delete_asset(&self, id: u64) -> Result<(), ReleaseError> {
        let url = self.repo_url(&format!("releases/assets/{id}"));
        let response = self.send(&url, self.http.delete(&url)).await?;
        check(&url, response).await.map(|_| ())
    }

    async fn upload_asset(
        &self,
        release: &ReleaseResponse,
        path: &Path,
        name: &str,
    ) -> Result<(), ReleaseError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ReleaseError::Asset {
                path: path.to_path_buf(),
                source,
            })?;
        let url = upload_endpoint(&release.upload_url);
        debug!("uploading {} ({} bytes) to {}", name, bytes.len(), url);

        let builder = self
            .http
            .post(&url)
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        let response = self.send(&url, builder).await?;
        check(&url, response).await.map(|_| ())
    }
}

#[async_trait]
impl ReleasePublisher for GithubClient {
    async fn publish(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ReleaseError> {
        let payload = ReleasePayload {
            tag_name: &request.tag,
            name: &request.name,
            body: &request.body,
            draft: request.draft,
            prerelease: request.prerelease,
        };

        let release = match self.find_by_tag(&request.tag).await? {
            Some(existing) => {
                info!("updating existing release {} for {}", existing.id, request.tag);
                self.update(existing.id, &payload).await?
            }
            None => {
                info!("creating release {} for {}", request.name, request.tag);
                self.create(&payload).await?
            }
        };

        let names = request
            .assets
            .iter()
            .map(|path| asset_name(path))
            .collect::<Result<Vec<_>, _>>()?;

        // The release ends up carrying exactly the requested assets.
        for stale in &release.assets {
            if names.contains(&stale.name) {
                info!("replacing existing asset {}", stale.name);
            } else {
                info!("removing asset {} not part of this release", stale.name);
            }
            self.delete_asset(stale.id).await?;
        }

        let mut uploaded = Vec::with_capacity(names.len());
        for (path, name) in request.assets.iter().zip(names) {
            self.upload_asset(&release, path, &name).await?;
            uploaded.push(name);
        }

        Ok(PublishedRelease {
            id: release.id,
            html_url: release.html_url,
            assets: uploaded,
        })
    }
}

async fn check(url: &str, response: Response) -> Result<Response, ReleaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ReleaseError::Api {
        status,
        url: url.to_string(),
        message: api_error_message(&text),
    })
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Strips the RFC 6570 suffix from `upload_url`
/// (`.../assets{?name,label}` becomes `.../assets`).
fn upload_endpoint(upload_url: &str) -> String {
    match upload_url.find('{') {
        Some(index) => upload_url[..index].to_string(),
        None => upload_url.to_string(),
    }
}

pub(crate) fn asset_name(path: &Path) -> Result<String, ReleaseError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ReleaseError::AssetName(path.to_path_buf()))
}
