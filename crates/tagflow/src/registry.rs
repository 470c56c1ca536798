//! Package registry publication via the legacy upload API used by PyPI.

use crate::config::Secret;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const METADATA_VERSION: &str = "2.1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry password is empty")]
    MissingPassword,

    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{0} is not a recognized distribution file")]
    UnknownDistribution(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {file} failed: {source}")]
    Http {
        file: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry rejected {file} with {status}: {message}")]
    Rejected {
        file: String,
        status: StatusCode,
        message: String,
    },
}

/// Kind of distribution, as named by the upload API's `filetype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Wheel,
    Sdist,
}

impl FileType {
    /// Returns the `filetype` form value.
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Wheel => "bdist_wheel",
            FileType::Sdist => "sdist",
        }
    }
}

/// A built distribution file and the metadata derived from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub path: PathBuf,
    pub file_name: String,
    pub name: String,
    pub version: String,
    pub filetype: FileType,
    pub pyversion: String,
}

impl Distribution {
    /// Parses wheel (`name-ver[-build]-py-abi-plat.whl`) and sdist
    /// (`name-ver.tar.gz`, `name-ver.zip`) file names.
    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let unknown = || RegistryError::UnknownDistribution(path.to_path_buf());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(unknown)?;

        if let Some(stem) = file_name.strip_suffix(".whl") {
            let parts: Vec<&str> = stem.split('-').collect();
            if !(5..=6).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
                return Err(unknown());
            }
            return Ok(Self {
                path: path.to_path_buf(),
                name: parts[0].to_string(),
                version: parts[1].to_string(),
                filetype: FileType::Wheel,
                pyversion: parts[parts.len() - 3].to_string(),
                file_name,
            });
        }

        let stem = file_name
            .strip_suffix(".tar.gz")
            .or_else(|| file_name.strip_suffix(".zip"))
            .ok_or_else(unknown)?;
        let (name, version) = stem.rsplit_once('-').ok_or_else(unknown)?;
        if name.is_empty() || version.is_empty() {
            return Err(unknown());
        }
        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            version: version.to_string(),
            filetype: FileType::Sdist,
            pyversion: "source".to_string(),
            file_name: file_name.clone(),
        })
    }
}

/// Lists the distributions in `dir`, sorted by file name. Files that are not
/// distributions are ignored.
pub fn discover(dir: &Path) -> Result<Vec<Distribution>, RegistryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| RegistryError::Read {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if !path.is_file() {
            continue;
        }
        match Distribution::from_path(&path) {
            Ok(dist) => found.push(dist),
            Err(_) => debug!("ignoring {}", path.display()),
        }
    }
    found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(found)
}

/// Uploads distributions to a package registry. Faked in tests.
#[async_trait]
pub trait PackageUploader: Send + Sync + std::fmt::Debug {
    /// Uploads `dist`, authenticating with `password`.
    async fn upload(&self, dist: &Distribution, password: &Secret) -> Result<(), RegistryError>;
}

/// Client for a legacy-upload endpoint such as
/// `https://upload.pypi.org/legacy/`.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    url: String,
    username: String,
}

impl RegistryClient {
    /// Creates a client for the upload endpoint at `url`.
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("tagflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RegistryError::Client)?;
        Ok(Self {
            http,
            url: url.into(),
            username: username.into(),
        })
    }
}

#[async_trait]
impl PackageUploader for RegistryClient {
    async fn upload(&self, dist: &Distribution, password: &Secret) -> Result<(), RegistryError> {
        if password.is_empty() {
            return Err(RegistryError::MissingPassword);
        }
        let bytes = tokio::fs::read(&dist.path)
            .await
            .map_err(|source| RegistryError::Read {
                path: dist.path.clone(),
                source,
            })?;
        let digest = sha256_hex(&bytes);
        let http_error = |source| RegistryError::Http {
            file: dist.file_name.clone(),
            source,
        };

        let content = Part::bytes(bytes)
            .file_name(dist.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(http_error)?;
        let form = Form::new()
            .text(":action", "file_upload")
            .text("protocol_version", "1")
            .text("metadata_version", METADATA_VERSION)
            .text("name", dist.name.clone())
            .text("version", dist.version.clone())
            .text("filetype", dist.filetype.as_str())
            .text("pyversion", dist.pyversion.clone())
            .text("sha256_digest", digest)
            .part("content", content);

        info!("uploading {} to {}", dist.file_name, self.url);
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.username, Some(password.expose()))
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(RegistryError::Rejected {
            file: dist.file_name.clone(),
            status,
            message: message.trim().to_string(),
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
