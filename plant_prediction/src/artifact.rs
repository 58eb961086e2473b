//! Makes sure the model weights are on disk before the classifier loads them.
//!
//! Fetching goes through [`ArtifactSource`] so tests can hand in bytes from memory
//! instead of talking to the network.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GOOGLE_DRIVE_DOWNLOAD_URL: &str = "https://drive.usercontent.google.com/download";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no artifact source configured and {0:?} does not exist")]
    NoSource(PathBuf),
    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} served {content_type} instead of the model artifact")]
    UnexpectedContent { url: String, content_type: String },
    #[error("hash mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("fetched artifact is not an ONNX model: {0}")]
    NotOnnx(&'static str),
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Downloaded { bytes: usize },
}

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self) -> Result<Bytes, ProvisionError>;
}

/// Plain GET of a fixed URL.
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<Bytes, ProvisionError> {
        tracing::info!("Downloading model artifact from {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Status {
                url: self.url.clone(),
                status,
            });
        }

        // An HTML page here is a login wall or an interstitial, never weights.
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("text/html") {
            return Err(ProvisionError::UnexpectedContent {
                url: self.url.clone(),
                content_type,
            });
        }

        let bytes = response.bytes().await?;
        tracing::info!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }
}

/// A file shared from Google Drive, fetched through the direct download endpoint.
pub struct GoogleDriveSource {
    file_id: String,
    http: HttpSource,
}

impl GoogleDriveSource {
    pub fn new(file_id: impl Into<String>) -> Self {
        let file_id = file_id.into();
        let url = format!(
            "{}?id={}&export=download&confirm=t",
            GOOGLE_DRIVE_DOWNLOAD_URL, file_id
        );
        Self {
            file_id,
            http: HttpSource::new(url),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

#[async_trait]
impl ArtifactSource for GoogleDriveSource {
    fn describe(&self) -> String {
        self.http.describe()
    }

    async fn fetch(&self) -> Result<Bytes, ProvisionError> {
        self.http.fetch().await
    }
}

/// Stand-in used when nothing is configured: fine as long as the file is already there.
pub struct MissingSource {
    path: PathBuf,
}

impl MissingSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ArtifactSource for MissingSource {
    fn describe(&self) -> String {
        "no source".to_string()
    }

    async fn fetch(&self) -> Result<Bytes, ProvisionError> {
        Err(ProvisionError::NoSource(self.path.clone()))
    }
}

/// Checks downloaded bytes against a SHA-256 digest before they reach the disk.
pub struct Sha256Verified {
    inner: Box<dyn ArtifactSource>,
    expected: String,
}

impl Sha256Verified {
    pub fn new(inner: Box<dyn ArtifactSource>, expected: impl Into<String>) -> Self {
        Self {
            inner,
            expected: expected.into().to_lowercase(),
        }
    }
}

#[async_trait]
impl ArtifactSource for Sha256Verified {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn fetch(&self) -> Result<Bytes, ProvisionError> {
        let bytes = self.inner.fetch().await?;
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if actual != self.expected {
            tracing::error!("hash mismatch: expected {}, got {}", self.expected, actual);
            return Err(ProvisionError::ChecksumMismatch {
                expected: self.expected.clone(),
                actual,
            });
        }
        Ok(bytes)
    }
}

/// Fetches the artifact into `path` unless a file is already there.
///
/// An existing file is trusted as-is. Fetched bytes must pass [`check_onnx_header`], then go
/// to `<path>.part` and are renamed into place, so a failed download never leaves a
/// truncated or foreign file at `path`.
pub async fn ensure_model_present(
    path: &Path,
    source: &dyn ArtifactSource,
) -> Result<Provisioned, ProvisionError> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|source| io_error(path, source))?
    {
        tracing::info!("Model artifact present at {:?}", path);
        return Ok(Provisioned::AlreadyPresent);
    }

    tracing::info!(
        "Model artifact missing at {:?}, fetching from {}",
        path,
        source.describe()
    );
    let bytes = source.fetch().await?;
    check_onnx_header(&bytes)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| io_error(parent, source))?;
    }

    let partial = partial_path(path);
    if let Err(source) = tokio::fs::write(&partial, &bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(io_error(&partial, source));
    }
    if let Err(source) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(io_error(path, source));
    }

    tracing::info!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(Provisioned::Downloaded { bytes: bytes.len() })
}

/// Rejects payloads that cannot be a serialized ONNX `ModelProto`.
///
/// A protobuf `ModelProto` starts with field 1 (`ir_version`, varint), so the first byte
/// is `0x08`. PyTorch checkpoints start with a zip header or a pickle opcode instead.
pub fn check_onnx_header(bytes: &[u8]) -> Result<(), ProvisionError> {
    match bytes {
        [] => Err(ProvisionError::NotOnnx("empty payload")),
        [b'P', b'K', 0x03, 0x04, ..] => Err(ProvisionError::NotOnnx(
            "zip archive, likely a PyTorch checkpoint",
        )),
        [0x80, ..] => Err(ProvisionError::NotOnnx("pickle stream")),
        [b'<', ..] => Err(ProvisionError::NotOnnx("markup document")),
        [0x08, ..] => Ok(()),
        _ => Err(ProvisionError::NotOnnx("missing ir_version header")),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> ProvisionError {
    ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    }
}
