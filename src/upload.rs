use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported destination '{0}': must start with /, file://, http:// or https://")]
    UnsupportedDestination(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("upload to '{uri}' failed: {reason}")]
    Transfer { uri: String, reason: String },
}

/// Collaborator that moves a file to a destination URI. Steps depend on the
/// trait so tests can substitute a fake without network or filesystem side
/// effects.
pub trait Uploader {
    fn upload(
        &self,
        file_path: &Path,
        destination_uri: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, UploadError>;
}

#[derive(Debug, Default)]
pub struct DefaultUploader;

impl Uploader for DefaultUploader {
    fn upload(
        &self,
        file_path: &Path,
        destination_uri: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, UploadError> {
        upload_file(file_path, destination_uri, username, password)
    }
}

/// Transfer `file_path` to `destination_uri`.
///
/// `/`-prefixed and `file://` destinations are local copies; `http(s)://`
/// destinations receive a PUT with the file bytes and optional basic auth.
/// Failures surface immediately, no retry.
pub fn upload_file(
    file_path: &Path,
    destination_uri: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<String, UploadError> {
    debug!(file = %file_path.display(), destination = destination_uri, "Uploading file");

    if let Some(local) = destination_uri.strip_prefix("file://") {
        return copy_local(file_path, Path::new(local));
    }
    if destination_uri.starts_with('/') {
        return copy_local(file_path, Path::new(destination_uri));
    }
    if destination_uri.starts_with("http://") || destination_uri.starts_with("https://") {
        return put_remote(file_path, destination_uri, username, password);
    }

    Err(UploadError::UnsupportedDestination(
        destination_uri.to_string(),
    ))
}

fn copy_local(file_path: &Path, destination: &Path) -> Result<String, UploadError> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(file_path, destination)?;
    Ok(format!(
        "copied {} to {}",
        file_path.display(),
        destination.display()
    ))
}

fn put_remote(
    file_path: &Path,
    destination_uri: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<String, UploadError> {
    let data = std::fs::read(file_path)?;
    let mut request = ureq::put(destination_uri);
    if let Some(user) = username {
        let credentials = STANDARD.encode(format!("{user}:{}", password.unwrap_or_default()));
        request = request.set("Authorization", &format!("Basic {credentials}"));
    }
    match request.send_bytes(&data) {
        Ok(response) => Ok(format!(
            "status {}: {}",
            response.status(),
            response.into_string().unwrap_or_default()
        )),
        Err(err) => Err(UploadError::Transfer {
            uri: destination_uri.to_string(),
            reason: err.to_string(),
        }),
    }
}
