use std::fs::File;
use std::path::Path;

use log::debug;
use reqwest::blocking::{Body, Client};
use reqwest::header::CONNECTION;
use reqwest::{Url, Version};
use xsupdater_core::UpdateError;

use crate::session::TaskRef;

/// Control-plane handler receiving legacy patch and update uploads.
pub const UPLOAD_PATH: &str = "pool_patch_upload";

/// Pushes a local artifact to a prepared upload URL.
pub trait ArtifactUploader {
    fn upload(&self, url: &Url, artifact: &Path) -> Result<(), UpdateError>;
}

pub fn upload_url(base_url: &str, session_id: &str, task: &TaskRef) -> Result<Url, UpdateError> {
    let endpoint = format!("{}/{UPLOAD_PATH}", base_url.trim_end_matches('/'));
    Url::parse_with_params(
        &endpoint,
        &[("session_id", session_id), ("task_id", task.as_str())],
    )
    .map_err(|err| UpdateError::Upload {
        artifact: endpoint.clone(),
        reason: format!("invalid upload URL: {err}"),
    })
}

/// Copy of `url` safe to log: the session id is masked.
pub fn redacted(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "session_id" {
                "<redacted>".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked
}

/// HTTP PUT uploader.
///
/// The upload handler never answers a PUT offered with keep-alive: the
/// artifact is stored but the response never comes and the import task is
/// never completed. This request alone is therefore sent as HTTP/1.0 with
/// `Connection: close` and a fixed `Content-Length`; the shared client keeps
/// its normal behaviour for every other call.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
}

impl HttpUploader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ArtifactUploader for HttpUploader {
    fn upload(&self, url: &Url, artifact: &Path) -> Result<(), UpdateError> {
        let upload_error = |reason: String| UpdateError::Upload {
            artifact: artifact.display().to_string(),
            reason,
        };

        let file = File::open(artifact).map_err(|err| UpdateError::cache(artifact, err))?;
        let length = file
            .metadata()
            .map_err(|err| UpdateError::cache(artifact, err))?
            .len();
        debug!("PUT {} ({length} bytes)", redacted(url));

        let response = self
            .client
            .put(url.clone())
            .version(Version::HTTP_10)
            .header(CONNECTION, "close")
            .body(Body::sized(file, length))
            .send()
            .map_err(|err| upload_error(err.to_string()))?;
        if !response.status().is_success() {
            return Err(upload_error(format!(
                "unexpected HTTP status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
