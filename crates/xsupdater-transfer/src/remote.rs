use std::io::Read;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use xsupdater_core::{RawCatalog, UpdateError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

/// An open response body together with its declared length, if any.
pub struct RemoteStream {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Read-only access to unauthenticated HTTP resources: the update catalog
/// and patch archives.
pub trait RemoteSource {
    fn get_text(&self, url: &str) -> Result<String, RemoteError>;

    fn open(&self, url: &str) -> Result<RemoteStream, RemoteError>;
}

/// Builds the blocking client shared by every network step. Transfers of
/// multi-gigabyte images must not be cut by a whole-request timeout, so only
/// connection establishment is bounded.
pub fn http_client(accept_invalid_certs: bool) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("xs-updater/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
}

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl RemoteSource for HttpRemote {
    fn get_text(&self, url: &str) -> Result<String, RemoteError> {
        debug!("GET {url}");
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        Ok(response.text()?)
    }

    fn open(&self, url: &str) -> Result<RemoteStream, RemoteError> {
        debug!("GET {url} (streamed)");
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        Ok(RemoteStream {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Performs the single catalog GET.
pub fn fetch_catalog<R: RemoteSource + ?Sized>(
    remote: &R,
    url: &str,
) -> Result<RawCatalog, UpdateError> {
    let body = remote
        .get_text(url)
        .map_err(|err| UpdateError::CatalogUnavailable {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
    Ok(RawCatalog {
        url: url.to_string(),
        body,
    })
}
