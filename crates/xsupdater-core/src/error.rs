use std::io;
use std::path::PathBuf;

use crate::task::TaskStatus;

/// Every way a reconciliation run can fail.
///
/// Run-wide variants (authentication, catalog, platform detection and
/// cancellation) always abort the run. The remaining variants describe a
/// fault while processing a single patch; see [`UpdateError::is_per_patch`].
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("update catalog unavailable at {url}: {reason}")]
    CatalogUnavailable { url: String, reason: String },

    #[error("update catalog is malformed: {0}")]
    CatalogMalformed(String),

    #[error("update catalog is inconsistent: {0}")]
    CatalogConsistency(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("download of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("archive {archive} is unusable: {reason}")]
    ArchiveFormat { archive: String, reason: String },

    #[error("cache failure at {}: {source}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("upload of {artifact} failed: {reason}")]
    Upload { artifact: String, reason: String },

    #[error("import task {task} ended with status {status}{}", render_detail(.detail))]
    ImportTaskFailed {
        task: String,
        status: TaskStatus,
        detail: Vec<String>,
    },

    #[error("management call {call} failed{}", render_detail(.description))]
    Session {
        call: String,
        description: Vec<String>,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl UpdateError {
    pub fn cache(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Cache {
            path: path.into(),
            source,
        }
    }

    pub fn session(call: &str, description: Vec<String>) -> Self {
        Self::Session {
            call: call.to_string(),
            description,
        }
    }

    /// True when the failure is confined to the patch being processed and a
    /// caller may move on to the next one.
    pub fn is_per_patch(&self) -> bool {
        matches!(
            self,
            Self::Transfer { .. }
                | Self::ArchiveFormat { .. }
                | Self::Cache { .. }
                | Self::Upload { .. }
                | Self::ImportTaskFailed { .. }
                | Self::Session { .. }
        )
    }
}

fn render_detail(detail: &[String]) -> String {
    if detail.is_empty() {
        return String::new();
    }
    format!(" ({})", detail.join(", "))
}
