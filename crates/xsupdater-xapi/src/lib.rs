mod client;
mod controller;
mod session;
mod upload;
pub mod xmlrpc;

pub use client::XapiSession;
pub use controller::{ApplyController, ApplyStep, DEFAULT_POLL_INTERVAL};
pub use session::{HostRecord, ManagementSession, PostApplyGuidance, TaskRef};
pub use upload::{redacted, upload_url, ArtifactUploader, HttpUploader, UPLOAD_PATH};
pub use reqwest::Url;
