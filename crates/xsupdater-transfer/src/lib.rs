mod cache;
mod pipeline;
mod remote;

pub use cache::{CacheEntry, PatchCache, StoredArtifact};
pub use pipeline::{NoProgress, TransferOutcome, TransferPipeline, TransferProgress};
pub use remote::{fetch_catalog, http_client, HttpRemote, RemoteError, RemoteSource, RemoteStream};

#[cfg(test)]
mod tests;
