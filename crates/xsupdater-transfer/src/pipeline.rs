use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use xsupdater_core::{PatchRecord, UpdateError};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::cache::{CacheEntry, PatchCache, StoredArtifact};
use crate::remote::RemoteSource;

const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Byte-level progress sink for archive downloads.
pub trait TransferProgress {
    /// `total` is `None` when the server declared no content length.
    fn start(&mut self, label: &str, total: Option<u64>);

    fn advance(&mut self, bytes: u64);

    fn finish(&mut self) {}

    fn abandon(&mut self) {}
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl TransferProgress for NoProgress {
    fn start(&mut self, _label: &str, _total: Option<u64>) {}

    fn advance(&mut self, _bytes: u64) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    CacheHit(CacheEntry),
    Downloaded {
        stored: StoredArtifact,
        archive_bytes: u64,
    },
}

impl TransferOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::CacheHit(entry) => entry,
            Self::Downloaded { stored, .. } => &stored.entry,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit(_) => "cache-hit",
            Self::Downloaded { .. } => "downloaded",
        }
    }
}

/// Brings one patch's installable artifact into the cache: download the
/// distribution zip into a private scratch directory, pull out the single
/// `<name><extension>` member, publish it into the cache.
pub struct TransferPipeline<'a, R: RemoteSource + ?Sized> {
    remote: &'a R,
    cache: &'a PatchCache,
    scratch_root: PathBuf,
}

impl<'a, R: RemoteSource + ?Sized> TransferPipeline<'a, R> {
    pub fn new(remote: &'a R, cache: &'a PatchCache, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            cache,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn fetch(
        &self,
        record: &PatchRecord,
        progress: &mut dyn TransferProgress,
    ) -> Result<TransferOutcome, UpdateError> {
        if self.cache.has(&record.name) {
            let entry = self.cache.entry(&record.name);
            info!("{} already cached at {}", record.name, entry.path.display());
            return Ok(TransferOutcome::CacheHit(entry));
        }

        fs::create_dir_all(&self.scratch_root)
            .map_err(|err| UpdateError::cache(&self.scratch_root, err))?;
        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("xs-updater-")
            .tempdir_in(&self.scratch_root)
            .map_err(|err| UpdateError::cache(&self.scratch_root, err))?;
        let archive_path = scratch.path().join(format!("{}.zip", record.name));
        debug!("scratch archive for {}: {}", record.name, archive_path.display());

        let archive_bytes = self.download(record, &archive_path, progress)?;
        let stored = self.extract(record, &archive_path)?;
        info!(
            "{} extracted into {} ({} bytes)",
            record.name,
            stored.entry.path.display(),
            stored.bytes
        );
        Ok(TransferOutcome::Downloaded {
            stored,
            archive_bytes,
        })
    }

    fn download(
        &self,
        record: &PatchRecord,
        archive_path: &Path,
        progress: &mut dyn TransferProgress,
    ) -> Result<u64, UpdateError> {
        let mut stream = self
            .remote
            .open(&record.download_url)
            .map_err(|err| transfer_error(record, err.to_string()))?;
        let mut file =
            File::create(archive_path).map_err(|err| UpdateError::cache(archive_path, err))?;

        progress.start(&record.name, stream.content_length);
        let copied = copy_body(record, &mut stream.body, &mut file, archive_path, progress);
        let written = match copied {
            Ok(written) => {
                progress.finish();
                written
            }
            Err(err) => {
                progress.abandon();
                return Err(err);
            }
        };

        if let Some(expected) = stream.content_length {
            if expected != written {
                return Err(transfer_error(
                    record,
                    format!("body ended after {written} of {expected} declared bytes"),
                ));
            }
        }
        file.sync_all()
            .map_err(|err| UpdateError::cache(archive_path, err))?;
        Ok(written)
    }

    fn extract(
        &self,
        record: &PatchRecord,
        archive_path: &Path,
    ) -> Result<StoredArtifact, UpdateError> {
        let member_name = self.cache.format().artifact_file_name(&record.name);
        let archive_error = |reason: String| UpdateError::ArchiveFormat {
            archive: record.download_url.clone(),
            reason,
        };

        let file = File::open(archive_path).map_err(|err| UpdateError::cache(archive_path, err))?;
        let mut archive = ZipArchive::new(file).map_err(|err| archive_error(err.to_string()))?;
        let mut member = match archive.by_name(&member_name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => {
                return Err(archive_error(format!("entry '{member_name}' not found")))
            }
            Err(err) => return Err(archive_error(err.to_string())),
        };

        match self.cache.store(&record.name, &mut member) {
            // Corrupt members fail while decompressing, not while writing.
            Err(UpdateError::Cache { source, .. })
                if source.kind() == io::ErrorKind::InvalidData =>
            {
                Err(archive_error(format!("entry '{member_name}': {source}")))
            }
            result => result,
        }
    }
}

fn copy_body(
    record: &PatchRecord,
    body: &mut dyn Read,
    file: &mut File,
    archive_path: &Path,
    progress: &mut dyn TransferProgress,
) -> Result<u64, UpdateError> {
    let mut buffer = vec![0_u8; DOWNLOAD_CHUNK_BYTES];
    let mut written = 0_u64;
    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => return Ok(written),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(transfer_error(record, err.to_string())),
        };
        file.write_all(&buffer[..read])
            .map_err(|err| UpdateError::cache(archive_path, err))?;
        written += read as u64;
        progress.advance(read as u64);
    }
}

fn transfer_error(record: &PatchRecord, reason: String) -> UpdateError {
    UpdateError::Transfer {
        url: record.download_url.clone(),
        reason,
    }
}
