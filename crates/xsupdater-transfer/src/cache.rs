use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};
use xsupdater_core::{PatchFormat, UpdateError};

const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// A cached, installable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub format: PatchFormat,
    pub path: PathBuf,
}

impl CacheEntry {
    pub fn file_name(&self) -> String {
        self.format.artifact_file_name(&self.name)
    }
}

/// Result of publishing fresh bytes into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub entry: CacheEntry,
    pub sha256: String,
    pub bytes: u64,
}

/// Flat directory holding one `<name><extension>` file per patch.
///
/// The extension is fixed for the cache's lifetime by the platform's patch
/// format. Entries are never overwritten and never re-validated. Two
/// processes sharing one cache directory are not coordinated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCache {
    root: PathBuf,
    format: PatchFormat,
}

impl PatchCache {
    pub fn new(root: impl Into<PathBuf>, format: PatchFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> PatchFormat {
        self.format
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(self.format.artifact_file_name(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    pub fn entry(&self, name: &str) -> CacheEntry {
        CacheEntry {
            name: name.to_string(),
            format: self.format,
            path: self.path(name),
        }
    }

    pub fn ensure_dir(&self) -> Result<(), UpdateError> {
        fs::create_dir_all(&self.root).map_err(|err| UpdateError::cache(&self.root, err))
    }

    /// Streams `reader` into a hidden temp file next to the final path and
    /// renames it into place, so readers never observe a partial artifact.
    /// Read faults surface as `Cache` errors carrying the reader's
    /// `io::Error`.
    pub fn store(&self, name: &str, reader: &mut dyn Read) -> Result<StoredArtifact, UpdateError> {
        self.ensure_dir()?;
        let path = self.path(name);

        let mut staged = tempfile::Builder::new()
            .prefix(".xs-updater-")
            .suffix(".part")
            .tempfile_in(&self.root)
            .map_err(|err| UpdateError::cache(&self.root, err))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; COPY_BUFFER_BYTES];
        let mut bytes = 0_u64;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(UpdateError::cache(&path, err)),
            };
            hasher.update(&buffer[..read]);
            staged
                .write_all(&buffer[..read])
                .map_err(|err| UpdateError::cache(staged.path(), err))?;
            bytes += read as u64;
        }
        staged
            .as_file()
            .sync_all()
            .map_err(|err| UpdateError::cache(staged.path(), err))?;

        staged
            .persist_noclobber(&path)
            .map_err(|err| UpdateError::cache(&path, err.error))?;

        let sha256 = hex::encode(hasher.finalize());
        debug!("cached {} ({bytes} bytes, sha256={sha256})", path.display());
        Ok(StoredArtifact {
            entry: self.entry(name),
            sha256,
            bytes,
        })
    }
}
