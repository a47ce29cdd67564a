use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub(crate) const CACHE_DIR_ENV: &str = "XS_UPDATER_CACHE_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    Apply,
    DryRun,
    DownloadOnly,
}

/// Everything a run needs, resolved once up front.
#[derive(Clone)]
pub(crate) struct RunConfig {
    pub(crate) pool_url: String,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) cache_dir: PathBuf,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) catalog_url: String,
    pub(crate) poll_interval: Duration,
    pub(crate) insecure: bool,
    pub(crate) mode: RunMode,
    pub(crate) keep_going: bool,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("pool_url", &self.pool_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cache_dir", &self.cache_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("catalog_url", &self.catalog_url)
            .field("poll_interval", &self.poll_interval)
            .field("insecure", &self.insecure)
            .field("mode", &self.mode)
            .field("keep_going", &self.keep_going)
            .finish()
    }
}

pub(crate) fn resolve_run_mode(dry_run: bool, download_only: bool) -> RunMode {
    if dry_run {
        RunMode::DryRun
    } else if download_only {
        RunMode::DownloadOnly
    } else {
        RunMode::Apply
    }
}

/// Flag first, then `XS_UPDATER_CACHE_DIR`, then `$HOME/Downloads`.
pub(crate) fn resolve_cache_dir(
    flag: Option<PathBuf>,
    env_value: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = env_value.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = home
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("HOME is not set; pass --cache-dir or set {CACHE_DIR_ENV}"))?;
    Ok(PathBuf::from(home).join("Downloads"))
}

pub(crate) fn resolve_scratch_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(std::env::temp_dir)
}
