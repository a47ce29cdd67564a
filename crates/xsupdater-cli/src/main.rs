mod config;
mod render;
mod run;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::warn;
use xsupdater_core::{CancellationToken, UpdateError, DEFAULT_CATALOG_URL};
use xsupdater_transfer::{http_client, HttpRemote};
use xsupdater_xapi::{HttpUploader, ManagementSession, XapiSession};

use crate::config::{
    resolve_cache_dir, resolve_run_mode, resolve_scratch_dir, RunConfig, CACHE_DIR_ENV,
};
use crate::render::{resolve_output_style, TerminalRenderer};
use crate::run::{run_update, RunSummary};

const EXIT_USAGE: u8 = 1;
const EXIT_FAILURE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "xs-updater")]
#[command(about = "Fetch and apply missing updates to a XenServer pool", long_about = None)]
#[command(version)]
struct Cli {
    /// Pool URL, e.g. https://xs01.example.org
    url: String,
    username: String,
    password: String,
    /// Directory holding extracted patches [default: $XS_UPDATER_CACHE_DIR or ~/Downloads]
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Directory for temporary archive downloads [default: system temp dir]
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_CATALOG_URL)]
    catalog_url: String,
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
    /// Accept self-signed pool certificates
    #[arg(long)]
    insecure: bool,
    /// List missing patches without transferring anything
    #[arg(long)]
    dry_run: bool,
    /// Fill the cache without uploading or applying
    #[arg(long, conflicts_with = "dry_run")]
    download_only: bool,
    /// Report a failed patch and continue with the next one
    #[arg(long)]
    keep_going: bool,
    #[arg(long)]
    plain: bool,
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    init_logging(cli.verbose);
    let renderer = TerminalRenderer::from_style(resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()),
        cli.plain,
    ));

    match execute(cli, renderer) {
        Ok(summary) => {
            for (status, line) in summary.lines() {
                renderer.print_status(status, &line);
            }
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                renderer.print_status(
                    "err",
                    &format!("{} patch(es) failed", summary.failed()),
                );
                ExitCode::from(EXIT_FAILURE)
            }
        }
        Err(err) => {
            renderer.print_status("err", &format!("{err:#}"));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn execute(cli: Cli, renderer: TerminalRenderer) -> Result<RunSummary> {
    let config = RunConfig {
        cache_dir: resolve_cache_dir(
            cli.cache_dir,
            std::env::var_os(CACHE_DIR_ENV),
            std::env::var_os("HOME"),
        )?,
        scratch_dir: resolve_scratch_dir(cli.scratch_dir),
        pool_url: cli.url,
        username: cli.username,
        password: cli.password,
        catalog_url: cli.catalog_url,
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        insecure: cli.insecure,
        mode: resolve_run_mode(cli.dry_run, cli.download_only),
        keep_going: cli.keep_going,
    };
    log::debug!("{config:?}");

    let pool_client =
        http_client(config.insecure).context("failed to build HTTP client for the pool")?;
    let catalog_client =
        http_client(false).context("failed to build HTTP client for the catalog")?;

    let cancel = CancellationToken::new();
    if let Err(err) = ctrlc::set_handler(interrupt_handler(cancel.clone())) {
        warn!("could not install interrupt handler: {err}");
    }

    let session = XapiSession::login(
        pool_client.clone(),
        &config.pool_url,
        &config.username,
        &config.password,
    )?;
    let remote = HttpRemote::new(catalog_client);
    let uploader = HttpUploader::new(pool_client);

    let result = run_update(&session, &remote, &uploader, &config, renderer, &cancel);
    if let Err(err) = session.logout() {
        warn!("logout failed: {err}");
    }
    Ok(result?)
}

/// First interrupt stops the run at the next patch boundary or task poll;
/// a second one exits immediately.
fn interrupt_handler(cancel: CancellationToken) -> impl FnMut() + Send + 'static {
    move || {
        if cancel.is_cancelled() {
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
        warn!("interrupted, stopping after the current step (interrupt again to exit now)");
        cancel.cancel();
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<UpdateError>() {
        Some(UpdateError::Cancelled) => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}
