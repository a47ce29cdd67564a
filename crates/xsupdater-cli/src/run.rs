use log::info;
use xsupdater_core::{diff, CancellationToken, CatalogIndex, PatchRecord, Platform, UpdateError};
use xsupdater_transfer::{
    fetch_catalog, PatchCache, RemoteSource, TransferOutcome, TransferPipeline,
};
use xsupdater_xapi::{
    ApplyController, ApplyStep, ArtifactUploader, ManagementSession, PostApplyGuidance,
};

use crate::config::{RunConfig, RunMode};
use crate::render::TerminalRenderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PatchOutcome {
    Pending,
    DownloadedOnly {
        transfer: &'static str,
    },
    Applied {
        transfer: &'static str,
        guidance: PostApplyGuidance,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PatchReport {
    pub(crate) name: String,
    pub(crate) uuid: String,
    pub(crate) outcome: PatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct RunSummary {
    pub(crate) reports: Vec<PatchReport>,
}

impl RunSummary {
    pub(crate) fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, PatchOutcome::Failed { .. }))
            .count()
    }

    pub(crate) fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub(crate) fn lines(&self) -> Vec<(&'static str, String)> {
        self.reports
            .iter()
            .map(|report| match &report.outcome {
                PatchOutcome::Pending => ("step", format!("{}: pending", report.name)),
                PatchOutcome::DownloadedOnly { transfer } => {
                    ("ok", format!("{}: {transfer}, not applied", report.name))
                }
                PatchOutcome::Applied { transfer, guidance } => (
                    "ok",
                    format!("{}: {transfer}, applied (post install: {guidance})", report.name),
                ),
                PatchOutcome::Failed { reason } => {
                    ("err", format!("{}: failed ({reason})", report.name))
                }
            })
            .collect()
    }
}

/// Reconciles the pool against the catalog and drives every missing patch
/// through transfer and apply, one patch at a time in name order.
pub(crate) fn run_update<S, R, U>(
    session: &S,
    remote: &R,
    uploader: &U,
    config: &RunConfig,
    renderer: TerminalRenderer,
    cancel: &CancellationToken,
) -> Result<RunSummary, UpdateError>
where
    S: ManagementSession + ?Sized,
    R: RemoteSource + ?Sized,
    U: ArtifactUploader + ?Sized,
{
    let host = session.this_host()?;
    renderer.print_status(
        "ok",
        &format!("connected to {} running {}", host.hostname, host.software_version),
    );
    let platform = Platform::detect(&host.software_version)?;
    let applied = session.applied_patches(platform.format)?;
    info!(
        "{} {}s already applied, matching catalog on {}",
        applied.len(),
        platform.format.as_str(),
        platform.selector
    );

    renderer.print_status("step", &format!("fetching update catalog {}", config.catalog_url));
    let raw = fetch_catalog(remote, &config.catalog_url)?;
    let index = CatalogIndex::parse(&raw)?;
    let references = index.select_version(&platform.selector);
    let pending = diff(&references, &index, &applied)?;

    if pending.is_empty() {
        renderer.print_status("ok", "pool is up to date");
        return Ok(RunSummary::default());
    }
    for record in pending.values() {
        renderer.print_status(
            "warn",
            &format!("{} ({}) missing on the pool", record.name, record.description),
        );
    }

    let mut summary = RunSummary::default();
    if config.mode == RunMode::DryRun {
        summary.reports = pending
            .values()
            .map(|record| report(record, PatchOutcome::Pending))
            .collect();
        return Ok(summary);
    }

    let cache = PatchCache::new(&config.cache_dir, platform.format);
    cache.ensure_dir()?;
    let pipeline = TransferPipeline::new(remote, &cache, &config.scratch_dir);
    let controller = ApplyController::new(session, uploader)
        .with_poll_interval(config.poll_interval)
        .with_cancellation(cancel.clone());

    for record in pending.values() {
        cancel.check()?;
        renderer.print_section(&record.name);
        match process_patch(record, &pipeline, &controller, config.mode, renderer) {
            Ok(outcome) => summary.reports.push(report(record, outcome)),
            Err(err) if config.keep_going && err.is_per_patch() => {
                renderer.print_status("err", &format!("{}: {err}", record.name));
                summary.reports.push(report(
                    record,
                    PatchOutcome::Failed {
                        reason: err.to_string(),
                    },
                ));
            }
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}

fn process_patch<R, S, U>(
    record: &PatchRecord,
    pipeline: &TransferPipeline<'_, R>,
    controller: &ApplyController<'_, S, U>,
    mode: RunMode,
    renderer: TerminalRenderer,
) -> Result<PatchOutcome, UpdateError>
where
    R: RemoteSource + ?Sized,
    S: ManagementSession + ?Sized,
    U: ArtifactUploader + ?Sized,
{
    renderer.print_status(
        "step",
        &format!("patch {} ({}): {}", record.name, record.uuid, record.description),
    );

    let mut progress = renderer.start_progress();
    let transfer = pipeline.fetch(record, &mut progress)?;
    match &transfer {
        TransferOutcome::CacheHit(entry) => {
            renderer.print_status("ok", &format!("using cached {}", entry.path.display()))
        }
        TransferOutcome::Downloaded { stored, .. } => renderer.print_status(
            "ok",
            &format!(
                "saved {} (sha256 {})",
                stored.entry.path.display(),
                stored.sha256
            ),
        ),
    }

    if mode == RunMode::DownloadOnly {
        return Ok(PatchOutcome::DownloadedOnly {
            transfer: transfer.as_str(),
        });
    }

    let guidance = controller.apply_with_steps(transfer.entry(), &mut |step: ApplyStep| {
        renderer.print_apply_step(&step)
    })?;
    renderer.print_status("ok", &format!("post install: {guidance}"));
    Ok(PatchOutcome::Applied {
        transfer: transfer.as_str(),
        guidance,
    })
}

fn report(record: &PatchRecord, outcome: PatchOutcome) -> PatchReport {
    PatchReport {
        name: record.name.clone(),
        uuid: record.uuid.clone(),
        outcome,
    }
}
