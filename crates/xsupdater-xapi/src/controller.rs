use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use xsupdater_core::{CancellationToken, TaskStatus, UpdateError};
use xsupdater_transfer::CacheEntry;

use crate::session::{ManagementSession, PostApplyGuidance, TaskRef};
use crate::upload::{redacted, upload_url, ArtifactUploader};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Milestones of one apply, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStep {
    TaskCreated(TaskRef),
    Uploading(String),
    /// Reported once per observed status change.
    Processing(TaskStatus),
    Applying(String),
}

/// Pushes a cached artifact into the pool and applies it.
pub struct ApplyController<'a, S: ManagementSession + ?Sized, U: ArtifactUploader + ?Sized> {
    session: &'a S,
    uploader: &'a U,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<'a, S: ManagementSession + ?Sized, U: ArtifactUploader + ?Sized> ApplyController<'a, S, U> {
    pub fn new(session: &'a S, uploader: &'a U) -> Self {
        Self {
            session,
            uploader,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn apply(&self, entry: &CacheEntry) -> Result<PostApplyGuidance, UpdateError> {
        self.apply_with_steps(entry, &mut |_: ApplyStep| {})
    }

    /// Creates the import task, uploads, waits for the task to reach a
    /// terminal status, then applies pool-wide. The pool-wide apply is only
    /// ever issued after the task reports `success`.
    pub fn apply_with_steps(
        &self,
        entry: &CacheEntry,
        on_step: &mut dyn FnMut(ApplyStep),
    ) -> Result<PostApplyGuidance, UpdateError> {
        self.cancel.check()?;
        let file_name = entry.file_name();
        let task = self.session.create_task(&format!("import {file_name}"))?;
        debug!("created import task {task} for {file_name}");
        on_step(ApplyStep::TaskCreated(task.clone()));

        if let Err(err) = self.import(entry, &task, on_step) {
            // Anything short of a terminal status leaves the task pending.
            if matches!(err, UpdateError::ImportTaskFailed { .. }) {
                self.release(&task);
            } else {
                self.abandon(&task);
            }
            return Err(err);
        }
        let artifact = self.session.task_result(&task);
        self.release(&task);
        let artifact = artifact?;

        info!("applying {file_name} ({artifact}) to the pool");
        on_step(ApplyStep::Applying(artifact.clone()));
        self.session.apply_patch(entry.format, &artifact)?;
        self.session.apply_guidance(entry.format, &artifact)
    }

    fn import(
        &self,
        entry: &CacheEntry,
        task: &TaskRef,
        on_step: &mut dyn FnMut(ApplyStep),
    ) -> Result<(), UpdateError> {
        let url = upload_url(self.session.base_url(), self.session.session_id(), task)?;
        let shown = redacted(&url).to_string();
        info!("uploading {} to {shown}", entry.path.display());
        on_step(ApplyStep::Uploading(shown));
        self.uploader.upload(&url, &entry.path)?;

        self.wait_for_task(task, on_step)
    }

    fn wait_for_task(
        &self,
        task: &TaskRef,
        on_step: &mut dyn FnMut(ApplyStep),
    ) -> Result<(), UpdateError> {
        let mut last_seen = None;
        loop {
            self.cancel.check()?;
            let status = self.session.task_status(task)?;
            if last_seen != Some(status) {
                debug!("task {task} is {status}");
                on_step(ApplyStep::Processing(status));
                last_seen = Some(status);
            }

            match status {
                TaskStatus::Success => return Ok(()),
                TaskStatus::Failure | TaskStatus::Cancelled => {
                    let detail = self
                        .session
                        .task_error_info(task)
                        .unwrap_or_else(|err| vec![err.to_string()]);
                    return Err(UpdateError::ImportTaskFailed {
                        task: task.to_string(),
                        status,
                        detail,
                    });
                }
                TaskStatus::Pending | TaskStatus::Cancelling => thread::sleep(self.poll_interval),
            }
        }
    }

    fn abandon(&self, task: &TaskRef) {
        match self.session.cancel_task(task) {
            Ok(()) => info!("cancelled import task {task}"),
            Err(err) => warn!("could not cancel import task {task}: {err}"),
        }
    }

    fn release(&self, task: &TaskRef) {
        match self.session.destroy_task(task) {
            Ok(()) => debug!("destroyed import task {task}"),
            Err(err) => warn!("could not destroy import task {task}: {err}"),
        }
    }
}
