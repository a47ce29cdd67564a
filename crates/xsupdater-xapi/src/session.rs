use std::fmt;

use xsupdater_core::{AppliedPatchSet, PatchFormat, SoftwareVersion, TaskStatus, UpdateError};

/// Identity of the host the session is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostRecord {
    pub hostname: String,
    pub software_version: SoftwareVersion,
}

/// Opaque reference to a server-side task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef(String);

impl TaskRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advisory actions the control plane recommends once an artifact is
/// applied. Reported, never acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostApplyGuidance {
    pub codes: Vec<String>,
}

impl PostApplyGuidance {
    pub fn new(codes: Vec<String>) -> Self {
        Self { codes }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn describe(&self) -> Vec<String> {
        self.codes.iter().map(|code| describe_code(code)).collect()
    }
}

impl fmt::Display for PostApplyGuidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no action required");
        }
        f.write_str(&self.describe().join("; "))
    }
}

fn describe_code(code: &str) -> String {
    match code {
        "restartHost" => "restart the host".to_string(),
        "restartXAPI" => "restart the toolstack".to_string(),
        "restartHVM" => "restart HVM guests".to_string(),
        "restartPV" => "restart PV guests".to_string(),
        other => other.to_string(),
    }
}

/// The management-plane calls the update pipeline consumes.
///
/// Logging in is the job of the concrete session's constructor; everything
/// else is exposed here so the pipeline can run against any control plane
/// speaking these semantics.
pub trait ManagementSession {
    fn base_url(&self) -> &str;

    fn session_id(&self) -> &str;

    fn this_host(&self) -> Result<HostRecord, UpdateError>;

    fn applied_patches(&self, format: PatchFormat) -> Result<AppliedPatchSet, UpdateError>;

    fn create_task(&self, label: &str) -> Result<TaskRef, UpdateError>;

    fn task_status(&self, task: &TaskRef) -> Result<TaskStatus, UpdateError>;

    /// Opaque reference to whatever the task produced.
    fn task_result(&self, task: &TaskRef) -> Result<String, UpdateError>;

    fn task_error_info(&self, task: &TaskRef) -> Result<Vec<String>, UpdateError>;

    fn cancel_task(&self, task: &TaskRef) -> Result<(), UpdateError>;

    /// Drops a finished task from the pool's task list.
    fn destroy_task(&self, task: &TaskRef) -> Result<(), UpdateError>;

    /// Applies the imported artifact on every host of the pool.
    fn apply_patch(&self, format: PatchFormat, artifact: &str) -> Result<(), UpdateError>;

    fn apply_guidance(
        &self,
        format: PatchFormat,
        artifact: &str,
    ) -> Result<PostApplyGuidance, UpdateError>;

    fn logout(&self) -> Result<(), UpdateError>;
}
