mod cancel;
mod catalog;
mod error;
mod model;
mod platform;
mod reconcile;
mod task;

pub use cancel::CancellationToken;
pub use catalog::{CatalogIndex, RawCatalog, DEFAULT_CATALOG_URL};
pub use error::UpdateError;
pub use model::{AppliedPatchSet, PatchRecord, PatchReference};
pub use platform::{PatchFormat, Platform, SoftwareVersion, VersionSelector};
pub use reconcile::{diff, PendingPatches};
pub use task::TaskStatus;
