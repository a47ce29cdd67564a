use std::collections::BTreeMap;
use std::path::{Component, Path};

use log::{debug, info};

use crate::catalog::CatalogIndex;
use crate::error::UpdateError;
use crate::model::{AppliedPatchSet, PatchRecord, PatchReference};

/// Patches still to be applied, keyed by name. Iteration order is the
/// lexicographic order of names, which fixes the processing order of a run.
pub type PendingPatches = BTreeMap<String, PatchRecord>;

/// Resolves every reference against the catalog and keeps the ones the pool
/// has not applied yet.
///
/// Fails before any record is returned if a referenced uuid resolves to zero
/// or several detail entries, if a surviving record is unusable as a cache
/// key or download source, or if two surviving records share a name.
pub fn diff(
    references: &[PatchReference],
    index: &CatalogIndex,
    applied: &AppliedPatchSet,
) -> Result<PendingPatches, UpdateError> {
    let mut pending = PendingPatches::new();

    for reference in references {
        let record = resolve(index, &reference.uuid)?;
        if applied.contains(&record.uuid) {
            debug!("patch {} ({}) already applied", record.name, record.uuid);
            continue;
        }

        validate_record(record)?;
        if let Some(existing) = pending.get(&record.name) {
            if existing.uuid == record.uuid {
                continue;
            }
            return Err(UpdateError::CatalogConsistency(format!(
                "patches {} and {} share the name '{}'",
                existing.uuid, record.uuid, record.name
            )));
        }

        info!("patch {} ({}) missing on the pool", record.name, record.uuid);
        pending.insert(record.name.clone(), record.clone());
    }

    Ok(pending)
}

fn resolve<'a>(index: &'a CatalogIndex, uuid: &str) -> Result<&'a PatchRecord, UpdateError> {
    match index.details(uuid) {
        [record] => Ok(record),
        [] => Err(UpdateError::CatalogConsistency(format!(
            "referenced patch {uuid} has no detail entry"
        ))),
        many => Err(UpdateError::CatalogConsistency(format!(
            "referenced patch {uuid} has {} detail entries",
            many.len()
        ))),
    }
}

fn validate_record(record: &PatchRecord) -> Result<(), UpdateError> {
    if !is_safe_file_stem(&record.name) {
        return Err(UpdateError::CatalogConsistency(format!(
            "patch {} has unusable name '{}'",
            record.uuid, record.name
        )));
    }
    if record.download_url.trim().is_empty() {
        return Err(UpdateError::CatalogConsistency(format!(
            "patch {} ({}) has no download url",
            record.name, record.uuid
        )));
    }
    Ok(())
}

/// Names become cache file names, so they must be a single normal path
/// component.
fn is_safe_file_stem(name: &str) -> bool {
    if name.trim().is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
