use std::collections::BTreeSet;

/// A published patch as described by the update catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub download_url: String,
}

/// A `(uuid)` reference declared under a catalog `<version>` node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchReference {
    pub uuid: String,
}

impl PatchReference {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

/// UUIDs already installed on the pool, read once at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPatchSet {
    uuids: BTreeSet<String>,
}

impl AppliedPatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uuid: impl Into<String>) -> bool {
        self.uuids.insert(uuid.into())
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.uuids.contains(uuid)
    }

    pub fn len(&self) -> usize {
        self.uuids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AppliedPatchSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            uuids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
